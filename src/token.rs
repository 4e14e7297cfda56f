// src/token.rs

use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// In-memory bearer token state shared by the API clients. Tokens are
/// re-requested when stale; nothing is persisted between runs.
#[derive(Debug, Clone)]
pub struct StoredToken {
    pub access_token: String,
    pub expires_at_epoch_secs: u64,
}

impl StoredToken {
    pub fn new(access_token: String, expires_in_secs: Option<u64>) -> Self {
        let lifetime = expires_in_secs.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        StoredToken {
            access_token,
            expires_at_epoch_secs: unix_now() + lifetime,
        }
    }

    /// True when the token is past, or within `buffer_secs` of, its expiry.
    pub fn is_expired(&self, buffer_secs: u64) -> bool {
        unix_now() + buffer_secs >= self.expires_at_epoch_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_expired() {
        let token = StoredToken::new("abc".to_string(), Some(3600));
        assert!(!token.is_expired(60));
    }

    #[test]
    fn token_inside_buffer_counts_as_expired() {
        let token = StoredToken::new("abc".to_string(), Some(30));
        assert!(token.is_expired(60));
    }

    #[test]
    fn missing_expiry_falls_back_to_default_lifetime() {
        let token = StoredToken::new("abc".to_string(), None);
        assert!(!token.is_expired(60));
        assert!(token.expires_at_epoch_secs > unix_now());
    }
}
