// src/adp_client.rs

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::token::StoredToken;

// Constants
pub const ADP_TOKEN_URL: &str = "https://accounts.adp.com/auth/oauth/v2/token";
pub const ADP_API_BASE_URL: &str = "https://api.adp.com";
const PAGE_SIZE: usize = 100;
const PAGE_DELAY_MS: u64 = 250;
const TOKEN_EXPIRY_BUFFER_SECS: u64 = 60;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum AdpError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to parse JSON response: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("ADP token request failed with status {status}: {message}")]
    TokenRequest { status: u16, message: String },

    #[error("ADP API error {status}: {message}")]
    Api { status: u16, message: String },
}

// --- API Data Structures ---
// Trimmed view of the ADP worker payload; only the fields the
// reconciliation needs are modelled.

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdpWorker {
    #[serde(rename = "associateOID", default)]
    pub associate_oid: Option<String>,
    #[serde(rename = "workerID", default)]
    pub worker_id: Option<AdpWorkerId>,
    #[serde(default)]
    pub person: Option<AdpPerson>,
    #[serde(default)]
    pub worker_status: Option<AdpWorkerStatus>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdpWorkerId {
    #[serde(default)]
    pub id_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdpPerson {
    #[serde(default)]
    pub legal_name: Option<AdpLegalName>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdpLegalName {
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name_1: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdpWorkerStatus {
    #[serde(default)]
    pub status_code: Option<AdpCode>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdpCode {
    #[serde(default)]
    pub code_value: Option<String>,
}

impl AdpWorker {
    /// The payroll number, the key the reconciliation matches Cascade
    /// `DisplayId` values against.
    pub fn worker_number(&self) -> Option<&str> {
        self.worker_id.as_ref().and_then(|w| w.id_value.as_deref())
    }

    pub fn full_name(&self) -> String {
        let name = self.person.as_ref().and_then(|p| p.legal_name.as_ref());
        let given = name.and_then(|n| n.given_name.as_deref()).unwrap_or("");
        let family = name.and_then(|n| n.family_name_1.as_deref()).unwrap_or("");
        format!("{} {}", given, family).trim().to_string()
    }

    pub fn is_active(&self) -> bool {
        self.worker_status
            .as_ref()
            .and_then(|s| s.status_code.as_ref())
            .and_then(|c| c.code_value.as_deref())
            .map(|code| code.eq_ignore_ascii_case("active"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct AdpWorkersPage {
    #[serde(default)]
    workers: Vec<AdpWorker>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdpCredentials {
    pub client_id: String,
    pub client_secret: String,
}

// --- Client ---

pub struct AdpClient {
    http: Client,
    credentials: AdpCredentials,
    token: Arc<Mutex<Option<StoredToken>>>,
}

impl AdpClient {
    pub fn new(credentials: AdpCredentials) -> Result<Self, AdpError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(AdpClient {
            http,
            credentials,
            token: Arc::new(Mutex::new(None)),
        })
    }

    async fn get_valid_access_token(&self) -> Result<String, AdpError> {
        let mut guard = self.token.lock().await;
        if let Some(stored) = guard.as_ref() {
            if !stored.is_expired(TOKEN_EXPIRY_BUFFER_SECS) {
                return Ok(stored.access_token.clone());
            }
            debug!("ADP access token stale, requesting a new one");
        }
        let fresh = self.request_token().await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    async fn request_token(&self) -> Result<StoredToken, AdpError> {
        info!("Requesting ADP access token");
        let basic = BASE64_STANDARD.encode(format!(
            "{}:{}",
            self.credentials.client_id, self.credentials.client_secret
        ));
        let response = self
            .http
            .post(ADP_TOKEN_URL)
            .header(AUTHORIZATION, format!("Basic {}", basic))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            error!("ADP token request failed ({}): {}", status, message);
            return Err(AdpError::TokenRequest {
                status: status.as_u16(),
                message,
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(StoredToken::new(token.access_token, token.expires_in))
    }

    /// All workers, page by page. ADP answers 204 once the offset runs past
    /// the last record.
    pub async fn fetch_workers(&self) -> Result<Vec<AdpWorker>, AdpError> {
        let url = format!("{}/hr/v2/workers", ADP_API_BASE_URL);
        let mut workers: Vec<AdpWorker> = Vec::new();
        let mut skip = 0usize;

        loop {
            let token = self.get_valid_access_token().await?;
            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&[("$top", PAGE_SIZE.to_string()), ("$skip", skip.to_string())])
                .send()
                .await?;
            let status = response.status();
            if status == StatusCode::NO_CONTENT {
                break;
            }
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<no body>".to_string());
                error!("ADP workers fetch failed ({}): {}", status, message);
                return Err(AdpError::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            let body = response.text().await?;
            let page: AdpWorkersPage = serde_json::from_str(&body).map_err(|e| {
                error!("Failed to deserialize ADP workers page: {}", e);
                AdpError::JsonParse(e)
            })?;

            let fetched = page.workers.len();
            workers.extend(page.workers);
            debug!("ADP workers page at offset {}: {} records", skip, fetched);

            if fetched < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
            sleep(Duration::from_millis(PAGE_DELAY_MS)).await;
        }

        info!("Fetched {} ADP workers", workers.len());
        Ok(workers)
    }
}
