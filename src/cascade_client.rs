// src/cascade_client.rs

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::token::StoredToken;

// Constants
pub const CASCADE_TOKEN_URL: &str = "https://api.iris.co.uk/oauth2/v1/token";
pub const CASCADE_API_BASE_URL: &str = "https://api.iris.co.uk/hr/v2";
const PAGE_SIZE: usize = 250;
const PAGE_DELAY_MS: u64 = 350;
const TOKEN_EXPIRY_BUFFER_SECS: u64 = 60;
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub type EmployeeId = String;

// --- Error Type ---

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Failed to parse JSON response: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Cascade token request failed with status {status}: {message}")]
    TokenRequest { status: u16, message: String },

    #[error("Cascade API error {status} on '{endpoint}': {message}")]
    Api {
        status: u16,
        endpoint: String,
        message: String,
    },

    #[error("Cascade API rate limit exceeded")]
    RateLimitExceeded,
}

// --- API Data Structures ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CascadeEmployee {
    pub id: EmployeeId,
    #[serde(default)]
    pub display_id: Option<String>,
    #[serde(default)]
    pub known_as: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub national_insurance_number: Option<String>,
    #[serde(default)]
    pub continuous_service_date: Option<String>,
    #[serde(default)]
    pub employment_start_date: Option<String>,
    #[serde(default)]
    pub employment_left_date: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CascadeJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub hierarchy_node_id: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub line_manager_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CascadeHierarchyNode {
    pub id: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    #[serde(rename = "@odata.count", default)]
    count: Option<u64>,
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CascadeCredentials {
    pub client_id: String,
    pub client_secret: String,
}

// --- Lookup Seam ---

/// Fallback single-record fetch used when a line manager does not appear in
/// the bulk employee download (left employees stay referenced as managers).
#[async_trait]
pub trait LineManagerLookup: Send + Sync {
    async fn employee_by_id(
        &self,
        employee_id: &str,
    ) -> Result<Option<CascadeEmployee>, CascadeError>;
}

// --- Client ---

/// Client for the Cascade HR REST API. Holds one HTTP client and an
/// in-memory client-credentials token that is re-requested when stale.
pub struct CascadeClient {
    http: Client,
    credentials: CascadeCredentials,
    token: Arc<Mutex<Option<StoredToken>>>,
}

impl CascadeClient {
    pub fn new(credentials: CascadeCredentials) -> Result<Self, CascadeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(CascadeClient {
            http,
            credentials,
            token: Arc::new(Mutex::new(None)),
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, CascadeError> {
        let full = format!("{}/{}", CASCADE_API_BASE_URL, endpoint);
        Ok(Url::parse(&full)?)
    }

    async fn get_valid_access_token(&self) -> Result<String, CascadeError> {
        let mut guard = self.token.lock().await;
        if let Some(stored) = guard.as_ref() {
            if !stored.is_expired(TOKEN_EXPIRY_BUFFER_SECS) {
                return Ok(stored.access_token.clone());
            }
            debug!("Cascade access token stale, requesting a new one");
        }
        let fresh = self.request_token().await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    async fn request_token(&self) -> Result<StoredToken, CascadeError> {
        info!("Requesting Cascade access token");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        let response = self.http.post(CASCADE_TOKEN_URL).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            error!("Cascade token request failed ({}): {}", status, message);
            return Err(CascadeError::TokenRequest {
                status: status.as_u16(),
                message,
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(StoredToken::new(token.access_token, token.expires_in))
    }

    async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<T, CascadeError> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Cascade rate limit hit on '{}'", endpoint);
            return Err(CascadeError::RateLimitExceeded);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            error!("Cascade API error {} on '{}': {}", status, endpoint, message);
            return Err(CascadeError::Api {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                message,
            });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            error!("Failed to deserialize '{}' response: {}", endpoint, e);
            CascadeError::JsonParse(e)
        })
    }

    /// Fetches every page of an endpoint with `$top`/`$skip`, asking the
    /// server for a total count on the first page. Stops on a short page.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        filter: Option<&str>,
    ) -> Result<Vec<T>, CascadeError> {
        let url = self.endpoint_url(endpoint)?;
        let mut records: Vec<T> = Vec::new();
        let mut skip = 0usize;
        let mut reported_total: Option<u64> = None;

        loop {
            let token = self.get_valid_access_token().await?;
            let mut request = self
                .http
                .get(url.clone())
                .bearer_auth(token)
                .query(&[("$top", PAGE_SIZE.to_string()), ("$skip", skip.to_string())]);
            if skip == 0 {
                request = request.query(&[("$count", "true")]);
            }
            if let Some(filter) = filter {
                request = request.query(&[("$filter", filter)]);
            }

            let page: ODataPage<T> = self.send_and_deserialize(request, endpoint).await?;
            if skip == 0 {
                reported_total = page.count;
                if let Some(count) = reported_total {
                    info!("'{}': server reports {} records", endpoint, count);
                }
            }
            let fetched = page.value.len();
            records.extend(page.value);
            debug!(
                "'{}': page at offset {} returned {} records",
                endpoint, skip, fetched
            );

            if fetched < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
            sleep(Duration::from_millis(PAGE_DELAY_MS)).await;
        }

        if let Some(count) = reported_total {
            if records.len() as u64 != count {
                warn!(
                    "'{}': fetched {} records but server reported {}",
                    endpoint,
                    records.len(),
                    count
                );
            }
        }
        Ok(records)
    }

    pub async fn fetch_employees(&self) -> Result<Vec<CascadeEmployee>, CascadeError> {
        let records = self.get_paginated("employees", None).await?;
        let employees = dedup_by_key(records, |e: &CascadeEmployee| Some(e.id.clone()));
        info!("Fetched {} Cascade employees", employees.len());
        Ok(employees)
    }

    pub async fn fetch_jobs(&self) -> Result<Vec<CascadeJob>, CascadeError> {
        let records = self.get_paginated("jobs", None).await?;
        let jobs = dedup_by_key(records, |j: &CascadeJob| j.id.clone());
        info!("Fetched {} Cascade job records", jobs.len());
        Ok(jobs)
    }

    pub async fn fetch_hierarchy(&self) -> Result<Vec<CascadeHierarchyNode>, CascadeError> {
        let records = self.get_paginated("hierarchy", None).await?;
        let nodes = dedup_by_key(records, |n: &CascadeHierarchyNode| Some(n.id.clone()));
        info!("Fetched {} hierarchy nodes", nodes.len());
        Ok(nodes)
    }

    /// Employees whose employment ended inside the reporting window.
    pub async fn fetch_leavers(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CascadeEmployee>, CascadeError> {
        let filter = format!(
            "EmploymentLeftDate ge {}T00:00:00Z and EmploymentLeftDate le {}T23:59:59Z",
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );
        let records = self.get_paginated("employees", Some(&filter)).await?;
        let leavers = dedup_by_key(records, |e: &CascadeEmployee| Some(e.id.clone()));
        info!(
            "Fetched {} leavers between {} and {}",
            leavers.len(),
            from,
            to
        );
        Ok(leavers)
    }

    /// Single employee record. A 404 is a clean miss, not an error.
    pub async fn fetch_employee(
        &self,
        employee_id: &str,
    ) -> Result<Option<CascadeEmployee>, CascadeError> {
        let endpoint = format!("employees/{}", employee_id);
        let url = self.endpoint_url(&endpoint)?;
        let token = self.get_valid_access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Employee '{}' not found in Cascade", employee_id);
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Cascade rate limit hit on '{}'", endpoint);
            return Err(CascadeError::RateLimitExceeded);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            error!("Cascade API error {} on '{}': {}", status, endpoint, message);
            return Err(CascadeError::Api {
                status: status.as_u16(),
                endpoint,
                message,
            });
        }
        let body = response.text().await?;
        let employee: CascadeEmployee = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to deserialize employee '{}': {}", employee_id, e);
            CascadeError::JsonParse(e)
        })?;
        Ok(Some(employee))
    }
}

#[async_trait]
impl LineManagerLookup for CascadeClient {
    async fn employee_by_id(
        &self,
        employee_id: &str,
    ) -> Result<Option<CascadeEmployee>, CascadeError> {
        self.fetch_employee(employee_id).await
    }
}

/// Removes records sharing a key, keeping the position of the first
/// occurrence and the content of the last (pages can drift while the job
/// walks them). Records with no key are kept untouched.
fn dedup_by_key<T, K>(records: Vec<T>, key: impl Fn(&T) -> Option<K>) -> Vec<T>
where
    K: Hash + Eq,
{
    let mut seen: HashMap<K, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(records.len());
    for record in records {
        match key(&record) {
            None => out.push(record),
            Some(k) => match seen.entry(k) {
                Entry::Occupied(slot) => {
                    out[*slot.get()] = record;
                }
                Entry::Vacant(slot) => {
                    slot.insert(out.len());
                    out.push(record);
                }
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odata_page_parses_count_and_values() {
        let body = r#"{
            "@odata.context": "https://api.iris.co.uk/hr/v2/$metadata#Employees",
            "@odata.count": 2,
            "value": [
                {
                    "Id": "EMP001",
                    "DisplayId": "1001",
                    "KnownAs": "Ann",
                    "LastName": "Field",
                    "NationalInsuranceNumber": "QQ123456C",
                    "ContinuousServiceDate": "2018-04-01T00:00:00Z",
                    "EmploymentStartDate": "2018-04-01T00:00:00Z",
                    "EmploymentLeftDate": null,
                    "DateOfBirth": "1990-06-15T00:00:00Z"
                },
                { "Id": "EMP002" }
            ]
        }"#;
        let page: ODataPage<CascadeEmployee> =
            serde_json::from_str(body).expect("page should parse");
        assert_eq!(page.count, Some(2));
        assert_eq!(page.value.len(), 2);
        assert_eq!(page.value[0].display_id.as_deref(), Some("1001"));
        assert_eq!(page.value[0].employment_left_date, None);
        // Missing optional fields default rather than failing the whole page.
        assert_eq!(page.value[1].id, "EMP002");
        assert_eq!(page.value[1].known_as, None);
    }

    #[test]
    fn job_record_parses_pascal_case_fields() {
        let body = r#"{
            "Id": "JOB9",
            "EmployeeId": "EMP001",
            "HierarchyNodeId": "NODE4",
            "JobTitle": "Quantity Surveyor",
            "LineManagerId": "EMP007",
            "StartDate": "2021-01-04T00:00:00Z",
            "EndDate": null
        }"#;
        let job: CascadeJob = serde_json::from_str(body).expect("job should parse");
        assert_eq!(job.employee_id, "EMP001");
        assert_eq!(job.hierarchy_node_id.as_deref(), Some("NODE4"));
        assert_eq!(job.end_date, None);
    }

    #[test]
    fn dedup_keeps_first_position_and_last_content() {
        let records = vec![
            ("a", 1),
            ("b", 1),
            ("a", 2),
            ("c", 1),
        ];
        let out = dedup_by_key(records, |r| Some(r.0));
        assert_eq!(out, vec![("a", 2), ("b", 1), ("c", 1)]);
    }

    #[test]
    fn dedup_keeps_keyless_records() {
        let records = vec![(None::<&str>, 1), (None, 2), (Some("x"), 3), (Some("x"), 4)];
        let out = dedup_by_key(records, |r| r.0);
        assert_eq!(out, vec![(None, 1), (None, 2), (Some("x"), 4)]);
    }
}
