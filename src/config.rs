// src/config.rs

use std::path::PathBuf;

use serde::Deserialize;

/// Runtime configuration, read from the environment. Everything has a
/// default except what genuinely differs between deployments.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Directory report files are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// GCS bucket finished reports are uploaded to. Unset keeps files local.
    #[serde(default)]
    pub report_bucket: Option<String>,

    /// Secret Manager secret holding the Cascade client id/secret JSON.
    #[serde(default = "default_cascade_secret_name")]
    pub cascade_secret_name: String,

    /// Secret Manager secret holding the ADP client id/secret JSON.
    #[serde(default = "default_adp_secret_name")]
    pub adp_secret_name: String,

    /// Overrides the project id discovered from the credentials.
    #[serde(default)]
    pub gcp_project_id: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_cascade_secret_name() -> String {
    "cascade-api-credentials".to_string()
}

fn default_adp_secret_name() -> String {
    "adp-api-credentials".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}
