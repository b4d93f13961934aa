//! # Tribble client
//!
//! Implements [`Ingestor`] against Tribble's external document-ingest API.
//!
//! - Uploads are multipart (`file`, `metadata`, `user`) with a bearer token.
//! - Both endpoints answer `{"success": bool, "response": {...}, "error": "..."}`; a `false`
//!   success flag is a [`RemoteError::Protocol`] even when the HTTP status is 200.
//! - Uploads are not idempotent. Nothing in here retries.

use std::env;
use std::path::Path;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use clickhelper_core::contract::{DocumentMetadata, Ingestor, TaskState};
use clickhelper_core::error::RemoteError;

pub const DEFAULT_BASE_URL: &str = "https://my.tribble.ai";

pub struct TribbleClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    user_email: String,
}

impl TribbleClient {
    pub fn new(base_url: &str, api_token: String, user_email: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            user_email,
        }
    }

    /// Build a client from `TRIBBLE_API_TOKEN` and `TRIBBLE_USER_EMAIL`. The base URL comes from
    /// the config file, then `TRIBBLE_BASE_URL`, then [`DEFAULT_BASE_URL`].
    pub fn new_from_env(base_url: Option<&str>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let api_token = env::var("TRIBBLE_API_TOKEN").map_err(|e| {
            error!(error = ?e, "TRIBBLE_API_TOKEN missing in environment");
            anyhow!("TRIBBLE_API_TOKEN must be set for tribble uploads")
        })?;
        let user_email = env::var("TRIBBLE_USER_EMAIL").map_err(|e| {
            error!(error = ?e, "TRIBBLE_USER_EMAIL missing in environment");
            anyhow!("TRIBBLE_USER_EMAIL must be set for tribble uploads")
        })?;
        let base_url = base_url
            .map(str::to_string)
            .or_else(|| env::var("TRIBBLE_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        info!(
            base_url = %base_url,
            user_email = %user_email,
            "Initialized Tribble client from environment"
        );
        Ok(Self::new(&base_url, api_token, user_email))
    }

    async fn read_envelope(&self, resp: reqwest::Response) -> Result<Envelope, RemoteError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| RemoteError::Protocol(format!("invalid JSON from Tribble: {e}")))?;
        if !envelope.success {
            let reason = envelope
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(RemoteError::Protocol(format!("Tribble reported failure: {reason}")));
        }
        Ok(envelope)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    response: Value,
    error: Option<String>,
}

/// Map Tribble's processing status onto the generic job states.
pub fn ingestion_state(status: &str) -> TaskState {
    match status {
        "processed" => TaskState::Succeeded,
        "failed" | "error" => TaskState::Failed(format!("ingestion {status}")),
        _ => TaskState::Running,
    }
}

/// Job ids arrive as strings or numbers depending on the deployment.
fn job_id(response: &Value) -> Option<String> {
    match response.get("job_id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Ingestor for TribbleClient {
    async fn upload_document(
        &self,
        file_path: &Path,
        metadata: &DocumentMetadata,
    ) -> Result<String, RemoteError> {
        let bytes = tokio::fs::read(file_path).await.map_err(|e| {
            RemoteError::Transport(format!("cannot read {}: {e}", file_path.display()))
        })?;
        let digest = format!("{:x}", Sha256::digest(&bytes));
        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        info!(
            path = %file_path.display(),
            label = %metadata.label,
            size = bytes.len(),
            sha256 = %digest,
            "Uploading PDF to Tribble"
        );

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("metadata", serde_json::json!({ "label": metadata.label }).to_string())
            .text("user", self.user_email.clone());

        let resp = self
            .http
            .post(format!("{}/api/external/upload", self.base_url))
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let envelope = self.read_envelope(resp).await?;
        let job = job_id(&envelope.response)
            .ok_or_else(|| RemoteError::Protocol("upload response has no job_id".into()))?;
        info!(job_id = %job, "Tribble accepted upload");
        Ok(job)
    }

    async fn ingestion_status(&self, job_id: &str) -> Result<TaskState, RemoteError> {
        let resp = self
            .http
            .get(format!("{}/api/external/upload/status", self.base_url))
            .bearer_auth(&self.api_token)
            .query(&[("job_id", job_id)])
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let envelope = self.read_envelope(resp).await?;
        let status = envelope
            .response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let state = ingestion_state(status);
        if state == TaskState::Running && status != "processing" {
            warn!(job_id, status, "Unknown Tribble job status; treating as still processing");
        } else {
            debug!(job_id, status, "Tribble job status");
        }
        Ok(state)
    }
}
