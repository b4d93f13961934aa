//! # ClickHelp client
//!
//! Implements [`DocsPlatform`] against the ClickHelp REST API (v1) with HTTP basic auth.
//!
//! - Construct with [`ClickHelpClient::new_from_env`] (`CLICKHELP_USERNAME`, `CLICKHELP_API_KEY`,
//!   portal URL from the config file or `CLICKHELP_PORTAL_URL`).
//! - ClickHelp prefixes some JSON bodies with a UTF-8 BOM; it is stripped before decoding.
//! - Storage files are fetched with `format=base64` and decoded here, so callers only see bytes.

use std::env;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use clickhelper_core::contract::{
    DocsPlatform, ExportRequest, PlatformItem, PlatformSnapshot, PublicationRequest,
    PublishRequest, TaskHandle, TaskState,
};
use clickhelper_core::error::RemoteError;

const BOM: &[u8] = b"\xEF\xBB\xBF";

pub struct ClickHelpClient {
    http: reqwest::Client,
    portal_url: Url,
    username: String,
    api_key: String,
}

impl ClickHelpClient {
    pub fn new(portal_url: &str, username: String, api_key: String) -> anyhow::Result<Self> {
        let portal_url = Url::parse(portal_url.trim_end_matches('/'))
            .with_context(|| format!("invalid ClickHelp portal URL '{portal_url}'"))?;
        if portal_url.cannot_be_a_base() {
            return Err(anyhow!("ClickHelp portal URL '{portal_url}' cannot carry a path"));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            portal_url,
            username,
            api_key,
        })
    }

    /// Build a client from the environment. `portal_url` from the config file wins over
    /// `CLICKHELP_PORTAL_URL`.
    pub fn new_from_env(portal_url: Option<&str>) -> anyhow::Result<Self> {
        let portal_url = match portal_url {
            Some(url) => url.to_string(),
            None => env::var("CLICKHELP_PORTAL_URL").map_err(|e| {
                error!(error = ?e, "CLICKHELP_PORTAL_URL missing and no clickhelp.portal_url configured");
                anyhow!("ClickHelp portal URL not configured (clickhelp.portal_url or CLICKHELP_PORTAL_URL)")
            })?,
        };
        let username = env::var("CLICKHELP_USERNAME").map_err(|e| {
            error!(error = ?e, "CLICKHELP_USERNAME missing in environment");
            anyhow!("CLICKHELP_USERNAME must be set")
        })?;
        let api_key = env::var("CLICKHELP_API_KEY").map_err(|e| {
            error!(error = ?e, "CLICKHELP_API_KEY missing in environment");
            anyhow!("CLICKHELP_API_KEY must be set")
        })?;
        info!(
            portal_url = %portal_url,
            username = %username,
            api_key_set = !api_key.is_empty(),
            "Initialized ClickHelp client from environment"
        );
        Self::new(&portal_url, username, api_key)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.portal_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v1"]).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.api_key))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Vec<u8>, RemoteError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = resp.status();
        let url = resp.url().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(strip_bom(&body)).into_owned();
            error!(%url, status = status.as_u16(), %body, "ClickHelp request failed");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body.to_vec())
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RemoteError> {
        let body = self.send(req).await?;
        decode_json(&body)
    }

    async fn storage_file(&self, relative_path: &str) -> Result<Vec<u8>, RemoteError> {
        let mut segments = vec!["storage"];
        segments.extend(relative_path.split('/').filter(|s| !s.is_empty()));
        let req = self
            .request(Method::GET, self.endpoint(&segments))
            .query(&[("format", "base64")]);
        let file: StorageFile = self.send_json(req).await?;
        file.decode()
    }
}

/// Drop a leading UTF-8 byte-order mark, if any.
pub fn strip_bom(body: &[u8]) -> &[u8] {
    body.strip_prefix(BOM).unwrap_or(body)
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, RemoteError> {
    serde_json::from_slice(strip_bom(body))
        .map_err(|e| RemoteError::Protocol(format!("invalid JSON from ClickHelp: {e}")))
}

/// Path inside ClickHelp storage, without the leading `Storage/` folder.
pub fn storage_relative_path(path: &str) -> &str {
    let path = path.trim_matches('/');
    path.strip_prefix("Storage/").unwrap_or(path).trim_start_matches('/')
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectEntry {
    id: String,
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskStarted {
    task_key: Option<String>,
}

impl TaskStarted {
    fn handle(self) -> Option<TaskHandle> {
        self.task_key
            .filter(|key| !key.is_empty())
            .map(TaskHandle::new)
    }
}

/// Body of `GET /api/v1/tasks/{key}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusBody {
    pub is_succeeded: Option<bool>,
    #[serde(default)]
    pub is_working: bool,
    #[serde(default)]
    pub overall_progress: f64,
    #[serde(default = "default_max_progress")]
    pub max_overall_progress: f64,
    #[serde(default)]
    pub status_text: Option<String>,
}

fn default_max_progress() -> f64 {
    100.0
}

impl TaskStatusBody {
    /// A task is finished once `isSucceeded` is set and progress reached its maximum.
    pub fn state(&self) -> TaskState {
        match self.is_succeeded {
            Some(succeeded) if self.overall_progress >= self.max_overall_progress => {
                if succeeded {
                    TaskState::Succeeded
                } else {
                    let reason = self
                        .status_text
                        .as_deref()
                        .map(|text| text.replace("<br/>", " | ").trim().to_string())
                        .filter(|text| !text.is_empty())
                        .unwrap_or_else(|| "task failed".to_string());
                    TaskState::Failed(reason)
                }
            }
            _ if self.is_working => TaskState::Running,
            _ => TaskState::Queued,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StorageFile {
    content: Option<String>,
}

impl StorageFile {
    fn decode(self) -> Result<Vec<u8>, RemoteError> {
        let content = self
            .content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RemoteError::Protocol("storage response has no 'content'".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(content.trim())
            .map_err(|e| RemoteError::Protocol(format!("storage content is not base64: {e}")))
    }
}

fn no_tags(tags: &&[String]) -> bool {
    tags.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    pub_id: &'a str,
    pub_name: &'a str,
    is_publish_only_ready_topics: bool,
    pub_visibility: &'static str,
    #[serde(skip_serializing_if = "no_tags")]
    output_tags: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishBody<'a> {
    updated_pub_id: &'a str,
    pub_name: &'a str,
    update_mode: &'static str,
    is_publish_only_ready_topics: bool,
    pub_visibility: &'static str,
    #[serde(skip_serializing_if = "no_tags")]
    output_tags: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    title: &'a str,
    visibility: &'static str,
    output_tags: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportBody<'a> {
    format: &'static str,
    export_preset_name: &'a str,
    output_file_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupBody<'a> {
    output_file_name: &'a str,
}

#[async_trait]
impl DocsPlatform for ClickHelpClient {
    async fn list_projects_and_publications(&self) -> Result<PlatformSnapshot, RemoteError> {
        let req = self.request(Method::GET, self.endpoint(&["projects"]));
        let entries: Vec<ProjectEntry> = self.send_json(req).await?;
        debug!(items = entries.len(), "Fetched ClickHelp project listing");
        Ok(PlatformSnapshot::from_items(entries.into_iter().map(
            |entry| PlatformItem {
                id: entry.id,
                parent_id: entry.parent_id,
            },
        )))
    }

    async fn create_publication(
        &self,
        req: &PublicationRequest,
    ) -> Result<Option<TaskHandle>, RemoteError> {
        let body = CreateBody {
            pub_id: &req.publication_id,
            pub_name: &req.title,
            is_publish_only_ready_topics: true,
            pub_visibility: req.visibility.as_api_str(),
            output_tags: &req.output_tags,
        };
        info!(
            project_id = %req.project_id,
            publication_id = %req.publication_id,
            "Creating ClickHelp publication"
        );
        let http = self
            .request(Method::POST, self.endpoint(&["projects", &req.project_id]))
            .query(&[("action", "publish")])
            .json(&body);
        let started: TaskStarted = self.send_json(http).await?;
        Ok(started.handle())
    }

    async fn update_publication(&self, req: &PublicationRequest) -> Result<(), RemoteError> {
        let body = UpdateBody {
            title: &req.title,
            visibility: req.visibility.as_api_str(),
            output_tags: &req.output_tags,
        };
        info!(publication_id = %req.publication_id, "Updating ClickHelp publication metadata");
        let http = self
            .request(Method::PUT, self.endpoint(&["projects", &req.publication_id]))
            .json(&body);
        self.send(http).await?;
        Ok(())
    }

    async fn publish(&self, req: &PublishRequest) -> Result<Option<TaskHandle>, RemoteError> {
        let body = PublishBody {
            updated_pub_id: &req.publication_id,
            pub_name: &req.title,
            update_mode: req.update_mode.as_api_str(),
            is_publish_only_ready_topics: true,
            pub_visibility: req.visibility.as_api_str(),
            output_tags: &req.output_tags,
        };
        let http = self
            .request(Method::POST, self.endpoint(&["projects", &req.project_id]))
            .query(&[("action", "publish")])
            .json(&body);
        let started: TaskStarted = self.send_json(http).await?;
        Ok(started.handle())
    }

    async fn export_pdf(&self, req: &ExportRequest) -> Result<TaskHandle, RemoteError> {
        let body = ExportBody {
            format: "Pdf",
            export_preset_name: &req.export_preset_name,
            output_file_name: format!("Storage/Exported/{}.pdf", req.title),
        };
        let http = self
            .request(Method::POST, self.endpoint(&["projects", &req.publication_id]))
            .query(&[("action", "export")])
            .json(&body);
        let started: TaskStarted = self.send_json(http).await?;
        started
            .handle()
            .ok_or_else(|| RemoteError::Protocol("export response has no taskKey".into()))
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskState, RemoteError> {
        let req = self.request(Method::GET, self.endpoint(&["tasks", task_id]));
        let body: TaskStatusBody = self.send_json(req).await?;
        debug!(
            task_id,
            progress = body.overall_progress,
            max = body.max_overall_progress,
            "ClickHelp task progress"
        );
        Ok(body.state())
    }

    async fn download_exported_pdf(&self, title: &str) -> Result<Vec<u8>, RemoteError> {
        self.storage_file(&format!("Exported/{title}.pdf")).await
    }

    async fn start_backup(
        &self,
        project_id: &str,
        output_file: &str,
    ) -> Result<TaskHandle, RemoteError> {
        let http = self
            .request(Method::POST, self.endpoint(&["projects", project_id]))
            .query(&[("action", "download")])
            .json(&BackupBody {
                output_file_name: output_file,
            });
        let started: TaskStarted = self.send_json(http).await?;
        started
            .handle()
            .ok_or_else(|| RemoteError::Protocol("backup response has no taskKey".into()))
    }

    async fn download_storage_file(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.storage_file(storage_relative_path(path)).await
    }

    async fn delete_storage_file(&self, path: &str) -> Result<(), RemoteError> {
        let relative = storage_relative_path(path);
        let mut segments = vec!["storage"];
        segments.extend(relative.split('/').filter(|s| !s.is_empty()));
        self.send(self.request(Method::DELETE, self.endpoint(&segments)))
            .await?;
        info!(path = relative, "Deleted file from ClickHelp storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(json: &str) -> TaskState {
        serde_json::from_str::<TaskStatusBody>(json).unwrap().state()
    }

    #[test]
    fn bom_is_stripped_before_decoding() {
        let body = b"\xEF\xBB\xBF{\"taskKey\":\"abc\"}";
        let started: TaskStarted = decode_json(body).unwrap();
        assert_eq!(started.handle(), Some(TaskHandle::new("abc")));
    }

    #[test]
    fn task_is_terminal_only_at_full_progress() {
        assert_eq!(
            status(r#"{"isSucceeded":true,"isWorking":false,"overallProgress":100,"maxOverallProgress":100}"#),
            TaskState::Succeeded
        );
        assert_eq!(
            status(r#"{"isSucceeded":true,"isWorking":true,"overallProgress":40,"maxOverallProgress":100}"#),
            TaskState::Running
        );
        assert_eq!(
            status(r#"{"isSucceeded":null,"isWorking":false,"overallProgress":0}"#),
            TaskState::Queued
        );
    }

    #[test]
    fn failed_task_carries_cleaned_status_text() {
        assert_eq!(
            status(r#"{"isSucceeded":false,"overallProgress":100,"maxOverallProgress":100,"statusText":"Export failed<br/>Missing preset"}"#),
            TaskState::Failed("Export failed | Missing preset".into())
        );
    }

    #[test]
    fn storage_paths_lose_their_storage_prefix() {
        assert_eq!(
            storage_relative_path("Storage/Backups/docs-backup.zip"),
            "Backups/docs-backup.zip"
        );
        assert_eq!(storage_relative_path("/Exported/a.pdf"), "Exported/a.pdf");
    }

    #[test]
    fn endpoint_escapes_titles() {
        let client =
            ClickHelpClient::new("https://docs.example.com/", "u".into(), "k".into()).unwrap();
        let url = client.endpoint(&["storage", "Exported", "Release Notes #2.pdf"]);
        assert_eq!(
            url.as_str(),
            "https://docs.example.com/api/v1/storage/Exported/Release%20Notes%20%232.pdf"
        );
    }

    #[test]
    fn storage_file_without_content_is_a_protocol_error() {
        let file: StorageFile = decode_json(b"{\"fileName\":\"x.pdf\"}").unwrap();
        assert!(matches!(file.decode(), Err(RemoteError::Protocol(_))));
    }
}
