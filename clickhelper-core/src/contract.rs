#![allow(unused)]

//! # contract: façade traits for the three remote services
//!
//! The engines in this crate talk to the outside world exclusively through the traits below:
//!
//! - [`DocsPlatform`]: the documentation platform (projects, publications, tasks, storage)
//! - [`Ingestor`]: the document-search ingestion service that receives exported PDFs
//! - [`ObjectStore`]: the object store that holds project backup archives
//!
//! Implementations own transport, authentication and wire formats and own no business logic.
//! Every method maps to one backend call and is assumed idempotent unless documented otherwise.
//!
//! ## Mocking & Testing
//! - Each trait is annotated for `mockall`, so consumers get `MockDocsPlatform`,
//!   `MockIngestor` and `MockObjectStore` under the `test-export-mocks` feature.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::{automock, predicate::*};
use serde::Serialize;

use crate::error::RemoteError;
use crate::model::{UpdateMode, Visibility};

/// One entry of the platform's project listing. Projects have no parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformItem {
    pub id: String,
    pub parent_id: Option<String>,
}

/// Read-only view of every project and publication known to the platform, fetched once per run.
#[derive(Debug, Clone, Default)]
pub struct PlatformSnapshot {
    projects: HashSet<String>,
    publications: HashMap<String, String>,
}

impl PlatformSnapshot {
    pub fn from_items(items: impl IntoIterator<Item = PlatformItem>) -> Self {
        let mut snapshot = Self::default();
        for item in items {
            match item.parent_id {
                None => {
                    snapshot.projects.insert(item.id);
                }
                Some(parent) => {
                    snapshot.publications.insert(item.id, parent);
                }
            }
        }
        snapshot
    }

    pub fn has_project(&self, project_id: &str) -> bool {
        self.projects.contains(project_id)
    }

    /// True when `publication_id` exists and belongs to `project_id`. Ids are case-sensitive.
    pub fn has_publication(&self, project_id: &str, publication_id: &str) -> bool {
        self.publications
            .get(publication_id)
            .is_some_and(|parent| parent == project_id)
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn publication_count(&self) -> usize {
        self.publications.len()
    }
}

/// Fields sent when creating or updating a publication's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationRequest {
    pub project_id: String,
    pub publication_id: String,
    pub title: String,
    pub visibility: Visibility,
    pub output_tags: Vec<String>,
}

/// Fields sent when (re)publishing an existing publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub project_id: String,
    pub publication_id: String,
    pub title: String,
    pub update_mode: UpdateMode,
    pub visibility: Visibility,
    pub output_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub project_id: String,
    pub publication_id: String,
    pub title: String,
    pub export_preset_name: String,
}

/// Handle to an asynchronous platform job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
}

impl TaskHandle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

/// Status of an asynchronous job as last reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed(String),
}

/// Metadata attached to a document handed to the ingestion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub label: String,
}

/// Remote object-store entry holding one project backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Documentation platform operations.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocsPlatform: Send + Sync {
    /// List every project and publication visible to the configured account.
    async fn list_projects_and_publications(&self) -> Result<PlatformSnapshot, RemoteError>;

    /// Create a publication that does not exist yet. May return a task to wait on.
    async fn create_publication(
        &self,
        req: &PublicationRequest,
    ) -> Result<Option<TaskHandle>, RemoteError>;

    /// Update the metadata of an existing publication. Last write wins.
    async fn update_publication(&self, req: &PublicationRequest) -> Result<(), RemoteError>;

    /// Publish an existing publication. May return a task to wait on.
    async fn publish(&self, req: &PublishRequest) -> Result<Option<TaskHandle>, RemoteError>;

    /// Submit a PDF export job.
    async fn export_pdf(&self, req: &ExportRequest) -> Result<TaskHandle, RemoteError>;

    async fn get_task_status(&self, task_id: &str) -> Result<TaskState, RemoteError>;

    /// Fetch the PDF produced by a finished export of the publication titled `title`.
    async fn download_exported_pdf(&self, title: &str) -> Result<Vec<u8>, RemoteError>;

    /// Start a project backup that the platform writes to `output_file` in its storage.
    async fn start_backup(
        &self,
        project_id: &str,
        output_file: &str,
    ) -> Result<TaskHandle, RemoteError>;

    async fn download_storage_file(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    async fn delete_storage_file(&self, path: &str) -> Result<(), RemoteError>;
}

/// Document-search ingestion operations.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Upload a document and return the ingestion job id.
    ///
    /// Not idempotent: uploading the same file twice creates two documents.
    async fn upload_document(
        &self,
        file_path: &Path,
        metadata: &DocumentMetadata,
    ) -> Result<String, RemoteError>;

    async fn ingestion_status(&self, job_id: &str) -> Result<TaskState, RemoteError>;
}

/// Object-store operations used by project backups.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object whose key starts with `prefix`.
    async fn list_backup_objects(&self, prefix: &str) -> Result<Vec<BackupObject>, RemoteError>;

    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), RemoteError>;

    async fn delete_object(&self, key: &str) -> Result<(), RemoteError>;
}
