//! Action model: projects, publications, and the ordered actions derived from a publication's
//! configured properties.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// How a publish replaces the previous output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateMode {
    #[default]
    Partial,
    #[serde(alias = "FullReplace")]
    Full,
}

impl UpdateMode {
    /// Value expected by the documentation platform API.
    pub fn as_api_str(self) -> &'static str {
        match self {
            UpdateMode::Partial => "Partial",
            UpdateMode::Full => "FullReplace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Restricted,
    Private,
}

impl Visibility {
    pub fn as_api_str(self) -> &'static str {
        match self {
            Visibility::Public => "Public",
            Visibility::Restricted => "Restricted",
            Visibility::Private => "Private",
        }
    }
}

/// Raw configured properties of a publication, before action derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationAttributes {
    pub publication_id: String,
    /// Defaults to the publication id when absent.
    pub title: Option<String>,
    pub update_mode: Option<UpdateMode>,
    pub visibility: Option<Visibility>,
    /// Presence matters, not contents: an empty list still triggers a publish.
    pub output_tags: Option<Vec<String>>,
    pub export: bool,
    pub export_preset_name: Option<String>,
    /// Label given to the document in the ingestion service. Defaults to the title.
    pub label: Option<String>,
}

/// One discrete remote operation derived from a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    Publish,
    ExportPdf,
    UploadTribble,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Publish => "publish",
            ActionKind::ExportPdf => "export_pdf",
            ActionKind::UploadTribble => "upload_tribble",
        };
        f.write_str(name)
    }
}

/// Derive the ordered action sequence for a publication.
///
/// Pure and deterministic: Publish comes first whenever any of update mode, visibility or output
/// tags is set, and `export` appends ExportPdf then UploadTribble after it. A publication with
/// none of the publish triggers yields an empty sequence, even when `export` is set.
pub fn derive_actions(attrs: &PublicationAttributes) -> Vec<ActionKind> {
    let publish = attrs.update_mode.is_some()
        || attrs.visibility.is_some()
        || attrs.output_tags.is_some();
    if !publish {
        return Vec::new();
    }
    let mut actions = vec![ActionKind::Publish];
    if attrs.export {
        actions.push(ActionKind::ExportPdf);
        actions.push(ActionKind::UploadTribble);
    }
    actions
}

/// A publication together with its derived actions, computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    attributes: PublicationAttributes,
    actions: Vec<ActionKind>,
}

impl Publication {
    pub fn new(attributes: PublicationAttributes) -> Self {
        let actions = derive_actions(&attributes);
        Self {
            attributes,
            actions,
        }
    }

    pub fn attributes(&self) -> &PublicationAttributes {
        &self.attributes
    }

    pub fn actions(&self) -> &[ActionKind] {
        &self.actions
    }

    /// A publication with no derivable action is invalid and is never executed.
    pub fn is_valid(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn id(&self) -> &str {
        &self.attributes.publication_id
    }

    pub fn title(&self) -> &str {
        self.attributes
            .title
            .as_deref()
            .unwrap_or(&self.attributes.publication_id)
    }

    pub fn label(&self) -> &str {
        self.attributes.label.as_deref().unwrap_or(self.title())
    }

    pub fn export_preset_name(&self) -> &str {
        self.attributes
            .export_preset_name
            .as_deref()
            .unwrap_or("Default")
    }

    /// Update mode sent with a publish. Partial unless configured.
    pub fn publish_update_mode(&self) -> UpdateMode {
        self.attributes.update_mode.unwrap_or_default()
    }

    /// Visibility sent with a publish. Private unless configured.
    pub fn publish_visibility(&self) -> Visibility {
        self.attributes.visibility.unwrap_or(Visibility::Private)
    }

    /// Visibility used when the publication has to be created. Restricted unless configured.
    pub fn create_visibility(&self) -> Visibility {
        self.attributes.visibility.unwrap_or(Visibility::Restricted)
    }

    pub fn output_tags(&self) -> &[String] {
        self.attributes.output_tags.as_deref().unwrap_or(&[])
    }

    /// Local file name for this publication's exported PDF.
    pub fn artifact_file_name(&self) -> String {
        artifact_file_name(self.title(), self.id())
    }
}

/// Build a PDF file name from a title, keeping only ASCII alphanumerics, space, `_`, `-` and `.`.
/// Falls back to `{fallback_id}.pdf` when nothing usable remains.
pub fn artifact_file_name(title: &str, fallback_id: &str) -> String {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    let disallowed = DISALLOWED.get_or_init(|| {
        Regex::new(r"[^A-Za-z0-9 _.\-]").expect("static file-name pattern is valid")
    });
    let cleaned = disallowed.replace_all(title, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return format!("{fallback_id}.pdf");
    }
    if cleaned.ends_with(".pdf") {
        cleaned.to_string()
    } else {
        format!("{cleaned}.pdf")
    }
}

/// A configured project and its publications, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub publications: Vec<Publication>,
    /// Object-store folder for backups. Defaults to the project id.
    pub s3_folder: Option<String>,
}

impl Project {
    pub fn new(project_id: impl Into<String>, publications: Vec<Publication>) -> Self {
        Self {
            project_id: project_id.into(),
            publications,
            s3_folder: None,
        }
    }

    /// Human-readable name: `release-notes` becomes `Release Notes`.
    pub fn display_name(&self) -> String {
        self.project_id
            .split('-')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn backup_folder(&self) -> &str {
        self.s3_folder.as_deref().unwrap_or(&self.project_id)
    }
}

/// Why an action failed, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Config,
    Remote,
    Timeout,
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ActionError> for Failure {
    fn from(err: &ActionError) -> Self {
        let kind = match err {
            ActionError::Config(_) => FailureKind::Config,
            ActionError::Remote(_) => FailureKind::Remote,
            ActionError::Timeout { .. } => FailureKind::Timeout,
            ActionError::Io(_) => FailureKind::Io,
        };
        Failure::new(kind, err.to_string())
    }
}

impl From<ActionError> for Failure {
    fn from(err: ActionError) -> Self {
        Failure::from(&err)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ActionOutcome {
    Pending,
    Succeeded(String),
    Failed(Failure),
    Skipped(String),
}

impl ActionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ActionOutcome::Failed(_))
    }
}

/// An action of a publication and the result of executing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
}

impl Action {
    pub fn pending(kind: ActionKind) -> Self {
        Self {
            kind,
            outcome: ActionOutcome::Pending,
        }
    }
}
