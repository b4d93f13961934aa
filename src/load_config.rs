/// `load_config` module: turns the YAML configuration file into the typed [`RunConfig`] the
/// workflow engine runs on, plus the connection sections the CLI needs to build clients.
///
/// # Responsibilities
/// - Parse the YAML document into type-safe structs. Settings and projects are separate
///   sections, so no top-level key ever has to be guessed as a project id.
/// - Apply defaults (`settings`, `s3_backup`) and reject configurations the engine cannot run:
///   empty or duplicate project ids, duplicate publication ids within a project, a zero poll
///   interval.
/// - Keep secrets out: credentials are read from the environment by the clients themselves.
///
/// The retention count is passed through unvalidated; the workflow runner rejects a
/// non-positive one only when a backup would actually run.
///
/// # Errors
/// All errors are `anyhow::Error` with the config path in context, surfaced at the CLI boundary.
use anyhow::{bail, Context, Result};
use clickhelper_core::model::{Project, Publication, PublicationAttributes, UpdateMode, Visibility};
use clickhelper_core::workflow::{BackupSettings, RunConfig, Settings};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// Everything the CLI needs from the configuration file.
#[derive(Debug)]
pub struct CliConfig {
    pub run: RunConfig,
    pub clickhelp: ClickHelpSection,
    pub tribble: TribbleSection,
    pub s3_backup: S3BackupSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickHelpSection {
    pub portal_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TribbleSection {
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3BackupSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_retention_count")]
    pub retention_count: i64,
    pub region: Option<String>,
}

impl Default for S3BackupSection {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_count: default_retention_count(),
            region: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsSection {
    wait_for_export: bool,
    wait_for_publish: bool,
    wait_for_processing: bool,
    /// Seconds.
    max_wait: u64,
    /// Seconds.
    poll_interval: u64,
    download_dir: PathBuf,
}

impl Default for SettingsSection {
    fn default() -> Self {
        let defaults = Settings::default();
        Self {
            wait_for_export: defaults.wait_for_export,
            wait_for_publish: defaults.wait_for_publish,
            wait_for_processing: defaults.wait_for_processing,
            max_wait: defaults.max_wait.as_secs(),
            poll_interval: defaults.poll_interval.as_secs(),
            download_dir: defaults.download_dir,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectSection {
    id: String,
    s3_folder: Option<String>,
    #[serde(default)]
    publications: Vec<PublicationSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PublicationSection {
    id: String,
    title: Option<String>,
    update: Option<UpdateMode>,
    visibility: Option<Visibility>,
    output_tags: Option<Vec<String>>,
    #[serde(default)]
    export: bool,
    export_preset_name: Option<String>,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    clickhelp: ClickHelpSection,
    #[serde(default)]
    tribble: TribbleSection,
    #[serde(default)]
    s3_backup: S3BackupSection,
    #[serde(default)]
    settings: SettingsSection,
    #[serde(default)]
    projects: Vec<ProjectSection>,
}

fn default_retention_count() -> i64 {
    BackupSettings::default().retention_count
}

/// Load and validate the YAML configuration at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;

    let config = convert(raw).with_context(|| format!("Invalid configuration in {path_ref:?}"))?;
    info!(
        config_path = ?path_ref,
        projects = config.run.projects.len(),
        backup_enabled = config.s3_backup.enabled,
        "Parsed config YAML successfully"
    );
    Ok(config)
}

fn convert(raw: RawConfig) -> Result<CliConfig> {
    if raw.settings.poll_interval == 0 {
        bail!("settings.poll_interval must be at least 1 second");
    }

    let mut project_ids = HashSet::new();
    let mut projects = Vec::with_capacity(raw.projects.len());
    for section in raw.projects {
        if section.id.trim().is_empty() {
            bail!("project id must not be empty");
        }
        if !project_ids.insert(section.id.clone()) {
            bail!("project '{}' is configured more than once", section.id);
        }
        projects.push(convert_project(section)?);
    }
    check_backup_folders(&projects)?;

    let settings = Settings {
        wait_for_export: raw.settings.wait_for_export,
        wait_for_publish: raw.settings.wait_for_publish,
        wait_for_processing: raw.settings.wait_for_processing,
        max_wait: Duration::from_secs(raw.settings.max_wait),
        poll_interval: Duration::from_secs(raw.settings.poll_interval),
        download_dir: raw.settings.download_dir,
    };
    let backup = BackupSettings {
        enabled: raw.s3_backup.enabled,
        retention_count: raw.s3_backup.retention_count,
    };

    Ok(CliConfig {
        run: RunConfig {
            projects,
            settings,
            backup,
        },
        clickhelp: raw.clickhelp,
        tribble: raw.tribble,
        s3_backup: raw.s3_backup,
    })
}

fn convert_project(section: ProjectSection) -> Result<Project> {
    let mut seen = HashSet::new();
    let mut publications = Vec::with_capacity(section.publications.len());
    for publication in section.publications {
        if publication.id.trim().is_empty() {
            bail!("project '{}' has a publication without an id", section.id);
        }
        if !seen.insert(publication.id.clone()) {
            bail!(
                "publication '{}' appears more than once in project '{}'",
                publication.id,
                section.id
            );
        }
        publications.push(Publication::new(PublicationAttributes {
            publication_id: publication.id,
            title: publication.title,
            update_mode: publication.update,
            visibility: publication.visibility,
            output_tags: publication.output_tags,
            export: publication.export,
            export_preset_name: publication.export_preset_name,
            label: publication.label,
        }));
    }

    let mut project = Project::new(section.id, publications);
    project.s3_folder = section
        .s3_folder
        .map(|folder| folder.trim().trim_matches('/').to_string())
        .filter(|folder| !folder.is_empty());
    Ok(project)
}

/// Retention prunes per folder, so two projects may neither share a backup folder nor nest one
/// inside the other.
fn check_backup_folders(projects: &[Project]) -> Result<()> {
    for (i, a) in projects.iter().enumerate() {
        for b in &projects[i + 1..] {
            let (folder_a, folder_b) = (a.backup_folder(), b.backup_folder());
            if folder_a == folder_b {
                bail!(
                    "projects '{}' and '{}' both back up to folder '{}'",
                    a.project_id,
                    b.project_id,
                    folder_a
                );
            }
            let (outer, inner) = if folder_b.len() > folder_a.len() {
                (&folder_a, &folder_b)
            } else {
                (&folder_b, &folder_a)
            };
            if inner.starts_with(&format!("{outer}/")) {
                bail!(
                    "backup folder '{}' is nested inside backup folder '{}' (projects '{}' and '{}')",
                    inner,
                    outer,
                    a.project_id,
                    b.project_id
                );
            }
        }
    }
    Ok(())
}
