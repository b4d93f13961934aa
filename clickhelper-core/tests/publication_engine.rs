use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tempfile::tempdir;

use clickhelper_core::clock::ManualClock;
use clickhelper_core::contract::{
    Ingestor, MockDocsPlatform, MockIngestor, PlatformItem, PlatformSnapshot, TaskHandle,
    TaskState,
};
use clickhelper_core::error::RemoteError;
use clickhelper_core::model::{
    ActionKind, ActionOutcome, FailureKind, Publication, PublicationAttributes, UpdateMode,
    Visibility,
};
use clickhelper_core::publication::execute_publication;
use clickhelper_core::report::Reconciliation;
use clickhelper_core::workflow::{RunContext, Services, Settings, SnapshotState, Workflow};

fn snapshot(project: &str, publications: &[&str]) -> SnapshotState {
    let mut items = vec![PlatformItem {
        id: project.to_string(),
        parent_id: None,
    }];
    items.extend(publications.iter().map(|id| PlatformItem {
        id: id.to_string(),
        parent_id: Some(project.to_string()),
    }));
    SnapshotState::Ready(PlatformSnapshot::from_items(items))
}

fn settings(download_dir: PathBuf) -> Settings {
    Settings {
        poll_interval: Duration::from_secs(10),
        max_wait: Duration::from_secs(60),
        download_dir,
        ..Settings::default()
    }
}

fn exporting_publication() -> Publication {
    Publication::new(PublicationAttributes {
        publication_id: "rn-2024".into(),
        title: Some("Release Notes: 2024".into()),
        update_mode: Some(UpdateMode::Full),
        visibility: Some(Visibility::Public),
        export: true,
        ..Default::default()
    })
}

fn context<'a>(
    platform: &'a MockDocsPlatform,
    ingestor: Option<&'a dyn Ingestor>,
    clock: &'a ManualClock,
    settings: &'a Settings,
    workflow: Workflow,
    snapshot: SnapshotState,
) -> RunContext<'a> {
    RunContext {
        services: Services {
            platform,
            ingestor,
            store: None,
            clock,
        },
        settings,
        workflow,
        snapshot,
        retention: None,
    }
}

#[tokio::test]
async fn create_failure_fails_publish_and_skips_the_rest() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());
    let mut platform = MockDocsPlatform::new();
    platform.expect_create_publication().times(1).returning(|_| {
        Err(RemoteError::Status {
            status: 500,
            body: "boom".into(),
        })
    });
    platform.expect_publish().never();
    platform.expect_export_pdf().never();
    let mut ingestor = MockIngestor::new();
    ingestor.expect_upload_document().never();

    let ctx = context(
        &platform,
        Some(&ingestor as &dyn Ingestor),
        &clock,
        &settings,
        Workflow::All,
        snapshot("release-notes", &[]),
    );
    let outcome = execute_publication(&ctx, "release-notes", &exporting_publication()).await;

    assert!(outcome.is_failed());
    assert!(matches!(outcome.reconciliation, Reconciliation::CreateFailed(_)));
    assert!(matches!(
        &outcome.actions[0].outcome,
        ActionOutcome::Failed(f) if f.kind == FailureKind::Remote
    ));
    assert!(matches!(outcome.actions[1].outcome, ActionOutcome::Skipped(_)));
    assert!(matches!(outcome.actions[2].outcome, ActionOutcome::Skipped(_)));
}

#[tokio::test]
async fn missing_project_is_a_config_failure() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());
    let mut platform = MockDocsPlatform::new();
    platform.expect_create_publication().never();
    platform.expect_publish().never();

    let publication = Publication::new(PublicationAttributes {
        publication_id: "p".into(),
        output_tags: Some(vec![]),
        ..Default::default()
    });
    let ctx = context(
        &platform,
        None,
        &clock,
        &settings,
        Workflow::Publish,
        snapshot("some-other-project", &[]),
    );
    let outcome = execute_publication(&ctx, "release-notes", &publication).await;

    assert!(matches!(
        &outcome.actions[0].outcome,
        ActionOutcome::Failed(f) if f.kind == FailureKind::Config
    ));
}

#[tokio::test]
async fn update_failure_degrades_but_still_publishes() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());
    let mut platform = MockDocsPlatform::new();
    platform
        .expect_update_publication()
        .times(1)
        .returning(|_| Err(RemoteError::Transport("timeout".into())));
    platform
        .expect_publish()
        .times(1)
        .withf(|req| req.update_mode == UpdateMode::Partial && req.visibility == Visibility::Private)
        .returning(|_| Ok(None));

    let publication = Publication::new(PublicationAttributes {
        publication_id: "guide".into(),
        output_tags: Some(vec!["internal".into()]),
        ..Default::default()
    });
    let ctx = context(
        &platform,
        None,
        &clock,
        &settings,
        Workflow::Publish,
        snapshot("docs", &["guide"]),
    );
    let outcome = execute_publication(&ctx, "docs", &publication).await;

    assert!(outcome.degraded);
    assert!(matches!(outcome.reconciliation, Reconciliation::UpdateFailed(_)));
    assert!(matches!(outcome.actions[0].outcome, ActionOutcome::Succeeded(_)));
    assert!(!outcome.is_failed());
}

#[tokio::test]
async fn export_failure_skips_upload_without_attempting_it() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());
    let mut platform = MockDocsPlatform::new();
    platform.expect_update_publication().returning(|_| Ok(()));
    platform.expect_publish().returning(|_| Ok(None));
    platform
        .expect_export_pdf()
        .times(1)
        .returning(|_| Err(RemoteError::Protocol("no task id".into())));
    platform.expect_download_exported_pdf().never();
    let mut ingestor = MockIngestor::new();
    ingestor.expect_upload_document().never();

    let ctx = context(
        &platform,
        Some(&ingestor as &dyn Ingestor),
        &clock,
        &settings,
        Workflow::All,
        snapshot("release-notes", &["rn-2024"]),
    );
    let outcome = execute_publication(&ctx, "release-notes", &exporting_publication()).await;

    let kinds: Vec<ActionKind> = outcome.actions.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ActionKind::Publish,
            ActionKind::ExportPdf,
            ActionKind::UploadTribble
        ]
    );
    assert!(matches!(outcome.actions[1].outcome, ActionOutcome::Failed(_)));
    match &outcome.actions[2].outcome {
        ActionOutcome::Skipped(reason) => assert!(reason.contains("no artifact")),
        other => panic!("upload should be skipped, got {other:?}"),
    }
}

#[tokio::test]
async fn full_pipeline_exports_to_download_dir_and_uploads_it() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().join("downloads"));
    let clock = ManualClock::new(Utc::now());

    let mut platform = MockDocsPlatform::new();
    platform.expect_update_publication().returning(|_| Ok(()));
    platform
        .expect_publish()
        .withf(|req| req.update_mode == UpdateMode::Full && req.visibility == Visibility::Public)
        .returning(|_| Ok(Some(TaskHandle::new("pub-task"))));
    platform
        .expect_export_pdf()
        .withf(|req| req.export_preset_name == "Default")
        .returning(|_| Ok(TaskHandle::new("export-task")));
    let polls = Arc::new(Mutex::new(Vec::new()));
    let seen = polls.clone();
    platform.expect_get_task_status().returning(move |task_id| {
        let mut seen = seen.lock().unwrap();
        seen.push(task_id.to_string());
        let count = seen.iter().filter(|id| id.as_str() == task_id).count();
        Ok(if count < 2 {
            TaskState::Running
        } else {
            TaskState::Succeeded
        })
    });
    platform
        .expect_download_exported_pdf()
        .withf(|title| title == "Release Notes: 2024")
        .returning(|_| Ok(b"%PDF-1.7".to_vec()));

    let expected_path = dir.path().join("downloads").join("Release Notes 2024.pdf");
    let upload_path = expected_path.clone();
    let mut ingestor = MockIngestor::new();
    ingestor
        .expect_upload_document()
        .times(1)
        .withf(move |path, meta| path == upload_path.as_path() && meta.label == "Release Notes: 2024")
        .returning(|_, _| Ok("job-1".into()));
    ingestor
        .expect_ingestion_status()
        .returning(|_| Ok(TaskState::Succeeded));

    let ctx = context(
        &platform,
        Some(&ingestor as &dyn Ingestor),
        &clock,
        &settings,
        Workflow::All,
        snapshot("release-notes", &["rn-2024"]),
    );
    let outcome = execute_publication(&ctx, "release-notes", &exporting_publication()).await;

    assert!(!outcome.is_failed());
    assert_eq!(outcome.reconciliation, Reconciliation::Updated);
    assert!(outcome
        .actions
        .iter()
        .all(|a| matches!(a.outcome, ActionOutcome::Succeeded(_))));
    assert_eq!(std::fs::read(&expected_path).unwrap(), b"%PDF-1.7");
    assert_eq!(polls.lock().unwrap().len(), 4);
    assert_eq!(clock.elapsed(), Duration::from_secs(20));
}

#[tokio::test]
async fn publish_workflow_does_not_download_the_export() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());
    let mut platform = MockDocsPlatform::new();
    platform.expect_update_publication().returning(|_| Ok(()));
    platform.expect_publish().returning(|_| Ok(None));
    platform
        .expect_export_pdf()
        .returning(|_| Ok(TaskHandle::new("export-task")));
    platform
        .expect_get_task_status()
        .returning(|_| Ok(TaskState::Succeeded));
    platform.expect_download_exported_pdf().never();

    let ctx = context(
        &platform,
        None,
        &clock,
        &settings,
        Workflow::Publish,
        snapshot("release-notes", &["rn-2024"]),
    );
    let outcome = execute_publication(&ctx, "release-notes", &exporting_publication()).await;

    assert_eq!(outcome.actions.len(), 2);
    assert!(!outcome.is_failed());
}

#[tokio::test]
async fn tribble_upload_fetches_the_previous_export_from_storage() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());
    let mut platform = MockDocsPlatform::new();
    platform.expect_list_projects_and_publications().never();
    platform.expect_update_publication().never();
    platform.expect_publish().never();
    platform
        .expect_download_exported_pdf()
        .times(1)
        .returning(|_| Ok(b"%PDF".to_vec()));
    let mut ingestor = MockIngestor::new();
    ingestor
        .expect_upload_document()
        .times(1)
        .returning(|_, _| Ok("job-9".into()));
    ingestor
        .expect_ingestion_status()
        .returning(|_| Ok(TaskState::Succeeded));

    let ctx = context(
        &platform,
        Some(&ingestor as &dyn Ingestor),
        &clock,
        &settings,
        Workflow::TribbleUpload,
        SnapshotState::NotFetched,
    );
    let outcome = execute_publication(&ctx, "release-notes", &exporting_publication()).await;

    assert_eq!(outcome.reconciliation, Reconciliation::NotAttempted);
    assert_eq!(outcome.actions.len(), 1);
    assert_eq!(outcome.actions[0].kind, ActionKind::UploadTribble);
    assert!(matches!(outcome.actions[0].outcome, ActionOutcome::Succeeded(_)));
}

#[tokio::test]
async fn ingestion_timeout_still_counts_as_uploaded() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());
    let mut platform = MockDocsPlatform::new();
    platform
        .expect_download_exported_pdf()
        .returning(|_| Ok(b"%PDF".to_vec()));
    let mut ingestor = MockIngestor::new();
    ingestor
        .expect_upload_document()
        .times(1)
        .returning(|_, _| Ok("job-slow".into()));
    ingestor
        .expect_ingestion_status()
        .times(7)
        .returning(|_| Ok(TaskState::Running));

    let ctx = context(
        &platform,
        Some(&ingestor as &dyn Ingestor),
        &clock,
        &settings,
        Workflow::TribbleUpload,
        SnapshotState::NotFetched,
    );
    let outcome = execute_publication(&ctx, "release-notes", &exporting_publication()).await;

    match &outcome.actions[0].outcome {
        ActionOutcome::Succeeded(detail) => assert!(detail.contains("not confirmed")),
        other => panic!("upload should succeed, got {other:?}"),
    }
}

#[tokio::test]
async fn ingestion_failure_fails_the_upload() {
    let dir = tempdir().unwrap();
    let settings = settings(dir.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());
    let mut platform = MockDocsPlatform::new();
    platform
        .expect_download_exported_pdf()
        .returning(|_| Ok(b"%PDF".to_vec()));
    let mut ingestor = MockIngestor::new();
    ingestor
        .expect_upload_document()
        .returning(|_, _| Ok("job-bad".into()));
    ingestor
        .expect_ingestion_status()
        .returning(|_| Ok(TaskState::Failed("unreadable pdf".into())));

    let ctx = context(
        &platform,
        Some(&ingestor as &dyn Ingestor),
        &clock,
        &settings,
        Workflow::TribbleUpload,
        SnapshotState::NotFetched,
    );
    let outcome = execute_publication(&ctx, "release-notes", &exporting_publication()).await;

    assert!(matches!(
        &outcome.actions[0].outcome,
        ActionOutcome::Failed(f) if f.kind == FailureKind::Remote
    ));
}
