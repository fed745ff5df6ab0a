use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fhirbridge_db_memory::InMemoryStore;
use fhirbridge_server::jobs::ExportLevel;
use fhirbridge_server::operations::bulk::{ExportRequest, ImportFileRequest, ImportRequest};
use fhirbridge_server::{AppConfig, AppState, JobStatus};
use fhirbridge_storage::{
    ResourceStore, SearchParams, SearchResult, StorageError, StoredResource,
    extract_resource_type,
};
use serde_json::{Value, json};
use tokio::sync::Notify;

/// In-memory store whose first call for one resource type parks until
/// released, so a test can act while a job is mid-flight.
struct GatedStore {
    inner: InMemoryStore,
    gated_type: &'static str,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(inner: InMemoryStore, gated_type: &'static str) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gated_type,
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    async fn gate(&self, resource_type: &str) {
        if resource_type == self.gated_type && self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl ResourceStore for GatedStore {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        self.gate(extract_resource_type(resource).unwrap_or_default()).await;
        self.inner.create(resource).await
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        self.inner.read(resource_type, id).await
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        self.gate(resource_type).await;
        self.inner.search(resource_type, params).await
    }

    fn backend_name(&self) -> &'static str {
        "gated"
    }
}

fn seeded() -> InMemoryStore {
    let store = InMemoryStore::new();
    for (id, resource) in [
        ("p1", json!({"resourceType": "Patient", "id": "p1"})),
        ("p2", json!({"resourceType": "Patient", "id": "p2"})),
    ] {
        store.insert(StoredResource::new(id, "1", "Patient", resource));
    }
    store.insert(StoredResource::new(
        "o1",
        "1",
        "Observation",
        json!({"resourceType": "Observation", "id": "o1", "subject": {"reference": "Patient/p1"}}),
    ));
    store
}

/// Wait until the runner has let go of every job.
async fn wait_idle(state: &AppState) {
    for _ in 0..200 {
        if state.runner.active_jobs() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("runner still busy");
}

#[tokio::test]
async fn cancelling_a_running_export_stops_it_and_removes_its_files() {
    let exports = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::default();
    cfg.bulk.export_path = exports.path().to_path_buf();
    let store = GatedStore::new(seeded(), "Patient");
    let state = AppState::with_store(cfg, store.clone());

    let job = state
        .export
        .create_export_job(
            ExportLevel::System,
            ExportRequest {
                resource_types: Some(vec!["Patient".into(), "Observation".into()]),
                ..Default::default()
            },
        )
        .unwrap();
    let job_dir = exports.path().join(job.job_id.to_string());

    // Processing is now blocked inside the Patient search.
    tokio::time::timeout(Duration::from_secs(5), store.entered.notified())
        .await
        .expect("export never reached the store");
    assert_eq!(
        state.export.get_job(&job.job_id).unwrap().status,
        JobStatus::Processing
    );
    assert!(job_dir.exists());

    assert!(state.export.cancel_job(&job.job_id));
    store.release.notify_one();
    wait_idle(&state).await;

    let job = state.export.get_job(&job.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.export().unwrap().output.is_empty());
    assert!(!job_dir.exists());
}

#[tokio::test]
async fn cancelling_during_the_last_type_still_discards_output() {
    let exports = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::default();
    cfg.bulk.export_path = exports.path().to_path_buf();
    let store = GatedStore::new(seeded(), "Patient");
    let state = AppState::with_store(cfg, store.clone());

    let job = state
        .export
        .create_export_job(
            ExportLevel::System,
            ExportRequest {
                resource_types: Some(vec!["Patient".into()]),
                ..Default::default()
            },
        )
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), store.entered.notified())
        .await
        .expect("export never reached the store");
    assert!(state.export.cancel_job(&job.job_id));
    store.release.notify_one();
    wait_idle(&state).await;

    let record = state.export.get_job(&job.job_id).unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(!exports.path().join(job.job_id.to_string()).exists());
}

#[tokio::test]
async fn cancelling_a_running_import_skips_remaining_files() {
    let exports = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::default();
    cfg.bulk.export_path = exports.path().to_path_buf();
    let inner = InMemoryStore::new();
    let store = GatedStore::new(inner.clone(), "Patient");
    let state = AppState::with_store(cfg, store.clone());

    let job = state
        .import
        .create_import_job(ImportRequest {
            files: vec![
                ImportFileRequest {
                    resource_type: "Patient".into(),
                    content: json!({"resourceType": "Patient", "id": "first"}),
                },
                ImportFileRequest {
                    resource_type: "Observation".into(),
                    content: json!({"resourceType": "Observation", "id": "second"}),
                },
            ],
        })
        .unwrap();

    // Blocked while creating the first file's resource.
    tokio::time::timeout(Duration::from_secs(5), store.entered.notified())
        .await
        .expect("import never reached the store");
    assert!(state.import.cancel_job(&job.job_id));
    store.release.notify_one();
    wait_idle(&state).await;

    let job = state.import.get_job(&job.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(inner.count_by_type("Observation"), 0);
    assert!(job.completed_time.is_some());
}
