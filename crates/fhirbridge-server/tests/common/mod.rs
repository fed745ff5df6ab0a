#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fhirbridge_db_memory::InMemoryStore;
use fhirbridge_server::{AppConfig, AppState, build_app};
use fhirbridge_storage::{ResourceStore, StoredResource};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    pub store: InMemoryStore,
    pub exports: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// Start a server on an ephemeral port backed by a fresh in-memory store.
pub async fn start_server(configure: impl FnOnce(&mut AppConfig)) -> TestServer {
    let store = InMemoryStore::new();
    start_with_store(store, configure).await
}

pub async fn start_with_store(
    store: InMemoryStore,
    configure: impl FnOnce(&mut AppConfig),
) -> TestServer {
    let exports = tempfile::tempdir().expect("tmp dir");
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let mut cfg = AppConfig::default();
    cfg.server.base_url = Some(base.clone());
    cfg.bulk.export_path = exports.path().to_path_buf();
    configure(&mut cfg);

    let shared: Arc<dyn ResourceStore> = Arc::new(store.clone());
    let app = build_app(AppState::with_store(cfg, shared));
    let (tx, rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base,
        client: reqwest::Client::new(),
        store,
        exports,
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Poll a status URL until it answers 200.
    pub async fn wait_terminal(&self, status_url: &str) -> Value {
        for _ in 0..200 {
            let resp = self.client.get(status_url).send().await.unwrap();
            if resp.status() == reqwest::StatusCode::OK {
                return resp.json().await.unwrap();
            }
            assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job at {status_url} did not finish");
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn seed(store: &InMemoryStore, resource: Value) {
    let resource_type = resource["resourceType"].as_str().unwrap().to_string();
    let id = resource["id"].as_str().unwrap().to_string();
    store.insert(StoredResource::new(id, "1", resource_type, resource));
}

/// Two patients, three observations and a group holding `p1`.
pub fn seed_clinical_data(store: &InMemoryStore) {
    seed(store, json!({"resourceType": "Patient", "id": "p1"}));
    seed(store, json!({"resourceType": "Patient", "id": "p2"}));
    seed(
        store,
        json!({"resourceType": "Observation", "id": "o1", "subject": {"reference": "Patient/p1"}}),
    );
    seed(
        store,
        json!({"resourceType": "Observation", "id": "o2", "subject": {"reference": "Patient/p1"}}),
    );
    seed(
        store,
        json!({"resourceType": "Observation", "id": "o3", "subject": {"reference": "Patient/p2"}}),
    );
    seed(
        store,
        json!({
            "resourceType": "Group",
            "id": "g1",
            "member": [{"entity": {"reference": "Patient/p1"}}]
        }),
    );
}
