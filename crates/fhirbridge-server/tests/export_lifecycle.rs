mod common;

use common::{seed_clinical_data, start_server, start_with_store};
use fhirbridge_db_memory::InMemoryStore;
use serde_json::{Value, json};

async fn create_export(server: &common::TestServer, level: &str, body: Value) -> reqwest::Response {
    server
        .client
        .post(server.url(&format!("/export/{level}")))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn system_export_writes_manifest_and_files() {
    let store = InMemoryStore::new();
    seed_clinical_data(&store);
    let server = start_with_store(store, |cfg| cfg.bulk.max_resources_per_file = 2).await;

    let resp = create_export(
        &server,
        "system",
        json!({"resourceTypes": ["Patient", "Observation"]}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let location = resp.headers()["content-location"].to_str().unwrap().to_string();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["statusUrl"], location);
    let job_id = body["jobId"].as_str().unwrap().to_string();
    assert!(location.ends_with(&format!("/export/status/{job_id}")));

    let job = server.wait_terminal(&location).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["kind"], "export");
    assert_eq!(job["progress"], 1.0);
    assert!(job.get("completedTime").is_some());
    assert!(job.get("errorMessage").is_none());

    // Observation splits into two files at two resources per file
    let output = job["output"].as_array().unwrap();
    let summary: Vec<(String, u64)> = output
        .iter()
        .map(|o| (o["type"].as_str().unwrap().to_string(), o["count"].as_u64().unwrap()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Patient".to_string(), 2),
            ("Observation".to_string(), 2),
            ("Observation".to_string(), 1),
        ]
    );

    // Every manifest URL downloads as NDJSON
    let mut lines = 0;
    for entry in output {
        let url = entry["url"].as_str().unwrap();
        assert!(url.starts_with(&server.url(&format!("/export/files/{job_id}/"))));
        let resp = server.client.get(url).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "application/fhir+ndjson");
        let text = resp.text().await.unwrap();
        for line in text.lines() {
            let resource: Value = serde_json::from_str(line).unwrap();
            assert_eq!(resource["resourceType"], entry["type"]);
            lines += 1;
        }
    }
    assert_eq!(lines, 5);

    server.stop().await;
}

#[tokio::test]
async fn patient_export_filters_by_patient_ids() {
    let store = InMemoryStore::new();
    seed_clinical_data(&store);
    let server = start_with_store(store, |_| {}).await;

    let resp = create_export(
        &server,
        "patient",
        json!({"resourceTypes": ["Patient", "Observation"], "patientIds": ["p2"]}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let job = server.wait_terminal(body["statusUrl"].as_str().unwrap()).await;

    assert_eq!(job["status"], "completed");
    assert_eq!(job["patientIds"], json!(["p2"]));
    let counts: Vec<u64> = job["output"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["count"].as_u64().unwrap())
        .collect();
    assert_eq!(counts, vec![1, 1]);

    server.stop().await;
}

#[tokio::test]
async fn patient_export_defaults_to_patient_set() {
    let server = start_server(|_| {}).await;

    let resp = create_export(&server, "patient", json!({"patientIds": ["p1", "p2"]})).await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let job = server.wait_terminal(body["statusUrl"].as_str().unwrap()).await;

    let types: Vec<&str> = job["resourceTypes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap())
        .collect();
    assert_eq!(types, fhirbridge_server::operations::bulk::PATIENT_RESOURCE_TYPES);
    // Nothing matched, so no files
    assert_eq!(job["output"].as_array().unwrap().len(), 0);

    server.stop().await;
}

#[tokio::test]
async fn group_export_uses_group_members() {
    let store = InMemoryStore::new();
    seed_clinical_data(&store);
    let server = start_with_store(store, |_| {}).await;

    let resp = create_export(
        &server,
        "group",
        json!({"groupId": "g1", "resourceTypes": ["Observation"]}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let job = server.wait_terminal(body["statusUrl"].as_str().unwrap()).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["output"][0]["count"], 2);

    // Missing group fails the job, not the request
    let resp = create_export(&server, "group", json!({"groupId": "nope"})).await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let job = server.wait_terminal(body["statusUrl"].as_str().unwrap()).await;
    assert_eq!(job["status"], "failed");
    assert!(job["errorMessage"].as_str().unwrap().contains("Group/nope"));

    // Missing groupId is a validation error
    let resp = create_export(&server, "group", json!({})).await;
    assert_eq!(resp.status(), 400);

    server.stop().await;
}

#[tokio::test]
async fn unsupported_types_create_no_job() {
    let server = start_server(|_| {}).await;

    let resp = create_export(&server, "patient", json!({"resourceTypes": ["NotAType"]})).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["issue"][0]["diagnostics"].as_str().unwrap().contains("NotAType"));

    let resp = create_export(&server, "system", json!({"since": "last tuesday"})).await;
    assert_eq!(resp.status(), 400);

    let jobs: Value = server
        .client
        .get(server.url("/export/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs["jobs"].as_array().unwrap().len(), 0);

    server.stop().await;
}

#[tokio::test]
async fn cancel_before_start_is_final() {
    // A single slot held by a long-running export keeps the second one queued.
    let store = InMemoryStore::new();
    seed_clinical_data(&store);
    let server = start_with_store(store, |cfg| cfg.bulk.max_concurrent_jobs = 1).await;

    let resp = create_export(&server, "system", json!({})).await;
    let first: Value = resp.json().await.unwrap();
    let resp = create_export(&server, "system", json!({})).await;
    let second: Value = resp.json().await.unwrap();
    let status_url = second["statusUrl"].as_str().unwrap();

    let resp = server.client.delete(status_url).send().await.unwrap();
    // The job may already be done on a fast machine; either way it is never
    // reported as completed after a successful cancel.
    if resp.status() == 200 {
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "cancelled");
        let job = server.wait_terminal(status_url).await;
        assert_eq!(job["status"], "cancelled");
        assert!(job.get("completedTime").is_some());

        let resp = server.client.delete(status_url).send().await.unwrap();
        assert_eq!(resp.status(), 409);
    } else {
        assert_eq!(resp.status(), 409);
    }

    server.wait_terminal(first["statusUrl"].as_str().unwrap()).await;
    server.stop().await;
}

#[tokio::test]
async fn completed_job_cannot_be_cancelled() {
    let server = start_server(|_| {}).await;

    let resp = create_export(&server, "system", json!({"resourceTypes": ["Patient"]})).await;
    let body: Value = resp.json().await.unwrap();
    let status_url = body["statusUrl"].as_str().unwrap();
    let job = server.wait_terminal(status_url).await;
    assert_eq!(job["status"], "completed");

    let resp = server.client.delete(status_url).send().await.unwrap();
    assert_eq!(resp.status(), 409);

    server.stop().await;
}

#[tokio::test]
async fn export_files_reject_bad_names() {
    let server = start_server(|_| {}).await;
    let id = uuid::Uuid::new_v4();

    for name in ["..%2Fsecret.ndjson", "Patient.json", "missing.ndjson"] {
        let resp = server
            .client
            .get(server.url(&format!("/export/files/{id}/{name}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404, "{name}");
    }

    server.stop().await;
}

#[tokio::test]
async fn export_jobs_list_only_exports() {
    let server = start_server(|_| {}).await;

    create_export(&server, "system", json!({"resourceTypes": ["Patient"]})).await;
    let resp = server
        .client
        .post(server.url("/import"))
        .json(&json!({"files": [{"resourceType": "Patient", "content": "{\"resourceType\":\"Patient\"}"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let import: Value = resp.json().await.unwrap();

    let jobs: Value = server
        .client
        .get(server.url("/export/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let jobs = jobs["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["kind"], "export");

    // An import id is unknown to the export routes
    let resp = server
        .client
        .get(server.url(&format!("/export/status/{}", import["jobId"].as_str().unwrap())))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server.stop().await;
}
