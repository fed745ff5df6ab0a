use std::{env, fs};

use fhirbridge_server::StorageBackend;
use fhirbridge_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("fhirbridge.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
base_url = "https://bridge.example.org/"

[logging]
level = "debug"

[storage]
backend = "remote"

[storage.remote]
base_url = "http://fhir.internal:8080/fhir"
timeout_ms = 5000

[bulk]
max_concurrent_jobs = 2
batch_size = 50
export_path = "/var/lib/fhirbridge/exports"
retention_hours = 6

[auth]
enforce_scopes = true
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.base_url(), "https://bridge.example.org");
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.storage.backend, StorageBackend::Remote);
    assert_eq!(cfg.storage.remote.timeout_ms, 5000);
    assert_eq!(cfg.bulk.max_concurrent_jobs, 2);
    assert_eq!(cfg.bulk.batch_size, 50);
    assert_eq!(cfg.bulk.retention_hours, 6);
    // Unset keys keep their defaults
    assert_eq!(cfg.bulk.max_resources_per_file, 100_000);
    assert!(cfg.auth.enforce_scopes);
    assert_eq!(cfg.auth.scopes_header, "x-granted-scopes");

    // 2) Env override should win over file
    unsafe {
        env::set_var("FHIRBRIDGE__BULK__BATCH_SIZE", "75");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.bulk.batch_size, 75);
    unsafe {
        env::remove_var("FHIRBRIDGE__BULK__BATCH_SIZE");
    }

    // 3) Invalid values are rejected by validation
    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[bulk]\nmax_concurrent_jobs = 0\n").expect("write toml");
    let err = load_config(bad.to_str()).unwrap_err();
    assert!(err.contains("max_concurrent_jobs"));

    let bad = dir.path().join("remote.toml");
    fs::write(&bad, "[storage]\nbackend = \"remote\"\n").expect("write toml");
    let err = load_config(bad.to_str()).unwrap_err();
    assert!(err.contains("storage.remote.base_url"));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");
    let cfg = load_config(path.to_str()).expect("defaults");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.storage.backend, StorageBackend::Memory);
}
