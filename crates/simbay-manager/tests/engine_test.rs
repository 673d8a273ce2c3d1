// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the engine module (trait surface, errors, mock semantics).

use std::sync::Arc;
use std::time::Duration;

use simbay_manager::engine::{
    ContainerEngine, ContainerSpec, DockerEngine, EngineError, MANAGED_LABEL, MockEngine,
    RuntimeStatus, SLOT_LABEL,
};

fn spec(name: &str) -> ContainerSpec {
    ContainerSpec {
        name: name.to_string(),
        image: "nvcr.io/nvidia/isaac-sim:5.1.0".to_string(),
        labels: vec![
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (SLOT_LABEL.to_string(), "0".to_string()),
        ],
        env: vec![("ACCEPT_EULA".to_string(), "Y".to_string())],
        mounts: Vec::new(),
        memory_limit: "8g".to_string(),
        shm_size: "2g".to_string(),
        gpu_enabled: true,
        user: Some("1234:1234".to_string()),
        command: vec!["./runheadless.sh".to_string(), "-v".to_string()],
    }
}

// ============================================================================
// EngineError Display
// ============================================================================

#[test]
fn test_engine_error_unavailable() {
    let err = EngineError::Unavailable("Cannot connect to the Docker daemon".to_string());
    let msg = format!("{}", err);
    assert!(msg.contains("Engine unavailable"));
    assert!(msg.contains("Cannot connect"));
}

#[test]
fn test_engine_error_not_found() {
    let err = EngineError::NotFound("simbay-instance-0".to_string());
    let msg = format!("{}", err);
    assert!(msg.contains("Container not found"));
    assert!(msg.contains("simbay-instance-0"));
}

#[test]
fn test_engine_error_create_failed_keeps_diagnostic() {
    let diag = "docker: Error response from daemon: pull access denied for nvcr.io/nvidia/isaac-sim";
    let err = EngineError::CreateFailed(diag.to_string());
    assert!(format!("{}", err).contains(diag));
}

#[test]
fn test_engine_error_stop_failed() {
    let err = EngineError::StopFailed("cannot stop container: permission denied".to_string());
    assert!(format!("{}", err).contains("Container stop failed"));
}

#[test]
fn test_engine_error_io() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let err = EngineError::Io(io_err);
    assert!(format!("{}", err).contains("IO error"));
}

// ============================================================================
// RuntimeStatus
// ============================================================================

#[test]
fn test_runtime_status_parse_known_values() {
    assert_eq!(RuntimeStatus::parse("created"), RuntimeStatus::Created);
    assert_eq!(RuntimeStatus::parse("restarting"), RuntimeStatus::Restarting);
    assert_eq!(RuntimeStatus::parse("running"), RuntimeStatus::Running);
    assert_eq!(RuntimeStatus::parse("paused"), RuntimeStatus::Paused);
    assert_eq!(RuntimeStatus::parse("exited"), RuntimeStatus::Exited);
    assert_eq!(RuntimeStatus::parse("dead"), RuntimeStatus::Dead);
}

#[test]
fn test_runtime_status_parse_unknown_values() {
    assert_eq!(RuntimeStatus::parse("removing"), RuntimeStatus::Unknown);
    assert_eq!(RuntimeStatus::parse(""), RuntimeStatus::Unknown);
    assert_eq!(RuntimeStatus::parse("RUNNING"), RuntimeStatus::Unknown);
}

// ============================================================================
// Mock Engine Through The Trait Object
// ============================================================================

#[tokio::test]
async fn test_mock_engine_as_trait_object() {
    let engine: Arc<dyn ContainerEngine> = Arc::new(MockEngine::new());
    assert_eq!(engine.engine_type(), "mock");
    engine.ping().await.unwrap();

    let id = engine.create_and_start(&spec("c1")).await.unwrap();
    assert_eq!(id.len(), 64);
    assert!(engine.exists("c1").await.unwrap());

    engine.stop("c1", Duration::from_secs(10)).await.unwrap();
    let state = engine.inspect("c1").await.unwrap();
    assert_eq!(state.status, RuntimeStatus::Exited);

    engine.remove("c1", false).await.unwrap();
    assert!(!engine.exists("c1").await.unwrap());
}

#[tokio::test]
async fn test_mock_engine_stop_failure_knob() {
    let engine = MockEngine::new();
    engine.create_and_start(&spec("c1")).await.unwrap();
    engine.fail_stop_for("c1").await;

    let err = engine.stop("c1", Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, EngineError::StopFailed(_)));

    // The container is untouched by the failed stop.
    let state = engine.inspect("c1").await.unwrap();
    assert_eq!(state.status, RuntimeStatus::Running);
}

// ============================================================================
// Docker Engine (no daemon required)
// ============================================================================

#[test]
fn test_docker_engine_type() {
    assert_eq!(DockerEngine::new().engine_type(), "docker");
}

#[tokio::test]
async fn test_missing_binary_reports_unavailable() {
    let engine = DockerEngine::with_binary("simbay-test-no-such-binary");

    let err = engine.ping().await.unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(msg) if msg.contains("binary not found")));

    let err = engine.inspect("simbay-instance-0").await.unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(_)));
}
