// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! An in-memory engine implementation that mimics the runtime's observable
//! behavior (duplicate-name rejection, no-force removal of a running
//! container failing) without running anything.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    spec: ContainerSpec,
    state: ContainerState,
    logs: Vec<String>,
}

/// Mock engine for testing.
pub struct MockEngine {
    containers: Arc<Mutex<HashMap<String, MockContainer>>>,
    unavailable: AtomicBool,
    next_id: AtomicU64,
    /// Diagnostic text every `create_and_start` fails with, if set.
    create_failure: Mutex<Option<String>>,
    /// Names whose `stop` fails.
    stop_failures: Mutex<Vec<String>>,
    /// Names whose `remove` fails.
    remove_failures: Mutex<Vec<String>>,
    /// Delay applied inside `create_and_start`, for concurrency tests.
    pub create_delay: Duration,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a new mock engine.
    pub fn new() -> Self {
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            unavailable: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            create_failure: Mutex::new(None),
            stop_failures: Mutex::new(Vec::new()),
            remove_failures: Mutex::new(Vec::new()),
            create_delay: Duration::ZERO,
        }
    }

    /// Create a mock engine with a delay inside `create_and_start`.
    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Self::new()
        }
    }

    /// Make every operation fail with `EngineError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `create_and_start` fail with `diagnostic` from now on.
    pub async fn fail_create_with(&self, diagnostic: &str) {
        *self.create_failure.lock().await = Some(diagnostic.to_string());
    }

    /// Stop failing `create_and_start`.
    pub async fn clear_create_failure(&self) {
        *self.create_failure.lock().await = None;
    }

    /// Make `stop` fail for the named container.
    pub async fn fail_stop_for(&self, name: &str) {
        self.stop_failures.lock().await.push(name.to_string());
    }

    /// Make `remove` fail for the named container.
    pub async fn fail_remove_for(&self, name: &str) {
        self.remove_failures.lock().await.push(name.to_string());
    }

    /// Override the runtime status of a container.
    pub async fn set_status(&self, name: &str, status: RuntimeStatus, exit_code: Option<i64>) {
        let mut containers = self.containers.lock().await;
        if let Some(container) = containers.get_mut(name) {
            container.state.status = status;
            container.state.exit_code = exit_code;
        }
    }

    /// Shift a container's start time into the past, to cross warm-up grace
    /// periods in tests.
    pub async fn backdate_started(&self, name: &str, secs: i64) {
        let mut containers = self.containers.lock().await;
        if let Some(container) = containers.get_mut(name)
            && let Some(started_at) = container.state.started_at
        {
            container.state.started_at = Some(started_at - ChronoDuration::seconds(secs));
        }
    }

    /// Append a log line to a container.
    pub async fn push_log(&self, name: &str, line: &str) {
        let mut containers = self.containers.lock().await;
        if let Some(container) = containers.get_mut(name) {
            container.logs.push(line.to_string());
        }
    }

    /// The spec a container was created with, for assertions.
    pub async fn spec_for(&self, name: &str) -> Option<ContainerSpec> {
        let containers = self.containers.lock().await;
        containers.get(name).map(|c| c.spec.clone())
    }

    /// Number of containers currently known to the engine.
    pub async fn container_count(&self) -> usize {
        self.containers.lock().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(EngineError::Unavailable("mock engine offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.containers.lock().await.contains_key(name))
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        self.check_available()?;
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if let Some(diagnostic) = self.create_failure.lock().await.clone() {
            return Err(EngineError::CreateFailed(diagnostic));
        }

        let mut containers = self.containers.lock().await;
        if containers.contains_key(&spec.name) {
            return Err(EngineError::CreateFailed(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("{:064x}", n);
        containers.insert(
            spec.name.clone(),
            MockContainer {
                id: id.clone(),
                spec: spec.clone(),
                state: ContainerState {
                    id: id.clone(),
                    status: RuntimeStatus::Running,
                    exit_code: None,
                    started_at: Some(Utc::now()),
                },
                logs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn stop(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.check_available()?;
        if self.stop_failures.lock().await.iter().any(|n| n == name) {
            return Err(EngineError::StopFailed(format!(
                "cannot stop container: {}: mock stop failure",
                name
            )));
        }

        let mut containers = self.containers.lock().await;
        match containers.get_mut(name) {
            Some(container) => {
                container.state.status = RuntimeStatus::Exited;
                container.state.exit_code = Some(0);
                Ok(())
            }
            None => Err(EngineError::NotFound(name.to_string())),
        }
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        self.check_available()?;
        if self.remove_failures.lock().await.iter().any(|n| n == name) {
            return Err(EngineError::Other(format!(
                "cannot remove container: {}: mock remove failure",
                name
            )));
        }

        let mut containers = self.containers.lock().await;
        match containers.get(name) {
            Some(container) => {
                if container.state.status == RuntimeStatus::Running && !force {
                    return Err(EngineError::Other(format!(
                        "cannot remove container \"{}\": container is running: \
                         stop the container before removing or force remove",
                        name
                    )));
                }
                containers.remove(name);
                Ok(())
            }
            None => Err(EngineError::NotFound(name.to_string())),
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState> {
        self.check_available()?;
        let containers = self.containers.lock().await;
        containers
            .get(name)
            .map(|c| c.state.clone())
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        self.check_available()?;
        let containers = self.containers.lock().await;
        let container = containers
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let skip = container.logs.len().saturating_sub(tail);
        Ok(container.logs[skip..].join("\n"))
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let containers = self.containers.lock().await;
        let mut names: Vec<String> = containers
            .values()
            .filter(|c| {
                c.spec
                    .labels
                    .iter()
                    .any(|(key, value)| key == MANAGED_LABEL && value == "true")
            })
            .map(|c| c.spec.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
