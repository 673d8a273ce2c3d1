// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine trait definitions.
//!
//! Defines the abstract interface to the container runtime. The engine client
//! is the only component allowed to speak to the runtime; everything above it
//! works in terms of deterministic container names.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Label attached to every container this manager creates. `list_managed`
/// filters on it so unrelated containers are never touched.
pub const MANAGED_LABEL: &str = "simbay.managed";

/// Label carrying the slot index of a managed container.
pub const SLOT_LABEL: &str = "simbay.slot";

/// Errors from engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The container runtime is unreachable. All higher-level operations are
    /// unavailable until resolved.
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// The named container does not exist. Callers treat this as "already in
    /// the desired end state" where applicable.
    #[error("Container not found: {0}")]
    NotFound(String),

    /// The runtime rejected creation. Carries the runtime's diagnostic text
    /// verbatim (port conflict, missing image, GPU runtime unavailable).
    #[error("Container create failed: {0}")]
    CreateFailed(String),

    /// The runtime failed to stop the container.
    #[error("Container stop failed: {0}")]
    StopFailed(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other runtime-level failure, diagnostic text verbatim.
    #[error("{0}")]
    Other(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A host directory bound into the container.
#[derive(Debug, Clone)]
pub struct Mount {
    /// Host directory, created on demand before launch.
    pub host: PathBuf,
    /// Absolute path inside the container.
    pub container: String,
    /// Bind read-only.
    pub read_only: bool,
}

/// Everything the engine needs to create and start one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Deterministic container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Labels, including the manager-owned ones.
    pub labels: Vec<(String, String)>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Cache/data mounts.
    pub mounts: Vec<Mount>,
    /// Memory limit in engine syntax (e.g. "8g").
    pub memory_limit: String,
    /// Shared memory size in engine syntax (e.g. "2g").
    pub shm_size: String,
    /// Pass all GPUs through via the nvidia runtime.
    pub gpu_enabled: bool,
    /// Container user, `uid:gid`.
    pub user: Option<String>,
    /// Launch command and arguments.
    pub command: Vec<String>,
}

/// Container status in the runtime's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    /// Created but not yet started.
    Created,
    /// Restart in progress.
    Restarting,
    /// Process is running.
    Running,
    /// Process paused.
    Paused,
    /// Process exited.
    Exited,
    /// Runtime considers the container dead.
    Dead,
    /// Anything the runtime reports that we do not recognize.
    Unknown,
}

impl RuntimeStatus {
    /// Parse the runtime's status string.
    pub fn parse(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "restarting" => Self::Restarting,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Observed state of one container, as reported by the runtime.
#[derive(Debug, Clone)]
pub struct ContainerState {
    /// Full container ID.
    pub id: String,
    /// Runtime status.
    pub status: RuntimeStatus,
    /// Exit code, for exited containers.
    pub exit_code: Option<i64>,
    /// When the process was last started. None if never started.
    pub started_at: Option<DateTime<Utc>>,
}

/// Trait for container engine clients.
///
/// Implementations are PURE facades over the runtime - they hold no state
/// about which containers exist. Rediscovery after a manager restart works
/// through deterministic names and the managed label alone.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine type identifier (e.g., "docker", "mock").
    fn engine_type(&self) -> &'static str;

    /// Check that the runtime is reachable.
    async fn ping(&self) -> Result<()>;

    /// Whether a container with this name exists (any status).
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Create and start a container, returning its full container ID.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Gracefully stop a container; the runtime force-kills after `timeout`.
    async fn stop(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Remove a container. Without `force` the runtime rejects removal of a
    /// running container.
    async fn remove(&self, name: &str, force: bool) -> Result<()>;

    /// Inspect a container's current state.
    async fn inspect(&self, name: &str) -> Result<ContainerState>;

    /// Fetch the last `tail` log lines, with timestamps.
    async fn logs(&self, name: &str, tail: usize) -> Result<String>;

    /// Names of all containers carrying the managed label, any status.
    async fn list_managed(&self) -> Result<Vec<String>>;
}
