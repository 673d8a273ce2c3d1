// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle manager.
//!
//! Owns the slot table, drives state transitions against the engine client,
//! and derives slot status from engine truth on every query. Lifecycle
//! mutations are serialized per slot; reads never take a lock. The manager
//! holds no persisted state: after a process restart it rediscovers its
//! containers through their deterministic names.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::{
    ContainerEngine, ContainerSpec, ContainerState, EngineError, MANAGED_LABEL, Mount, SLOT_LABEL,
};
use crate::error::{Error, Result};
use crate::ports::{InstancePorts, ports_for};
use crate::status::{InstanceState, InstanceStatus, map_runtime_status, reconcile};

/// Prefix of every managed container name.
pub const CONTAINER_PREFIX: &str = "simbay-instance";

/// Simulator user inside the container, per the image's rootless setup.
const CONTAINER_USER: &str = "1234:1234";

/// Per-slot cache directories bound into the container, relative to the
/// slot's data directory.
const CACHE_MOUNTS: &[(&str, &str)] = &[
    ("cache/main", "/isaac-sim/.cache"),
    ("cache/compute", "/isaac-sim/.nv/ComputeCache"),
    ("logs", "/isaac-sim/.nvidia-omniverse/logs"),
    ("config", "/isaac-sim/.nvidia-omniverse/config"),
    ("data", "/isaac-sim/.local/share/ov/data"),
    ("pkg", "/isaac-sim/.local/share/ov/pkg"),
];

/// Deterministic container name for a slot. Stable across process restarts,
/// which is what makes stateless rediscovery work.
pub fn container_name(slot: u32) -> String {
    format!("{}-{}", CONTAINER_PREFIX, slot)
}

/// Per-slot cleanup result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// Container stopped (if needed) and removed.
    Removed,
    /// No container existed for the slot.
    NotFound,
    /// Cleanup failed; the other slots were still processed.
    Error {
        /// What went wrong.
        error: String,
    },
}

/// Engine reachability, for the external layer's health endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Health {
    /// Whether the container runtime answered a ping.
    pub engine_reachable: bool,
}

#[derive(Default)]
struct SlotState {
    /// Serializes lifecycle mutations for this slot. `try_lock` failure is
    /// surfaced as `ConflictInProgress`, never waited on.
    op_lock: Mutex<()>,
    /// Error overlay: message of the last failed engine operation, cleared on
    /// the next successful one.
    last_error: Mutex<Option<String>>,
}

/// The instance lifecycle manager.
pub struct InstanceManager {
    config: Config,
    engine: Arc<dyn ContainerEngine>,
    slots: Vec<SlotState>,
}

impl InstanceManager {
    /// Create a manager for `config.max_instances` slots.
    pub fn new(config: Config, engine: Arc<dyn ContainerEngine>) -> Self {
        let slots = (0..config.max_instances)
            .map(|_| SlotState::default())
            .collect();
        Self {
            config,
            engine,
            slots,
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn check_slot(&self, slot: u32) -> Result<()> {
        if slot < self.config.max_instances {
            Ok(())
        } else {
            Err(Error::InvalidSlot {
                slot,
                max: self.config.max_instances,
            })
        }
    }

    /// Inspect the slot's container, treating "no such container" as a valid
    /// observation rather than an error.
    async fn observe(&self, name: &str) -> Result<Option<ContainerState>> {
        match self.engine.inspect(name).await {
            Ok(state) => Ok(Some(state)),
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn derived_state(observed: Option<&ContainerState>) -> InstanceState {
        observed
            .map(|c| map_runtime_status(c.status))
            .unwrap_or(InstanceState::Absent)
    }

    async fn note_failure(&self, slot: u32, err: &Error) {
        *self.slots[slot as usize].last_error.lock().await = Some(err.to_string());
    }

    async fn note_success(&self, slot: u32) {
        *self.slots[slot as usize].last_error.lock().await = None;
    }

    /// Derived status of one slot, re-read from engine truth.
    pub async fn status(&self, slot: u32) -> Result<InstanceStatus> {
        self.check_slot(slot)?;
        let observed = self.observe(&container_name(slot)).await?;
        let last_error = self.slots[slot as usize].last_error.lock().await.clone();
        Ok(reconcile(
            slot,
            ports_for(&self.config, slot),
            observed.as_ref(),
            last_error,
            self.config.streaming_enabled,
            self.config.stream_warmup,
            Utc::now(),
        ))
    }

    /// Derived status of every slot.
    pub async fn status_all(&self) -> Result<Vec<InstanceStatus>> {
        let mut all = Vec::with_capacity(self.slots.len());
        for slot in 0..self.config.max_instances {
            all.push(self.status(slot).await?);
        }
        Ok(all)
    }

    /// Start a slot's container. Valid from `absent` and `stopped`; a stopped
    /// container is always recreated so configuration drift (image tag,
    /// memory limit, ports) is picked up on the way back up.
    pub async fn start(&self, slot: u32) -> Result<InstanceStatus> {
        self.check_slot(slot)?;
        let _guard = self.slots[slot as usize]
            .op_lock
            .try_lock()
            .map_err(|_| Error::ConflictInProgress { slot })?;
        self.start_locked(slot).await
    }

    async fn start_locked(&self, slot: u32) -> Result<InstanceStatus> {
        let name = container_name(slot);
        let observed = self.observe(&name).await?;
        let state = Self::derived_state(observed.as_ref());

        match state {
            InstanceState::Starting | InstanceState::Running => {
                return Err(Error::InvalidState {
                    slot,
                    state,
                    op: "start",
                });
            }
            InstanceState::Stopped => {
                match self.engine.remove(&name, false).await {
                    Ok(()) | Err(EngineError::NotFound(_)) => {}
                    Err(e) => {
                        let err = Error::from(e);
                        self.note_failure(slot, &err).await;
                        return Err(err);
                    }
                }
            }
            InstanceState::Absent => {}
        }

        let spec = self.build_spec(slot);
        info!(slot, name = %name, image = %spec.image, "Starting instance");
        match self.engine.create_and_start(&spec).await {
            Ok(container_id) => {
                self.note_success(slot).await;
                info!(slot, container_id = %container_id, "Instance container created");
                self.status(slot).await
            }
            Err(e) => {
                let err = Error::from(e);
                error!(slot, error = %err, "Failed to start instance");
                self.note_failure(slot, &err).await;
                Err(err)
            }
        }
    }

    /// Gracefully stop a slot's container. Valid from `running`, and from
    /// `starting` to cancel a slow boot. The container is retained so logs
    /// stay inspectable and a later `start` recreates cleanly.
    pub async fn stop(&self, slot: u32) -> Result<InstanceStatus> {
        self.check_slot(slot)?;
        let _guard = self.slots[slot as usize]
            .op_lock
            .try_lock()
            .map_err(|_| Error::ConflictInProgress { slot })?;
        self.stop_locked(slot).await?;
        self.status(slot).await
    }

    async fn stop_locked(&self, slot: u32) -> Result<()> {
        let name = container_name(slot);
        let observed = self.observe(&name).await?;
        let state = Self::derived_state(observed.as_ref());

        if !state.is_active() {
            return Err(Error::InvalidState {
                slot,
                state,
                op: "stop",
            });
        }

        info!(slot, name = %name, "Stopping instance");
        match self.engine.stop(&name, self.config.stop_timeout).await {
            // Vanished mid-flight: already in the desired end state.
            Ok(()) | Err(EngineError::NotFound(_)) => {
                self.note_success(slot).await;
                Ok(())
            }
            Err(e) => {
                let err = Error::from(e);
                error!(slot, error = %err, "Failed to stop instance");
                self.note_failure(slot, &err).await;
                Err(err)
            }
        }
    }

    /// Stop (if needed) and start a slot, yielding a fresh container.
    /// Idempotent with respect to "get me a running container": on an absent
    /// or stopped slot this behaves as `start`.
    pub async fn restart(&self, slot: u32) -> Result<InstanceStatus> {
        self.check_slot(slot)?;
        let _guard = self.slots[slot as usize]
            .op_lock
            .try_lock()
            .map_err(|_| Error::ConflictInProgress { slot })?;

        let name = container_name(slot);
        let observed = self.observe(&name).await?;
        if Self::derived_state(observed.as_ref()).is_active() {
            match self.engine.stop(&name, self.config.stop_timeout).await {
                Ok(()) | Err(EngineError::NotFound(_)) => {}
                Err(e) => {
                    let err = Error::from(e);
                    self.note_failure(slot, &err).await;
                    return Err(err);
                }
            }
        }

        self.start_locked(slot).await
    }

    /// Remove a slot's container and clear its binding. Running instances
    /// must be stopped first; this never stops implicitly.
    pub async fn remove(&self, slot: u32) -> Result<()> {
        self.check_slot(slot)?;
        let _guard = self.slots[slot as usize]
            .op_lock
            .try_lock()
            .map_err(|_| Error::ConflictInProgress { slot })?;

        let name = container_name(slot);
        let observed = self.observe(&name).await?;
        let state = Self::derived_state(observed.as_ref());

        match state {
            InstanceState::Starting | InstanceState::Running => Err(Error::InvalidState {
                slot,
                state,
                op: "remove",
            }),
            InstanceState::Absent => {
                self.note_success(slot).await;
                Ok(())
            }
            InstanceState::Stopped => {
                // force=false: the engine itself rejects a racing
                // still-running container.
                match self.engine.remove(&name, false).await {
                    Ok(()) | Err(EngineError::NotFound(_)) => {
                        self.note_success(slot).await;
                        info!(slot, name = %name, "Removed instance");
                        Ok(())
                    }
                    Err(e) => {
                        let err = Error::from(e);
                        error!(slot, error = %err, "Failed to remove instance");
                        self.note_failure(slot, &err).await;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Last `tail` log lines of a slot's container, with timestamps.
    pub async fn logs(&self, slot: u32, tail: usize) -> Result<String> {
        self.check_slot(slot)?;
        Ok(self.engine.logs(&container_name(slot), tail).await?)
    }

    /// Best-effort stop and remove across every slot, continuing past
    /// individual failures. Managed containers left over from an earlier,
    /// larger slot count are swept as well.
    pub async fn cleanup_all(&self) -> BTreeMap<u32, CleanupOutcome> {
        info!("Cleaning up all instances");
        let mut results = BTreeMap::new();
        for slot in 0..self.config.max_instances {
            results.insert(slot, self.cleanup_slot(slot).await);
        }
        self.cleanup_orphans().await;
        results
    }

    async fn cleanup_slot(&self, slot: u32) -> CleanupOutcome {
        let _guard = match self.slots[slot as usize].op_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                return CleanupOutcome::Error {
                    error: "another operation is in progress".to_string(),
                };
            }
        };

        let name = container_name(slot);
        let observed = match self.observe(&name).await {
            Ok(observed) => observed,
            Err(e) => {
                return CleanupOutcome::Error {
                    error: e.to_string(),
                };
            }
        };
        if observed.is_none() {
            return CleanupOutcome::NotFound;
        }

        if Self::derived_state(observed.as_ref()).is_active()
            && let Err(e) = self.engine.stop(&name, self.config.stop_timeout).await
            && !matches!(e, EngineError::NotFound(_))
        {
            // Force removal below still applies.
            warn!(slot, error = %e, "Graceful stop failed during cleanup");
        }

        match self.engine.remove(&name, true).await {
            Ok(()) => {
                self.note_success(slot).await;
                info!(slot, name = %name, "Cleaned up instance");
                CleanupOutcome::Removed
            }
            Err(EngineError::NotFound(_)) => CleanupOutcome::NotFound,
            Err(e) => {
                let err = Error::from(e);
                error!(slot, error = %err, "Failed to clean up instance");
                self.note_failure(slot, &err).await;
                CleanupOutcome::Error {
                    error: err.to_string(),
                }
            }
        }
    }

    /// Remove managed containers whose name does not correspond to any
    /// current slot (left behind by a larger `max_instances`). Unlabeled
    /// containers are never touched.
    async fn cleanup_orphans(&self) {
        let managed = match self.engine.list_managed().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list managed containers");
                return;
            }
        };

        let expected: Vec<String> = (0..self.config.max_instances).map(container_name).collect();
        for name in managed {
            if expected.contains(&name) {
                continue;
            }
            warn!(name = %name, "Removing orphaned managed container");
            if let Err(e) = self.engine.stop(&name, self.config.stop_timeout).await
                && !matches!(e, EngineError::NotFound(_))
            {
                warn!(name = %name, error = %e, "Graceful stop of orphan failed");
            }
            if let Err(e) = self.engine.remove(&name, true).await
                && !matches!(e, EngineError::NotFound(_))
            {
                warn!(name = %name, error = %e, "Failed to remove orphan");
            }
        }
    }

    /// Engine reachability.
    pub async fn health(&self) -> Health {
        Health {
            engine_reachable: self.engine.ping().await.is_ok(),
        }
    }

    fn launch_command(&self, ports: InstancePorts) -> Vec<String> {
        let mut command = vec!["./runheadless.sh".to_string(), "-v".to_string()];
        if self.config.streaming_enabled {
            command.push("--enable-webrtc-streaming".to_string());
            command.push(format!(
                "--/exts/omni.services.transport.server.http/port={}",
                ports.http
            ));
            command.push(format!(
                "--/exts/omni.kit.streamsdk.plugins/rtcServerPort={}",
                ports.signal
            ));
        }
        command
    }

    fn build_spec(&self, slot: u32) -> ContainerSpec {
        let ports = ports_for(&self.config, slot);
        let slot_dir = self
            .config
            .data_dir
            .join("instances")
            .join(slot.to_string());

        ContainerSpec {
            name: container_name(slot),
            image: self.config.image.clone(),
            labels: vec![
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (SLOT_LABEL.to_string(), slot.to_string()),
            ],
            env: vec![
                ("ACCEPT_EULA".to_string(), "Y".to_string()),
                ("PRIVACY_CONSENT".to_string(), "Y".to_string()),
                // The RTX renderer requires a display even in headless mode.
                ("DISPLAY".to_string(), ":0".to_string()),
            ],
            mounts: CACHE_MOUNTS
                .iter()
                .map(|(sub, target)| Mount {
                    host: slot_dir.join(sub),
                    container: (*target).to_string(),
                    read_only: false,
                })
                .collect(),
            memory_limit: self.config.memory_limit.clone(),
            shm_size: self.config.shm_size.clone(),
            gpu_enabled: self.config.gpu_enabled,
            user: Some(CONTAINER_USER.to_string()),
            command: self.launch_command(ports),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_is_deterministic() {
        assert_eq!(container_name(0), "simbay-instance-0");
        assert_eq!(container_name(3), "simbay-instance-3");
        assert_eq!(container_name(3), container_name(3));
    }

    #[test]
    fn test_build_spec_carries_slot_ports_in_command() {
        let manager = InstanceManager::new(Config::default(), Arc::new(crate::engine::MockEngine::new()));
        let spec = manager.build_spec(2);

        assert_eq!(spec.name, "simbay-instance-2");
        assert!(spec.command.iter().any(|arg| arg.ends_with("port=8213")));
        assert!(spec.command.iter().any(|arg| arg.ends_with("rtcServerPort=8013")));
        assert!(spec.gpu_enabled);
        assert_eq!(spec.user.as_deref(), Some("1234:1234"));
        assert!(
            spec.labels
                .contains(&(SLOT_LABEL.to_string(), "2".to_string()))
        );
    }

    #[test]
    fn test_build_spec_without_streaming_omits_stream_flags() {
        let config = Config {
            streaming_enabled: false,
            ..Config::default()
        };
        let manager = InstanceManager::new(config, Arc::new(crate::engine::MockEngine::new()));
        let spec = manager.build_spec(0);

        assert_eq!(spec.command, vec!["./runheadless.sh", "-v"]);
    }

    #[test]
    fn test_build_spec_mounts_are_per_slot() {
        let manager = InstanceManager::new(Config::default(), Arc::new(crate::engine::MockEngine::new()));
        let spec_a = manager.build_spec(0);
        let spec_b = manager.build_spec(1);

        assert_eq!(spec_a.mounts.len(), CACHE_MOUNTS.len());
        for (a, b) in spec_a.mounts.iter().zip(spec_b.mounts.iter()) {
            assert_ne!(a.host, b.host);
            assert_eq!(a.container, b.container);
        }
    }

    #[test]
    fn test_cleanup_outcome_serialization() {
        let json = serde_json::to_string(&CleanupOutcome::Removed).unwrap();
        assert_eq!(json, r#"{"status":"removed"}"#);

        let json = serde_json::to_string(&CleanupOutcome::Error {
            error: "boom".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains("boom"));
    }
}
