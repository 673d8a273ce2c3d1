// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status model and reconciler.
//!
//! Slot status is never cached: every query re-derives it from the engine's
//! current truth, so the manager survives external container changes (engine
//! restart, manual stops) without an invalidation story.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::{ContainerState, RuntimeStatus};
use crate::ports::InstancePorts;

/// Manager-vocabulary state of one slot, derived from engine truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// No container with the slot's deterministic name exists.
    Absent,
    /// Container exists and is on its way up.
    Starting,
    /// Engine reports the container process running.
    Running,
    /// Container exists, process not running.
    Stopped,
}

impl InstanceState {
    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Absent => "absent",
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
        }
    }

    /// Whether a lifecycle mutation is currently meaningful on this state.
    pub fn is_active(&self) -> bool {
        matches!(self, InstanceState::Starting | InstanceState::Running)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible, derived view of one slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Slot index.
    pub instance_id: u32,
    /// Derived state.
    pub state: InstanceState,
    /// Deterministic ports for this slot.
    pub ports: InstancePorts,
    /// Browser-facing stream client URL.
    pub stream_url: String,
    /// Short container ID, when a container exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// When the container process last started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Whether the stream endpoints are presumed reachable: running, past the
    /// warm-up grace period, streaming enabled. Distinct from `state`.
    pub stream_ready: bool,
    /// Error overlay from the last failed operation on this slot, cleared on
    /// the next successful one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Map the engine's vocabulary into the manager's.
///
/// Anything unrecognized maps to `Absent`: failing open toward "not running"
/// is always safer than a false "running".
pub fn map_runtime_status(status: RuntimeStatus) -> InstanceState {
    match status {
        RuntimeStatus::Created | RuntimeStatus::Restarting => InstanceState::Starting,
        RuntimeStatus::Running => InstanceState::Running,
        RuntimeStatus::Paused | RuntimeStatus::Exited | RuntimeStatus::Dead => {
            InstanceState::Stopped
        }
        RuntimeStatus::Unknown => InstanceState::Absent,
    }
}

/// Derive a slot's status from what the engine reports right now.
pub fn reconcile(
    instance_id: u32,
    ports: InstancePorts,
    observed: Option<&ContainerState>,
    error: Option<String>,
    streaming_enabled: bool,
    warmup: Duration,
    now: DateTime<Utc>,
) -> InstanceStatus {
    let state = observed
        .map(|c| map_runtime_status(c.status))
        .unwrap_or(InstanceState::Absent);

    let started_at = match state {
        InstanceState::Absent => None,
        _ => observed.and_then(|c| c.started_at),
    };

    let stream_ready = streaming_enabled
        && state == InstanceState::Running
        && started_at
            .map(|t| (now - t).num_seconds() >= warmup.as_secs() as i64)
            .unwrap_or(false);

    InstanceStatus {
        instance_id,
        state,
        stream_url: ports.stream_url(),
        ports,
        container_id: match state {
            InstanceState::Absent => None,
            _ => observed.map(|c| short_id(&c.id)),
        },
        started_at,
        stream_ready,
        error,
    }
}

/// Truncate a container ID to the familiar 12-character short form.
fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ports::ports_for;

    fn observed(status: RuntimeStatus, started_secs_ago: i64) -> ContainerState {
        ContainerState {
            id: "4f1c9a6d8e2b4f1c9a6d8e2b".to_string(),
            status,
            exit_code: None,
            started_at: Some(Utc::now() - chrono::Duration::seconds(started_secs_ago)),
        }
    }

    #[test]
    fn test_mapping_table() {
        assert_eq!(map_runtime_status(RuntimeStatus::Created), InstanceState::Starting);
        assert_eq!(map_runtime_status(RuntimeStatus::Restarting), InstanceState::Starting);
        assert_eq!(map_runtime_status(RuntimeStatus::Running), InstanceState::Running);
        assert_eq!(map_runtime_status(RuntimeStatus::Paused), InstanceState::Stopped);
        assert_eq!(map_runtime_status(RuntimeStatus::Exited), InstanceState::Stopped);
        assert_eq!(map_runtime_status(RuntimeStatus::Dead), InstanceState::Stopped);
        assert_eq!(map_runtime_status(RuntimeStatus::Unknown), InstanceState::Absent);
    }

    #[test]
    fn test_absent_slot_has_no_container_identity() {
        let config = Config::default();
        let status = reconcile(
            0,
            ports_for(&config, 0),
            None,
            None,
            true,
            config.stream_warmup,
            Utc::now(),
        );
        assert_eq!(status.state, InstanceState::Absent);
        assert!(status.container_id.is_none());
        assert!(status.started_at.is_none());
        assert!(!status.stream_ready);
        // Addressing info is deterministic and present even for absent slots.
        assert_eq!(status.ports.http, 8211);
        assert!(status.stream_url.contains("8211"));
    }

    #[test]
    fn test_running_slot_before_warmup_not_stream_ready() {
        let config = Config::default();
        let state = observed(RuntimeStatus::Running, 5);
        let status = reconcile(
            1,
            ports_for(&config, 1),
            Some(&state),
            None,
            true,
            config.stream_warmup,
            Utc::now(),
        );
        assert_eq!(status.state, InstanceState::Running);
        assert!(!status.stream_ready);
        assert_eq!(status.container_id.as_deref(), Some("4f1c9a6d8e2b"));
    }

    #[test]
    fn test_running_slot_past_warmup_is_stream_ready() {
        let config = Config::default();
        let state = observed(RuntimeStatus::Running, 120);
        let status = reconcile(
            1,
            ports_for(&config, 1),
            Some(&state),
            None,
            true,
            config.stream_warmup,
            Utc::now(),
        );
        assert!(status.stream_ready);
    }

    #[test]
    fn test_streaming_disabled_never_stream_ready() {
        let config = Config::default();
        let state = observed(RuntimeStatus::Running, 120);
        let status = reconcile(
            1,
            ports_for(&config, 1),
            Some(&state),
            None,
            false,
            config.stream_warmup,
            Utc::now(),
        );
        assert!(!status.stream_ready);
    }

    #[test]
    fn test_error_overlay_carried_through() {
        let config = Config::default();
        let state = observed(RuntimeStatus::Exited, 300);
        let status = reconcile(
            2,
            ports_for(&config, 2),
            Some(&state),
            Some("Container stop failed: mock".to_string()),
            true,
            config.stream_warmup,
            Utc::now(),
        );
        assert_eq!(status.state, InstanceState::Stopped);
        assert!(status.error.is_some());
    }

    #[test]
    fn test_serialized_state_is_snake_case() {
        let json = serde_json::to_string(&InstanceState::Starting).unwrap();
        assert_eq!(json, "\"starting\"");
    }
}
