// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Port allocation for instance slots.
//!
//! Each slot gets three well-known ports derived from the configured base
//! values: `base + instance_id`. The scheme is deterministic and injective
//! across slots, so no port bookkeeping state exists anywhere.

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Ports assigned to one instance slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePorts {
    /// HTTP/stream-client endpoint port.
    pub http: u16,
    /// Streaming signal endpoint port.
    pub signal: u16,
    /// Native streaming endpoint port.
    pub native: u16,
}

impl InstancePorts {
    /// Browser-facing stream client URL for this slot.
    pub fn stream_url(&self) -> String {
        format!("http://localhost:{}/streaming/webrtc-client/", self.http)
    }
}

/// Compute the ports for a slot. Pure and total.
///
/// `instance_id` must be below `config.max_instances`; callers validate
/// before reaching the allocator.
pub fn ports_for(config: &Config, instance_id: u32) -> InstancePorts {
    debug_assert!(instance_id < config.max_instances);
    InstancePorts {
        http: (config.http_port_base as u32 + instance_id) as u16,
        signal: (config.signal_port_base as u32 + instance_id) as u16,
        native: (config.native_port_base as u32 + instance_id) as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_follow_base_plus_slot() {
        let config = Config::default();
        let ports = ports_for(&config, 2);
        assert_eq!(ports.http, 8213);
        assert_eq!(ports.signal, 8013);
        assert_eq!(ports.native, 8901);
    }

    #[test]
    fn test_ports_injective_across_slots() {
        let config = Config::default();
        let mut seen = std::collections::HashSet::new();
        for slot in 0..config.max_instances {
            let ports = ports_for(&config, slot);
            assert!(seen.insert(ports.http));
            assert!(seen.insert(ports.signal));
            assert!(seen.insert(ports.native));
        }
    }

    #[test]
    fn test_ports_stable_across_calls() {
        let config = Config::default();
        assert_eq!(ports_for(&config, 3), ports_for(&config, 3));
    }

    #[test]
    fn test_changing_base_shifts_allocation_contiguously() {
        let mut config = Config::default();
        config.http_port_base = 9000;
        for slot in 0..config.max_instances {
            assert_eq!(ports_for(&config, slot).http, 9000 + slot as u16);
        }
    }

    #[test]
    fn test_stream_url_uses_http_port() {
        let config = Config::default();
        let url = ports_for(&config, 1).stream_url();
        assert_eq!(url, "http://localhost:8212/streaming/webrtc-client/");
    }
}
