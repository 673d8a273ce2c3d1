// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for simbay-manager.

use thiserror::Error;

use crate::status::InstanceState;

/// Manager errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Engine-level failure (unavailable runtime, missing container,
    /// create/stop failures with verbatim diagnostics).
    #[error("Engine error: {0}")]
    Engine(#[from] crate::engine::EngineError),

    /// The slot index is outside the configured range.
    #[error("Instance ID must be between 0 and {}", .max - 1)]
    InvalidSlot {
        /// The rejected slot index.
        slot: u32,
        /// Configured slot count.
        max: u32,
    },

    /// Another lifecycle operation is in flight for this slot. Retry later.
    #[error("Another operation is in progress for instance {slot}")]
    ConflictInProgress {
        /// The contended slot index.
        slot: u32,
    },

    /// The operation is not valid from the slot's current derived state.
    /// Rejected before any side effect.
    #[error("Cannot {op} instance {slot} while it is {state}")]
    InvalidState {
        /// The slot index.
        slot: u32,
        /// The derived state the slot was observed in.
        state: InstanceState,
        /// The rejected operation.
        op: &'static str,
    },
}

/// Result type using manager Error.
pub type Result<T> = std::result::Result<T, Error>;
