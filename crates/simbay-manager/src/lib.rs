// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Simbay Manager - Simulation Instance Lifecycle Management
//!
//! This crate is the control plane for a small, fixed pool of GPU simulation
//! containers. It maps logical instance slots (0..N-1) to containers with
//! deterministic names and ports, drives lifecycle transitions against the
//! container engine, and reconciles engine-reported state into a queryable
//! status model. The HTTP API layer and dashboard are external consumers of
//! the [`manager::InstanceManager`] surface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  External HTTP layer / CLI                   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  simbay-manager (This Crate)                 │
//! │  ┌────────────┐  ┌─────────────┐  ┌───────────────────────┐  │
//! │  │   Port     │  │  Instance   │  │   Status Reconciler   │  │
//! │  │ Allocator  │  │  Lifecycle  │  │  (derive, never cache)│  │
//! │  └────────────┘  └─────────────┘  └───────────────────────┘  │
//! │                         │                                    │
//! │                         ▼                                    │
//! │               ┌───────────────────┐                          │
//! │               │   Engine Client   │                          │
//! │               └───────────────────┘                          │
//! └─────────────────────────│───────────────────────────────────┘
//!                           │ docker CLI
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Container runtime (GPU passthrough, host net)         │
//! │   simbay-instance-0  simbay-instance-1  ...  simbay-instance-N│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Slot State Machine
//!
//! State is derived from engine truth on every query, never stored:
//!
//! ```text
//!            start                       engine: running
//! ┌────────┐ ─────► ┌──────────┐ ──────────────────────► ┌─────────┐
//! │ absent │        │ starting │                         │ running │
//! └────────┘        └──────────┘                         └─────────┘
//!     ▲                   │ stop                              │ stop
//!     │                   ▼                                   ▼
//!     │  remove      ┌─────────┐ ◄───────────────────────────┘
//!     └───────────── │ stopped │
//!                    └─────────┘
//! ```
//!
//! `error` is an overlay, not a fifth state: it carries the last failed
//! operation's diagnostic and clears on the next success.
//!
//! # Concurrency
//!
//! Lifecycle mutations (`start`, `stop`, `restart`, `remove`) are serialized
//! per slot; a second mutation on a busy slot fails fast with
//! `ConflictInProgress`. Operations on different slots run fully in parallel.
//! Status reads never take a lock and may observe intermediate engine states.
//!
//! # Configuration
//!
//! Loaded from environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SIMBAY_MAX_INSTANCES` | `4` | Number of instance slots |
//! | `SIMBAY_IMAGE` | `nvcr.io/nvidia/isaac-sim:5.1.0` | Simulator image |
//! | `SIMBAY_HTTP_PORT_BASE` | `8211` | HTTP port base (+ slot) |
//! | `SIMBAY_SIGNAL_PORT_BASE` | `8011` | Stream signal port base (+ slot) |
//! | `SIMBAY_NATIVE_PORT_BASE` | `8899` | Native stream port base (+ slot) |
//! | `SIMBAY_MEMORY_LIMIT` | `8g` | Per-container memory limit |
//! | `SIMBAY_SHM_SIZE` | `2g` | Per-container shared memory |
//! | `SIMBAY_GPU_ENABLED` | `true` | GPU passthrough |
//! | `SIMBAY_STREAMING_ENABLED` | `true` | Launch with streaming flags |
//! | `SIMBAY_STOP_TIMEOUT_SECS` | `10` | Graceful stop bound |
//! | `SIMBAY_STREAM_WARMUP_SECS` | `30` | Stream-ready grace period |
//! | `SIMBAY_DATA_DIR` | `.data` | Per-slot cache mount base |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`engine`]: Container engine clients (Docker CLI, mock)
//! - [`error`]: Error types for manager operations
//! - [`manager`]: Instance lifecycle manager
//! - [`ports`]: Deterministic slot port allocation
//! - [`status`]: Status model and reconciler

#![deny(missing_docs)]

/// Manager configuration loaded from environment variables.
pub mod config;

/// Container engine clients.
pub mod engine;

/// Error types for manager operations.
pub mod error;

/// Instance lifecycle manager.
pub mod manager;

/// Deterministic slot port allocation.
pub mod ports;

/// Status model and reconciler.
pub mod status;

pub use config::Config;
pub use error::Error;
pub use manager::InstanceManager;
