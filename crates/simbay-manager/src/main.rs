// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Simbay Manager - operational entry point
//!
//! A thin command wrapper around the lifecycle manager for operators and the
//! install scripting:
//! - `simbay-manager status` (default): engine health plus the derived
//!   status of every slot, as JSON
//! - `simbay-manager cleanup`: best-effort stop and remove of every managed
//!   container

use std::sync::Arc;
use tracing::{info, warn};

use simbay_manager::config::Config;
use simbay_manager::engine::{ContainerEngine, DockerEngine};
use simbay_manager::manager::InstanceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simbay_manager=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    info!(
        max_instances = config.max_instances,
        image = %config.image,
        gpu_enabled = config.gpu_enabled,
        "Starting Simbay Manager"
    );

    let engine = Arc::new(DockerEngine::new());
    info!(engine_type = engine.engine_type(), "Engine client initialized");

    let manager = InstanceManager::new(config, engine);

    let command = std::env::args().nth(1).unwrap_or_else(|| "status".to_string());
    match command.as_str() {
        "status" => {
            let health = manager.health().await;
            if !health.engine_reachable {
                warn!("Container engine is unreachable; statuses will be degraded");
            }
            let statuses = manager.status_all().await?;
            let report = serde_json::json!({
                "health": health,
                "instances": statuses,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "cleanup" => {
            let results = manager.cleanup_all().await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        other => {
            anyhow::bail!("unknown command: {} (expected: status, cleanup)", other);
        }
    }

    Ok(())
}
