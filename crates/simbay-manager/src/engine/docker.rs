// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker engine client.
//!
//! Drives the `docker` CLI via subprocesses and parses `docker inspect` JSON.
//! Containers run with host networking, so the per-slot ports are carried in
//! the launch command rather than published mappings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::{
    ContainerEngine, ContainerSpec, ContainerState, EngineError, MANAGED_LABEL, Result,
    RuntimeStatus,
};

/// Docker CLI engine client.
pub struct DockerEngine {
    binary: String,
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerEngine {
    /// Create a client for the `docker` binary on PATH.
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Create a client for a specific binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run the CLI and collect its output. A missing binary surfaces as the
    /// engine being unavailable, not as an I/O error.
    async fn run_cli(&self, args: &[String]) -> Result<Output> {
        debug!(binary = %self.binary, args = ?args, "Invoking engine CLI");
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::Unavailable(format!("{} binary not found", self.binary))
                } else {
                    EngineError::Io(e)
                }
            })
    }

    /// Classify a failed CLI invocation from its stderr.
    ///
    /// Daemon-unreachable and missing-container cases are recognized; anything
    /// else is returned to the caller through `fallback` with the runtime's
    /// diagnostic text verbatim.
    fn classify(name: &str, stderr: &str, fallback: fn(String) -> EngineError) -> EngineError {
        let diag = stderr.trim();
        if diag.contains("Cannot connect to the Docker daemon")
            || diag.contains("error during connect")
            || diag.contains("Is the docker daemon running")
        {
            EngineError::Unavailable(diag.to_string())
        } else if diag.contains("No such container") || diag.contains("No such object") {
            EngineError::NotFound(name.to_string())
        } else {
            fallback(diag.to_string())
        }
    }

    /// Create the host directories for the spec's mounts.
    ///
    /// The container runs as a rootless user, so the directories are made
    /// world-writable; ownership is left to the operator.
    async fn prepare_mounts(&self, spec: &ContainerSpec) -> Result<()> {
        for mount in &spec.mounts {
            tokio::fs::create_dir_all(&mount.host).await?;
            if !mount.read_only {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = std::fs::set_permissions(
                    &mount.host,
                    std::fs::Permissions::from_mode(0o777),
                ) {
                    warn!(
                        path = %mount.host.display(),
                        error = %e,
                        "Could not set permissions on mount directory"
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct InspectedContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "State")]
    state: InspectedState,
}

#[derive(Debug, Deserialize)]
struct InspectedState {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "ExitCode")]
    exit_code: Option<i64>,
    #[serde(rename = "StartedAt")]
    started_at: Option<String>,
}

/// Parse the runtime's `StartedAt` timestamp. The runtime reports the zero
/// time for containers that never started.
fn parse_started_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw?).ok()?;
    if ts.timestamp() <= 0 {
        return None;
    }
    Some(ts.with_timezone(&Utc))
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn engine_type(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        let output = self
            .run_cli(&["version".into(), "--format".into(), "{{.Server.Version}}".into()])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EngineError::Unavailable(stderr.trim().to_string()))
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self.inspect(name).await {
            Ok(_) => Ok(true),
            Err(EngineError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        self.prepare_mounts(spec).await?;

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            spec.name.clone(),
            "--network".into(),
            "host".into(),
            "--memory".into(),
            spec.memory_limit.clone(),
            "--shm-size".into(),
            spec.shm_size.clone(),
        ];
        for (key, value) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        for mount in &spec.mounts {
            let mode = if mount.read_only { "ro" } else { "rw" };
            args.push("-v".into());
            args.push(format!(
                "{}:{}:{}",
                mount.host.display(),
                mount.container,
                mode
            ));
        }
        if spec.gpu_enabled {
            args.push("--runtime".into());
            args.push("nvidia".into());
            args.push("--gpus".into());
            args.push("all".into());
        }
        if let Some(user) = &spec.user {
            args.push("--user".into());
            args.push(user.clone());
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let output = self.run_cli(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify(&spec.name, &stderr, EngineError::CreateFailed));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(
            name = %spec.name,
            container_id = %container_id,
            image = %spec.image,
            "Created and started container"
        );
        Ok(container_id)
    }

    async fn stop(&self, name: &str, timeout: Duration) -> Result<()> {
        let output = self
            .run_cli(&[
                "stop".into(),
                "-t".into(),
                timeout.as_secs().to_string(),
                name.into(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify(name, &stderr, EngineError::StopFailed));
        }
        info!(name = %name, "Stopped container");
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let mut args: Vec<String> = vec!["rm".into()];
        if force {
            args.push("-f".into());
        }
        args.push(name.into());

        let output = self.run_cli(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify(name, &stderr, EngineError::Other));
        }
        info!(name = %name, "Removed container");
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState> {
        let output = self
            .run_cli(&[
                "inspect".into(),
                "--type".into(),
                "container".into(),
                name.into(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify(name, &stderr, EngineError::Other));
        }

        let inspected: Vec<InspectedContainer> = serde_json::from_slice(&output.stdout)?;
        let container = inspected
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;

        Ok(ContainerState {
            id: container.id,
            status: RuntimeStatus::parse(&container.state.status),
            exit_code: container.state.exit_code,
            started_at: parse_started_at(container.state.started_at.as_deref()),
        })
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        let output = self
            .run_cli(&[
                "logs".into(),
                "--tail".into(),
                tail.to_string(),
                "--timestamps".into(),
                name.into(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify(name, &stderr, EngineError::Other));
        }

        // The runtime multiplexes container stdout and stderr onto separate
        // CLI streams; callers want both.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        let output = self
            .run_cli(&[
                "ps".into(),
                "-a".into(),
                "--filter".into(),
                format!("label={}=true", MANAGED_LABEL),
                "--format".into(),
                "{{.Names}}".into(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify("", &stderr, EngineError::Other));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }
}
