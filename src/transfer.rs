//! Two-phase transfer execution against the external sync tool.
//!
//! Phase 1 copies everything except system artifacts and the size-filtered
//! extensions, and is awaited to completion. Phase 2 re-runs the tree with a
//! minimum-size floor and skip-existing semantics, which reduces to the large
//! filtered files; it is spawned, and its lifetime defines the session.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{CopyError, CopyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Everything except artifacts and filtered extensions.
    Structural,
    /// Size-floored second pass over the filtered extensions.
    FilteredLarge,
}

/// Builds the external tool's argument list for a copy or dry-run
/// reconciliation pass. The dry-run form adds the machine-parsed summary.
pub fn build_args(
    config: &Config,
    source: &Path,
    dest_save_dir: &Path,
    phase: Phase,
    dry_run: bool,
) -> Vec<String> {
    let mut args = Vec::new();
    args.push(if dry_run { "-rvn" } else { "-rv" }.to_string());
    if dry_run {
        args.push("--stats".to_string());
    } else {
        args.push("--progress".to_string());
    }

    if phase == Phase::FilteredLarge {
        args.push(format!("--min-size={}", config.min_filtered_bytes));
        args.push("--ignore-existing".to_string());
    }

    for pattern in &config.exclude_patterns {
        args.push("--exclude".to_string());
        args.push(pattern.clone());
    }
    if phase == Phase::Structural {
        for ext in &config.filtered_extensions {
            args.push("--exclude".to_string());
            args.push(format!("*.{ext}"));
        }
    }

    args.push(source.to_string_lossy().into_owned());
    args.push(dest_save_dir.to_string_lossy().into_owned());
    args
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Terminated,
    TimeoutExceeded,
}

/// One in-flight transfer attempt. Owned by the orchestrator; background
/// tasks only reach it through the channels handed out here.
pub struct TransferSession {
    pub id: Uuid,
    pub source: PathBuf,
    pub dest_save_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub cancel_requested: bool,
    pid: Option<u32>,
    output: mpsc::UnboundedReceiver<String>,
    alive: watch::Receiver<bool>,
}

impl TransferSession {
    /// The session is live exactly as long as the phase-2 process runs.
    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    pub fn alive_handle(&self) -> watch::Receiver<bool> {
        self.alive.clone()
    }

    /// Non-blocking read of the next tool output line, if any.
    pub fn try_output_line(&mut self) -> Option<String> {
        self.output.try_recv().ok()
    }
}

pub struct TransferExecutor {
    config: Arc<Config>,
}

impl TransferExecutor {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Runs phase 1 to completion, then spawns phase 2 and returns the live
    /// session. The destination save directory is created first and is
    /// unique per attempt via the timestamp suffix.
    pub async fn start(&self, source: &Path, dest: &Path) -> CopyResult<TransferSession> {
        let base = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("volume");
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let dest_save_dir = dest.join(format!("{base}_{stamp}"));
        std::fs::create_dir_all(&dest_save_dir)?;

        self.run_structural_phase(source, &dest_save_dir).await?;
        self.spawn_filtered_phase(source, &dest_save_dir)
    }

    async fn run_structural_phase(&self, source: &Path, dest_save_dir: &Path) -> CopyResult<()> {
        let args = build_args(&self.config, source, dest_save_dir, Phase::Structural, false);
        info!("phase 1: {} {}", self.config.tool_path, args.join(" "));

        let output = Command::new(&self.config.tool_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CopyError::Tool {
                tool: self.config.tool_path.clone(),
                reason: e.to_string(),
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("phase 1: {line}");
        }
        if !output.status.success() {
            warn!(
                "phase 1 exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn spawn_filtered_phase(
        &self,
        source: &Path,
        dest_save_dir: &Path,
    ) -> CopyResult<TransferSession> {
        let args = build_args(&self.config, source, dest_save_dir, Phase::FilteredLarge, false);
        info!("phase 2: {} {}", self.config.tool_path, args.join(" "));

        let mut child = Command::new(&self.config.tool_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CopyError::Tool {
                tool: self.config.tool_path.clone(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (alive_tx, alive_rx) = watch::channel(true);

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("copy stderr: {line}");
                }
            });
        }

        tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            }
            // liveness follows the process, not the pipe
            match child.wait().await {
                Ok(status) => debug!("copy process exited with {status}"),
                Err(e) => warn!("failed to reap copy process: {e}"),
            }
            let _ = alive_tx.send(false);
        });

        Ok(TransferSession {
            id: Uuid::new_v4(),
            source: source.to_path_buf(),
            dest_save_dir: dest_save_dir.to_path_buf(),
            started_at: Utc::now(),
            cancel_requested: false,
            pid,
            output: line_rx,
            alive: alive_rx,
        })
    }

    /// Graceful terminate with a bounded wait. On timeout the process is
    /// left running and the caller must still treat the session as aborted.
    pub async fn cancel(&self, session: &mut TransferSession) -> CancelOutcome {
        session.cancel_requested = true;
        if !session.is_alive() {
            return CancelOutcome::Terminated;
        }

        #[cfg(unix)]
        if let Some(pid) = session.pid {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        let mut alive = session.alive_handle();
        let exited = async {
            while *alive.borrow() {
                if alive.changed().await.is_err() {
                    break;
                }
            }
        };
        match tokio::time::timeout(self.config.cancel_grace(), exited).await {
            Ok(()) => CancelOutcome::Terminated,
            Err(_) => CancelOutcome::TimeoutExceeded,
        }
    }
}
