//! Target process launching and output streaming
//!
//! Both launch strategies produce the same thing: a [`TargetHandle`] for the
//! process that owns the target's lifetime, plus a channel of stdout chunks
//! for the readiness scanner. For the compose strategy that process is the
//! foreground `up` command, whose stdout aggregates the service logs.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, LaunchStrategy, TargetConfig};
use crate::error::{HarnessError, HarnessResult};

/// Size of one stdout read; chunks reach the scanner as the pipe delivers them
const READ_BUF_SIZE: usize = 4096;
/// Depth of the queue between the reader task and the monitoring loop
const CHUNK_QUEUE: usize = 64;

/// Handle to the launched target process
pub struct TargetHandle {
    pub(crate) child: Child,
    pub(crate) pid: Option<u32>,
    /// Teardown half of the compose strategy, if any
    pub(crate) teardown: Option<CommandSpec>,
}

impl TargetHandle {
    /// Launch the target and start streaming its stdout.
    ///
    /// The returned receiver yields stdout chunks until the stream closes;
    /// dropping it stops the reader without touching the process.
    pub fn launch(config: &TargetConfig) -> HarnessResult<(Self, mpsc::Receiver<String>)> {
        let (mut cmd, teardown, label) = match &config.launch {
            LaunchStrategy::Direct { executable, args } => {
                let mut cmd = Command::new(executable);
                cmd.args(args);
                (cmd, None, executable.display().to_string())
            }
            LaunchStrategy::Compose { up, down } => {
                let mut cmd = Command::new(&up.program);
                cmd.args(&up.args);
                (cmd, Some(down.clone()), up.display())
            }
        };

        cmd.envs(config.env.to_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| HarnessError::Launch(format!("Failed to spawn {}: {}", label, e)))?;
        let pid = child.id();
        match pid {
            Some(pid) => info!("Target launched: {} (pid {})", label, pid),
            None => info!("Target launched: {}", label),
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Launch("Target stdout was not piped".to_string()))?;
        let chunks = stream_stdout(stdout);
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr);
        }

        Ok((
            Self {
                child,
                pid,
                teardown,
            },
            chunks,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn teardown(&self) -> Option<&CommandSpec> {
        self.teardown.as_ref()
    }
}

/// Run the pre-launch build command to completion, inheriting stdio
pub async fn run_build(build: &CommandSpec, cwd: Option<&Path>) -> HarnessResult<()> {
    info!("Building target: {}", build.display());
    let mut cmd = Command::new(&build.program);
    cmd.args(&build.args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let status = cmd.status().await.map_err(|e| {
        HarnessError::Launch(format!("Failed to run build command '{}': {}", build.display(), e))
    })?;
    if !status.success() {
        return Err(HarnessError::Launch(format!(
            "Build command '{}' failed ({})",
            build.display(),
            status
        )));
    }
    Ok(())
}

/// Consume leftover stdout chunks after monitoring has ended, so the target
/// never blocks on a full pipe while the collection runs
pub(crate) fn drain_remaining(mut chunks: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(chunk) = chunks.recv().await {
            debug!("[target] {}", chunk.trim_end());
        }
    });
}

fn stream_stdout(mut stdout: ChildStdout) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
    tokio::spawn(async move {
        let mut buf = [0u8; READ_BUF_SIZE];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    let chunk = decode_chunk(&mut pending);
                    if chunk.is_empty() {
                        continue;
                    }
                    if tx.send(chunk).await.is_err() {
                        // Receiver dropped; nobody is watching anymore
                        return;
                    }
                }
                Err(e) => {
                    warn!("Error reading target stdout: {}", e);
                    break;
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned()).await;
        }
    });
    rx
}

fn drain_stderr(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("[target stderr] {}", line);
        }
    });
}

/// Decode as much of `pending` as is valid UTF-8, keeping an incomplete
/// trailing sequence for the next read. Truly invalid bytes are replaced.
fn decode_chunk(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let out = s.to_string();
            pending.clear();
            out
        }
        Err(err) if err.error_len().is_none() => {
            let valid = err.valid_up_to();
            let out = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            out
        }
    }
}
