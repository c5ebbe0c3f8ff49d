//! The orchestration state machine
//!
//! One run: build (optionally), launch the target, watch its stdout for the
//! readiness marker while the startup deadline is armed, run the collection
//! against the live target, then always tear the target down. Exactly one of
//! marker, deadline, or process exit decides the monitoring phase; whichever
//! fires first wins and the others become no-ops because monitoring stops.

use std::future::Future;
use std::path::Path;
use std::process::ExitStatus;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, trace, warn};

use crate::config::RunConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::newman::{CollectionRunner, TestVerdict};
use crate::readiness::{ReadinessMarker, ReadinessScanner};
use crate::shutdown;
use crate::target::{self, TargetHandle};

/// Final classification of one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Target became ready and the collection passed
    ReadyAndTestsPassed,
    /// Target became ready but the collection failed or could not run
    ReadyButTestsFailed,
    /// Startup deadline expired or the target exited before readiness
    NeverReady,
}

impl RunOutcome {
    /// Process exit code for this outcome: zero only when the target became
    /// ready and the collection passed
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::ReadyAndTestsPassed => 0,
            RunOutcome::ReadyButTestsFailed | RunOutcome::NeverReady => 1,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunOutcome::ReadyAndTestsPassed => "ready, collection passed",
            RunOutcome::ReadyButTestsFailed => "ready, collection failed",
            RunOutcome::NeverReady => "never became ready",
        };
        f.write_str(s)
    }
}

/// Machine-readable summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Launch-to-marker latency, when readiness was reached
    pub ready_after_ms: Option<u64>,
    /// Diagnostic for non-passing outcomes
    pub failure: Option<String>,
}

impl RunReport {
    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> HarnessResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// What ended the monitoring phase
#[derive(Debug)]
enum MonitorVerdict {
    Ready,
    TimedOut,
    /// `None` when waiting on the process itself failed
    Exited(Option<ExitStatus>),
}

/// Execute one full orchestration run.
///
/// Errors are returned only for failures before the target is up (bad
/// config, failed build, failed spawn). Once launched, every path flows
/// through shutdown and produces a [`RunReport`].
pub async fn run(config: &RunConfig) -> HarnessResult<RunReport> {
    let started_at = Utc::now();
    let run_start = Instant::now();

    // Resolve the marker first; a bad template must fail before anything
    // launches
    let marker = ReadinessMarker::render(&config.readiness, config.target.env.display_port())?;
    let mut scanner = ReadinessScanner::new(marker);

    if let Some(build) = &config.target.build {
        target::run_build(build, config.target.cwd.as_deref()).await?;
    }

    let (mut handle, mut chunks) = TargetHandle::launch(&config.target)?;
    let startup_timeout = config.readiness.timeout();
    let deadline = Instant::now() + startup_timeout;
    let launch_start = Instant::now();

    info!(
        "Waiting for readiness marker '{}' (timeout {:?})",
        scanner.marker(),
        startup_timeout
    );
    let verdict = monitor_startup(&mut scanner, &mut chunks, handle.child.wait(), deadline).await;

    let (outcome, ready_after, failure) = match verdict {
        MonitorVerdict::Ready => {
            let ready_after = launch_start.elapsed();
            info!("Target ready after {} ms", ready_after.as_millis());
            // Monitoring is over; keep the stream drained so the target
            // never blocks on a full pipe while the collection runs
            target::drain_remaining(chunks);
            match CollectionRunner::new(&config.collection).run().await {
                Ok(TestVerdict::Passed) => {
                    (RunOutcome::ReadyAndTestsPassed, Some(ready_after), None)
                }
                Ok(TestVerdict::Failed) => (
                    RunOutcome::ReadyButTestsFailed,
                    Some(ready_after),
                    Some("Collection reported failures".to_string()),
                ),
                Err(e) => {
                    error!("{}", e);
                    (
                        RunOutcome::ReadyButTestsFailed,
                        Some(ready_after),
                        Some(e.to_string()),
                    )
                }
            }
        }
        MonitorVerdict::TimedOut => {
            let e = HarnessError::ReadinessTimeout(startup_timeout);
            error!("{}", e);
            drop(chunks);
            (RunOutcome::NeverReady, None, Some(e.to_string()))
        }
        MonitorVerdict::Exited(status) => {
            let detail = match status {
                Some(status) => status.to_string(),
                None => "status unavailable".to_string(),
            };
            let e = HarnessError::UnexpectedExit(detail);
            error!("{}", e);
            drop(chunks);
            (RunOutcome::NeverReady, None, Some(e.to_string()))
        }
    };

    // Shutdown runs on every path that launched a target; a failure here is
    // logged and never replaces the outcome
    if let Err(e) = shutdown::terminate(&mut handle, &config.shutdown).await {
        warn!("Shutdown error (outcome unchanged): {}", e);
    }

    let duration = run_start.elapsed();
    info!("Run finished in {} ms: {}", duration.as_millis(), outcome);

    Ok(RunReport {
        outcome,
        started_at,
        duration_ms: duration.as_millis() as u64,
        ready_after_ms: ready_after.map(|d| d.as_millis() as u64),
        failure,
    })
}

/// Watch target output until the marker appears, the deadline expires, or
/// the process exits, whichever happens first.
///
/// Stdout reaching EOF is deliberately not decisive: a target can close its
/// stdout and keep running, and the exit or deadline arm will settle the run.
async fn monitor_startup<F>(
    scanner: &mut ReadinessScanner,
    chunks: &mut mpsc::Receiver<String>,
    exit: F,
    deadline: Instant,
) -> MonitorVerdict
where
    F: Future<Output = std::io::Result<ExitStatus>>,
{
    tokio::pin!(exit);
    let mut stream_open = true;
    loop {
        tokio::select! {
            chunk = chunks.recv(), if stream_open => match chunk {
                Some(chunk) => {
                    trace!("Target output: {:?}", chunk);
                    if scanner.observe(&chunk) {
                        return MonitorVerdict::Ready;
                    }
                }
                None => stream_open = false,
            },
            status = &mut exit => {
                return match status {
                    Ok(status) => MonitorVerdict::Exited(Some(status)),
                    Err(e) => {
                        warn!("Error waiting on target process: {}", e);
                        MonitorVerdict::Exited(None)
                    }
                };
            }
            _ = sleep_until(deadline) => return MonitorVerdict::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use std::time::Duration;

    fn scanner(marker: &str) -> ReadinessScanner {
        ReadinessScanner::new(ReadinessMarker::new(marker))
    }

    fn deadline_in(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[tokio::test(start_paused = true)]
    async fn marker_split_across_chunks_ends_monitoring_as_ready() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send("fiber v2 app bo".to_string()).await.unwrap();
        tx.send("und on host 0.0.0.0\n".to_string()).await.unwrap();
        let mut scanner = scanner("bound on");

        let verdict = monitor_startup(&mut scanner, &mut rx, pending(), deadline_in(30_000)).await;
        assert!(matches!(verdict, MonitorVerdict::Ready));
        assert!(scanner.matched());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_ends_monitoring_when_marker_never_appears() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send("unrelated startup output\n".to_string()).await.unwrap();
        let mut scanner = scanner("bound on");

        let verdict = monitor_startup(&mut scanner, &mut rx, pending(), deadline_in(30_000)).await;
        assert!(matches!(verdict, MonitorVerdict::TimedOut));
        drop(tx);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn process_exit_ends_monitoring() {
        let (_tx, mut rx) = mpsc::channel::<String>(8);
        let mut scanner = scanner("bound on");

        let verdict = monitor_startup(
            &mut scanner,
            &mut rx,
            std::future::ready(Ok(exit_status(3))),
            deadline_in(30_000),
        )
        .await;
        assert!(matches!(verdict, MonitorVerdict::Exited(Some(_))));
        assert!(!scanner.matched());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_eof_alone_does_not_end_monitoring() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send("partial output, then the stream closes".to_string())
            .await
            .unwrap();
        drop(tx);
        let mut scanner = scanner("bound on");

        let start = Instant::now();
        let verdict = monitor_startup(&mut scanner, &mut rx, pending(), deadline_in(5_000)).await;
        assert!(matches!(verdict, MonitorVerdict::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(5_000));
    }

    #[test]
    fn exit_code_is_zero_only_for_full_success() {
        assert_eq!(RunOutcome::ReadyAndTestsPassed.exit_code(), 0);
        assert_eq!(RunOutcome::ReadyButTestsFailed.exit_code(), 1);
        assert_eq!(RunOutcome::NeverReady.exit_code(), 1);
    }

    #[test]
    fn report_writes_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let report = RunReport {
            outcome: RunOutcome::ReadyAndTestsPassed,
            started_at: Utc::now(),
            duration_ms: 1234,
            ready_after_ms: Some(210),
            failure: None,
        };
        report.write_json(&path).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("ready_and_tests_passed"));
        assert!(json.contains("\"ready_after_ms\": 210"));
    }
}
