//! Target termination
//!
//! Runs once per launched target, on every path out of a run. Errors here
//! are reported to the caller for logging but never replace the run's
//! outcome, and a target that already exited is a no-op, not a failure.

use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, ShutdownConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::target::TargetHandle;

/// Tear the target down according to its launch strategy
pub async fn terminate(target: &mut TargetHandle, config: &ShutdownConfig) -> HarnessResult<()> {
    let result = match target.teardown.clone() {
        Some(down) => teardown_compose(target, &down, config.grace()).await,
        None => stop_direct(target, config.grace()).await,
    };
    // Reap whatever is left so no zombie outlives the run
    let _ = target.child.wait().await;
    result
}

/// SIGTERM, a grace period, then SIGKILL
async fn stop_direct(target: &mut TargetHandle, grace: Duration) -> HarnessResult<()> {
    if let Ok(Some(status)) = target.child.try_wait() {
        info!("Target already exited ({}); nothing to stop", status);
        return Ok(());
    }

    if signal_term(target) {
        match timeout(grace, target.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Target stopped ({})", status);
                return Ok(());
            }
            Ok(Err(e)) => warn!("Error waiting for target to stop: {}", e),
            Err(_) => warn!(
                "Target still running {}s after SIGTERM; escalating",
                grace.as_secs()
            ),
        }
    }

    if target.child.try_wait().ok().flatten().is_some() {
        return Ok(());
    }
    target
        .child
        .kill()
        .await
        .map_err(|e| HarnessError::Shutdown(format!("Failed to force-kill target: {}", e)))?;
    info!("Target force-killed");
    Ok(())
}

/// Run the teardown command; if it fails, fall back to force-killing the
/// compose process so the run can still finish
async fn teardown_compose(
    target: &mut TargetHandle,
    down: &CommandSpec,
    grace: Duration,
) -> HarnessResult<()> {
    info!("Tearing down composed environment: {}", down.display());
    let outcome = Command::new(&down.program).args(&down.args).status().await;
    let failure = match outcome {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!(
            "Teardown command '{}' failed ({})",
            down.display(),
            status
        )),
        Err(e) => Some(format!(
            "Failed to run teardown command '{}': {}",
            down.display(),
            e
        )),
    };

    if let Some(reason) = failure {
        warn!("{}; force-killing compose process", reason);
        if target.child.try_wait().ok().flatten().is_none() {
            if let Err(e) = target.child.kill().await {
                return Err(HarnessError::Shutdown(format!(
                    "{}; force-kill also failed: {}",
                    reason, e
                )));
            }
        }
        return Err(HarnessError::Shutdown(reason));
    }

    // Teardown succeeded; the foreground compose process should exit on its
    // own once the services are gone
    match timeout(grace, target.child.wait()).await {
        Ok(Ok(status)) => info!("Compose process exited ({})", status),
        Ok(Err(e)) => warn!("Error waiting for compose process: {}", e),
        Err(_) => {
            warn!(
                "Compose process still running {}s after teardown; force-killing",
                grace.as_secs()
            );
            let _ = target.child.kill().await;
        }
    }
    Ok(())
}

/// Attempt a graceful SIGTERM. Returns `false` when escalation should
/// proceed immediately.
fn signal_term(target: &TargetHandle) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = target.pid else {
            return false;
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                debug!("Sent SIGTERM to pid {}", pid);
                true
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!("Pid {} already gone", pid);
                false
            }
            Err(e) => {
                warn!("Failed to signal pid {}: {}", pid, e);
                false
            }
        }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
