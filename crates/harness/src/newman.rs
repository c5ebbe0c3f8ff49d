//! Collection runner adapter
//!
//! The test collection is opaque to the harness: it is handed to an external
//! runner (newman unless overridden) as a file path, the runner's output
//! streams straight to the console, and its exit status is the verdict.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{CollectionConfig, CommandSpec};
use crate::error::{HarnessError, HarnessResult};

/// Verdict from the collection runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestVerdict {
    Passed,
    Failed,
}

/// Runs the configured collection against the live target
pub struct CollectionRunner {
    runner: CommandSpec,
    collection: PathBuf,
}

impl CollectionRunner {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            runner: config.runner.clone(),
            collection: config.file.clone(),
        }
    }

    /// Run the collection to completion. A non-zero runner exit is a
    /// [`TestVerdict::Failed`], not an error; errors mean the runner could
    /// not be executed at all.
    pub async fn run(&self) -> HarnessResult<TestVerdict> {
        if !self.collection.exists() {
            return Err(HarnessError::TestExecution(format!(
                "Collection file not found: {}",
                self.collection.display()
            )));
        }

        info!(
            "Running collection {} via '{}'",
            self.collection.display(),
            self.runner.display()
        );
        let status = Command::new(&self.runner.program)
            .args(&self.runner.args)
            .arg(&self.collection)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HarnessError::RunnerNotFound(self.runner.program.clone())
                } else {
                    HarnessError::TestExecution(format!(
                        "Failed to run '{}': {}",
                        self.runner.display(),
                        e
                    ))
                }
            })?;

        if status.success() {
            info!("Collection passed");
            Ok(TestVerdict::Passed)
        } else {
            warn!("Collection failed ({})", status);
            Ok(TestVerdict::Failed)
        }
    }
}
