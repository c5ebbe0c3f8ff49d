//! End-to-end test orchestration for HTTP services
//!
//! Launches a target service (directly or via a compose command), watches
//! its stdout for a readiness marker with a startup deadline armed, runs an
//! external test collection runner against the live service, and always
//! tears the target down. The verdict is binary: a run counts as passing
//! only when the target became ready and the collection passed.

pub mod config;
pub mod error;
pub mod newman;
pub mod orchestrator;
pub mod readiness;
pub mod shutdown;
pub mod target;

pub use config::RunConfig;
pub use error::{HarnessError, HarnessResult};
pub use orchestrator::{run, RunOutcome, RunReport};
