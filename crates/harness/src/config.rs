//! Run configuration
//!
//! Everything about one orchestration run is captured in an immutable
//! [`RunConfig`] handed to the orchestrator. Profiles are TOML files; the CLI
//! can override individual values on top of a loaded profile.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Configuration for one orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// The service under test and how to start it
    pub target: TargetConfig,
    /// Readiness marker and startup deadline
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Test collection and the runner that executes it
    pub collection: CollectionConfig,
    /// Termination behavior
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl RunConfig {
    /// Load a run profile from a TOML file
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            HarnessError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(config)
    }
}

/// The service under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// How the target is started and torn down
    pub launch: LaunchStrategy,
    /// Settings handed to the target's environment
    #[serde(default)]
    pub env: TargetEnv,
    /// Command run to completion before launching, e.g. `go build`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<CommandSpec>,
    /// Working directory for the build and launch commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

/// How the target process comes up and goes down
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LaunchStrategy {
    /// Spawn the target executable as a direct child process
    Direct {
        executable: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Bring up a composed multi-service environment. `up` stays in the
    /// foreground and aggregates service output; `down` is the teardown
    /// command run at shutdown.
    Compose { up: CommandSpec, down: CommandSpec },
}

/// An external command and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Wrap a command line in `sh -c` so shell syntax works as typed
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), command.into()],
        }
    }

    /// One-line rendering for log messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Settings passed through to the target process environment.
///
/// The harness does not interpret these beyond forwarding them; the target
/// owns its configuration surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetEnv {
    /// Listen port or bind string, forwarded verbatim as `APP_PORT`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Database backend, forwarded as `APP_DB_TYPE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_backend: Option<DbBackend>,
    /// Connection string, forwarded as `APP_DB_CONN_STRING`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_string: Option<String>,
    /// Ask the target to run schema migrations on startup
    /// (`APP_RUN_AUTO_MIGRATE=true`)
    #[serde(default)]
    pub auto_migrate: bool,
    /// Additional variables forwarded untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl TargetEnv {
    /// Render to environment pairs for the target process
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(port) = &self.port {
            env.push(("APP_PORT".to_string(), port.clone()));
        }
        if let Some(db) = self.db_backend {
            env.push(("APP_DB_TYPE".to_string(), db.as_str().to_string()));
        }
        if let Some(conn) = &self.conn_string {
            env.push(("APP_DB_CONN_STRING".to_string(), conn.clone()));
        }
        if self.auto_migrate {
            env.push(("APP_RUN_AUTO_MIGRATE".to_string(), "true".to_string()));
        }
        for (key, value) in &self.extra {
            env.push((key.clone(), value.clone()));
        }
        env
    }

    /// Port with any leading `:` stripped, for readiness marker rendering.
    /// The raw value (e.g. `:3000`) still goes to the target unchanged.
    pub fn display_port(&self) -> Option<&str> {
        self.port.as_deref().map(|p| p.trim_start_matches(':'))
    }
}

/// Database backend identifier forwarded to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbBackend {
    Sqlite,
    Mysql,
    Postgres,
}

impl DbBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbBackend::Sqlite => "SQLITE",
            DbBackend::Mysql => "MYSQL",
            DbBackend::Postgres => "POSTGRES",
        }
    }
}

impl std::str::FromStr for DbBackend {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SQLITE" => Ok(DbBackend::Sqlite),
            "MYSQL" => Ok(DbBackend::Mysql),
            "POSTGRES" => Ok(DbBackend::Postgres),
            other => Err(HarnessError::InvalidConfig(format!(
                "Unknown database backend: {}",
                other
            ))),
        }
    }
}

/// Readiness marker and startup deadline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Substring of target stdout that signals readiness. May contain
    /// `{addr}` and `{port}` placeholders.
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Address substituted for `{addr}` in the marker
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Startup deadline in milliseconds
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            addr: default_addr(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

fn default_marker() -> String {
    "bound on".to_string()
}

fn default_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

/// Test collection and the runner that executes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection file handed to the runner as its final argument
    pub file: PathBuf,
    /// Runner invocation, `newman run` unless overridden
    #[serde(default = "default_runner")]
    pub runner: CommandSpec,
}

impl CollectionConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            runner: default_runner(),
        }
    }
}

fn default_runner() -> CommandSpec {
    CommandSpec::new("newman").with_args(["run"])
}

/// Termination behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Seconds to wait after SIGTERM before escalating to SIGKILL. Also
    /// bounds how long a compose process may linger after teardown.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

fn default_grace_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_direct_profile() {
        let toml = r#"
            [target.launch]
            strategy = "direct"
            executable = "./fiber-demo"
            args = ["--quiet"]

            [target.env]
            port = ":3000"
            db_backend = "SQLITE"
            conn_string = "file:e2e_app?mode=memory&cache=shared"
            auto_migrate = true

            [readiness]
            marker = "bound on host {addr} and port {port}"
            startup_timeout_ms = 10000

            [collection]
            file = "./collection.json"
        "#;
        let config: RunConfig = toml::from_str(toml).unwrap();
        match &config.target.launch {
            LaunchStrategy::Direct { executable, args } => {
                assert_eq!(executable, &PathBuf::from("./fiber-demo"));
                assert_eq!(args, &["--quiet".to_string()]);
            }
            other => panic!("expected direct launch, got {:?}", other),
        }
        assert_eq!(config.target.env.db_backend, Some(DbBackend::Sqlite));
        assert!(config.target.env.auto_migrate);
        assert_eq!(config.readiness.startup_timeout_ms, 10_000);
        assert_eq!(config.shutdown.grace_secs, 5);
        assert_eq!(config.collection.runner.program, "newman");
    }

    #[test]
    fn parse_compose_profile() {
        let toml = r#"
            [target.launch]
            strategy = "compose"
            up = { program = "docker", args = ["compose", "up"] }
            down = { program = "docker", args = ["compose", "down", "-v"] }

            [collection]
            file = "./collection.json"
        "#;
        let config: RunConfig = toml::from_str(toml).unwrap();
        match &config.target.launch {
            LaunchStrategy::Compose { up, down } => {
                assert_eq!(up.program, "docker");
                assert_eq!(down.args.last().map(String::as_str), Some("-v"));
            }
            other => panic!("expected compose launch, got {:?}", other),
        }
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let toml = r#"
            [target.launch]
            strategy = "direct"
            executable = "./app"

            [collection]
            file = "./collection.json"
        "#;
        let config: RunConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.readiness.marker, "bound on");
        assert_eq!(config.readiness.addr, "0.0.0.0");
        assert_eq!(config.readiness.startup_timeout_ms, 30_000);
        assert_eq!(config.shutdown.grace(), Duration::from_secs(5));
        assert!(config.target.env.port.is_none());
        assert!(config.target.build.is_none());
    }

    #[test]
    fn env_rendering_includes_only_configured_values() {
        let env = TargetEnv {
            port: Some(":3000".to_string()),
            db_backend: Some(DbBackend::Mysql),
            conn_string: Some("app:app@tcp(127.0.0.1:3306)/db".to_string()),
            auto_migrate: false,
            extra: BTreeMap::from([("APP_LOG".to_string(), "debug".to_string())]),
        };
        let pairs = env.to_env();
        assert!(pairs.contains(&("APP_PORT".to_string(), ":3000".to_string())));
        assert!(pairs.contains(&("APP_DB_TYPE".to_string(), "MYSQL".to_string())));
        assert!(pairs.contains(&("APP_LOG".to_string(), "debug".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "APP_RUN_AUTO_MIGRATE"));
    }

    #[test]
    fn auto_migrate_renders_true() {
        let env = TargetEnv {
            auto_migrate: true,
            ..TargetEnv::default()
        };
        let pairs = env.to_env();
        assert!(pairs.contains(&("APP_RUN_AUTO_MIGRATE".to_string(), "true".to_string())));
    }

    #[test]
    fn display_port_strips_leading_colon() {
        let env = TargetEnv {
            port: Some(":3000".to_string()),
            ..TargetEnv::default()
        };
        assert_eq!(env.display_port(), Some("3000"));

        let env = TargetEnv {
            port: Some("8080".to_string()),
            ..TargetEnv::default()
        };
        assert_eq!(env.display_port(), Some("8080"));
    }

    #[test]
    fn db_backend_parses_case_insensitively() {
        assert_eq!("sqlite".parse::<DbBackend>().unwrap(), DbBackend::Sqlite);
        assert_eq!("MySQL".parse::<DbBackend>().unwrap(), DbBackend::Mysql);
        assert!("oracle".parse::<DbBackend>().is_err());
    }

    #[test]
    fn shell_command_wraps_in_sh() {
        let spec = CommandSpec::shell("go build && ls");
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c".to_string(), "go build && ls".to_string()]);
        assert_eq!(spec.display(), "sh -c go build && ls");
    }
}
