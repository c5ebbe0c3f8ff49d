//! smokejumper command-line entry point
//!
//! Builds a [`RunConfig`] from an optional TOML profile plus flag overrides,
//! hands it to the orchestrator, and maps the outcome to the process exit
//! code: 0 only when the target became ready and the collection passed,
//! 1 for everything else.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use smokejumper_harness::config::{
    CollectionConfig, CommandSpec, DbBackend, LaunchStrategy, ReadinessConfig, RunConfig,
    ShutdownConfig, TargetConfig, TargetEnv,
};
use smokejumper_harness::orchestrator;

#[derive(Parser, Debug)]
#[command(name = "smokejumper")]
#[command(about = "Readiness-aware end-to-end API test orchestrator")]
#[command(version)]
struct Cli {
    /// TOML run profile; flags below override its values
    #[arg(short, long, env = "SMOKEJUMPER_CONFIG")]
    config: Option<PathBuf>,

    /// Target executable to launch directly
    #[arg(long, conflicts_with = "compose_file")]
    target: Option<PathBuf>,

    /// Argument for the target executable (repeatable)
    #[arg(long = "target-arg", requires = "target", allow_hyphen_values = true)]
    target_args: Vec<String>,

    /// Compose file; the target becomes `docker compose -f <file> up`
    #[arg(long)]
    compose_file: Option<PathBuf>,

    /// Teardown command override for the compose strategy (run via `sh -c`)
    #[arg(long)]
    teardown_cmd: Option<String>,

    /// Build command run to completion before launching (run via `sh -c`)
    #[arg(long)]
    build_cmd: Option<String>,

    /// Test collection file handed to the runner
    #[arg(long)]
    collection: Option<PathBuf>,

    /// Collection runner override; run via `sh -c` with the collection path
    /// appended as its final argument
    #[arg(long)]
    runner_cmd: Option<String>,

    /// Bind string forwarded to the target as APP_PORT (e.g. ":3000")
    #[arg(long)]
    port: Option<String>,

    /// Database backend forwarded as APP_DB_TYPE
    #[arg(long)]
    db: Option<DbBackend>,

    /// Connection string forwarded as APP_DB_CONN_STRING
    #[arg(long)]
    conn_string: Option<String>,

    /// Ask the target to run schema migrations on startup
    #[arg(long)]
    auto_migrate: bool,

    /// Readiness marker; may contain {addr} and {port}
    #[arg(long)]
    marker: Option<String>,

    /// Startup deadline in milliseconds
    #[arg(long)]
    startup_timeout_ms: Option<u64>,

    /// Seconds between SIGTERM and SIGKILL at shutdown
    #[arg(long)]
    grace_secs: Option<u64>,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("smokejumper v{}", env!("CARGO_PKG_VERSION"));

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = build_config(&cli)?;
    let report = orchestrator::run(&config).await?;
    if let Some(path) = &cli.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    Ok(report.outcome.exit_code())
}

fn build_config(cli: &Cli) -> anyhow::Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("Failed to load profile {}", path.display()))?,
        None => config_from_flags(cli)?,
    };
    apply_overrides(&mut config, cli);
    Ok(config)
}

/// Assemble a minimal config when no profile file is given
fn config_from_flags(cli: &Cli) -> anyhow::Result<RunConfig> {
    let launch = if let Some(executable) = &cli.target {
        LaunchStrategy::Direct {
            executable: executable.clone(),
            args: cli.target_args.clone(),
        }
    } else if let Some(file) = &cli.compose_file {
        compose_strategy(file, cli.teardown_cmd.as_deref())
    } else {
        bail!("One of --config, --target or --compose-file is required");
    };
    let Some(collection) = &cli.collection else {
        bail!("--collection is required without --config");
    };
    Ok(RunConfig {
        target: TargetConfig {
            launch,
            env: TargetEnv::default(),
            build: None,
            cwd: None,
        },
        readiness: ReadinessConfig::default(),
        collection: CollectionConfig::new(collection.clone()),
        shutdown: ShutdownConfig::default(),
    })
}

fn apply_overrides(config: &mut RunConfig, cli: &Cli) {
    if let Some(executable) = &cli.target {
        config.target.launch = LaunchStrategy::Direct {
            executable: executable.clone(),
            args: cli.target_args.clone(),
        };
    }
    if let Some(file) = &cli.compose_file {
        config.target.launch = compose_strategy(file, cli.teardown_cmd.as_deref());
    } else if let Some(cmd) = &cli.teardown_cmd {
        match &mut config.target.launch {
            LaunchStrategy::Compose { down, .. } => *down = CommandSpec::shell(cmd),
            LaunchStrategy::Direct { .. } => {
                warn!("--teardown-cmd ignored: the direct strategy stops by signal")
            }
        }
    }
    if let Some(cmd) = &cli.build_cmd {
        config.target.build = Some(CommandSpec::shell(cmd));
    }
    if let Some(collection) = &cli.collection {
        config.collection.file = collection.clone();
    }
    if let Some(cmd) = &cli.runner_cmd {
        // sh -c drops the first trailing argument into $0; forward the
        // appended collection path into the command line explicitly
        config.collection.runner = CommandSpec::new("sh").with_args([
            "-c".to_string(),
            format!("{} \"$@\"", cmd),
            "sh".to_string(),
        ]);
    }
    if let Some(port) = &cli.port {
        config.target.env.port = Some(port.clone());
    }
    if let Some(db) = cli.db {
        config.target.env.db_backend = Some(db);
    }
    if let Some(conn) = &cli.conn_string {
        config.target.env.conn_string = Some(conn.clone());
    }
    if cli.auto_migrate {
        config.target.env.auto_migrate = true;
    }
    if let Some(marker) = &cli.marker {
        config.readiness.marker = marker.clone();
    }
    if let Some(ms) = cli.startup_timeout_ms {
        config.readiness.startup_timeout_ms = ms;
    }
    if let Some(secs) = cli.grace_secs {
        config.shutdown.grace_secs = secs;
    }
}

fn compose_strategy(file: &Path, teardown: Option<&str>) -> LaunchStrategy {
    let file = file.display().to_string();
    let up = CommandSpec::new("docker").with_args(["compose", "-f", file.as_str(), "up"]);
    let down = match teardown {
        Some(cmd) => CommandSpec::shell(cmd),
        None => {
            CommandSpec::new("docker").with_args(["compose", "-f", file.as_str(), "down", "-v"])
        }
    };
    LaunchStrategy::Compose { up, down }
}
