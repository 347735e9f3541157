//! cutoverd — the cutover daemon.
//!
//! Single binary that assembles the deployment controller:
//! - Deployment archive (redb)
//! - Simulated compute provider + fleet manager
//! - Listener routing controller
//! - Deployment orchestrator
//! - Autoscaler
//! - REST API
//!
//! # Usage
//!
//! ```text
//! cutoverd init --path cutover.toml
//! cutoverd check --config cutover.toml
//! cutoverd run --config cutover.toml --port 8480 --data-dir /var/lib/cutover
//! ```

mod standalone;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cutover_core::CutoverConfig;

const DEFAULT_FILTER: &str = "info,cutoverd=debug,cutover=debug";

#[derive(Parser)]
#[command(name = "cutoverd", about = "Blue-green deployment daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (simulated compute provider, all subsystems in one process).
    Run {
        /// Configuration file.
        #[arg(long, default_value = "cutover.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,

        /// Data directory for the deployment archive.
        #[arg(long, default_value = "/var/lib/cutover")]
        data_dir: PathBuf,

        /// Autoscaler check interval in seconds.
        #[arg(long, default_value = "30")]
        autoscale_interval: u64,

        /// Polls the simulated provider needs before instances converge.
        #[arg(long, default_value = "2")]
        convergence_polls: u32,
    },

    /// Validate a configuration file and print its routing plan.
    Check {
        #[arg(long, default_value = "cutover.toml")]
        config: PathBuf,
    },

    /// Write a two-service scaffold configuration.
    Init {
        #[arg(long, default_value = "cutover.toml")]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            autoscale_interval,
            convergence_polls,
        } => {
            let config = CutoverConfig::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            standalone::run(standalone::Options {
                config,
                port,
                data_dir,
                autoscale_interval,
                convergence_polls,
            })
            .await
        }
        Command::Check { config } => check(&config),
        Command::Init { path, force } => init(&path, force),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn check(path: &PathBuf) -> anyhow::Result<()> {
    let config = CutoverConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
    println!("{}: ok", path.display());
    println!(
        "load balancer {}: production :{} / test :{}",
        config.load_balancer.name, config.load_balancer.production.port, config.load_balancer.test.port
    );
    for (service, routes) in config.routes()? {
        let policy = config.policy_for(&service)?;
        let patterns: Vec<String> = routes
            .iter()
            .map(|r| format!("{}@{}", r.pattern, r.priority))
            .collect();
        println!(
            "  {service}: {} (approval {:?}, termination {:?})",
            patterns.join(", "),
            policy.approval_wait,
            policy.termination_wait
        );
    }
    Ok(())
}

fn init(path: &PathBuf, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let rendered = CutoverConfig::scaffold().to_toml_string()?;
    std::fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}
