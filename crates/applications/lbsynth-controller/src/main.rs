//! lbsynth - load balancer stack synthesis
//!
//! ## Usage
//!
//! ```bash
//! # Converge a stack (one pass)
//! lbsynth --cluster-name prod --vpc-id vpc-0abc deploy --stack stack.json
//!
//! # Same, with settings from a file and a deadline
//! lbsynth --config controller.json deploy --stack stack.json --deadline-secs 120
//!
//! # Show what a stack owns
//! lbsynth --config controller.json list --stack stack.json
//!
//! # Target registration
//! lbsynth --config controller.json targets register --target-group-arn arn:... --id i-0abc
//! lbsynth --config controller.json targets wait-healthy --target-group-arn arn:... --id i-0abc
//! ```
//!
//! A pass that could not finish because something was still settling exits
//! with status 2; rerun after the printed delay.

use clap::{Parser, Subcommand};
use lbsynth_controller::{
    config::ControllerConfig, create_elb_client, init_prometheus, poll::Poller, render_prometheus,
    AwsLoadBalancingApi, ResourceMetrics, Stack, StackDeployer, SynthError, TargetManager,
};
use lbsynth_core::TargetDescription;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status for a pass that should be retried later
const EXIT_RETRY: i32 = 2;

/// Log filter when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "lbsynth_controller=info,lbsynth_core=info,warn";

/// lbsynth: converge AWS load balancers toward a desired stack
#[derive(Parser)]
#[command(name = "lbsynth")]
#[command(about = "Tag-tracked synthesis of AWS load balancer stacks", long_about = None)]
struct Cli {
    /// Controller config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cluster name; overrides the config file
    #[arg(long, global = true)]
    cluster_name: Option<String>,

    /// VPC id; overrides the config file
    #[arg(long, global = true)]
    vpc_id: Option<String>,

    /// AWS region; overrides the config file
    #[arg(long, global = true)]
    region: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synthesis pass over a stack file
    Deploy {
        /// Stack file (JSON)
        #[arg(long)]
        stack: PathBuf,

        /// Abandon the pass after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Print the managed resource gauges after the report
        #[arg(long)]
        print_metrics: bool,
    },

    /// List live resources owned by a stack
    List {
        /// Stack file (JSON); only its id is used
        #[arg(long)]
        stack: PathBuf,
    },

    /// Register, deregister and wait on targets
    Targets {
        #[command(subcommand)]
        action: TargetAction,
    },
}

#[derive(Subcommand)]
enum TargetAction {
    /// Register a target
    Register(TargetArgs),
    /// Deregister a target
    Deregister(TargetArgs),
    /// Wait until a target is healthy
    WaitHealthy(TargetArgs),
    /// Wait until a deregistered target has drained
    WaitDrained(TargetArgs),
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Target group ARN
    #[arg(long)]
    target_group_arn: String,

    /// Instance id, IP address or Lambda ARN
    #[arg(long)]
    id: String,

    /// Target port (target group port when omitted)
    #[arg(long)]
    port: Option<i32>,
}

impl TargetArgs {
    fn target(&self) -> TargetDescription {
        let target = TargetDescription::new(&self.id);
        match self.port {
            Some(port) => target.with_port(port),
            None => target,
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ControllerConfig> {
    let mut config = match &cli.config {
        Some(path) => ControllerConfig::from_file(path)?,
        None => {
            let cluster_name = cli
                .cluster_name
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--cluster-name required without --config"))?;
            let vpc_id = cli
                .vpc_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--vpc-id required without --config"))?;
            ControllerConfig::new(cluster_name, vpc_id)
        }
    };

    if let Some(cluster_name) = &cli.cluster_name {
        config.cluster_name = cluster_name.clone();
    }
    if let Some(vpc_id) = &cli.vpc_id {
        config.vpc_id = vpc_id.clone();
    }
    if let Some(region) = &cli.region {
        config.region = Some(region.clone());
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let json = cli.json_logs;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = run(cli).await {
        if let Some(delay) = e
            .downcast_ref::<SynthError>()
            .and_then(SynthError::retry_delay)
        {
            warn!(error = %e, retry_after_secs = delay.as_secs(), "Pass incomplete, retry later");
            std::process::exit(EXIT_RETRY);
        }
        return Err(e);
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let client = create_elb_client(config.region.as_deref()).await;
    let api = Arc::new(AwsLoadBalancingApi::new(client));

    match cli.command {
        Commands::Deploy {
            stack,
            deadline_secs,
            print_metrics,
        } => {
            init_prometheus();
            let stack = Stack::from_file(&stack)?;
            let deployer = StackDeployer::new(api, &config, ResourceMetrics::new())?;

            let report = match deadline_secs {
                Some(secs) => {
                    deployer
                        .deploy_with_deadline(&stack, Duration::from_secs(secs))
                        .await?
                }
                None => deployer.deploy(&stack).await?,
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
            if print_metrics {
                if let Some(rendered) = render_prometheus() {
                    println!("{rendered}");
                }
            }

            if !report.is_converged() {
                return Err(SynthError::retry_after(
                    format!("{} deletes still blocked", report.deferred.len()),
                    config.polling.requeue_delay(),
                )
                .into());
            }
        }

        Commands::List { stack } => {
            let id = Stack::from_file(&stack)?.id;
            let deployer = StackDeployer::new(api, &config, ResourceMetrics::new())?;
            let inventory = deployer.inventory(&id).await?;

            info!(stack = %id, count = inventory.len(), "Listed owned resources");
            println!("{}", serde_json::to_string_pretty(&inventory)?);
        }

        Commands::Targets { action } => {
            let manager = TargetManager::new(api, Poller::from_settings(&config.polling));

            match action {
                TargetAction::Register(args) => {
                    manager.register(&args.target_group_arn, &[args.target()]).await?;
                }
                TargetAction::Deregister(args) => {
                    manager.deregister(&args.target_group_arn, &[args.target()]).await?;
                }
                TargetAction::WaitHealthy(args) => {
                    manager
                        .wait_for_healthy(&args.target_group_arn, &args.target())
                        .await?;
                }
                TargetAction::WaitDrained(args) => {
                    manager
                        .wait_for_drained(&args.target_group_arn, &args.target())
                        .await?;
                }
            }
        }
    }

    Ok(())
}
