//! Command-line interface for cordoning and draining Kubernetes Nodes.
mod error;

use crate::error::Result;
use nodedrain::client::K8SResourceClient;
use nodedrain::constants;
use nodedrain::drain::{self, DrainConfig, DrainResult, PodOutcome, Removal};
use nodedrain::telemetry::{init_telemetry, LogFormatter, MessageFormat};

use argh::FromArgs;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use kube::ResourceExt;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::process;
use tokio::time::Duration;
use tracing::{event, Level};

/// Exit code when the command could not run at all.
const ERROR_EXIT_CODE: i32 = 1;
/// Exit code when a drain ran, but some Pods could not be removed.
const PARTIAL_DRAIN_EXIT_CODE: i32 = 2;

/// safely evacuate workloads from Kubernetes Nodes
#[derive(FromArgs, Debug)]
struct Arguments {
    /// path to a kubeconfig file. When unset, the in-cluster or default kubeconfig is used
    #[argh(option)]
    kubeconfig: Option<PathBuf>,

    /// log format: full, compact, pretty or json. Overrides NODEDRAIN_LOG_FORMAT
    #[argh(option, from_str_fn(parse_log_format))]
    log_format: Option<MessageFormat>,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Drain(DrainArgs),
    Cordon(CordonArgs),
    Uncordon(UncordonArgs),
}

/// cordon a Node, then evict or delete its Pods
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "drain")]
struct DrainArgs {
    /// name of the Node to drain
    #[argh(positional)]
    node: String,

    /// seconds given to each Pod to terminate, overriding the Pod's own grace period
    #[argh(option)]
    grace_period: Option<u32>,

    /// delete Pods which are not managed by a controller
    #[argh(switch)]
    force: bool,

    /// delete Pods of DaemonSets
    #[argh(switch)]
    ignore_local_workloads: bool,

    /// give up on Pods not removed within this time, e.g. "10m". Waits indefinitely when unset
    #[argh(option, from_str_fn(parse_duration))]
    timeout: Option<Duration>,

    /// how often to check whether evicted Pods are gone, e.g. "5s"
    #[argh(
        option,
        from_str_fn(parse_duration),
        default = "constants::DELETION_CHECK_INTERVAL"
    )]
    poll_interval: Duration,

    /// assume the cluster serves policy/v1 Evictions instead of asking it
    #[argh(switch)]
    skip_discovery: bool,

    /// delete Pods instead of evicting them. This ignores PodDisruptionBudgets
    #[argh(switch)]
    disable_eviction: bool,

    /// maximum number of Pods removed at once
    #[argh(option, default = "constants::CONCURRENT_EVICTIONS")]
    concurrency: usize,
}

impl DrainArgs {
    fn drain_config(&self) -> DrainConfig {
        DrainConfig {
            grace_period_seconds: self.grace_period,
            force: self.force,
            ignore_local_workloads: self.ignore_local_workloads,
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            skip_discovery: self.skip_discovery,
            disable_eviction: self.disable_eviction,
            concurrency: self.concurrency,
        }
    }
}

/// mark a Node as unschedulable
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "cordon")]
struct CordonArgs {
    /// name of the Node to cordon
    #[argh(positional)]
    node: String,
}

/// mark a Node as schedulable
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "uncordon")]
struct UncordonArgs {
    /// name of the Node to uncordon
    #[argh(positional)]
    node: String,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn parse_log_format(value: &str) -> std::result::Result<MessageFormat, String> {
    MessageFormat::parse(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let args: Arguments = argh::from_env();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(PARTIAL_DRAIN_EXIT_CODE),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(ERROR_EXIT_CODE);
        }
    }
}

/// Runs the requested subcommand. Returns whether every Pod on the Node was handled.
async fn run(args: Arguments) -> Result<bool> {
    let mut formatter = LogFormatter::try_from_env().context(error::TelemetrySnafu)?;
    if let Some(message_format) = args.log_format {
        formatter.message_format = message_format;
    }
    init_telemetry(formatter).context(error::TelemetrySnafu)?;

    let k8s_client = K8SResourceClient::new(k8s_client(args.kubeconfig.as_deref()).await?);

    match args.subcommand {
        SubCommand::Drain(drain_args) => {
            let config = drain_args.drain_config();
            event!(Level::DEBUG, ?config, "Draining Node '{}'.", drain_args.node);

            let result = drain::drain(&k8s_client, &drain_args.node, &config)
                .await
                .context(error::DrainSnafu)?;
            print_drain_result(&result);
            Ok(result.is_complete())
        }
        SubCommand::Cordon(cordon_args) => {
            let node = drain::cordon(&k8s_client, &cordon_args.node)
                .await
                .context(error::CordonSnafu)?;
            println!("node/{} cordoned", node.name_any());
            Ok(true)
        }
        SubCommand::Uncordon(uncordon_args) => {
            let node = drain::uncordon(&k8s_client, &uncordon_args.node)
                .await
                .context(error::UncordonSnafu)?;
            println!("node/{} uncordoned", node.name_any());
            Ok(true)
        }
    }
}

/// Connects using the given kubeconfig, or infers the configuration from the environment.
async fn k8s_client(kubeconfig: Option<&Path>) -> Result<kube::Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).context(error::ReadKubeconfigSnafu { path })?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context(error::LoadKubeconfigSnafu { path })?;
            kube::Client::try_from(config).context(error::ClientCreateSnafu)
        }
        None => kube::Client::try_default()
            .await
            .context(error::ClientCreateSnafu),
    }
}

fn print_drain_result(result: &DrainResult) {
    for (pod, outcome) in result.outcomes.iter() {
        match outcome {
            PodOutcome::Evicted {
                via: Removal::Eviction,
            } => println!("pod/{} evicted", pod),
            PodOutcome::Evicted {
                via: Removal::Deletion,
            } => println!("pod/{} deleted", pod),
            PodOutcome::Skipped { reason } => println!("pod/{} skipped: {}", pod, reason),
            PodOutcome::Failed { error } => println!("pod/{} failed: {}", pod, error),
        }
    }
    println!("{}", result);
}
