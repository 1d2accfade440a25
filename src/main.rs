use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workload_applier::{
    config::Config,
    error::ApplyError,
    k8s::{Applier, K8sClient, RetrySettings},
    models::{ServiceKind, ServiceSpec, WorkloadSpec},
};

#[derive(Parser)]
#[command(
    name = "workload-applier",
    about = "Idempotent applier for a Kubernetes workload/service pair",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ensure the Deployment and Service exist in the target namespace
    Apply(ApplyArgs),
}

#[derive(Args)]
struct ApplyArgs {
    /// Target namespace (defaults to the configured namespace)
    #[arg(long)]
    namespace: Option<String>,

    /// Workload name, also used as the value of the `app` label
    #[arg(long, default_value = "system-monitor-app")]
    name: String,

    /// Container image reference (falls back to DEFAULT_IMAGE from the environment)
    #[arg(long)]
    image: Option<String>,

    /// Desired replica count
    #[arg(long, default_value_t = 1)]
    replicas: i32,

    /// Container port the workload listens on
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Service name (defaults to `<name>-service`)
    #[arg(long)]
    service_name: Option<String>,

    /// Port the service exposes (defaults to the container port)
    #[arg(long)]
    service_port: Option<u16>,

    /// Service type: ClusterIP, NodePort, or LoadBalancer
    #[arg(long, default_value = "LoadBalancer")]
    service_kind: ServiceKind,

    /// Output format for the apply result
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

enum RunError {
    Setup(anyhow::Error),
    Apply(ApplyError),
}

impl From<ApplyError> for RunError {
    fn from(e: ApplyError) -> Self {
        RunError::Apply(e)
    }
}

fn exit_code(error: &ApplyError) -> i32 {
    match error {
        ApplyError::Validation { .. } => 2,
        ApplyError::ClusterUnreachable(_) => 3,
        ApplyError::PermissionDenied(_) => 4,
        ApplyError::Conflict { .. } => 5,
        ApplyError::VersionConflict(_) => 6,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Command::Apply(args) => match run_apply(args, &config).await {
            Ok(()) => Ok(()),
            Err(RunError::Apply(e)) => {
                eprintln!("error: {}: {e}", e.kind());
                std::process::exit(exit_code(&e));
            }
            Err(RunError::Setup(e)) => {
                eprintln!("error: {e:#}");
                std::process::exit(1);
            }
        },
    }
}

async fn run_apply(args: ApplyArgs, config: &Config) -> Result<(), RunError> {
    let image = args
        .image
        .clone()
        .or_else(|| config.default_image.clone())
        .ok_or_else(|| {
            ApplyError::Validation {
                field: "image".to_string(),
                message: "no --image flag given and DEFAULT_IMAGE is not configured".to_string(),
            }
        })?;

    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| config.namespace.clone());

    let labels: BTreeMap<String, String> = [("app".to_string(), args.name.clone())]
        .into_iter()
        .collect();

    let workload = WorkloadSpec {
        name: args.name.clone(),
        replicas: args.replicas,
        labels: labels.clone(),
        image,
        container_port: args.port,
    };

    let service = ServiceSpec {
        name: args
            .service_name
            .clone()
            .unwrap_or_else(|| format!("{}-service", args.name)),
        selector: labels,
        port: args.service_port.unwrap_or(args.port),
        kind: args.service_kind,
    };

    let client = K8sClient::from_settings(config)
        .await
        .map_err(RunError::Setup)?;
    let applier = Applier::new(client, RetrySettings::from_config(config));

    let result = applier.apply(&namespace, &workload, &service).await?;

    match args.output {
        OutputFormat::Text => {
            println!("deployment/{}: {}", workload.name, result.deployment);
            println!("service/{}: {}", service.name, result.service);
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&result)
                .map_err(|e| RunError::Setup(e.into()))?;
            println!("{json}");
        }
    }

    Ok(())
}
