use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use jobop_core::{DeletePolicy, KindRegistry};
use jobop_runner::{ExecuteOptions, ManifestSource, Runner, RunnerOptions};
use tracing::{error, info};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

/// Runs a manifest bundle to completion against a real cluster (clap +
/// tracing example binary; the resource-runner logic itself lives in
/// `jobop-runner`).
#[derive(Parser, Debug)]
#[command(name = "jobop", version, about = "Run a Kubernetes job manifest to completion")]
struct Cli {
    /// Path to a YAML manifest (single document, multi-document, or a list).
    manifest: String,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to default every manifest element into.
    #[arg(long, env = "JOB_RUNNER_NAMESPACE")]
    namespace: Option<String>,

    #[arg(long, env = "JOB_RUNNER_SHOW_POD_LOGS", default_value_t = true)]
    show_pod_logs: bool,

    #[arg(long, env = "JOB_RUNNER_SHOW_OPERATION_LOGS", default_value_t = true)]
    show_operation_logs: bool,

    #[arg(long, env = "JOB_RUNNER_SHOW_WATCHER_LOGS", default_value_t = true)]
    show_watcher_logs: bool,

    #[arg(long, env = "JOB_RUNNER_SHOW_EXECUTOR_LOGS", default_value_t = true)]
    show_executor_logs: bool,

    #[arg(long, env = "JOB_RUNNER_SHOW_ERROR_LOGS", default_value_t = true)]
    show_error_logs: bool,

    #[arg(long, env = "JOB_RUNNER_DELETE_POLICY", value_enum, default_value_t = DeletePolicyArg::IfSucceeded)]
    delete_policy: DeletePolicyArg,

    #[arg(long, env = "JOB_RUNNER_RANDOM_POSTFIX_LENGTH", default_value_t = 8)]
    random_postfix_length: usize,

    #[arg(long, env = "JOB_RUNNER_NAME_PREFIX")]
    name_prefix: Option<String>,

    #[arg(long, env = "JOB_RUNNER_NAME_POSTFIX")]
    name_postfix: Option<String>,

    /// Seconds to wait for the primary resource to reach a terminal state.
    #[arg(long, env = "JOB_RUNNER_TIMEOUT_SECONDS", default_value_t = 300)]
    timeout_seconds: u64,

    /// Seconds to wait for every watcher to connect before creating resources.
    #[arg(long, env = "JOB_RUNNER_WATCHER_START_TIMEOUT_SECONDS", default_value_t = 10)]
    watcher_start_timeout_seconds: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum DeletePolicyArg {
    Always,
    IfSucceeded,
    IfFailed,
    Never,
}

impl From<DeletePolicyArg> for DeletePolicy {
    fn from(value: DeletePolicyArg) -> Self {
        match value {
            DeletePolicyArg::Always => DeletePolicy::Always,
            DeletePolicyArg::IfSucceeded => DeletePolicy::IfSucceeded,
            DeletePolicyArg::IfFailed => DeletePolicy::IfFailed,
            DeletePolicyArg::Never => DeletePolicy::Never,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("JOB_RUNNER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let manifest_text = std::fs::read_to_string(&cli.manifest).with_context(|| format!("reading {}", cli.manifest))?;

    let config = kube::Config::infer().await.context("resolving cluster config (in-cluster config or kubeconfig)")?;
    let default_ns = config.default_namespace.clone();
    let client = kube::Client::try_from(config).context("building Kubernetes client")?;
    info!(namespace = %default_ns, "connected to cluster");

    let options = RunnerOptions {
        namespace: cli.namespace,
        show_pod_logs: cli.show_pod_logs,
        show_operation_logs: cli.show_operation_logs,
        show_watcher_logs: cli.show_watcher_logs,
        show_executor_logs: cli.show_executor_logs,
        show_error_logs: cli.show_error_logs,
        delete_policy: cli.delete_policy.into(),
        random_postfix_length: cli.random_postfix_length,
        name_prefix: cli.name_prefix,
        name_postfix: cli.name_postfix,
        ..RunnerOptions::from_env()
    };
    let exec_options = ExecuteOptions {
        timeout: std::time::Duration::from_secs(cli.timeout_seconds),
        watcher_start_timeout: std::time::Duration::from_secs(cli.watcher_start_timeout_seconds),
    };

    let runner = Runner::connect(client, default_ns, KindRegistry::bootstrap(), options);
    match runner.execute(ManifestSource::Yaml(manifest_text), exec_options).await {
        Ok(state) => {
            match cli.output {
                Output::Human => println!("execution finished: {state}"),
                Output::Json => println!("{}", serde_json::json!({ "state": state.to_string() })),
            }
            if state == jobop_core::State::Failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "execution failed");
            match cli.output {
                Output::Human => eprintln!("execution error: {e}"),
                Output::Json => eprintln!("{}", serde_json::json!({ "error": e.to_string() })),
            }
            std::process::exit(1);
        }
    }
}
