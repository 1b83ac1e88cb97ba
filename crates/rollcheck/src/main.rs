//! Verify that a deployment is ready: resolve a profile for the target, run
//! its checks against the cluster and exit 0 only if every check passed.

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rollcheck::access::{HttpProbe, MinikubeResolver};
use rollcheck::config::{Backend, Config};
use rollcheck::control_plane::{ControlPlane, KubeApiClient, KubectlClient};
use rollcheck::evaluators::ProbeContext;
use rollcheck::metrics;
use rollcheck::orchestrator::{NoopObserver, Orchestrator};
use rollcheck::profiles::{self, Profile};
use rollcheck::report::{self, JsonReporter, OutputFormat, TextReporter};
use rollcheck::result::RunTarget;

const USAGE: &str = "Usage: rollcheck <target-name> [namespace]";

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify that a Kubernetes deployment is ready", long_about = None)]
struct Cli {
    /// Application, service or subsystem to verify
    target: Option<String>,

    /// Namespace to look in (defaults to the profile's namespace)
    namespace: Option<String>,

    /// Built-in profile (app, docs, dapr, kafka, postgres, cluster, foundation)
    #[arg(short, long, default_value = "app")]
    profile: String,

    /// Load the profile from a YAML file instead
    #[arg(short = 'f', long, value_name = "PATH")]
    profile_file: Option<PathBuf>,

    /// Control-plane backend (kubectl, api)
    #[arg(long)]
    backend: Option<String>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: String,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Skip every settle delay
    #[arg(long)]
    no_settle: bool,

    /// Write Prometheus metrics to this file after the run
    #[arg(long, value_name = "PATH")]
    metrics_file: Option<PathBuf>,

    /// List the built-in profiles and exit
    #[arg(long)]
    list_profiles: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("rollcheck={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn list_profiles() -> Result<()> {
    for name in profiles::names() {
        let profile = profiles::builtin(name)?;
        println!("{:<10} {}", profile.name, profile.description);
    }
    Ok(())
}

async fn run(cli: Cli, target: String) -> Result<ExitCode> {
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(backend) = &cli.backend {
        config.backend = backend.parse()?;
    }
    if cli.no_settle {
        config.settle_override = Some(Duration::ZERO);
    }
    let format: OutputFormat = cli.output.parse()?;
    debug!("Configuration: {:?}", config);

    let profile = match &cli.profile_file {
        Some(path) => Profile::load(path)?,
        None => profiles::builtin(&cli.profile)?,
    };
    let plan = profile.build(&target, cli.namespace.as_deref())?;

    let plane: Box<dyn ControlPlane> = match config.backend {
        Backend::Kubectl => Box::new(KubectlClient::from_config(&config)),
        Backend::Api => Box::new(
            KubeApiClient::try_default(config.command_timeout)
                .await
                .context("failed to create Kubernetes client")?,
        ),
    };
    info!("Using {} backend", config.backend);
    let resolver = MinikubeResolver::from_config(&config);
    let http = HttpProbe::new(config.http_timeout)?;

    let ctx = ProbeContext {
        plane: plane.as_ref(),
        resolver: &resolver,
        http: &http,
    };
    let mut orchestrator = Orchestrator::new(ctx).with_settle_override(config.settle_override);
    let run_target = RunTarget::new(&target, &plan.namespace, &profile.name);

    let run = match format {
        OutputFormat::Text => {
            let mut reporter = TextReporter::new(io::stdout());
            reporter.intro(&target, &plan.namespace, &profile.name);
            let run = orchestrator.run(run_target, &plan.checks, &mut reporter).await;
            reporter.summary(&run);
            run
        }
        OutputFormat::Json => {
            let run = orchestrator.run(run_target, &plan.checks, &mut NoopObserver).await;
            JsonReporter { pretty: cli.pretty }.write(&run, &mut io::stdout())?;
            run
        }
    };

    if let Some(path) = &cli.metrics_file {
        metrics::write_metrics_file(path)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }

    Ok(report::exit_code(&run))
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_tracing(&cli.log_level);

    if cli.list_profiles {
        return match list_profiles() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    let Some(target) = cli.target.clone() else {
        println!("{}", USAGE);
        return ExitCode::FAILURE;
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, target)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
