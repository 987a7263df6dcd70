use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::config::EffectiveConfig;
use crate::kube::{Kubectl, KubectlOptions};
use crate::orchestrator::{Orchestrator, RunOptions, TargetSelector};
use crate::probes::cluster::ClusterSettings;
use crate::ui::UiConfig;

pub mod probe;

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "AGENT_DOCTOR_CONFIG";

#[derive(Debug, Parser)]
#[command(
    name = "agent-doctor",
    version,
    about = "Diagnose why a data-plane agent fails inside its cluster: control-plane evidence, in-pod evidence, and the root causes that connect them"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Per-probe and per-call budget in seconds.
    #[arg(long, default_value_t = 10, global = true)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full diagnosis against one agent pod.
    Check(CheckArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Pod to diagnose; skips auto-discovery.
    #[arg(long)]
    pub target: Option<String>,
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,
    /// Label selector used for auto-discovery.
    #[arg(long, short = 'l')]
    pub selector: Option<String>,
    #[arg(long, short = 'c')]
    pub container: Option<String>,
    #[arg(long)]
    pub kubeconfig: Option<String>,
    #[arg(long)]
    pub context: Option<String>,
    #[arg(long)]
    pub kubectl: Option<String>,
    /// Workload probe bundle copied into the target.
    #[arg(long)]
    pub bundle: Option<String>,
    #[arg(long)]
    pub cluster_only: bool,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

/// Runs the orchestrator CLI and returns the process exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    crate::logging::init(cli.verbose, cli.quiet);

    let home_dir = crate::platform::effective_home_dir().ok();
    let env_config_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        home_dir.as_deref(),
    )
    .map_err(crate::exit::invalid_args_err)?;

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;
    let ui_cfg = UiConfig {
        color,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    if cli.timeout == 0 {
        return Err(crate::exit::invalid_args("--timeout must be at least 1 second"));
    }

    match cli.command {
        Commands::Check(args) => {
            let cfg = apply_check_args(cfg, &args);
            let probe_timeout = Duration::from_secs(cli.timeout);
            let call_timeout = Duration::from_secs(cfg.kube.request_timeout_secs.max(1));

            let kubectl = Kubectl::new(KubectlOptions {
                program: cfg.kube.kubectl.clone(),
                kubeconfig: cfg.kube.kubeconfig.clone(),
                context: cfg.kube.context.clone(),
                request_timeout: call_timeout,
            });
            let opts = RunOptions {
                target: TargetSelector {
                    namespace: cfg.target.namespace.clone(),
                    pod: args.target,
                    selector: cfg.target.selector.clone(),
                    container: cfg.target.container.clone(),
                },
                cluster_only: args.cluster_only,
                bundle: cfg.handoff.bundle.clone(),
                remote_dir: cfg.handoff.remote_dir.clone(),
                bundle_args: crate::handoff::bundle_args(&cfg, probe_timeout),
                call_timeout,
                run_timeout: remote_budget(probe_timeout),
                cluster: ClusterSettings::from_config(&cfg),
                show_progress: stderr_is_tty && !cli.quiet && !cli.json,
            };

            let report = Orchestrator::new(&kubectl, opts).run();
            if cli.json {
                write_json(&report)?;
            } else {
                crate::ui::print_report(&report, &ui_cfg)?;
            }
            return Ok(report.exit_code());
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "agent-doctor", &mut out);
        }
        Commands::Config(args) => show_config(&cfg, args.show, cli.json, &ui_cfg)?,
    }

    Ok(crate::exit::ExitCode::Success.as_i32())
}

fn apply_check_args(mut cfg: EffectiveConfig, args: &CheckArgs) -> EffectiveConfig {
    if let Some(v) = &args.namespace {
        cfg.target.namespace = v.clone();
    }
    if let Some(v) = &args.selector {
        cfg.target.selector = v.clone();
    }
    if args.container.is_some() {
        cfg.target.container = args.container.clone();
    }
    if args.kubeconfig.is_some() {
        cfg.kube.kubeconfig = args.kubeconfig.clone();
    }
    if args.context.is_some() {
        cfg.kube.context = args.context.clone();
    }
    if let Some(v) = &args.kubectl {
        cfg.kube.kubectl = v.clone();
    }
    if args.bundle.is_some() {
        cfg.handoff.bundle = args.bundle.clone();
    }
    cfg
}

/// Fourteen probes, each bounded by the probe timeout, plus start-up slack.
fn remote_budget(probe_timeout: Duration) -> Duration {
    probe_timeout * 16 + Duration::from_secs(30)
}

pub(crate) fn show_config(
    cfg: &EffectiveConfig,
    show: bool,
    json: bool,
    ui_cfg: &UiConfig,
) -> Result<()> {
    if show {
        if json {
            write_json(cfg)?;
        } else {
            println!("{}", toml::to_string_pretty(cfg)?);
        }
    } else if !ui_cfg.quiet {
        eprintln!("config: use `agent-doctor config --show`");
    }
    Ok(())
}

pub(crate) fn write_json<T: serde::Serialize>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}
