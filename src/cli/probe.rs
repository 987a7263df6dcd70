//! `agent-probe`: the workload-scope suite run inside the target.

use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::config::EffectiveConfig;
use crate::platform::SystemRunner;
use crate::probes::federation::Provider;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "agent-probe",
    version,
    about = "Run the in-pod agent checks against the local runtime"
)]
pub struct ProbeCli {
    #[arg(long)]
    pub json: bool,
    #[arg(long = "no-color")]
    pub no_color: bool,
    #[arg(long)]
    pub verbose: bool,
    #[arg(long)]
    pub quiet: bool,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Per-probe budget in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    #[arg(long)]
    pub interpreter: Option<String>,
    #[arg(long)]
    pub scratch_dir: Option<String>,
    #[arg(long)]
    pub headroom_warn_percent: Option<u8>,
    #[arg(long)]
    pub actuator_url: Option<String>,
    /// Comma-separated variable names; an empty value requires none.
    #[arg(long)]
    pub required_env: Option<String>,
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long = "dns-host")]
    pub dns_hosts: Vec<String>,
    #[arg(long = "https-endpoint")]
    pub https_endpoints: Vec<String>,
}

pub fn run() -> Result<i32> {
    let cli = ProbeCli::parse();

    crate::logging::init(cli.verbose, cli.quiet);

    if cli.timeout == 0 {
        return Err(crate::exit::invalid_args("--timeout must be at least 1 second"));
    }

    let home_dir = crate::platform::effective_home_dir().ok();
    let env_config_path = std::env::var_os(super::CONFIG_ENV).map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        home_dir.as_deref(),
    )
    .map_err(crate::exit::invalid_args_err)?;
    let cfg = apply_flags(cfg, &cli)?;

    let ui_cfg = UiConfig {
        color: io::stdout().is_terminal() && cfg.ui.color && !cli.no_color,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let runner = SystemRunner;
    let ctx = crate::local::context_from_env(&cfg, &runner, Duration::from_secs(cli.timeout));
    let report = crate::local::run_local(&ctx);

    if cli.json {
        super::write_json(&report)?;
    } else {
        crate::ui::print_local_report(&report, &ui_cfg)?;
    }
    Ok(report.exit_code())
}

fn apply_flags(mut cfg: EffectiveConfig, cli: &ProbeCli) -> Result<EffectiveConfig> {
    if let Some(v) = &cli.interpreter {
        cfg.probes.interpreter = v.clone();
    }
    if let Some(v) = &cli.scratch_dir {
        cfg.probes.scratch_dir = v.clone();
    }
    if let Some(v) = cli.headroom_warn_percent {
        if !(1..=100).contains(&v) {
            return Err(crate::exit::invalid_args(format!(
                "--headroom-warn-percent must be within 1..=100 (got {v})"
            )));
        }
        cfg.probes.headroom_warn_percent = v;
    }
    if let Some(v) = &cli.actuator_url {
        cfg.probes.actuator_url = v.clone();
    }
    if let Some(v) = &cli.required_env {
        cfg.probes.required_env = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = &cli.provider {
        let provider: Provider = v.parse().map_err(crate::exit::invalid_args)?;
        cfg.cloud.provider = Some(provider);
    }
    if !cli.dns_hosts.is_empty() {
        cfg.network.dns_hosts = cli.dns_hosts.clone();
    }
    if !cli.https_endpoints.is_empty() {
        cfg.network.https_endpoints = cli.https_endpoints.clone();
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> ProbeCli {
        let mut full = vec!["agent-probe"];
        full.extend_from_slice(argv);
        ProbeCli::try_parse_from(full).unwrap()
    }

    #[test]
    fn forwarded_flags_replace_config_values() {
        let cli = parse(&[
            "--interpreter",
            "python3.11",
            "--required-env",
            "ACCOUNT_ID, ,AGENT_ID",
            "--provider",
            "azure",
            "--dns-host",
            "login.microsoftonline.com",
            "--dns-host",
            "example.com",
        ]);
        let cfg = apply_flags(EffectiveConfig::default(), &cli).unwrap();
        assert_eq!(cfg.probes.interpreter, "python3.11");
        assert_eq!(cfg.probes.required_env, vec!["ACCOUNT_ID", "AGENT_ID"]);
        assert_eq!(cfg.cloud.provider, Some(Provider::Azure));
        assert_eq!(cfg.network.dns_hosts.len(), 2);
    }

    #[test]
    fn empty_required_env_requires_nothing() {
        let cfg = apply_flags(EffectiveConfig::default(), &parse(&["--required-env", ""])).unwrap();
        assert!(cfg.probes.required_env.is_empty());
    }

    #[test]
    fn bad_provider_and_percent_are_invalid_args() {
        let err = apply_flags(EffectiveConfig::default(), &parse(&["--provider", "gcp"])).unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
        let err = apply_flags(
            EffectiveConfig::default(),
            &parse(&["--headroom-warn-percent", "0"]),
        )
        .unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
    }
}
