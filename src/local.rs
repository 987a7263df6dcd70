//! The workload-side suite: what `agent-probe` runs inside the target and
//! the report it hands back across the handoff boundary.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::EffectiveConfig;
use crate::core::{Aggregator, SCHEMA_VERSION, Scope, ScopeSnapshot};
use crate::platform::{self, CommandRunner};
use crate::probes::run_battery;
use crate::probes::workload::{WorkloadContext, WorkloadSettings, battery};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalReport {
    pub schema_version: String,
    pub tool_version: String,
    pub generated_at: String,
    pub workload: ScopeSnapshot,
}

impl LocalReport {
    pub fn exit_code(&self) -> i32 {
        if self.workload.has_fail() {
            crate::exit::ExitCode::DiagnosisFailed.as_i32()
        } else {
            crate::exit::ExitCode::Success.as_i32()
        }
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Context for the process's own environment.
pub fn context_from_env<'a>(
    cfg: &EffectiveConfig,
    runner: &'a dyn CommandRunner,
    timeout: Duration,
) -> WorkloadContext<'a> {
    let work_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    WorkloadContext {
        runner,
        env: std::env::vars().collect(),
        sys_root: PathBuf::from("/"),
        scratch_dir: PathBuf::from(&cfg.probes.scratch_dir),
        work_dir,
        uid: platform::effective_uid(),
        timeout,
        settings: WorkloadSettings::from_config(cfg),
    }
}

pub fn run_local(ctx: &WorkloadContext<'_>) -> LocalReport {
    let mut agg = Aggregator::new(Scope::Workload);
    let probes = battery();
    tracing::info!(probes = probes.len(), "running workload battery");
    run_battery(&probes, ctx, &mut agg);
    LocalReport {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: now_rfc3339(),
        workload: agg.snapshot(),
    }
}

/// Parses a report received from the target. Results are re-aggregated so
/// counts and issues are consistent with them whatever the sender wrote.
pub fn parse_local_report(json: &str) -> Result<LocalReport> {
    let raw: LocalReport =
        serde_json::from_str(json.trim()).context("workload report is not valid JSON")?;
    let major = |v: &str| v.split('.').next().unwrap_or_default().to_string();
    if major(&raw.schema_version) != major(SCHEMA_VERSION) {
        bail!(
            "workload report schema {} is incompatible with {}",
            raw.schema_version,
            SCHEMA_VERSION
        );
    }
    if raw.workload.scope != Scope::Workload {
        bail!("workload report carries {} results", raw.workload.scope);
    }

    let mut agg = Aggregator::new(Scope::Workload);
    for mut result in raw.workload.results {
        result.scope = Scope::Workload;
        agg.record(result.normalized());
    }
    Ok(LocalReport {
        workload: agg.snapshot(),
        ..raw
    })
}
