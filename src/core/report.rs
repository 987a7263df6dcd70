use serde::{Deserialize, Serialize};

use crate::core::{Diagnosis, ScopeSnapshot, Status};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub namespace: String,
    pub pod: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalPhase {
    Cluster,
    Discovery,
    Handoff,
}

impl FatalPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            FatalPhase::Cluster => "cluster",
            FatalPhase::Discovery => "discovery",
            FatalPhase::Handoff => "handoff",
        }
    }
}

/// The run stopped before diagnosis could complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalFailure {
    pub phase: FatalPhase,
    pub reason: String,
    pub hint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Diagnosis,
    Cluster,
    Workload,
}

impl Origin {
    const fn rank(self) -> u8 {
        match self {
            Origin::Diagnosis => 0,
            Origin::Cluster | Origin::Workload => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationItem {
    pub status: Status,
    pub origin: Origin,
    pub id: String,
    pub message: String,
    pub remediation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: String,
    pub tool_version: String,
    pub generated_at: String,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<FatalFailure>,
    pub cluster: ScopeSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<ScopeSnapshot>,
    pub diagnoses: Vec<Diagnosis>,
    pub remediation: Vec<RemediationItem>,
}

impl RunReport {
    pub fn assemble(
        generated_at: String,
        target: Option<TargetInfo>,
        fatal: Option<FatalFailure>,
        cluster: ScopeSnapshot,
        workload: Option<ScopeSnapshot>,
        diagnoses: Vec<Diagnosis>,
    ) -> Self {
        let remediation = remediation_plan(&cluster, workload.as_ref(), &diagnoses);
        let any_fail = fatal.is_some()
            || cluster.has_fail()
            || workload.as_ref().is_some_and(ScopeSnapshot::has_fail)
            || diagnoses.iter().any(|d| d.status == Status::Fail);

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at,
            verdict: if any_fail { Verdict::Fail } else { Verdict::Pass },
            target,
            fatal,
            cluster,
            workload,
            diagnoses,
            remediation,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.verdict {
            Verdict::Pass => crate::exit::ExitCode::Success.as_i32(),
            Verdict::Fail => crate::exit::ExitCode::DiagnosisFailed.as_i32(),
        }
    }
}

/// FAIL before WARN; diagnoses lead within a severity; otherwise insertion
/// order (cluster issues, then workload issues).
fn remediation_plan(
    cluster: &ScopeSnapshot,
    workload: Option<&ScopeSnapshot>,
    diagnoses: &[Diagnosis],
) -> Vec<RemediationItem> {
    let mut items: Vec<RemediationItem> = diagnoses
        .iter()
        .filter(|d| d.status.is_issue())
        .map(|d| RemediationItem {
            status: d.status,
            origin: Origin::Diagnosis,
            id: d.id.clone(),
            message: d.title.clone(),
            remediation: d.remediation.clone(),
        })
        .collect();

    let scoped = std::iter::once((Origin::Cluster, cluster))
        .chain(workload.map(|w| (Origin::Workload, w)));
    for (origin, snap) in scoped {
        items.extend(snap.issues.iter().map(|issue| RemediationItem {
            status: issue.status,
            origin,
            id: issue.id.clone(),
            message: issue.message.clone(),
            remediation: issue.remediation.clone(),
        }));
    }

    items.sort_by_key(|item| (std::cmp::Reverse(item.status), item.origin.rank()));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Aggregator, EvidenceRef, ProbeResult, Scope};

    fn snapshot(scope: Scope, results: Vec<ProbeResult>) -> ScopeSnapshot {
        let mut agg = Aggregator::new(scope);
        for r in results {
            agg.record(r);
        }
        agg.snapshot()
    }

    #[test]
    fn single_fail_among_passes_fails_the_run() {
        let mut results: Vec<ProbeResult> = (0..9)
            .map(|i| ProbeResult::pass(format!("p{i}"), Scope::Cluster, "ok"))
            .collect();
        results.push(ProbeResult::fail("boom", Scope::Cluster, "bad", "fix"));
        let report = RunReport::assemble(
            "t".to_string(),
            None,
            None,
            snapshot(Scope::Cluster, results),
            None,
            vec![],
        );
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn many_warnings_without_fail_pass_the_run() {
        let results: Vec<ProbeResult> = (0..12)
            .map(|i| ProbeResult::warn(format!("w{i}"), Scope::Workload, "hmm", "fix"))
            .collect();
        let report = RunReport::assemble(
            "t".to_string(),
            None,
            None,
            snapshot(Scope::Cluster, vec![]),
            Some(snapshot(Scope::Workload, results)),
            vec![],
        );
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.remediation.len(), 12);
    }

    #[test]
    fn fatal_failure_fails_even_without_findings() {
        let report = RunReport::assemble(
            "t".to_string(),
            None,
            Some(FatalFailure {
                phase: FatalPhase::Cluster,
                reason: "unreachable".to_string(),
                hint: "check VPN".to_string(),
            }),
            snapshot(Scope::Cluster, vec![]),
            None,
            vec![],
        );
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn remediation_orders_fail_before_warn_and_keeps_insertion_order() {
        let cluster = snapshot(
            Scope::Cluster,
            vec![
                ProbeResult::warn("c-warn", Scope::Cluster, "w", "fix"),
                ProbeResult::fail("c-fail", Scope::Cluster, "f", "fix"),
            ],
        );
        let workload = snapshot(
            Scope::Workload,
            vec![
                ProbeResult::fail("w-fail", Scope::Workload, "f", "fix"),
                ProbeResult::warn("w-warn", Scope::Workload, "w", "fix"),
            ],
        );
        let diagnosis = Diagnosis {
            id: "dx".to_string(),
            status: Status::Fail,
            title: "root cause".to_string(),
            summary: "s".to_string(),
            evidence: vec![EvidenceRef {
                scope: Scope::Cluster,
                id: "c-fail".to_string(),
            }],
            remediation: "fix it".to_string(),
        };
        let report = RunReport::assemble(
            "t".to_string(),
            None,
            None,
            cluster,
            Some(workload),
            vec![diagnosis],
        );
        let ids: Vec<&str> = report.remediation.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["dx", "c-fail", "w-fail", "c-warn", "w-warn"]);
    }
}
