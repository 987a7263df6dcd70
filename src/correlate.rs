//! Cross-scope correlation: static rules over both scopes' results that add
//! named root-cause diagnoses next to the evidence that triggered them.

use crate::core::{Diagnosis, EvidenceRef, ProbeResult, Scope, ScopeSnapshot, Status};

#[derive(Debug, Clone, Copy)]
pub struct Condition {
    pub scope: Scope,
    pub id: &'static str,
    pub statuses: &'static [Status],
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub id: &'static str,
    pub status: Status,
    pub title: &'static str,
    pub remediation: &'static str,
    /// All must hold.
    pub conditions: &'static [Condition],
}

const WARN_OR_FAIL: &[Status] = &[Status::Warn, Status::Fail];
const WARN: &[Status] = &[Status::Warn];
const FAIL: &[Status] = &[Status::Fail];

const fn cluster(id: &'static str, statuses: &'static [Status]) -> Condition {
    Condition {
        scope: Scope::Cluster,
        id,
        statuses,
    }
}

const fn workload(id: &'static str, statuses: &'static [Status]) -> Condition {
    Condition {
        scope: Scope::Workload,
        id,
        statuses,
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        id: "drift-detection-kill",
        status: Status::Fail,
        title: "Runtime drift detection is killing file-based execution",
        remediation: "An enforcing runtime security sensor shares the node with the agent, and file-backed interpreter runs are SIGKILLed while inline runs succeed. Ask the security team to exclude the agent pod (or its script directory) from drift or on-exec prevention, then re-run the check.",
        conditions: &[
            cluster("security-daemon-on-node", WARN_OR_FAIL),
            workload("exec-parity", FAIL),
        ],
    },
    Rule {
        id: "memory-pressure-restarts",
        status: Status::Warn,
        title: "Memory pressure is restarting the agent",
        remediation: "The container has been SIGKILLed before and memory usage is near its limit. Raise resources.limits.memory or lower task concurrency.",
        conditions: &[
            cluster("container-restarts", WARN),
            workload("memory-headroom", WARN),
        ],
    },
    Rule {
        id: "egress-policy-blocks-dns",
        status: Status::Fail,
        title: "A NetworkPolicy is blocking DNS",
        remediation: "Name resolution fails inside the pod and the egress policy selecting it does not allow port 53. Allow UDP and TCP 53 to kube-dns in that policy.",
        conditions: &[cluster("egress-dns", WARN), workload("dns-resolution", FAIL)],
    },
    Rule {
        id: "workload-identity-unwired",
        status: Status::Fail,
        title: "Cloud workload identity is not wired to the agent",
        remediation: "The service account lacks a usable federation identity and the pod has no cloud credentials. Fix the service account annotation (and the azure.workload.identity/use pod label on Azure), then restart the pod so the webhook injects the token.",
        conditions: &[
            cluster("service-account-identity", WARN_OR_FAIL),
            workload("cloud-credentials", FAIL),
        ],
    },
];

fn lookup<'s>(
    condition: &Condition,
    cluster: &'s ScopeSnapshot,
    workload: &'s ScopeSnapshot,
) -> Option<&'s ProbeResult> {
    let snapshot = match condition.scope {
        Scope::Cluster => cluster,
        Scope::Workload => workload,
    };
    snapshot
        .find(condition.id)
        .filter(|r| condition.statuses.contains(&r.status))
}

pub fn evaluate(rule: &Rule, cluster: &ScopeSnapshot, workload: &ScopeSnapshot) -> Option<Diagnosis> {
    let matched: Vec<&ProbeResult> = rule
        .conditions
        .iter()
        .map(|c| lookup(c, cluster, workload))
        .collect::<Option<_>>()?;

    let summary = matched
        .iter()
        .map(|r| format!("[{} {}] {}", r.scope, r.id, r.message))
        .collect::<Vec<_>>()
        .join("; ");
    Some(Diagnosis {
        id: rule.id.to_string(),
        status: rule.status,
        title: rule.title.to_string(),
        summary,
        evidence: matched
            .iter()
            .map(|r| EvidenceRef {
                scope: r.scope,
                id: r.id.clone(),
            })
            .collect(),
        remediation: rule.remediation.to_string(),
    })
}

/// Single pass over [`RULES`]; rules never see each other's output.
pub fn correlate(cluster: &ScopeSnapshot, workload: &ScopeSnapshot) -> Vec<Diagnosis> {
    correlate_with(RULES, cluster, workload)
}

pub fn correlate_with(
    rules: &[Rule],
    cluster: &ScopeSnapshot,
    workload: &ScopeSnapshot,
) -> Vec<Diagnosis> {
    rules
        .iter()
        .filter_map(|rule| {
            let hit = evaluate(rule, cluster, workload);
            if hit.is_some() {
                tracing::debug!(rule = rule.id, "correlation rule matched");
            }
            hit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Aggregator;

    fn snapshot(scope: Scope, results: Vec<ProbeResult>) -> ScopeSnapshot {
        let mut agg = Aggregator::new(scope);
        for r in results {
            agg.record(r);
        }
        agg.snapshot()
    }

    fn daemon_on_node() -> ProbeResult {
        ProbeResult::warn(
            "security-daemon-on-node",
            Scope::Cluster,
            "CrowdStrike Falcon sensor runs on node node-a",
            "exclude",
        )
    }

    fn parity_killed() -> ProbeResult {
        ProbeResult::fail(
            "exec-parity",
            Scope::Workload,
            "execution mismatch: inline exits 0 but file-based is killed with exit 137 (SIGKILL)",
            "exclude",
        )
    }

    #[test]
    fn correlation_is_additive_and_needs_both_halves() {
        let cluster = snapshot(Scope::Cluster, vec![daemon_on_node()]);
        let workload = snapshot(Scope::Workload, vec![parity_killed()]);

        let diagnoses = correlate(&cluster, &workload);
        assert_eq!(diagnoses.len(), 1);
        assert_eq!(diagnoses[0].id, "drift-detection-kill");
        assert_eq!(diagnoses[0].status, Status::Fail);
        assert_eq!(diagnoses[0].evidence.len(), 2);
        // the triggering evidence is untouched
        let surfaced = cluster.results.len() + workload.results.len() + diagnoses.len();
        assert!(surfaced >= 3);
        assert!(cluster.find("security-daemon-on-node").is_some());
        assert!(workload.find("exec-parity").is_some());

        let no_daemon = snapshot(Scope::Cluster, vec![]);
        assert!(correlate(&no_daemon, &workload).is_empty());
        assert!(workload.find("exec-parity").is_some());

        let no_kill = snapshot(Scope::Workload, vec![]);
        assert!(correlate(&cluster, &no_kill).is_empty());
        assert!(cluster.find("security-daemon-on-node").is_some());
    }

    #[test]
    fn status_must_match() {
        let cluster = snapshot(
            Scope::Cluster,
            vec![ProbeResult::pass("security-daemon-on-node", Scope::Cluster, "none")],
        );
        let workload = snapshot(Scope::Workload, vec![parity_killed()]);
        assert!(correlate(&cluster, &workload).is_empty());
    }

    #[test]
    fn scope_is_part_of_the_key() {
        // the same id in the wrong scope does not satisfy a condition
        let cluster = snapshot(Scope::Cluster, vec![daemon_on_node()]);
        let workload = snapshot(
            Scope::Workload,
            vec![ProbeResult::warn(
                "security-daemon-on-node",
                Scope::Workload,
                "x",
                "y",
            )],
        );
        assert!(correlate(&cluster, &workload).is_empty());
    }

    #[test]
    fn rules_are_independent() {
        let cluster = snapshot(
            Scope::Cluster,
            vec![
                daemon_on_node(),
                ProbeResult::warn("egress-dns", Scope::Cluster, "omits DNS (port 53)", "fix"),
            ],
        );
        let workload = snapshot(
            Scope::Workload,
            vec![
                parity_killed(),
                ProbeResult::fail("dns-resolution", Scope::Workload, "could not resolve", "fix"),
            ],
        );
        let ids: Vec<String> = correlate(&cluster, &workload)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, ["drift-detection-kill", "egress-policy-blocks-dns"]);
    }

    #[test]
    fn rule_ids_are_unique() {
        let mut ids: Vec<&str> = RULES.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), RULES.len());
    }
}
