//! Egress NetworkPolicy coverage for the ports the agent cannot work
//! without.

use crate::classify::{Classify, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::kube::{EgressRule, IntOrString, NetworkPolicy, NetworkPolicyPort};
use crate::probes::Probe;
use crate::probes::cluster::{ClusterContext, query_failed};

const EGRESS_DNS: ProbeMeta = ProbeMeta::new("egress-dns", Scope::Cluster, "egress policy: dns");
const EGRESS_HTTPS: ProbeMeta =
    ProbeMeta::new("egress-https", Scope::Cluster, "egress policy: https");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredPort {
    pub label: &'static str,
    pub port: u16,
    pub names: &'static [&'static str],
}

pub const DNS: RequiredPort = RequiredPort {
    label: "DNS (port 53)",
    port: 53,
    names: &["dns", "dns-tcp", "dns-udp", "domain"],
};

pub const HTTPS: RequiredPort = RequiredPort {
    label: "HTTPS (port 443)",
    port: 443,
    names: &["https"],
};

fn port_matches(p: &NetworkPolicyPort, required: &RequiredPort) -> bool {
    match &p.port {
        None => true,
        Some(IntOrString::Int(start)) => {
            let end = p.end_port.unwrap_or(*start);
            (*start..=end).contains(&required.port)
        }
        Some(IntOrString::Str(name)) => {
            name.parse::<u16>().ok() == Some(required.port)
                || required.names.iter().any(|n| n.eq_ignore_ascii_case(name))
        }
    }
}

fn rule_allows(rule: &EgressRule, required: &RequiredPort) -> bool {
    match &rule.ports {
        None => true,
        Some(ports) if ports.is_empty() => true,
        Some(ports) => ports.iter().any(|p| port_matches(p, required)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    Unrestricted,
    Allowed { policies: Vec<String> },
    AllowsNothing { policies: Vec<String> },
    PortOmitted { policies: Vec<String> },
}

/// Policies combine additively: the port is reachable if any policy that
/// selects the pod allows it.
pub fn coverage(applicable: &[&NetworkPolicy], required: &RequiredPort) -> Coverage {
    if applicable.is_empty() {
        return Coverage::Unrestricted;
    }
    let policies: Vec<String> = applicable.iter().map(|p| p.metadata.name.clone()).collect();
    let rules: Vec<&EgressRule> = applicable
        .iter()
        .flat_map(|p| p.egress_rules().iter())
        .collect();
    if rules.is_empty() {
        return Coverage::AllowsNothing { policies };
    }
    if rules.iter().any(|r| rule_allows(r, required)) {
        Coverage::Allowed { policies }
    } else {
        Coverage::PortOmitted { policies }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCoverage {
    pub required: RequiredPort,
    pub coverage: Coverage,
}

impl Classify for PortCoverage {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        let label = self.required.label;
        match &self.coverage {
            Coverage::Unrestricted => {
                meta.pass(format!("no NetworkPolicy restricts egress; {label} is open"))
            }
            Coverage::Allowed { policies } => meta.pass(format!(
                "egress to {label} allowed by {}",
                policies.join(", ")
            )),
            Coverage::AllowsNothing { policies } => meta.warn(
                format!(
                    "NetworkPolicy {} allows no egress at all, so {label} is blocked",
                    policies.join(", ")
                ),
                format!("Add an egress rule allowing {label} to the policy that selects the agent pod."),
            ),
            Coverage::PortOmitted { policies } => meta.warn(
                format!(
                    "NetworkPolicy {} allows egress but omits {label}",
                    policies.join(", ")
                ),
                format!("Add {label} to the egress ports of the policy that selects the agent pod."),
            ),
        }
    }
}

fn check(ctx: &ClusterContext<'_>, meta: &ProbeMeta, required: RequiredPort) -> ProbeResult {
    let all = match ctx.network_policies() {
        Ok(all) => all,
        Err(err) => return query_failed(meta, "networkpolicies", err),
    };
    let applicable: Vec<&NetworkPolicy> = all
        .iter()
        .filter(|p| p.restricts_egress())
        .filter(|p| p.spec.pod_selector.matches(&ctx.pod.metadata.labels))
        .collect();
    PortCoverage {
        required,
        coverage: coverage(&applicable, &required),
    }
    .classify(meta)
}

pub struct EgressDns;

impl<'a> Probe<ClusterContext<'a>> for EgressDns {
    fn meta(&self) -> ProbeMeta {
        EGRESS_DNS
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        check(ctx, &EGRESS_DNS, DNS)
    }
}

pub struct EgressHttps;

impl<'a> Probe<ClusterContext<'a>> for EgressHttps {
    fn meta(&self) -> ProbeMeta {
        EGRESS_HTTPS
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        check(ctx, &EGRESS_HTTPS, HTTPS)
    }
}
