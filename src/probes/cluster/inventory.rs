//! Runtime security daemon inventory and co-scheduling with the target.

use crate::classify::{Classify, Gathered, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::kube::DaemonSet;
use crate::probes::Probe;
use crate::probes::cluster::{ClusterContext, query_failed};

const SECURITY_DAEMONS: ProbeMeta =
    ProbeMeta::new("security-daemons", Scope::Cluster, "security daemon inventory");
const SECURITY_DAEMON_ON_NODE: ProbeMeta = ProbeMeta::new(
    "security-daemon-on-node",
    Scope::Cluster,
    "security daemon on target node",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonPattern {
    pub needle: &'static str,
    pub product: &'static str,
    /// Whether the product can kill or block processes, not only report.
    pub enforcing: bool,
}

const fn pattern(needle: &'static str, product: &'static str, enforcing: bool) -> DaemonPattern {
    DaemonPattern {
        needle,
        product,
        enforcing,
    }
}

/// First match wins: a needle that contains another needle must come first.
pub const SECURITY_DAEMON_PATTERNS: &[DaemonPattern] = &[
    pattern("falcon-sensor", "CrowdStrike Falcon sensor", true),
    pattern("falcon-container", "CrowdStrike Falcon container sensor", true),
    pattern("falcon", "CrowdStrike Falcon", true),
    pattern("crowdstrike", "CrowdStrike Falcon", true),
    pattern("falco", "Falco", false),
    pattern("twistlock-defender", "Prisma Cloud Defender", true),
    pattern("twistlock", "Prisma Cloud", true),
    pattern("prisma-cloud", "Prisma Cloud", true),
    pattern("aqua-enforcer", "Aqua Enforcer", true),
    pattern("kube-enforcer", "Aqua KubeEnforcer", true),
    pattern("tracee", "Aqua Tracee", false),
    pattern("aqua", "Aqua Security", true),
    pattern("neuvector-enforcer", "NeuVector Enforcer", true),
    pattern("neuvector", "NeuVector", true),
    pattern("sysdig-agent", "Sysdig Secure agent", true),
    pattern("sysdig", "Sysdig Secure", true),
    pattern("tetragon", "Cilium Tetragon", true),
    pattern("kubearmor", "KubeArmor", true),
    pattern("wiz-sensor", "Wiz Runtime Sensor", true),
    pattern("sentinelone", "SentinelOne", true),
    pattern("s1-agent", "SentinelOne", true),
    pattern("microsoft-defender", "Microsoft Defender for Containers", true),
    pattern("datadog-agent", "Datadog Workload Protection", false),
];

pub fn match_daemon(name: &str) -> Option<&'static DaemonPattern> {
    let lower = name.to_ascii_lowercase();
    SECURITY_DAEMON_PATTERNS
        .iter()
        .find(|p| lower.contains(p.needle))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub namespace: String,
    pub name: String,
    pub pattern: &'static DaemonPattern,
}

impl Sighting {
    fn label(&self) -> String {
        format!("{} ({}/{})", self.pattern.product, self.namespace, self.name)
    }
}

pub fn sightings(daemonsets: &[DaemonSet]) -> Vec<Sighting> {
    daemonsets
        .iter()
        .filter_map(|ds| {
            match_daemon(&ds.metadata.name).map(|pattern| Sighting {
                namespace: ds.metadata.namespace.clone().unwrap_or_default(),
                name: ds.metadata.name.clone(),
                pattern,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub found: Vec<Sighting>,
}

impl Classify for Inventory {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        if self.found.is_empty() {
            return meta.pass("no known runtime security daemons in the cluster");
        }
        let names: Vec<String> = self.found.iter().map(Sighting::label).collect();
        meta.info(format!("runtime security daemons present: {}", names.join(", ")))
    }
}

pub struct SecurityDaemons;

impl<'a> Probe<ClusterContext<'a>> for SecurityDaemons {
    fn meta(&self) -> ProbeMeta {
        SECURITY_DAEMONS
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        match ctx.daemonsets() {
            Ok(list) => Inventory {
                found: sightings(list),
            }
            .classify(&SECURITY_DAEMONS),
            Err(err) => query_failed(&SECURITY_DAEMONS, "daemonsets", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoScheduling {
    pub node: String,
    pub on_node: Vec<Sighting>,
    pub elsewhere: Vec<Sighting>,
}

impl Classify for CoScheduling {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        let node = &self.node;
        let enforcing: Vec<String> = self
            .on_node
            .iter()
            .filter(|s| s.pattern.enforcing)
            .map(Sighting::label)
            .collect();
        if !enforcing.is_empty() {
            return meta.warn(
                format!("{} runs on node {node} next to the agent", enforcing.join(", ")),
                "Runtime security agents on this node may kill file-based script execution; ask the security team for an exclusion covering the agent pod.",
            );
        }
        if !self.on_node.is_empty() {
            let names: Vec<String> = self.on_node.iter().map(Sighting::label).collect();
            return meta.info(format!(
                "detection-only {} runs on node {node}",
                names.join(", ")
            ));
        }
        if self.elsewhere.is_empty() {
            meta.pass(format!("no runtime security daemon on node {node}"))
        } else {
            meta.pass(format!(
                "security daemons exist in the cluster but none is scheduled on node {node}"
            ))
        }
    }
}

pub struct SecurityDaemonOnNode;

impl<'a> Probe<ClusterContext<'a>> for SecurityDaemonOnNode {
    fn meta(&self) -> ProbeMeta {
        SECURITY_DAEMON_ON_NODE
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        let Some(node) = ctx.pod.node_name() else {
            return Gathered::<CoScheduling>::Unobserved("target pod is not scheduled".to_string())
                .classify(&SECURITY_DAEMON_ON_NODE);
        };
        let found = match ctx.daemonsets() {
            Ok(list) => sightings(list),
            Err(err) => return query_failed(&SECURITY_DAEMON_ON_NODE, "daemonsets", err),
        };
        let mut outcome = CoScheduling {
            node: node.to_string(),
            on_node: Vec::new(),
            elsewhere: Vec::new(),
        };
        if found.is_empty() {
            return outcome.classify(&SECURITY_DAEMON_ON_NODE);
        }

        let pods = match ctx.pods_on_target_node() {
            Ok(pods) => pods,
            Err(err) => return query_failed(&SECURITY_DAEMON_ON_NODE, "pods", err),
        };
        for sighting in found {
            let scheduled = pods.iter().any(|p| {
                p.metadata.namespace.as_deref() == Some(sighting.namespace.as_str())
                    && p.is_owned_by("DaemonSet", &sighting.name)
            });
            tracing::debug!(daemonset = %sighting.name, node, scheduled, "co-scheduling");
            if scheduled {
                outcome.on_node.push(sighting);
            } else {
                outcome.elsewhere.push(sighting);
            }
        }
        outcome.classify(&SECURITY_DAEMON_ON_NODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::probes::cluster::testing::{
        FakeCluster, agent_pod, context, daemon_pod, daemonset,
    };

    #[test]
    fn specific_patterns_precede_the_generic_ones_they_contain() {
        for (i, specific) in SECURITY_DAEMON_PATTERNS.iter().enumerate() {
            for (j, generic) in SECURITY_DAEMON_PATTERNS.iter().enumerate() {
                if i != j && specific.needle.contains(generic.needle) {
                    assert!(
                        i < j,
                        "{} must precede {}",
                        specific.needle,
                        generic.needle
                    );
                }
            }
        }
    }

    #[test]
    fn falcon_is_not_mistaken_for_falco() {
        assert_eq!(
            match_daemon("falcon-sensor").map(|p| p.product),
            Some("CrowdStrike Falcon sensor")
        );
        assert_eq!(match_daemon("Falco").map(|p| p.product), Some("Falco"));
        assert!(match_daemon("kube-proxy").is_none());
    }

    #[test]
    fn enforcing_daemon_on_target_node_warns() {
        let mut cp = FakeCluster::default();
        cp.daemonsets = vec![
            daemonset("falcon-system", "falcon-sensor"),
            daemonset("kube-system", "kube-proxy"),
        ];
        cp.pods = vec![agent_pod(), daemon_pod("falcon-system", "falcon-sensor", "node-a")];
        let ctx = context(&cp, agent_pod());

        let inventory = SecurityDaemons.run(&ctx);
        assert_eq!(inventory.status, Status::Info);
        let on_node = SecurityDaemonOnNode.run(&ctx);
        assert_eq!(on_node.status, Status::Warn);
        assert!(on_node.message.contains("node-a"));
        assert_eq!(cp.daemonset_calls.get(), 1, "listing is shared");
    }

    #[test]
    fn daemon_on_other_node_passes() {
        let mut cp = FakeCluster::default();
        cp.daemonsets = vec![daemonset("falcon-system", "falcon-sensor")];
        cp.pods = vec![daemon_pod("falcon-system", "falcon-sensor", "node-b")];
        let ctx = context(&cp, agent_pod());
        assert_eq!(SecurityDaemonOnNode.run(&ctx).status, Status::Pass);
    }

    #[test]
    fn detection_only_daemon_is_info() {
        let mut cp = FakeCluster::default();
        cp.daemonsets = vec![daemonset("falco", "falco")];
        cp.pods = vec![daemon_pod("falco", "falco", "node-a")];
        let ctx = context(&cp, agent_pod());
        assert_eq!(SecurityDaemonOnNode.run(&ctx).status, Status::Info);
    }

    #[test]
    fn forbidden_listing_is_a_warning_not_a_pass() {
        let mut cp = FakeCluster::default();
        cp.denied.insert("daemonsets");
        let ctx = context(&cp, agent_pod());
        let r = SecurityDaemons.run(&ctx);
        assert_eq!(r.status, Status::Warn);
        assert!(r.message.contains("could not determine"));
    }
}
