use std::collections::BTreeSet;

use crate::classify::{Classify, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::kube::{Container, KubeError, KubeErrorKind};
use crate::probes::Probe;
use crate::probes::cluster::{ClusterContext, query_failed};

const CONFIG_SECRET: ProbeMeta = ProbeMeta::new("config-secret", Scope::Cluster, "config secret");

/// Secrets the container cannot start without: non-optional `envFrom`
/// references and `secretKeyRef` sources.
pub fn required_secrets(container: &Container) -> BTreeSet<String> {
    let from_env_from = container
        .env_from
        .iter()
        .filter_map(|src| src.secret_ref.as_ref())
        .filter(|r| r.optional != Some(true))
        .map(|r| r.name.clone());
    let from_env = container
        .env
        .iter()
        .filter_map(|e| e.value_from.as_ref()?.secret_key_ref.as_ref())
        .filter(|r| r.optional != Some(true))
        .map(|r| r.name.clone());
    from_env_from
        .chain(from_env)
        .filter(|n| !n.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretCheck {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

impl Classify for SecretCheck {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        if !self.missing.is_empty() {
            return meta.fail(
                format!("referenced secret(s) missing: {}", self.missing.join(", ")),
                "Create the agent config secret (it carries ACCOUNT_ID, AGENT_ID and the OAuth client) in the target namespace, then restart the pod.",
            );
        }
        if self.present.is_empty() {
            return meta.info("the agent container references no secrets");
        }
        meta.pass(format!("referenced secret(s) exist: {}", self.present.join(", ")))
    }
}

pub struct ConfigSecret;

impl<'a> Probe<ClusterContext<'a>> for ConfigSecret {
    fn meta(&self) -> ProbeMeta {
        CONFIG_SECRET
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        let Some(container) = ctx.target_container() else {
            return CONFIG_SECRET.unobserved(format!("container {} not in pod spec", ctx.container));
        };
        let mut check = SecretCheck {
            present: Vec::new(),
            missing: Vec::new(),
        };
        for name in required_secrets(container) {
            match ctx.secret_exists(&name) {
                Ok(()) => check.present.push(name),
                Err(KubeError {
                    kind: KubeErrorKind::NotFound,
                    ..
                }) => check.missing.push(name),
                Err(err) => return query_failed(&CONFIG_SECRET, "secrets", &err),
            }
        }
        check.classify(&CONFIG_SECRET)
    }
}
