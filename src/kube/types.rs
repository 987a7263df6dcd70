//! The slice of the Kubernetes object model the probes read. Unknown fields
//! are ignored; absent ones default.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    pub status: PodStatus,
}

impl Pod {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn node_name(&self) -> Option<&str> {
        self.spec.node_name.as_deref().filter(|n| !n.is_empty())
    }

    pub fn is_running(&self) -> bool {
        self.status.phase.as_deref() == Some("Running")
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True")
    }

    /// The named container, or the first one when no name is given.
    pub fn container(&self, name: Option<&str>) -> Option<&Container> {
        match name {
            Some(name) => self.spec.containers.iter().find(|c| c.name == name),
            None => self.spec.containers.first(),
        }
    }

    pub fn container_status(&self, name: &str) -> Option<&ContainerStatus> {
        self.status
            .container_statuses
            .iter()
            .find(|s| s.name == name)
    }

    pub fn is_owned_by(&self, kind: &str, name: &str) -> bool {
        self.metadata
            .owner_references
            .iter()
            .any(|o| o.kind == kind && o.name == name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodSpec {
    pub node_name: Option<String>,
    pub service_account_name: Option<String>,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    pub name: String,
    pub image: Option<String>,
    pub env: Vec<EnvVar>,
    pub env_from: Vec<EnvFromSource>,
}

impl Container {
    /// Literal `value` of an env var; `valueFrom` entries yield `None`.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    pub fn declares_env(&self, name: &str) -> bool {
        self.env.iter().any(|e| e.name == name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvVar {
    pub name: String,
    pub value: Option<String>,
    pub value_from: Option<EnvVarSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvVarSource {
    pub secret_key_ref: Option<SecretKeySelector>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
    pub optional: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvFromSource {
    pub secret_ref: Option<NamedRef>,
    pub config_map_ref: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NamedRef {
    pub name: String,
    pub optional: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodStatus {
    pub phase: Option<String>,
    pub conditions: Vec<PodCondition>,
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
    pub restart_count: u32,
    pub last_state: ContainerState,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerState {
    pub terminated: Option<TerminatedState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminatedState {
    pub exit_code: i32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonSet {
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceAccount {
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicy {
    pub metadata: ObjectMeta,
    pub spec: NetworkPolicySpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicySpec {
    pub pod_selector: LabelSelector,
    pub policy_types: Vec<String>,
    /// `None` and `Some(vec![])` differ: only the latter denies all egress.
    pub egress: Option<Vec<EgressRule>>,
}

impl NetworkPolicy {
    pub fn restricts_egress(&self) -> bool {
        if self.spec.policy_types.is_empty() {
            self.spec.egress.is_some()
        } else {
            self.spec.policy_types.iter().any(|t| t == "Egress")
        }
    }

    pub fn egress_rules(&self) -> &[EgressRule] {
        self.spec.egress.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EgressRule {
    /// Absent or empty means every port.
    pub ports: Option<Vec<NetworkPolicyPort>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicyPort {
    pub protocol: Option<String>,
    pub port: Option<IntOrString>,
    pub end_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(u16),
    Str(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

impl LabelSelector {
    /// Empty selector selects everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_ok = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));
        let exprs_ok = self.match_expressions.iter().all(|req| {
            let value = labels.get(&req.key);
            match req.operator.as_str() {
                "In" => value.is_some_and(|v| req.values.contains(v)),
                "NotIn" => value.is_none_or(|v| !req.values.contains(v)),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            }
        });
        labels_ok && exprs_ok
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionInfo {
    pub major: String,
    pub minor: String,
    pub git_version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionOutput {
    pub server_version: Option<VersionInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn pod_parses_from_kubectl_json() {
        let pod: Pod = serde_json::from_str(
            r#"{
              "metadata": {"name": "agent-0", "namespace": "agents", "labels": {"app": "agent"}},
              "spec": {"nodeName": "node-a", "serviceAccountName": "agent",
                       "containers": [{"name": "agent", "image": "repo/agent:1.2.3",
                                       "env": [{"name": "CLOUD_PROVIDER", "value": "aws"}]}]},
              "status": {"phase": "Running",
                         "conditions": [{"type": "Ready", "status": "True"}],
                         "containerStatuses": [{"name": "agent", "ready": true, "restartCount": 2,
                           "lastState": {"terminated": {"exitCode": 137, "reason": "OOMKilled"}}}]}
            }"#,
        )
        .expect("parse pod");
        assert!(pod.is_running());
        assert!(pod.is_ready());
        assert_eq!(pod.node_name(), Some("node-a"));
        let c = pod.container(None).expect("container");
        assert_eq!(c.env_value("CLOUD_PROVIDER"), Some("aws"));
        let status = pod.container_status("agent").expect("status");
        assert_eq!(status.restart_count, 2);
        assert_eq!(
            status.last_state.terminated.as_ref().map(|t| t.exit_code),
            Some(137)
        );
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = LabelSelector::default();
        assert!(sel.matches(&labels(&[("app", "x")])));
        assert!(sel.matches(&BTreeMap::new()));
    }

    #[test]
    fn selector_expressions_are_evaluated() {
        let sel: LabelSelector = serde_json::from_str(
            r#"{"matchLabels": {"app": "agent"},
                "matchExpressions": [{"key": "tier", "operator": "In", "values": ["a", "b"]}]}"#,
        )
        .expect("parse");
        assert!(sel.matches(&labels(&[("app", "agent"), ("tier", "a")])));
        assert!(!sel.matches(&labels(&[("app", "agent"), ("tier", "c")])));
        assert!(!sel.matches(&labels(&[("app", "other"), ("tier", "a")])));
    }

    #[test]
    fn egress_restriction_follows_policy_types() {
        let ingress_only: NetworkPolicy = serde_json::from_str(
            r#"{"metadata": {"name": "p"}, "spec": {"policyTypes": ["Ingress"]}}"#,
        )
        .expect("parse");
        assert!(!ingress_only.restricts_egress());

        let implicit: NetworkPolicy =
            serde_json::from_str(r#"{"metadata": {"name": "p"}, "spec": {"egress": []}}"#)
                .expect("parse");
        assert!(implicit.restricts_egress());
        assert!(implicit.egress_rules().is_empty());
    }
}
