//! Control-plane access. The orchestrator and cluster probes only see the
//! [`ControlPlane`] trait; [`Kubectl`] is the production adapter.

mod kubectl;
mod types;

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::platform::CommandOutput;

pub use kubectl::{Kubectl, KubectlOptions, classify_stderr};
pub use types::{
    Container, ContainerState, ContainerStatus, DaemonSet, EgressRule, EnvFromSource, EnvVar,
    EnvVarSource, IntOrString, LabelSelector, LabelSelectorRequirement, List, NamedRef,
    NetworkPolicy, NetworkPolicyPort, NetworkPolicySpec, ObjectMeta, OwnerReference, Pod,
    PodCondition, PodSpec, PodStatus, SecretKeySelector, ServiceAccount, TerminatedState,
    VersionInfo, VersionOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeErrorKind {
    /// Credentials missing, expired, or rejected.
    Auth,
    NotFound,
    /// Control plane unreachable or the call timed out.
    Transport,
    /// The client binary itself is missing.
    Unavailable,
    /// The call succeeded but its output could not be parsed.
    Malformed,
    Other,
}

impl KubeErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            KubeErrorKind::Auth => "auth",
            KubeErrorKind::NotFound => "not found",
            KubeErrorKind::Transport => "transport",
            KubeErrorKind::Unavailable => "unavailable",
            KubeErrorKind::Malformed => "malformed response",
            KubeErrorKind::Other => "error",
        }
    }
}

impl fmt::Display for KubeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct KubeError {
    pub kind: KubeErrorKind,
    pub message: String,
}

impl KubeError {
    pub fn new(kind: KubeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    pub container: Option<String>,
}

pub trait ControlPlane {
    fn server_version(&self) -> Result<VersionInfo, KubeError>;
    fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, KubeError>;
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, KubeError>;
    /// Pods in every namespace scheduled on `node`.
    fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, KubeError>;
    /// DaemonSets in every namespace.
    fn list_daemonsets(&self) -> Result<Vec<DaemonSet>, KubeError>;
    fn list_network_policies(&self, namespace: &str) -> Result<Vec<NetworkPolicy>, KubeError>;
    fn get_service_account(&self, namespace: &str, name: &str)
    -> Result<ServiceAccount, KubeError>;
    /// Existence check only; secret data is never read.
    fn secret_exists(&self, namespace: &str, name: &str) -> Result<(), KubeError>;
    fn copy_to_pod(&self, pod: &PodRef, local: &Path, remote: &str) -> Result<(), KubeError>;
    /// Runs `argv` inside the pod. A non-zero exit of the remote command is
    /// `Ok`; only failures to reach or enter the pod are errors.
    fn exec(
        &self,
        pod: &PodRef,
        argv: &[&str],
        timeout: std::time::Duration,
    ) -> Result<CommandOutput, KubeError>;
}
