//! CLUSTER-scope probes: read-only queries against the control plane about
//! the discovered target pod and its surroundings.

pub mod identity;
pub mod inventory;
pub mod netpol;
pub mod secrets;
pub mod target;
pub mod version;

use std::cell::{OnceCell, RefCell};

use crate::classify::ProbeMeta;
use crate::core::ProbeResult;
use crate::kube::{
    Container, ControlPlane, DaemonSet, KubeError, KubeErrorKind, NetworkPolicy, Pod,
    ServiceAccount, VersionInfo,
};
use crate::probes::Probe;
use crate::probes::federation::{PROVIDER_ENV, Provider};

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub min_supported_minor: u32,
    pub max_validated_minor: u32,
    pub image_tracks: Vec<String>,
    pub provider: Option<Provider>,
}

impl ClusterSettings {
    pub fn from_config(cfg: &crate::config::EffectiveConfig) -> Self {
        Self {
            min_supported_minor: cfg.cluster.min_supported_minor,
            max_validated_minor: cfg.cluster.max_validated_minor,
            image_tracks: cfg.cluster.image_tracks.clone(),
            provider: cfg.cloud.provider,
        }
    }
}

/// Everything the cluster battery may look at. Cluster-wide listings are
/// fetched lazily, at most once per run, and shared between probes.
/// Probes query the control plane only through the accessors here, so the
/// first auth or transport failure is remembered for the orchestrator.
pub struct ClusterContext<'a> {
    cp: &'a dyn ControlPlane,
    pub namespace: String,
    pub pod: Pod,
    /// Resolved container name inside `pod`.
    pub container: String,
    pub version: VersionInfo,
    pub settings: ClusterSettings,
    daemonsets: OnceCell<Result<Vec<DaemonSet>, KubeError>>,
    node_pods: OnceCell<Result<Vec<Pod>, KubeError>>,
    policies: OnceCell<Result<Vec<NetworkPolicy>, KubeError>>,
    failure: RefCell<Option<KubeError>>,
}

impl<'a> ClusterContext<'a> {
    pub fn new(
        cp: &'a dyn ControlPlane,
        pod: Pod,
        container: String,
        version: VersionInfo,
        settings: ClusterSettings,
    ) -> Self {
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Self {
            cp,
            namespace,
            pod,
            container,
            version,
            settings,
            daemonsets: OnceCell::new(),
            node_pods: OnceCell::new(),
            policies: OnceCell::new(),
            failure: RefCell::new(None),
        }
    }

    fn observe<T>(&self, result: Result<T, KubeError>) -> Result<T, KubeError> {
        if let Err(err) = &result
            && matches!(err.kind, KubeErrorKind::Auth | KubeErrorKind::Transport)
        {
            let mut slot = self.failure.borrow_mut();
            if slot.is_none() {
                *slot = Some(err.clone());
            }
        }
        result
    }

    /// First auth or transport failure seen by any query in this context.
    pub fn control_plane_failure(&self) -> Option<KubeError> {
        self.failure.borrow().clone()
    }

    pub fn target_container(&self) -> Option<&Container> {
        self.pod.container(Some(&self.container))
    }

    pub fn daemonsets(&self) -> Result<&[DaemonSet], &KubeError> {
        self.daemonsets
            .get_or_init(|| self.observe(self.cp.list_daemonsets()))
            .as_deref()
    }

    pub fn pods_on_target_node(&self) -> Result<&[Pod], &KubeError> {
        self.node_pods
            .get_or_init(|| match self.pod.node_name() {
                Some(node) => self.observe(self.cp.list_pods_on_node(node)),
                None => Err(KubeError::new(
                    KubeErrorKind::Other,
                    "target pod is not scheduled on a node",
                )),
            })
            .as_deref()
    }

    pub fn network_policies(&self) -> Result<&[NetworkPolicy], &KubeError> {
        self.policies
            .get_or_init(|| self.observe(self.cp.list_network_policies(&self.namespace)))
            .as_deref()
    }

    pub fn service_account(&self, name: &str) -> Result<ServiceAccount, KubeError> {
        self.observe(self.cp.get_service_account(&self.namespace, name))
    }

    pub fn secret_exists(&self, name: &str) -> Result<(), KubeError> {
        self.observe(self.cp.secret_exists(&self.namespace, name))
    }

    /// Provider from configuration, else the literal `CLOUD_PROVIDER` value
    /// in the target container spec.
    pub fn provider(&self) -> Provider {
        if let Some(p) = self.settings.provider {
            return p;
        }
        Provider::detect(
            self.target_container()
                .and_then(|c| c.env_value(PROVIDER_ENV)),
        )
    }
}

/// A control-plane query inside a probe failed. Denied access is a WARN so
/// missing RBAC is not mistaken for a healthy cluster.
pub fn query_failed(meta: &ProbeMeta, what: &str, err: &KubeError) -> ProbeResult {
    match err.kind {
        KubeErrorKind::Auth => meta
            .warn(
                format!("{}: could not determine (access to {what} denied)", meta.title),
                format!("Grant the diagnosing identity get/list on {what}, or re-run with a kubeconfig that has it."),
            )
            .with_detail(err.message.as_str()),
        _ => meta
            .unobserved(format!("{what}: {}", err.kind))
            .with_detail(err.message.as_str()),
    }
}

/// The post-discovery cluster battery, in execution order.
pub fn battery<'a>() -> Vec<Box<dyn Probe<ClusterContext<'a>>>> {
    vec![
        Box::new(version::ControlPlaneVersion),
        Box::new(target::TargetReady),
        Box::new(target::ContainerRestarts),
        Box::new(version::ImageTrack),
        Box::new(inventory::SecurityDaemons),
        Box::new(inventory::SecurityDaemonOnNode),
        Box::new(identity::ServiceAccountIdentity),
        Box::new(secrets::ConfigSecret),
        Box::new(netpol::EgressDns),
        Box::new(netpol::EgressHttps),
    ]
}
