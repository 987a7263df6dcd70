//! WORKLOAD-scope probes: run inside the target with only local filesystem,
//! process, and environment visibility.

pub mod agent;
pub mod credentials;
pub mod exec;
pub mod network;
pub mod paths;
pub mod resources;
pub mod scratch;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::platform::CommandRunner;
use crate::probes::Probe;
use crate::probes::federation::{PROVIDER_ENV, Provider};

#[derive(Debug, Clone)]
pub struct WorkloadSettings {
    pub headroom_warn_percent: u8,
    pub interpreter: String,
    pub required_env: Vec<String>,
    pub actuator_url: String,
    /// Overrides the provider declared in the environment.
    pub provider: Option<Provider>,
    pub dns_hosts: Vec<String>,
    pub https_endpoints: Vec<String>,
}

impl WorkloadSettings {
    pub fn from_config(cfg: &crate::config::EffectiveConfig) -> Self {
        Self {
            headroom_warn_percent: cfg.probes.headroom_warn_percent,
            interpreter: cfg.probes.interpreter.clone(),
            required_env: cfg.probes.required_env.clone(),
            actuator_url: cfg.probes.actuator_url.clone(),
            provider: cfg.cloud.provider,
            dns_hosts: cfg.network.dns_hosts.clone(),
            https_endpoints: cfg.network.https_endpoints.clone(),
        }
    }
}

pub struct WorkloadContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub env: BTreeMap<String, String>,
    /// Root under which `/proc` and `/sys/fs/cgroup` are read.
    pub sys_root: PathBuf,
    pub scratch_dir: PathBuf,
    pub work_dir: PathBuf,
    pub uid: Option<u32>,
    /// Per-probe budget for any spawned process.
    pub timeout: Duration,
    pub settings: WorkloadSettings,
}

impl WorkloadContext<'_> {
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn provider(&self) -> Provider {
        self.settings
            .provider
            .unwrap_or_else(|| Provider::detect(self.env_var(PROVIDER_ENV)))
    }

    pub fn region(&self) -> Option<&str> {
        self.env_var("AWS_REGION")
            .or_else(|| self.env_var("AWS_DEFAULT_REGION"))
    }

    pub fn cgroup_root(&self) -> PathBuf {
        self.sys_root.join("sys/fs/cgroup")
    }

    pub fn dns_hosts(&self) -> Vec<String> {
        if self.settings.dns_hosts.is_empty() {
            self.provider().default_dns_hosts(self.region())
        } else {
            self.settings.dns_hosts.clone()
        }
    }

    pub fn https_endpoints(&self) -> Vec<String> {
        if self.settings.https_endpoints.is_empty() {
            self.provider().default_https_endpoints(self.region())
        } else {
            self.settings.https_endpoints.clone()
        }
    }
}

/// The local runtime battery, in execution order.
pub fn battery<'a>() -> Vec<Box<dyn Probe<WorkloadContext<'a>>>> {
    vec![
        Box::new(agent::RuntimeUser),
        Box::new(agent::AgentEnv),
        Box::new(paths::WritableTmp),
        Box::new(paths::WritableWorkdir),
        Box::new(exec::ExecInline),
        Box::new(exec::ExecFile),
        Box::new(exec::ExecParity),
        Box::new(resources::MemoryHeadroom),
        Box::new(resources::PidsHeadroom),
        Box::new(resources::EphemeralStorageHeadroom),
        Box::new(credentials::CloudCredentials),
        Box::new(network::DnsResolution),
        Box::new(network::HttpsEgress),
        Box::new(agent::AgentActuator),
    ]
}
