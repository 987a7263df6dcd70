use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::probes::federation::Provider;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub target: TargetConfig,
    pub kube: KubeConfig,
    pub probes: ProbesConfig,
    pub network: NetworkConfig,
    pub cloud: CloudConfig,
    pub cluster: ClusterConfig,
    pub handoff: HandoffConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetConfig {
    pub namespace: String,
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KubeConfig {
    pub kubectl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbesConfig {
    pub headroom_warn_percent: u8,
    pub interpreter: String,
    pub scratch_dir: String,
    pub required_env: Vec<String>,
    pub actuator_url: String,
}

/// Empty lists mean "use the provider's federation endpoints".
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkConfig {
    pub dns_hosts: Vec<String>,
    pub https_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CloudConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterConfig {
    pub min_supported_minor: u32,
    pub max_validated_minor: u32,
    pub image_tracks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandoffConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    pub remote_dir: String,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig { color: true },
            target: TargetConfig {
                namespace: "default".to_string(),
                selector: "app.kubernetes.io/name=agent".to_string(),
                container: None,
            },
            kube: KubeConfig {
                kubectl: "kubectl".to_string(),
                kubeconfig: None,
                context: None,
                request_timeout_secs: 10,
            },
            probes: ProbesConfig {
                headroom_warn_percent: 80,
                interpreter: "python3".to_string(),
                scratch_dir: default_scratch_dir(),
                required_env: vec![
                    "ACCOUNT_ID".to_string(),
                    "AGENT_ID".to_string(),
                    "MATILLION_REGION".to_string(),
                ],
                actuator_url: "http://localhost:8080/actuator/info".to_string(),
            },
            network: NetworkConfig::default(),
            cloud: CloudConfig::default(),
            cluster: ClusterConfig {
                min_supported_minor: 29,
                max_validated_minor: 32,
                image_tracks: vec!["stable".to_string(), "current".to_string()],
            },
            handoff: HandoffConfig {
                bundle: None,
                remote_dir: "/tmp".to_string(),
            },
            config_path: None,
        }
    }
}

fn default_scratch_dir() -> String {
    std::env::var("TMPDIR")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "/tmp".to_string())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    target: Option<RawTargetConfig>,
    kube: Option<RawKubeConfig>,
    probes: Option<RawProbesConfig>,
    network: Option<RawNetworkConfig>,
    cloud: Option<RawCloudConfig>,
    cluster: Option<RawClusterConfig>,
    handoff: Option<RawHandoffConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTargetConfig {
    namespace: Option<String>,
    selector: Option<String>,
    container: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawKubeConfig {
    kubectl: Option<String>,
    kubeconfig: Option<String>,
    context: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawProbesConfig {
    headroom_warn_percent: Option<u8>,
    interpreter: Option<String>,
    scratch_dir: Option<String>,
    required_env: Option<Vec<String>>,
    actuator_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNetworkConfig {
    dns_hosts: Option<Vec<String>>,
    https_endpoints: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawCloudConfig {
    provider: Option<Provider>,
}

#[derive(Debug, Deserialize)]
struct RawClusterConfig {
    min_supported_minor: Option<u32>,
    max_validated_minor: Option<u32>,
    image_tracks: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawHandoffConfig {
    bundle: Option<String>,
    remote_dir: Option<String>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/agent-doctor/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: Option<&Path>) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .or_else(|| home_dir.map(default_config_path));

    if let Some(path) = path.filter(|p| p.exists()) {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("failed to parse config file (TOML): {}", path.display()))?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
    }

    if let Some(target) = raw.target {
        if let Some(namespace) = target.namespace {
            cfg.target.namespace = namespace;
        }
        if let Some(selector) = target.selector {
            cfg.target.selector = selector;
        }
        if target.container.is_some() {
            cfg.target.container = target.container;
        }
    }

    if let Some(kube) = raw.kube {
        if let Some(kubectl) = kube.kubectl {
            cfg.kube.kubectl = kubectl;
        }
        if kube.kubeconfig.is_some() {
            cfg.kube.kubeconfig = kube.kubeconfig;
        }
        if kube.context.is_some() {
            cfg.kube.context = kube.context;
        }
        if let Some(secs) = kube.request_timeout_secs {
            cfg.kube.request_timeout_secs = secs;
        }
    }

    if let Some(probes) = raw.probes {
        if let Some(pct) = probes.headroom_warn_percent {
            cfg.probes.headroom_warn_percent = pct;
        }
        if let Some(interpreter) = probes.interpreter {
            cfg.probes.interpreter = interpreter;
        }
        if let Some(scratch_dir) = probes.scratch_dir {
            cfg.probes.scratch_dir = scratch_dir;
        }
        if let Some(required_env) = probes.required_env {
            cfg.probes.required_env = required_env;
        }
        if let Some(actuator_url) = probes.actuator_url {
            cfg.probes.actuator_url = actuator_url;
        }
    }

    if let Some(network) = raw.network {
        if let Some(dns_hosts) = network.dns_hosts {
            cfg.network.dns_hosts = dns_hosts;
        }
        if let Some(https_endpoints) = network.https_endpoints {
            cfg.network.https_endpoints = https_endpoints;
        }
    }

    if let Some(cloud) = raw.cloud {
        if cloud.provider.is_some() {
            cfg.cloud.provider = cloud.provider;
        }
    }

    if let Some(cluster) = raw.cluster {
        if let Some(min) = cluster.min_supported_minor {
            cfg.cluster.min_supported_minor = min;
        }
        if let Some(max) = cluster.max_validated_minor {
            cfg.cluster.max_validated_minor = max;
        }
        if let Some(tracks) = cluster.image_tracks {
            cfg.cluster.image_tracks = tracks;
        }
    }

    if let Some(handoff) = raw.handoff {
        if handoff.bundle.is_some() {
            cfg.handoff.bundle = handoff.bundle;
        }
        if let Some(remote_dir) = handoff.remote_dir {
            cfg.handoff.remote_dir = remote_dir;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("AGENT_DOCTOR_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "AGENT_DOCTOR_UI_COLOR")?;
    }
    if let Some(v) = non_empty_env("AGENT_DOCTOR_TARGET_NAMESPACE") {
        cfg.target.namespace = v;
    }
    if let Some(v) = non_empty_env("AGENT_DOCTOR_TARGET_SELECTOR") {
        cfg.target.selector = v;
    }
    if let Some(v) = non_empty_env("AGENT_DOCTOR_KUBE_KUBECTL") {
        cfg.kube.kubectl = v;
    }
    if let Some(v) = non_empty_env("AGENT_DOCTOR_PROBES_INTERPRETER") {
        cfg.probes.interpreter = v;
    }
    if let Some(v) = non_empty_env("AGENT_DOCTOR_PROBES_SCRATCH_DIR") {
        cfg.probes.scratch_dir = v;
    }
    if let Ok(v) = std::env::var("AGENT_DOCTOR_PROBES_HEADROOM_WARN_PERCENT") {
        cfg.probes.headroom_warn_percent = v
            .trim()
            .parse::<u8>()
            .with_context(|| "AGENT_DOCTOR_PROBES_HEADROOM_WARN_PERCENT")?;
    }
    if let Some(parts) = list_env("AGENT_DOCTOR_PROBES_REQUIRED_ENV") {
        cfg.probes.required_env = parts;
    }
    if let Some(v) = non_empty_env("AGENT_DOCTOR_PROBES_ACTUATOR_URL") {
        cfg.probes.actuator_url = v;
    }
    if let Some(parts) = list_env("AGENT_DOCTOR_NETWORK_DNS_HOSTS") {
        cfg.network.dns_hosts = parts;
    }
    if let Some(parts) = list_env("AGENT_DOCTOR_NETWORK_HTTPS_ENDPOINTS") {
        cfg.network.https_endpoints = parts;
    }
    if let Some(v) = non_empty_env("AGENT_DOCTOR_CLOUD_PROVIDER") {
        cfg.cloud.provider = Some(
            v.parse::<Provider>()
                .map_err(anyhow::Error::msg)
                .with_context(|| "AGENT_DOCTOR_CLOUD_PROVIDER")?,
        );
    }
    if let Some(v) = non_empty_env("AGENT_DOCTOR_HANDOFF_BUNDLE") {
        cfg.handoff.bundle = Some(v);
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    let pct = cfg.probes.headroom_warn_percent;
    if pct == 0 || pct > 100 {
        anyhow::bail!("probes.headroom_warn_percent must be within 1..=100 (got {pct})");
    }
    if cfg.cluster.min_supported_minor > cfg.cluster.max_validated_minor {
        anyhow::bail!(
            "cluster.min_supported_minor ({}) is greater than cluster.max_validated_minor ({})",
            cfg.cluster.min_supported_minor,
            cfg.cluster.max_validated_minor
        );
    }
    if cfg.kube.request_timeout_secs == 0 {
        anyhow::bail!("kube.request_timeout_secs must be greater than 0");
    }
    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    let v = std::env::var(key).ok()?;
    let v = v.trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn list_env(key: &str) -> Option<Vec<String>> {
    let v = std::env::var(key).ok()?;
    let parts: Vec<String> = v
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    (!parts.is_empty()).then_some(parts)
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_overrides_only_present_keys() {
        let mut cfg = EffectiveConfig::default();
        let raw: RawConfig = toml::from_str(
            r#"
[target]
namespace = "agents"

[probes]
headroom_warn_percent = 90

[cloud]
provider = "azure"
"#,
        )
        .expect("parse");
        apply_raw_config(&mut cfg, raw);
        assert_eq!(cfg.target.namespace, "agents");
        assert_eq!(cfg.target.selector, "app.kubernetes.io/name=agent");
        assert_eq!(cfg.probes.headroom_warn_percent, 90);
        assert_eq!(cfg.cloud.provider, Some(Provider::Azure));
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(toml::from_str::<RawConfig>("[nope]\nx = 1\n").is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut cfg = EffectiveConfig::default();
        cfg.probes.headroom_warn_percent = 0;
        assert!(validate(&cfg).is_err());
        cfg.probes.headroom_warn_percent = 80;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("Yes").expect("bool"));
        assert!(!parse_bool("off").expect("bool"));
        assert!(parse_bool("maybe").is_err());
    }
}
