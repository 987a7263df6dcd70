//! HANDOFF: ship the workload probe bundle into the target, run it, and
//! bring its report back. Every failure here ends the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::{FatalFailure, FatalPhase};
use crate::kube::{ControlPlane, KubeError, PodRef};
use crate::local::{LocalReport, parse_local_report};
use crate::platform;

pub const BUNDLE_NAME: &str = "agent-probe";

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("workload probe bundle not found: {path}")]
    BundleMissing { path: String },

    #[error("could not copy the probe bundle into the target")]
    Copy(#[source] KubeError),

    #[error("could not make the probe bundle executable in the target")]
    Prepare(#[source] KubeError),

    #[error("could not run the probe bundle in the target")]
    Invoke(#[source] KubeError),

    #[error("probe bundle exited {exit_code} without a report")]
    NoReport { exit_code: i32, stderr: String },

    #[error("probe bundle report is unusable: {0}")]
    Malformed(String),
}

impl HandoffError {
    fn hint(&self) -> String {
        match self {
            HandoffError::BundleMissing { .. } => format!(
                "Install {BUNDLE_NAME} next to agent-doctor or pass --bundle <path>."
            ),
            HandoffError::Copy(_) => "kubectl cp needs `tar` inside the target container and pods/exec permission; use --cluster-only if neither is available.".to_string(),
            HandoffError::Prepare(_) | HandoffError::Invoke(_) => {
                "Check that your identity may create pods/exec in the target namespace.".to_string()
            }
            HandoffError::NoReport { exit_code: 126 | 127, .. } => {
                "The bundle could not execute in the target: the remote directory may be mounted noexec or the binary built for another architecture. Set [handoff] remote_dir to a writable exec-capable path.".to_string()
            }
            HandoffError::NoReport { exit_code: 137, .. } => {
                "The bundle was SIGKILLed inside the target, which itself points at runtime drift detection or memory pressure.".to_string()
            }
            HandoffError::NoReport { .. } | HandoffError::Malformed(_) => {
                "Re-run with --verbose to see the bundle's stderr; the bundle and agent-doctor versions may differ.".to_string()
            }
        }
    }

    pub fn into_fatal(self) -> FatalFailure {
        let hint = self.hint();
        let mut reason = self.to_string();
        let mut source = std::error::Error::source(&self);
        while let Some(cause) = source {
            reason.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        if let HandoffError::NoReport { stderr, .. } = &self {
            if let Some(line) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                reason.push_str(&format!(" ({})", line.trim()));
            }
        }
        FatalFailure {
            phase: FatalPhase::Handoff,
            reason,
            hint,
        }
    }
}

/// `--bundle` or config first, else the sibling of the running executable.
pub fn locate_bundle(explicit: Option<&str>) -> Result<PathBuf, HandoffError> {
    match explicit {
        Some(path) => {
            let p = PathBuf::from(path);
            if std::fs::metadata(&p).is_ok_and(|m| m.is_file()) {
                Ok(p)
            } else {
                Err(HandoffError::BundleMissing {
                    path: path.to_string(),
                })
            }
        }
        None => platform::sibling_executable(BUNDLE_NAME).ok_or_else(|| HandoffError::BundleMissing {
            path: format!("<dir of agent-doctor>/{BUNDLE_NAME}"),
        }),
    }
}

/// The bundle staged inside the target; removed from the target on drop.
pub struct RemoteBundle<'a> {
    cp: &'a dyn ControlPlane,
    pod: PodRef,
    path: String,
    cleanup_timeout: Duration,
}

impl<'a> RemoteBundle<'a> {
    pub fn stage(
        cp: &'a dyn ControlPlane,
        pod: &PodRef,
        local: &Path,
        remote_dir: &str,
        timeout: Duration,
    ) -> Result<Self, HandoffError> {
        let path = format!(
            "{}/{BUNDLE_NAME}-{}",
            remote_dir.trim_end_matches('/'),
            std::process::id()
        );
        tracing::info!(pod = %pod.name, remote = %path, "copying probe bundle");
        cp.copy_to_pod(pod, local, &path).map_err(HandoffError::Copy)?;

        // From here on the guard owns the remote file.
        let staged = Self {
            cp,
            pod: pod.clone(),
            path,
            cleanup_timeout: timeout,
        };
        let out = cp
            .exec(pod, &["chmod", "0755", &staged.path], timeout)
            .map_err(HandoffError::Prepare)?;
        if !out.success() {
            return Err(HandoffError::Prepare(KubeError::new(
                crate::kube::KubeErrorKind::Other,
                format!("chmod exited {}: {}", out.exit_code, out.stderr.trim()),
            )));
        }
        Ok(staged)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn run(&self, args: &[String], timeout: Duration) -> Result<LocalReport, HandoffError> {
        let mut argv: Vec<&str> = vec![self.path.as_str(), "--json"];
        argv.extend(args.iter().map(String::as_str));
        tracing::info!(pod = %self.pod.name, "running workload battery in target");
        let out = self
            .cp
            .exec(&self.pod, &argv, timeout)
            .map_err(HandoffError::Invoke)?;
        tracing::debug!(exit_code = out.exit_code, stderr = %out.stderr.trim(), "bundle finished");

        if out.stdout.trim().is_empty() {
            return Err(HandoffError::NoReport {
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }
        parse_local_report(&out.stdout).map_err(|err| {
            if out.exit_code == 0 || out.exit_code == 1 {
                HandoffError::Malformed(format!("{err:#}"))
            } else {
                HandoffError::NoReport {
                    exit_code: out.exit_code,
                    stderr: out.stderr.clone(),
                }
            }
        })
    }
}

impl Drop for RemoteBundle<'_> {
    fn drop(&mut self) {
        match self
            .cp
            .exec(&self.pod, &["rm", "-f", &self.path], self.cleanup_timeout)
        {
            Ok(out) if out.success() => {
                tracing::debug!(remote = %self.path, "removed probe bundle");
            }
            Ok(out) => {
                tracing::warn!(remote = %self.path, exit_code = out.exit_code, "failed to remove probe bundle");
            }
            Err(err) => {
                tracing::warn!(remote = %self.path, %err, "failed to remove probe bundle");
            }
        }
    }
}

/// Flags that make the remote battery use this side's probe settings.
pub fn bundle_args(cfg: &crate::config::EffectiveConfig, probe_timeout: Duration) -> Vec<String> {
    let mut args = vec![
        "--interpreter".to_string(),
        cfg.probes.interpreter.clone(),
        "--headroom-warn-percent".to_string(),
        cfg.probes.headroom_warn_percent.to_string(),
        "--actuator-url".to_string(),
        cfg.probes.actuator_url.clone(),
        "--required-env".to_string(),
        cfg.probes.required_env.join(","),
        "--timeout".to_string(),
        probe_timeout.as_secs().max(1).to_string(),
    ];
    if let Some(provider) = cfg.cloud.provider {
        args.push("--provider".to_string());
        args.push(provider.to_string());
    }
    for host in &cfg.network.dns_hosts {
        args.push("--dns-host".to_string());
        args.push(host.clone());
    }
    for url in &cfg.network.https_endpoints {
        args.push("--https-endpoint".to_string());
        args.push(url.clone());
    }
    args
}

/// Stage, run, and clean up in one step.
pub fn run_remote(
    cp: &dyn ControlPlane,
    pod: &PodRef,
    bundle: &Path,
    remote_dir: &str,
    args: &[String],
    call_timeout: Duration,
    run_timeout: Duration,
) -> Result<LocalReport, HandoffError> {
    let staged = RemoteBundle::stage(cp, pod, bundle, remote_dir, call_timeout)?;
    staged.run(args, run_timeout)
}
