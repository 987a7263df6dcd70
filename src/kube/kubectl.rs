use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::kube::{
    ControlPlane, DaemonSet, KubeError, KubeErrorKind, List, NetworkPolicy, Pod, PodRef,
    ServiceAccount, VersionInfo, VersionOutput,
};
use crate::platform::{CommandError, CommandOutput, CommandRunner, SystemRunner};

/// Marker kubectl prints when the remote command (not kubectl) failed.
const REMOTE_EXIT_MARKER: &str = "command terminated with exit code";

#[derive(Debug, Clone)]
pub struct KubectlOptions {
    pub program: String,
    pub kubeconfig: Option<String>,
    pub context: Option<String>,
    pub request_timeout: Duration,
}

pub struct Kubectl {
    opts: KubectlOptions,
    runner: Box<dyn CommandRunner>,
}

impl Kubectl {
    pub fn new(opts: KubectlOptions) -> Self {
        Self::with_runner(opts, Box::new(SystemRunner))
    }

    pub fn with_runner(opts: KubectlOptions, runner: Box<dyn CommandRunner>) -> Self {
        Self { opts, runner }
    }

    fn global_args(&self, with_request_timeout: bool) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.opts.kubeconfig {
            args.push(format!("--kubeconfig={kubeconfig}"));
        }
        if let Some(context) = &self.opts.context {
            args.push(format!("--context={context}"));
        }
        if with_request_timeout {
            args.push(format!(
                "--request-timeout={}s",
                self.opts.request_timeout.as_secs().max(1)
            ));
        }
        args
    }

    /// Wall-clock budget for one call: the server-side timeout plus slack for
    /// client start-up and credential plugins.
    fn call_budget(&self) -> Duration {
        self.opts.request_timeout + Duration::from_secs(5)
    }

    fn invoke(&self, args: &[String], budget: Duration) -> Result<CommandOutput, KubeError> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        tracing::debug!(kubectl = %self.opts.program, args = ?argv, "control-plane call");
        self.runner
            .run(&self.opts.program, &argv, budget)
            .map_err(|err| from_command_error(&self.opts.program, err))
    }

    fn call(&self, args: &[&str]) -> Result<String, KubeError> {
        let mut full = self.global_args(true);
        full.extend(args.iter().map(|s| s.to_string()));
        let out = self.invoke(&full, self.call_budget())?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(failure(&out))
        }
    }

    fn get_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, KubeError> {
        let stdout = self.call(args)?;
        serde_json::from_str(&stdout).map_err(|err| {
            KubeError::new(
                KubeErrorKind::Malformed,
                format!("could not parse `kubectl {}` output: {err}", args.join(" ")),
            )
        })
    }

    fn list<T: DeserializeOwned>(&self, args: &[&str]) -> Result<Vec<T>, KubeError> {
        Ok(self.get_json::<List<T>>(args)?.items)
    }
}

impl ControlPlane for Kubectl {
    fn server_version(&self) -> Result<VersionInfo, KubeError> {
        let out: VersionOutput = self.get_json(&["version", "-o", "json"])?;
        out.server_version.ok_or_else(|| {
            KubeError::new(
                KubeErrorKind::Transport,
                "kubectl reported no server version (control plane not reached)",
            )
        })
    }

    fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, KubeError> {
        self.list(&["get", "pods", "-n", namespace, "-l", selector, "-o", "json"])
    }

    fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, KubeError> {
        self.get_json(&["get", "pod", name, "-n", namespace, "-o", "json"])
    }

    fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, KubeError> {
        let field = format!("spec.nodeName={node}");
        self.list(&[
            "get",
            "pods",
            "--all-namespaces",
            "--field-selector",
            &field,
            "-o",
            "json",
        ])
    }

    fn list_daemonsets(&self) -> Result<Vec<DaemonSet>, KubeError> {
        self.list(&["get", "daemonsets", "--all-namespaces", "-o", "json"])
    }

    fn list_network_policies(&self, namespace: &str) -> Result<Vec<NetworkPolicy>, KubeError> {
        self.list(&["get", "networkpolicies", "-n", namespace, "-o", "json"])
    }

    fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, KubeError> {
        self.get_json(&["get", "serviceaccount", name, "-n", namespace, "-o", "json"])
    }

    fn secret_exists(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let resource = format!("secret/{name}");
        self.call(&["get", &resource, "-n", namespace, "-o", "name"])
            .map(|_| ())
    }

    fn copy_to_pod(&self, pod: &PodRef, local: &Path, remote: &str) -> Result<(), KubeError> {
        let mut args = self.global_args(false);
        args.extend([
            "cp".to_string(),
            local.display().to_string(),
            format!("{}/{}:{}", pod.namespace, pod.name, remote),
        ]);
        if let Some(container) = &pod.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        let out = self.invoke(&args, self.call_budget() * 4)?;
        if out.success() {
            Ok(())
        } else {
            Err(failure(&out))
        }
    }

    fn exec(
        &self,
        pod: &PodRef,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, KubeError> {
        let mut args = self.global_args(false);
        args.extend([
            "exec".to_string(),
            "-n".to_string(),
            pod.namespace.clone(),
            pod.name.clone(),
        ]);
        if let Some(container) = &pod.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        args.push("--".to_string());
        args.extend(argv.iter().map(|s| s.to_string()));

        let out = self.invoke(&args, timeout)?;
        if out.success() || out.stderr.contains(REMOTE_EXIT_MARKER) {
            Ok(out)
        } else {
            Err(failure(&out))
        }
    }
}

fn failure(out: &CommandOutput) -> KubeError {
    let stderr = out.stderr.trim();
    let message = if stderr.is_empty() {
        format!("kubectl exited with code {}", out.exit_code)
    } else {
        first_lines(stderr, 3)
    };
    KubeError::new(classify_stderr(stderr), message)
}

fn from_command_error(program: &str, err: CommandError) -> KubeError {
    match err {
        CommandError::NotFound { .. } => KubeError::new(
            KubeErrorKind::Unavailable,
            format!("`{program}` was not found on PATH"),
        ),
        CommandError::Timeout { timeout, .. } => KubeError::new(
            KubeErrorKind::Transport,
            format!("control-plane call timed out after {}s", timeout.as_secs()),
        ),
        other => KubeError::new(KubeErrorKind::Other, other.to_string()),
    }
}

/// Maps kubectl's human-readable error text onto an error kind. Only this
/// adapter pattern-matches error text.
pub fn classify_stderr(stderr: &str) -> KubeErrorKind {
    let s = stderr.to_ascii_lowercase();
    const AUTH: &[&str] = &[
        "unauthorized",
        "forbidden",
        "you must be logged in",
        "provide credentials",
        "token has expired",
        "expired token",
        "invalid bearer token",
        "getting credentials",
        "exec plugin",
    ];
    const NOT_FOUND: &[&str] = &[
        "(notfound)",
        " not found",
        "doesn't have a resource type",
    ];
    const TRANSPORT: &[&str] = &[
        "unable to connect to the server",
        "the connection to the server",
        "connection refused",
        "i/o timeout",
        "no such host",
        "tls handshake timeout",
        "context deadline exceeded",
        "client.timeout exceeded",
        "timeout",
        "network is unreachable",
        "connection reset",
    ];

    if AUTH.iter().any(|p| s.contains(p)) {
        KubeErrorKind::Auth
    } else if NOT_FOUND.iter().any(|p| s.contains(p)) {
        KubeErrorKind::NotFound
    } else if TRANSPORT.iter().any(|p| s.contains(p)) {
        KubeErrorKind::Transport
    } else {
        KubeErrorKind::Other
    }
}

fn first_lines(s: &str, n: usize) -> String {
    s.lines().take(n).collect::<Vec<_>>().join(" | ")
}
