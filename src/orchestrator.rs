//! Run lifecycle: CLUSTER, then HANDOFF and WORKLOAD, then correlation and
//! the report. Foundational failures end the run early with a
//! [`FatalFailure`] instead of a partial diagnosis.

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::{
    Aggregator, FatalFailure, FatalPhase, ProbeResult, RunReport, Scope, ScopeSnapshot,
    TargetInfo,
};
use crate::correlate::correlate;
use crate::handoff::{self, HandoffError};
use crate::kube::{ControlPlane, KubeError, KubeErrorKind, Pod, PodRef, VersionInfo};
use crate::local::now_rfc3339;
use crate::probes::cluster::{ClusterContext, ClusterSettings};
use crate::probes::run_battery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Cluster,
    Handoff,
    Workload,
    Correlate,
    Report,
    Terminal,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Cluster => "cluster",
            Phase::Handoff => "handoff",
            Phase::Workload => "workload",
            Phase::Correlate => "correlate",
            Phase::Report => "report",
            Phase::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TargetSelector {
    pub namespace: String,
    /// Explicit pod name; overrides `selector`.
    pub pod: Option<String>,
    pub selector: String,
    pub container: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: TargetSelector,
    pub cluster_only: bool,
    pub bundle: Option<String>,
    pub remote_dir: String,
    pub bundle_args: Vec<String>,
    /// Budget for one control-plane call.
    pub call_timeout: Duration,
    /// Budget for the whole remote battery.
    pub run_timeout: Duration,
    pub cluster: ClusterSettings,
    pub show_progress: bool,
}

pub struct Orchestrator<'a> {
    cp: &'a dyn ControlPlane,
    opts: RunOptions,
    phase: Phase,
}

struct Discovered {
    pod: Pod,
    container: String,
    candidates: usize,
}

const REACHABLE: &str = "control-plane-reachable";
const TARGET: &str = "target-workload";

fn fatal_hint(kind: KubeErrorKind) -> &'static str {
    match kind {
        KubeErrorKind::Auth => {
            "Refresh cluster credentials (e.g. `aws eks update-kubeconfig` or `az aks get-credentials`) or pass --kubeconfig/--context."
        }
        KubeErrorKind::Transport => {
            "Check the network path (VPN, private endpoint) to the API server and that the current context points at the right cluster."
        }
        KubeErrorKind::Unavailable => "Install kubectl or pass --kubectl <path>.",
        KubeErrorKind::NotFound | KubeErrorKind::Malformed | KubeErrorKind::Other => {
            "Re-run with --verbose to see the underlying kubectl error."
        }
    }
}

fn fatal_from(phase: FatalPhase, what: &str, err: &KubeError) -> FatalFailure {
    FatalFailure {
        phase,
        reason: format!("{what}: {err}"),
        hint: fatal_hint(err.kind).to_string(),
    }
}

/// Picks the first Running and Ready pod by name. The count is every
/// candidate the selector matched, ready or not.
pub fn pick_target(pods: Vec<Pod>) -> Option<(Pod, usize)> {
    let candidates = pods.len();
    pods.into_iter()
        .filter(|p| p.is_running() && p.is_ready())
        .min_by(|a, b| a.name().cmp(b.name()))
        .map(|p| (p, candidates))
}

impl<'a> Orchestrator<'a> {
    pub fn new(cp: &'a dyn ControlPlane, opts: RunOptions) -> Self {
        Self {
            cp,
            opts,
            phase: Phase::Start,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, next: Phase) {
        tracing::info!(from = %self.phase, to = %next, "phase");
        self.phase = next;
    }

    pub fn run(&mut self) -> RunReport {
        let mut cluster = Aggregator::new(Scope::Cluster);
        self.enter(Phase::Cluster);

        let version = match self.cp.server_version() {
            Ok(v) => {
                cluster.record(ProbeResult::pass(
                    REACHABLE,
                    Scope::Cluster,
                    format!("API server reachable ({})", v.git_version),
                ));
                v
            }
            Err(err) => {
                let fatal = fatal_from(FatalPhase::Cluster, "control plane unreachable", &err);
                cluster.record(ProbeResult::fail(
                    REACHABLE,
                    Scope::Cluster,
                    format!("control plane unreachable ({})", err.kind),
                    fatal.hint.clone(),
                ).with_detail(err.message.as_str()));
                return self.finish(None, Some(fatal), cluster.snapshot(), None);
            }
        };

        let found = match self.discover() {
            Ok(found) => found,
            Err(fatal) => {
                cluster.record(ProbeResult::fail(
                    TARGET,
                    Scope::Cluster,
                    fatal.reason.clone(),
                    fatal.hint.clone(),
                ));
                return self.finish(None, Some(fatal), cluster.snapshot(), None);
            }
        };
        cluster.record(ProbeResult::pass(
            TARGET,
            Scope::Cluster,
            format!(
                "target {}/{} container {} ({} candidate{})",
                self.opts.target.namespace,
                found.pod.name(),
                found.container,
                found.candidates,
                if found.candidates == 1 { "" } else { "s" }
            ),
        ));

        let target = TargetInfo {
            namespace: self.opts.target.namespace.clone(),
            pod: found.pod.name().to_string(),
            node: found.pod.node_name().map(str::to_string),
            container: Some(found.container.clone()),
        };
        let pod_ref = PodRef {
            namespace: target.namespace.clone(),
            name: target.pod.clone(),
            container: Some(found.container.clone()),
        };

        let lost = self.cluster_battery(&mut cluster, found, version);
        let cluster = cluster.snapshot();
        if let Some(err) = lost {
            let what = match err.kind {
                KubeErrorKind::Auth => "control-plane access rejected during cluster checks",
                _ => "control plane connection lost during cluster checks",
            };
            let fatal = fatal_from(FatalPhase::Cluster, what, &err);
            return self.finish(Some(target), Some(fatal), cluster, None);
        }

        if self.opts.cluster_only {
            tracing::info!("cluster-only run; skipping handoff");
            return self.finish(Some(target), None, cluster, None);
        }

        self.enter(Phase::Handoff);
        let local = match self.handoff(&pod_ref) {
            Ok(local) => local,
            Err(err) => {
                let fatal = err.into_fatal();
                return self.finish(Some(target), Some(fatal), cluster, None);
            }
        };

        self.enter(Phase::Workload);
        tracing::info!(
            results = local.workload.results.len(),
            fail = local.workload.counts.fail,
            "workload evidence received"
        );
        self.finish(Some(target), None, cluster, Some(local.workload))
    }

    fn discover(&self) -> Result<Discovered, FatalFailure> {
        let t = &self.opts.target;
        let (pod, candidates) = match &t.pod {
            Some(name) => match self.cp.get_pod(&t.namespace, name) {
                Ok(pod) => (pod, 1),
                Err(err) if err.kind == KubeErrorKind::NotFound => {
                    return Err(FatalFailure {
                        phase: FatalPhase::Discovery,
                        reason: format!("pod {name} not found in namespace {}", t.namespace),
                        hint: "Check --target and --namespace.".to_string(),
                    });
                }
                Err(err) => return Err(fatal_from(FatalPhase::Discovery, "target lookup failed", &err)),
            },
            None => {
                let pods = self
                    .cp
                    .list_pods(&t.namespace, &t.selector)
                    .map_err(|err| fatal_from(FatalPhase::Discovery, "target discovery failed", &err))?;
                if pods.is_empty() {
                    return Err(FatalFailure {
                        phase: FatalPhase::Discovery,
                        reason: format!(
                            "no pods match selector {} in namespace {}",
                            t.selector, t.namespace
                        ),
                        hint: "Pass --target <pod>, or fix --selector/--namespace to match the agent deployment.".to_string(),
                    });
                }
                let matched = pods.len();
                pick_target(pods).ok_or_else(|| FatalFailure {
                    phase: FatalPhase::Discovery,
                    reason: format!(
                        "{matched} pod{} match selector {} in namespace {} but none is Running and Ready",
                        if matched == 1 { "" } else { "s" },
                        t.selector,
                        t.namespace
                    ),
                    hint: "Inspect the agent pods with kubectl describe, or pass --target <pod> to diagnose a specific one.".to_string(),
                })?
            }
        };

        let container = match pod.container(t.container.as_deref()) {
            Some(c) => c.name.clone(),
            None => {
                return Err(FatalFailure {
                    phase: FatalPhase::Discovery,
                    reason: match &t.container {
                        Some(name) => format!("pod {} has no container {name}", pod.name()),
                        None => format!("pod {} declares no containers", pod.name()),
                    },
                    hint: "Pass --container with one of the pod's container names.".to_string(),
                });
            }
        };
        tracing::info!(pod = %pod.name(), %container, candidates, "target discovered");
        Ok(Discovered {
            pod,
            container,
            candidates,
        })
    }

    /// Runs the cluster battery; returns the auth or transport failure that
    /// makes the run fatal, if any probe hit one.
    fn cluster_battery(
        &self,
        agg: &mut Aggregator,
        found: Discovered,
        version: VersionInfo,
    ) -> Option<KubeError> {
        let ctx = ClusterContext::new(
            self.cp,
            found.pod,
            found.container,
            version,
            self.opts.cluster.clone(),
        );
        let probes = crate::probes::cluster::battery();
        let pb = self.spinner("collecting cluster evidence...");
        run_battery(&probes, &ctx, agg);
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        let failure = ctx.control_plane_failure();
        if let Some(err) = &failure {
            tracing::warn!(kind = %err.kind, "control-plane failure during cluster battery");
        }
        failure
    }

    fn handoff(&self, pod: &PodRef) -> Result<crate::local::LocalReport, HandoffError> {
        let bundle: PathBuf = handoff::locate_bundle(self.opts.bundle.as_deref())?;
        let pb = self.spinner("running workload probes in the target...");
        let result = handoff::run_remote(
            self.cp,
            pod,
            &bundle,
            &self.opts.remote_dir,
            &self.opts.bundle_args,
            self.opts.call_timeout,
            self.opts.run_timeout,
        );
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        result
    }

    fn spinner(&self, message: &'static str) -> Option<indicatif::ProgressBar> {
        if !(self.opts.show_progress && std::io::stderr().is_terminal()) {
            return None;
        }
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }

    fn finish(
        &mut self,
        target: Option<TargetInfo>,
        fatal: Option<FatalFailure>,
        cluster: ScopeSnapshot,
        workload: Option<ScopeSnapshot>,
    ) -> RunReport {
        if let Some(f) = &fatal {
            tracing::warn!(phase = f.phase.as_str(), reason = %f.reason, "run-fatal failure");
        }
        let diagnoses = match (&fatal, &workload) {
            (None, Some(workload)) => {
                self.enter(Phase::Correlate);
                correlate(&cluster, workload)
            }
            _ => Vec::new(),
        };
        self.enter(Phase::Report);
        let report = RunReport::assemble(now_rfc3339(), target, fatal, cluster, workload, diagnoses);
        self.enter(Phase::Terminal);
        report
    }
}
