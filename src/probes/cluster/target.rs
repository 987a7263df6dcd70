use crate::classify::{Classify, Gathered, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::kube::TerminatedState;
use crate::probes::Probe;
use crate::probes::cluster::ClusterContext;

const TARGET_READY: ProbeMeta = ProbeMeta::new("target-ready", Scope::Cluster, "target readiness");
const CONTAINER_RESTARTS: ProbeMeta =
    ProbeMeta::new("container-restarts", Scope::Cluster, "container restarts");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotRunning { phase: String },
    ContainerNotReady { container: String },
}

impl Classify for Readiness {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        match self {
            Readiness::Ready => meta.pass("pod is Running and the agent container is Ready"),
            Readiness::NotRunning { phase } => meta.fail(
                format!("pod phase is {phase}"),
                "Inspect `kubectl describe pod` events for scheduling, image pull or volume errors.",
            ),
            Readiness::ContainerNotReady { container } => meta.warn(
                format!("container {container} is running but not Ready"),
                "Check the readiness probe and the agent logs; the agent may still be registering.",
            ),
        }
    }
}

pub struct TargetReady;

impl<'a> Probe<ClusterContext<'a>> for TargetReady {
    fn meta(&self) -> ProbeMeta {
        TARGET_READY
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        let pod = &ctx.pod;
        let outcome = if !pod.is_running() {
            Readiness::NotRunning {
                phase: pod
                    .status
                    .phase
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
            }
        } else if pod.container_status(&ctx.container).is_some_and(|s| s.ready) {
            Readiness::Ready
        } else {
            Readiness::ContainerNotReady {
                container: ctx.container.clone(),
            }
        };
        outcome.classify(&TARGET_READY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restarts {
    pub count: u32,
    pub last: Option<TerminatedState>,
}

impl Restarts {
    fn memory_kill(&self) -> bool {
        self.last.as_ref().is_some_and(|t| {
            t.exit_code == 137 || t.reason.as_deref() == Some("OOMKilled")
        })
    }
}

impl Classify for Restarts {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        if self.count == 0 {
            return meta.pass("no container restarts");
        }
        let last = self
            .last
            .as_ref()
            .map(|t| {
                format!(
                    "last exit {} ({})",
                    t.exit_code,
                    t.reason.as_deref().unwrap_or("no reason")
                )
            })
            .unwrap_or_else(|| "last termination unknown".to_string());
        if self.memory_kill() {
            meta.warn(
                format!("restarted {} time(s), {last}", self.count),
                "The container was SIGKILLed, usually by the OOM killer; raise the memory limit or check for a runtime security agent killing processes.",
            )
        } else {
            meta.info(format!("restarted {} time(s), {last}", self.count))
        }
    }
}

pub struct ContainerRestarts;

impl<'a> Probe<ClusterContext<'a>> for ContainerRestarts {
    fn meta(&self) -> ProbeMeta {
        CONTAINER_RESTARTS
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        match ctx.pod.container_status(&ctx.container) {
            Some(status) => Gathered::Observed(Restarts {
                count: status.restart_count,
                last: status.last_state.terminated.clone(),
            }),
            None => Gathered::Unobserved(format!("no status reported for container {}", ctx.container)),
        }
        .classify(&CONTAINER_RESTARTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::probes::cluster::testing::{FakeCluster, agent_pod, context};

    #[test]
    fn healthy_pod_is_ready() {
        let cp = FakeCluster::default();
        let ctx = context(&cp, agent_pod());
        assert_eq!(TargetReady.run(&ctx).status, Status::Pass);
        assert_eq!(ContainerRestarts.run(&ctx).status, Status::Pass);
    }

    #[test]
    fn pending_pod_fails() {
        let cp = FakeCluster::default();
        let mut pod = agent_pod();
        pod.status.phase = Some("Pending".to_string());
        let r = TargetReady.run(&context(&cp, pod));
        assert_eq!(r.status, Status::Fail);
        assert!(r.message.contains("Pending"));
    }

    #[test]
    fn oom_restarts_warn_other_restarts_inform() {
        let oom = Restarts {
            count: 3,
            last: Some(TerminatedState {
                exit_code: 137,
                reason: Some("OOMKilled".to_string()),
            }),
        };
        assert_eq!(oom.classify(&CONTAINER_RESTARTS).status, Status::Warn);

        let crash = Restarts {
            count: 1,
            last: Some(TerminatedState {
                exit_code: 1,
                reason: Some("Error".to_string()),
            }),
        };
        assert_eq!(crash.classify(&CONTAINER_RESTARTS).status, Status::Info);
    }
}
