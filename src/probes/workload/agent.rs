//! Agent-process facts: the environment it was rendered with, the user it
//! runs as, and what its own actuator reports.

use serde::Deserialize;

use crate::classify::{Classify, Gathered, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::platform::CommandError;
use crate::probes::Probe;
use crate::probes::federation::is_placeholder;
use crate::probes::workload::WorkloadContext;

const AGENT_ENV: ProbeMeta = ProbeMeta::new("agent-env", Scope::Workload, "agent environment");
const RUNTIME_USER: ProbeMeta = ProbeMeta::new("runtime-user", Scope::Workload, "runtime user");
const AGENT_ACTUATOR: ProbeMeta =
    ProbeMeta::new("agent-actuator", Scope::Workload, "agent actuator");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvCheck {
    pub present: Vec<String>,
    pub missing: Vec<String>,
    pub placeholders: Vec<String>,
}

pub fn check_env(ctx: &WorkloadContext<'_>) -> EnvCheck {
    let mut out = EnvCheck::default();
    for key in &ctx.settings.required_env {
        match ctx.env_var(key) {
            None => out.missing.push(key.clone()),
            Some(value) if is_placeholder(value) => out.placeholders.push(key.clone()),
            Some(_) => out.present.push(key.clone()),
        }
    }
    out
}

impl Classify for EnvCheck {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        if !self.placeholders.is_empty() {
            return meta.fail(
                format!(
                    "unrendered placeholder values in {}",
                    self.placeholders.join(", ")
                ),
                "Set the real account and agent identifiers in the chart values (config.accountId, config.agentId) and redeploy.",
            );
        }
        if !self.missing.is_empty() {
            return meta.fail(
                format!("required variables not set: {}", self.missing.join(", ")),
                "Check that the agent config secret exists and is attached with envFrom.",
            );
        }
        meta.pass(format!(
            "{} required variables present",
            self.present.len()
        ))
    }
}

pub struct AgentEnv;

impl<'a> Probe<WorkloadContext<'a>> for AgentEnv {
    fn meta(&self) -> ProbeMeta {
        AGENT_ENV
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        check_env(ctx).classify(&AGENT_ENV)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeUserOutcome {
    pub uid: u32,
}

impl Classify for RuntimeUserOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        if self.uid == 0 {
            meta.info("running as root (uid 0)")
        } else {
            meta.pass(format!("running as non-root uid {}", self.uid))
        }
    }
}

pub struct RuntimeUser;

impl<'a> Probe<WorkloadContext<'a>> for RuntimeUser {
    fn meta(&self) -> ProbeMeta {
        RUNTIME_USER
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        match ctx.uid {
            Some(uid) => Gathered::Observed(RuntimeUserOutcome { uid }),
            None => Gathered::Unobserved("effective uid unavailable on this platform".to_string()),
        }
        .classify(&RUNTIME_USER)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActuatorInfo {
    #[serde(default)]
    agent_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorOutcome {
    Running,
    Status(String),
    NoStatusField,
    Unparsable(String),
    Unreachable { exit_code: i32, stderr: String },
}

pub const RUNNING: &str = "RUNNING";

pub fn parse_actuator(body: &str) -> ActuatorOutcome {
    match serde_json::from_str::<ActuatorInfo>(body) {
        Ok(ActuatorInfo {
            agent_status: Some(status),
        }) if status.eq_ignore_ascii_case(RUNNING) => ActuatorOutcome::Running,
        Ok(ActuatorInfo {
            agent_status: Some(status),
        }) => ActuatorOutcome::Status(status),
        Ok(ActuatorInfo { agent_status: None }) => ActuatorOutcome::NoStatusField,
        Err(err) => ActuatorOutcome::Unparsable(err.to_string()),
    }
}

impl Classify for ActuatorOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        match self {
            ActuatorOutcome::Running => meta.pass("agentStatus is RUNNING"),
            ActuatorOutcome::Status(status) => meta.fail(
                format!("agentStatus is {status}, expected RUNNING"),
                "Inspect the agent container logs for startup or registration errors.",
            ),
            ActuatorOutcome::NoStatusField => meta.warn(
                "actuator responded without an agentStatus field",
                "Confirm actuator_url points at the agent's /actuator/info endpoint.",
            ),
            ActuatorOutcome::Unparsable(reason) => meta.warn(
                format!("actuator response is not JSON ({reason})"),
                "Confirm actuator_url points at the agent's /actuator/info endpoint.",
            ),
            ActuatorOutcome::Unreachable { exit_code, stderr } => meta
                .fail(
                    format!("actuator did not answer (curl exit {exit_code})"),
                    "The agent process is not serving its actuator; check the container logs and the readiness probe.",
                )
                .with_detail(stderr.as_str()),
        }
    }
}

pub struct AgentActuator;

impl<'a> Probe<WorkloadContext<'a>> for AgentActuator {
    fn meta(&self) -> ProbeMeta {
        AGENT_ACTUATOR
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        let max_time = ctx.timeout.as_secs().max(1).to_string();
        let url = ctx.settings.actuator_url.as_str();
        let gathered = match ctx.runner.run(
            "curl",
            &["--silent", "--show-error", "--max-time", &max_time, url],
            ctx.timeout,
        ) {
            Ok(out) if out.success() => Gathered::Observed(parse_actuator(&out.stdout)),
            Ok(out) => Gathered::Observed(ActuatorOutcome::Unreachable {
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            }),
            Err(CommandError::NotFound { program }) => Gathered::ToolUnavailable(program),
            Err(err) => Gathered::Unobserved(err.to_string()),
        };
        gathered.classify(&AGENT_ACTUATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::probes::workload::testing::{FakeRunner, context, output, temp_dir};

    #[test]
    fn placeholder_agent_id_fails() {
        let root = temp_dir("env-placeholder");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        ctx.env.insert("ACCOUNT_ID".into(), "4242".into());
        ctx.env.insert("AGENT_ID".into(), "<MatillionAgentId>".into());
        let r = AgentEnv.run(&ctx);
        assert_eq!(r.status, Status::Fail);
        assert!(r.message.contains("AGENT_ID"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_and_present_env() {
        let root = temp_dir("env-missing");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        ctx.env.insert("ACCOUNT_ID".into(), "4242".into());
        ctx.env.insert("AGENT_ID".into(), "   ".into());
        let check = check_env(&ctx);
        assert_eq!(check.missing, ["AGENT_ID"]);
        assert_eq!(check.classify(&AGENT_ENV).status, Status::Fail);

        ctx.env.insert("AGENT_ID".into(), "a1b2".into());
        assert_eq!(AgentEnv.run(&ctx).status, Status::Pass);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn root_is_info_not_failure() {
        assert_eq!(
            RuntimeUserOutcome { uid: 0 }.classify(&RUNTIME_USER).status,
            Status::Info
        );
        assert_eq!(
            RuntimeUserOutcome { uid: 1000 }.classify(&RUNTIME_USER).status,
            Status::Pass
        );
    }

    #[test]
    fn actuator_states() {
        assert_eq!(
            parse_actuator(r#"{"agentStatus":"RUNNING","version":"1"}"#),
            ActuatorOutcome::Running
        );
        assert_eq!(
            parse_actuator(r#"{"agentStatus":"STOPPED"}"#),
            ActuatorOutcome::Status("STOPPED".to_string())
        );
        assert_eq!(parse_actuator("{}"), ActuatorOutcome::NoStatusField);
        assert!(matches!(parse_actuator("<html>"), ActuatorOutcome::Unparsable(_)));
    }

    #[test]
    fn actuator_connection_refused_fails_and_missing_curl_skips() {
        let root = temp_dir("actuator");
        let refused = FakeRunner::new(|_, _| {
            let mut out = output(7, "");
            out.stderr = "curl: (7) Failed to connect".to_string();
            Ok(out)
        });
        let ctx = context(&refused, &root);
        assert_eq!(AgentActuator.run(&ctx).status, Status::Fail);

        let missing = FakeRunner::missing();
        let ctx = context(&missing, &root);
        let r = AgentActuator.run(&ctx);
        assert_eq!(r.status, Status::Info);
        assert!(r.message.contains("skipped (curl unavailable)"));
        let _ = std::fs::remove_dir_all(&root);
    }
}
