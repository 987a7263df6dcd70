//! Outcome classification: raw probe observations to [`ProbeResult`]s.
//!
//! Every probe gathers a probe-specific raw outcome and hands it, together
//! with the probe's static [`ProbeMeta`], to [`Classify::classify`]. The
//! mapping is pure: the same outcome always yields the same result.

use crate::core::{ProbeResult, Scope, Status};

/// Static metadata and severity policy of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMeta {
    pub id: &'static str,
    pub scope: Scope,
    pub title: &'static str,
    /// Severity when the fact could not be determined at all.
    pub unobserved: Status,
}

impl ProbeMeta {
    pub const fn new(id: &'static str, scope: Scope, title: &'static str) -> Self {
        Self {
            id,
            scope,
            title,
            unobserved: Status::Info,
        }
    }

    pub const fn warn_when_unobserved(mut self) -> Self {
        self.unobserved = Status::Warn;
        self
    }

    pub fn pass(&self, message: impl Into<String>) -> ProbeResult {
        ProbeResult::pass(self.id, self.scope, message)
    }

    pub fn info(&self, message: impl Into<String>) -> ProbeResult {
        ProbeResult::info(self.id, self.scope, message)
    }

    pub fn warn(&self, message: impl Into<String>, remediation: impl Into<String>) -> ProbeResult {
        ProbeResult::warn(self.id, self.scope, message, remediation)
    }

    pub fn fail(&self, message: impl Into<String>, remediation: impl Into<String>) -> ProbeResult {
        ProbeResult::fail(self.id, self.scope, message, remediation)
    }

    /// An underlying tool is missing. Never escalated.
    pub fn skipped(&self, tool: &str) -> ProbeResult {
        self.info(format!("{}: skipped ({tool} unavailable)", self.title))
    }

    /// The fact could not be determined; severity follows the probe's policy.
    pub fn unobserved(&self, reason: impl AsRef<str>) -> ProbeResult {
        let message = format!("{}: could not determine ({})", self.title, reason.as_ref());
        match self.unobserved {
            Status::Warn | Status::Fail => self.warn(
                message,
                "Re-run with --verbose to see the underlying error and grant the access the check needs.",
            ),
            Status::Pass | Status::Info => self.info(message),
        }
    }
}

pub trait Classify {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult;
}

/// Observation wrapper shared by probes whose evidence comes from a tool or
/// a file that may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gathered<T> {
    Observed(T),
    ToolUnavailable(String),
    Unobserved(String),
}

impl<T: Classify> Classify for Gathered<T> {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        match self {
            Gathered::Observed(outcome) => outcome.classify(meta),
            Gathered::ToolUnavailable(tool) => meta.skipped(tool),
            Gathered::Unobserved(reason) => meta.unobserved(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Always(Status);

    impl Classify for Always {
        fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
            match self.0 {
                Status::Pass => meta.pass("ok"),
                Status::Info => meta.info("fyi"),
                Status::Warn => meta.warn("hmm", "fix"),
                Status::Fail => meta.fail("bad", "fix"),
            }
        }
    }

    const META: ProbeMeta = ProbeMeta::new("demo", Scope::Workload, "demo check");

    #[test]
    fn missing_tool_is_info_never_worse() {
        let strict = META.warn_when_unobserved();
        let r = Gathered::<Always>::ToolUnavailable("getent".to_string()).classify(&strict);
        assert_eq!(r.status, Status::Info);
        assert!(r.message.contains("skipped (getent unavailable)"));
    }

    #[test]
    fn unobserved_follows_policy() {
        let g = Gathered::<Always>::Unobserved("permission denied".to_string());
        assert_eq!(g.classify(&META).status, Status::Info);
        let r = g.classify(&META.warn_when_unobserved());
        assert_eq!(r.status, Status::Warn);
        assert!(r.remediation.is_some());
    }

    #[test]
    fn classification_is_deterministic() {
        let g = Gathered::Observed(Always(Status::Fail));
        let a = serde_json::to_vec(&g.classify(&META)).expect("json");
        let b = serde_json::to_vec(&g.classify(&META)).expect("json");
        assert_eq!(a, b);
    }
}
