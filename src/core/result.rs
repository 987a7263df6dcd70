use serde::{Deserialize, Serialize};

use crate::core::{Scope, Status};

/// One classified probe outcome. Built only through the constructors so that
/// `remediation` is present exactly when the status is WARN or FAIL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: String,
    pub scope: Scope,
    pub status: Status,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ProbeResult {
    pub fn pass(id: impl Into<String>, scope: Scope, message: impl Into<String>) -> Self {
        Self::confirm(id, scope, Status::Pass, message)
    }

    pub fn info(id: impl Into<String>, scope: Scope, message: impl Into<String>) -> Self {
        Self::confirm(id, scope, Status::Info, message)
    }

    pub fn warn(
        id: impl Into<String>,
        scope: Scope,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self::issue(id, scope, Status::Warn, message, remediation)
    }

    pub fn fail(
        id: impl Into<String>,
        scope: Scope,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self::issue(id, scope, Status::Fail, message, remediation)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let trimmed = detail.trim_end();
        if !trimmed.is_empty() {
            self.detail = Some(trimmed.to_string());
        }
        self
    }

    /// Repairs a result that arrived over the wire with an inconsistent
    /// remediation field.
    pub fn normalized(mut self) -> Self {
        if self.status.is_issue() {
            if self.remediation.as_deref().map(str::trim).unwrap_or("").is_empty() {
                self.remediation = Some("No remediation was supplied for this finding.".to_string());
            }
        } else {
            self.remediation = None;
        }
        self
    }

    fn confirm(id: impl Into<String>, scope: Scope, status: Status, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope,
            status,
            message: message.into(),
            detail: None,
            remediation: None,
        }
    }

    fn issue(
        id: impl Into<String>,
        scope: Scope,
        status: Status,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            status,
            message: message.into(),
            detail: None,
            remediation: Some(remediation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_tracks_status() {
        let ok = ProbeResult::pass("a", Scope::Workload, "fine");
        assert!(ok.remediation.is_none());
        let bad = ProbeResult::warn("a", Scope::Workload, "meh", "fix it");
        assert_eq!(bad.remediation.as_deref(), Some("fix it"));
    }

    #[test]
    fn normalized_fills_missing_remediation_and_strips_stray_ones() {
        let mut r = ProbeResult::fail("a", Scope::Cluster, "bad", "x");
        r.remediation = None;
        assert!(r.normalized().remediation.is_some());

        let mut r = ProbeResult::info("a", Scope::Cluster, "note");
        r.remediation = Some("stray".to_string());
        assert!(r.normalized().remediation.is_none());
    }

    #[test]
    fn empty_detail_is_dropped() {
        let r = ProbeResult::info("a", Scope::Cluster, "x").with_detail("  \n");
        assert!(r.detail.is_none());
    }
}
