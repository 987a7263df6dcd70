use serde::{Deserialize, Serialize};

use crate::core::{ProbeResult, Scope, Status};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub pass: u64,
    pub info: u64,
    pub warn: u64,
    pub fail: u64,
}

impl Tally {
    pub fn get(&self, status: Status) -> u64 {
        match status {
            Status::Pass => self.pass,
            Status::Info => self.info,
            Status::Warn => self.warn,
            Status::Fail => self.fail,
        }
    }

    pub fn total(&self) -> u64 {
        Status::ALL.iter().map(|s| self.get(*s)).sum()
    }

    fn bump(&mut self, status: Status) {
        let slot = match status {
            Status::Pass => &mut self.pass,
            Status::Info => &mut self.info,
            Status::Warn => &mut self.warn,
            Status::Fail => &mut self.fail,
        };
        *slot = slot.saturating_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub status: Status,
    pub message: String,
    pub remediation: String,
}

/// Read-only view of one scope's evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSnapshot {
    pub scope: Scope,
    pub counts: Tally,
    pub issues: Vec<Issue>,
    pub results: Vec<ProbeResult>,
}

impl ScopeSnapshot {
    pub fn find(&self, id: &str) -> Option<&ProbeResult> {
        self.results.iter().find(|r| r.id == id)
    }

    pub fn has_fail(&self) -> bool {
        self.counts.fail > 0
    }
}

/// Per-scope accumulator. One instance per scope per run.
#[derive(Debug, Clone)]
pub struct Aggregator {
    scope: Scope,
    counts: Tally,
    issues: Vec<Issue>,
    results: Vec<ProbeResult>,
}

impl Aggregator {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            counts: Tally::default(),
            issues: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn record(&mut self, result: ProbeResult) {
        tracing::debug!(
            scope = %self.scope,
            probe = %result.id,
            status = %result.status,
            "probe recorded"
        );
        self.counts.bump(result.status);
        if result.status.is_issue() {
            self.issues.push(Issue {
                id: result.id.clone(),
                status: result.status,
                message: result.message.clone(),
                remediation: result.remediation.clone().unwrap_or_default(),
            });
        }
        self.results.push(result);
    }

    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot {
            scope: self.scope,
            counts: self.counts,
            issues: self.issues.clone(),
            results: self.results.clone(),
        }
    }
}
