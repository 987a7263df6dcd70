use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity lattice. Ordering is by severity, so `Fail` is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Info,
    Warn,
    Fail,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Pass, Status::Info, Status::Warn, Status::Fail];

    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Info => "INFO",
            Status::Warn => "WARN",
            Status::Fail => "FAIL",
        }
    }

    /// WARN and FAIL carry a remediation and land in the issue list.
    pub const fn is_issue(self) -> bool {
        matches!(self, Status::Warn | Status::Fail)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(Status::Pass),
            "INFO" => Ok(Status::Info),
            "WARN" => Ok(Status::Warn),
            "FAIL" => Ok(Status::Fail),
            other => Err(format!(
                "invalid status: {other} (expected PASS|INFO|WARN|FAIL)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Cluster,
    Workload,
}

impl Scope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Scope::Cluster => "cluster",
            Scope::Workload => "workload",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_is_most_severe() {
        assert_eq!(Status::ALL.iter().max(), Some(&Status::Fail));
        assert!(Status::Warn > Status::Info);
        assert!(Status::Info > Status::Pass);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("warn".parse::<Status>(), Ok(Status::Warn));
        assert!("bogus".parse::<Status>().is_err());
    }
}
