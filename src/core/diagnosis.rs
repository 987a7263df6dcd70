use serde::{Deserialize, Serialize};

use crate::core::{Scope, Status};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub scope: Scope,
    pub id: String,
}

/// Root cause synthesised from several probe results. Produced alongside the
/// results that triggered it, never instead of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: String,
    pub status: Status,
    pub title: String,
    pub summary: String,
    pub evidence: Vec<EvidenceRef>,
    pub remediation: String,
}
