mod aggregator;
mod diagnosis;
mod report;
mod result;
mod status;

pub use aggregator::{Aggregator, Issue, ScopeSnapshot, Tally};
pub use diagnosis::{Diagnosis, EvidenceRef};
pub use report::{
    FatalFailure, FatalPhase, Origin, RemediationItem, RunReport, SCHEMA_VERSION, TargetInfo,
    Verdict,
};
pub use result::ProbeResult;
pub use status::{Scope, Status};
