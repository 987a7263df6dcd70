//! Probe framework and the two probe batteries.

pub mod cluster;
pub mod federation;
pub mod workload;

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::classify::ProbeMeta;
use crate::core::{Aggregator, ProbeResult};

/// One atomic fact-gathering check against a context `C`.
pub trait Probe<C: ?Sized> {
    fn meta(&self) -> ProbeMeta;
    fn run(&self, ctx: &C) -> ProbeResult;
}

/// Runs one probe and guarantees a well-formed result for its declared id
/// and scope, even if the probe panics.
pub fn execute<C: ?Sized>(probe: &dyn Probe<C>, ctx: &C) -> ProbeResult {
    let meta = probe.meta();
    let result = catch_unwind(AssertUnwindSafe(|| probe.run(ctx))).unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(probe = meta.id, %reason, "probe panicked");
        meta.warn(
            format!("{}: probe crashed ({reason})", meta.title),
            "Report this as a bug in agent-doctor; the check did not complete.",
        )
    });

    ProbeResult {
        id: meta.id.to_string(),
        scope: meta.scope,
        ..result
    }
    .normalized()
}

/// Runs every probe in order, continuing past individual findings.
pub fn run_battery<C: ?Sized>(probes: &[Box<dyn Probe<C>>], ctx: &C, agg: &mut Aggregator) {
    for probe in probes {
        let result = execute(probe.as_ref(), ctx);
        agg.record(result);
    }
}
