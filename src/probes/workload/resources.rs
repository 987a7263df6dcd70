use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use walkdir::WalkDir;

use crate::classify::{Classify, Gathered, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::probes::Probe;
use crate::probes::workload::WorkloadContext;
use crate::ui::format_bytes;

const MEMORY_HEADROOM: ProbeMeta =
    ProbeMeta::new("memory-headroom", Scope::Workload, "memory headroom");
const PIDS_HEADROOM: ProbeMeta = ProbeMeta::new("pids-headroom", Scope::Workload, "pid headroom");
const EPHEMERAL_HEADROOM: ProbeMeta = ProbeMeta::new(
    "ephemeral-storage-headroom",
    Scope::Workload,
    "ephemeral storage headroom",
);

/// Downward-API variable carrying the container's ephemeral-storage limit.
pub const EPHEMERAL_LIMIT_ENV: &str = "EPHEMERAL_STORAGE_LIMIT";

/// cgroup v1 reports "no limit" as a page-aligned i64::MAX.
const V1_UNLIMITED_FLOOR: u64 = 1 << 62;

/// Kernel pseudo-filesystems; their sizes are not storage.
const PSEUDO_FS: &[&str] = &["/proc", "/sys"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Memory,
    Pids,
    EphemeralStorage,
}

impl Resource {
    fn label(self) -> &'static str {
        match self {
            Resource::Memory => "memory",
            Resource::Pids => "pids",
            Resource::EphemeralStorage => "ephemeral storage",
        }
    }

    fn amount(self, value: u64) -> String {
        match self {
            Resource::Pids => value.to_string(),
            Resource::Memory | Resource::EphemeralStorage => format_bytes(value),
        }
    }

    fn remediation(self) -> &'static str {
        match self {
            Resource::Memory => {
                "Raise resources.limits.memory for the agent container or reduce concurrent tasks; sustained pressure ends in OOMKilled restarts."
            }
            Resource::Pids => {
                "Raise the node's pod PID limit or reduce concurrent task processes; fork failures follow exhaustion."
            }
            Resource::EphemeralStorage => {
                "Raise resources.limits.ephemeral-storage or clean up the scratch directory; the kubelet evicts pods that exceed it."
            }
        }
    }
}

/// Resources accounted by the cgroup controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupResource {
    Memory,
    Pids,
}

impl From<CgroupResource> for Resource {
    fn from(r: CgroupResource) -> Self {
        match r {
            CgroupResource::Memory => Resource::Memory,
            CgroupResource::Pids => Resource::Pids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headroom {
    pub resource: Resource,
    pub used: u64,
    /// `None` when no limit applies.
    pub limit: Option<u64>,
    pub warn_percent: u8,
}

impl Headroom {
    pub fn percent(&self) -> Option<f64> {
        self.limit
            .filter(|limit| *limit > 0)
            .map(|limit| self.used as f64 * 100.0 / limit as f64)
    }
}

impl Classify for Headroom {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        let r = self.resource;
        let Some(pct) = self.percent() else {
            return meta.info(format!(
                "no {} limit set (using {})",
                r.label(),
                r.amount(self.used)
            ));
        };
        let limit = self.limit.unwrap_or_default();
        let message = format!(
            "{} at {pct:.0}% of limit ({} of {})",
            r.label(),
            r.amount(self.used),
            r.amount(limit)
        );
        if pct >= f64::from(self.warn_percent) {
            meta.warn(message, r.remediation())
        } else {
            meta.pass(message)
        }
    }
}

/// Reads a cgroup limit file: `max` (v2) or the v1 sentinel means unbounded.
fn parse_limit(raw: &str) -> Result<Option<u64>, String> {
    let v = raw.trim();
    if v == "max" {
        return Ok(None);
    }
    let n: u64 = v
        .parse()
        .map_err(|_| format!("unparsable cgroup value {v:?}"))?;
    Ok((n < V1_UNLIMITED_FLOOR).then_some(n))
}

fn parse_counter(raw: &str) -> Result<u64, String> {
    let v = raw.trim();
    v.parse()
        .map_err(|_| format!("unparsable cgroup value {v:?}"))
}

fn read(path: &Path) -> io::Result<String> {
    std::fs::read_to_string(path)
}

/// Current/limit file pairs for a resource, v2 layout first.
fn cgroup_files(root: &Path, resource: CgroupResource) -> [(PathBuf, PathBuf); 2] {
    match resource {
        CgroupResource::Pids => [
            (root.join("pids.current"), root.join("pids.max")),
            (root.join("pids/pids.current"), root.join("pids/pids.max")),
        ],
        CgroupResource::Memory => [
            (root.join("memory.current"), root.join("memory.max")),
            (
                root.join("memory/memory.usage_in_bytes"),
                root.join("memory/memory.limit_in_bytes"),
            ),
        ],
    }
}

pub fn read_cgroup(root: &Path, kind: CgroupResource, warn_percent: u8) -> Gathered<Headroom> {
    let resource = Resource::from(kind);
    for (current, limit) in cgroup_files(root, kind) {
        let Ok(current_raw) = read(&current) else {
            continue;
        };
        let limit_raw = match read(&limit) {
            Ok(raw) => raw,
            Err(err) => return Gathered::Unobserved(format!("{}: {err}", limit.display())),
        };
        let used = match parse_counter(&current_raw) {
            Ok(v) => v,
            Err(reason) => return Gathered::Unobserved(reason),
        };
        let limit = match parse_limit(&limit_raw) {
            Ok(v) => v,
            Err(reason) => return Gathered::Unobserved(reason),
        };
        tracing::debug!(resource = resource.label(), used, ?limit, file = %current.display(), "cgroup reading");
        return Gathered::Observed(Headroom {
            resource,
            used,
            limit,
            warn_percent,
        });
    }
    Gathered::Unobserved(format!("no cgroup accounting under {}", root.display()))
}

/// Kubernetes resource quantity in bytes: plain integers, decimal suffixes
/// (k, M, G, T, P, E) and binary suffixes (Ki .. Ei).
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let v = raw.trim();
    let split = v
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(v.len());
    let (number, suffix) = v.split_at(split);
    let multiplier: u64 = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        _ => return None,
    };
    if number.contains('.') {
        let f: f64 = number.parse().ok()?;
        if !f.is_finite() || f < 0.0 {
            return None;
        }
        return Some((f * multiplier as f64) as u64);
    }
    number.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Bytes of regular files under `dirs`, each directory counted once. The
/// walk stays on each directory's filesystem and never enters /proc or
/// /sys; the filesystem root itself is not walked. Errors once `deadline`
/// passes.
pub fn disk_usage(dirs: &[&Path], deadline: Instant) -> Result<u64, String> {
    let unique: BTreeSet<&Path> = dirs
        .iter()
        .copied()
        .filter(|dir| dir.parent().is_some())
        .collect();
    let mut total = 0u64;
    for dir in unique {
        let walk = WalkDir::new(dir)
            .follow_links(false)
            .same_file_system(true)
            .into_iter()
            .filter_entry(|entry| !PSEUDO_FS.iter().any(|p| entry.path() == Path::new(p)));
        for entry in walk.filter_map(Result::ok) {
            if Instant::now() >= deadline {
                return Err(format!(
                    "sizing {} did not finish in time ({} counted so far)",
                    dir.display(),
                    format_bytes(total)
                ));
            }
            if entry.file_type().is_file()
                && let Ok(meta) = entry.metadata()
            {
                total = total.saturating_add(meta.len());
            }
        }
    }
    Ok(total)
}

pub struct MemoryHeadroom;

impl<'a> Probe<WorkloadContext<'a>> for MemoryHeadroom {
    fn meta(&self) -> ProbeMeta {
        MEMORY_HEADROOM
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        read_cgroup(
            &ctx.cgroup_root(),
            CgroupResource::Memory,
            ctx.settings.headroom_warn_percent,
        )
        .classify(&MEMORY_HEADROOM)
    }
}

pub struct PidsHeadroom;

impl<'a> Probe<WorkloadContext<'a>> for PidsHeadroom {
    fn meta(&self) -> ProbeMeta {
        PIDS_HEADROOM
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        read_cgroup(
            &ctx.cgroup_root(),
            CgroupResource::Pids,
            ctx.settings.headroom_warn_percent,
        )
        .classify(&PIDS_HEADROOM)
    }
}

pub struct EphemeralStorageHeadroom;

impl<'a> Probe<WorkloadContext<'a>> for EphemeralStorageHeadroom {
    fn meta(&self) -> ProbeMeta {
        EPHEMERAL_HEADROOM
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        let limit = match ctx.env_var(EPHEMERAL_LIMIT_ENV) {
            None => None,
            Some(raw) => match parse_quantity(raw) {
                // The downward API renders "no limit" as node allocatable or 0.
                Some(0) => None,
                Some(limit) => Some(limit),
                None => {
                    return Gathered::<Headroom>::Unobserved(format!(
                        "{EPHEMERAL_LIMIT_ENV}={raw} is not a quantity"
                    ))
                    .classify(&EPHEMERAL_HEADROOM);
                }
            },
        };
        let deadline = Instant::now() + ctx.timeout;
        let used = match disk_usage(&[ctx.scratch_dir.as_path(), ctx.work_dir.as_path()], deadline) {
            Ok(used) => used,
            Err(reason) => {
                return Gathered::<Headroom>::Unobserved(reason).classify(&EPHEMERAL_HEADROOM);
            }
        };
        Headroom {
            resource: Resource::EphemeralStorage,
            used,
            limit,
            warn_percent: ctx.settings.headroom_warn_percent,
        }
        .classify(&EPHEMERAL_HEADROOM)
    }
}
