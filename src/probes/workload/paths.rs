use std::io;
use std::path::{Path, PathBuf};

use crate::classify::{Classify, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::probes::Probe;
use crate::probes::workload::WorkloadContext;
use crate::probes::workload::scratch::ScratchFile;

const WRITABLE_TMP: ProbeMeta = ProbeMeta::new("writable-tmp", Scope::Workload, "temp dir writable");
const WRITABLE_WORKDIR: ProbeMeta =
    ProbeMeta::new("writable-workdir", Scope::Workload, "working dir writable");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Writability {
    Writable { path: PathBuf },
    Missing { path: PathBuf },
    NotADirectory { path: PathBuf },
    NotWritable { path: PathBuf, reason: String },
}

/// Create and delete a marker file in `dir`.
pub fn check_writable(dir: &Path) -> Writability {
    let path = dir.to_path_buf();
    match std::fs::metadata(dir) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Writability::Missing { path },
        Err(err) => {
            return Writability::NotWritable {
                path,
                reason: err.to_string(),
            };
        }
        Ok(meta) if !meta.is_dir() => return Writability::NotADirectory { path },
        Ok(_) => {}
    }

    match ScratchFile::create(dir, "marker", "", b"agent-doctor\n") {
        Ok(marker) => {
            drop(marker);
            Writability::Writable { path }
        }
        Err(err) => Writability::NotWritable {
            path,
            reason: err.to_string(),
        },
    }
}

impl Classify for Writability {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        match self {
            Writability::Writable { path } => {
                meta.pass(format!("{} is writable", path.display()))
            }
            Writability::Missing { path } => meta.fail(
                format!("{} does not exist", path.display()),
                format!(
                    "Mount a writable volume (e.g. an emptyDir) at {} in the pod spec.",
                    path.display()
                ),
            ),
            Writability::NotADirectory { path } => meta.fail(
                format!("{} exists but is not a directory", path.display()),
                format!("Replace {} with a writable directory mount.", path.display()),
            ),
            Writability::NotWritable { path, reason } => meta.fail(
                format!("{} is not writable ({reason})", path.display()),
                format!(
                    "With readOnlyRootFilesystem, mount an emptyDir at {}; otherwise fix its ownership for the container user.",
                    path.display()
                ),
            ),
        }
    }
}

pub struct WritableTmp;

impl<'a> Probe<WorkloadContext<'a>> for WritableTmp {
    fn meta(&self) -> ProbeMeta {
        WRITABLE_TMP
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        check_writable(&ctx.scratch_dir).classify(&WRITABLE_TMP)
    }
}

pub struct WritableWorkdir;

impl<'a> Probe<WorkloadContext<'a>> for WritableWorkdir {
    fn meta(&self) -> ProbeMeta {
        WRITABLE_WORKDIR
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        check_writable(&ctx.work_dir).classify(&WRITABLE_WORKDIR)
    }
}
