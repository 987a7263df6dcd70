//! Runtime execution parity: the same trivial program run inline and from a
//! file. Inline success with a killed file-based run is the fingerprint of
//! on-exec security scanning.

use std::path::Path;

use crate::classify::{Classify, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::platform::{CommandError, signal_name};
use crate::probes::Probe;
use crate::probes::workload::WorkloadContext;
use crate::probes::workload::scratch::ScratchFile;

const EXEC_INLINE: ProbeMeta = ProbeMeta::new("exec-inline", Scope::Workload, "inline execution");
const EXEC_FILE: ProbeMeta = ProbeMeta::new("exec-file", Scope::Workload, "file-based execution");
const EXEC_PARITY: ProbeMeta = ProbeMeta::new("exec-parity", Scope::Workload, "execution parity");

const EXPECTED_OUTPUT: &str = "ok";

const DRIFT_REMEDIATION: &str = "A runtime security agent (drift detection or on-exec scanning) is likely killing file-backed interpreter processes. Add an exclusion for the agent container or its script directory in the security tool's policy, or move the workload to nodes without the sensor.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Inline,
    File,
}

impl Mode {
    fn label(self) -> &'static str {
        match self {
            Mode::Inline => "inline",
            Mode::File => "file-based",
        }
    }
}

/// Trivial program for an interpreter: the source text and the file
/// extension a script of that language uses.
pub fn snippet(interpreter: &str) -> (&'static str, &'static str) {
    let name = Path::new(interpreter)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(interpreter);
    if name.starts_with("python") {
        ("print('ok')", "py")
    } else {
        ("echo ok", "sh")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Ok,
    UnexpectedOutput { stdout: String },
    Exited { code: i32, stderr: String },
    Killed { code: i32, signal: i32 },
    TimedOut,
    Unavailable { program: String },
    NotStaged { reason: String },
    Failed { reason: String },
}

impl Invocation {
    pub fn is_ok(&self) -> bool {
        matches!(self, Invocation::Ok)
    }

    fn describe(&self) -> String {
        match self {
            Invocation::Ok => "exit 0".to_string(),
            Invocation::UnexpectedOutput { .. } => "exit 0 with unexpected output".to_string(),
            Invocation::Exited { code, .. } => format!("exit {code}"),
            Invocation::Killed { code, signal } => {
                format!("exit {code} ({})", signal_name(*signal))
            }
            Invocation::TimedOut => "timed out".to_string(),
            Invocation::Unavailable { program } => format!("{program} unavailable"),
            Invocation::NotStaged { reason } => format!("script not staged: {reason}"),
            Invocation::Failed { reason } => reason.clone(),
        }
    }
}

pub fn invoke(ctx: &WorkloadContext<'_>, mode: Mode) -> Invocation {
    let interpreter = ctx.settings.interpreter.as_str();
    let (source, extension) = snippet(interpreter);

    let run = match mode {
        Mode::Inline => ctx.runner.run(interpreter, &["-c", source], ctx.timeout),
        Mode::File => {
            let script = match ScratchFile::create(
                &ctx.scratch_dir,
                "exec",
                extension,
                format!("{source}\n").as_bytes(),
            ) {
                Ok(script) => script,
                Err(err) => {
                    return Invocation::NotStaged {
                        reason: err.to_string(),
                    };
                }
            };
            let path = script.path().to_string_lossy().into_owned();
            ctx.runner.run(interpreter, &[path.as_str()], ctx.timeout)
        }
    };

    let output = match run {
        Ok(output) => output,
        Err(CommandError::NotFound { program }) => return Invocation::Unavailable { program },
        Err(CommandError::Timeout { .. }) => return Invocation::TimedOut,
        Err(err) => {
            return Invocation::Failed {
                reason: err.to_string(),
            };
        }
    };
    tracing::debug!(mode = mode.label(), exit_code = output.exit_code, "interpreter finished");

    if let Some(signal) = output.signal {
        return Invocation::Killed {
            code: output.exit_code,
            signal,
        };
    }
    // A wrapper shell reports its child's death by signal as 128+N.
    if (129..160).contains(&output.exit_code) {
        return Invocation::Killed {
            code: output.exit_code,
            signal: output.exit_code - 128,
        };
    }
    if output.exit_code != 0 {
        return Invocation::Exited {
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        };
    }
    if output.stdout.trim() != EXPECTED_OUTPUT {
        return Invocation::UnexpectedOutput {
            stdout: output.stdout.trim().to_string(),
        };
    }
    Invocation::Ok
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub mode: Mode,
    pub interpreter: String,
    pub invocation: Invocation,
}

impl Classify for ExecOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        let label = self.mode.label();
        let interp = &self.interpreter;
        match &self.invocation {
            Invocation::Ok => meta.pass(format!("{label} {interp} run exited 0")),
            Invocation::Unavailable { program } => meta.skipped(program),
            Invocation::UnexpectedOutput { stdout } => meta
                .warn(
                    format!("{label} {interp} run exited 0 but printed unexpected output"),
                    "Check for wrappers or shims around the interpreter that rewrite its output.",
                )
                .with_detail(stdout.as_str()),
            Invocation::Killed { code, signal } => {
                let remediation = match self.mode {
                    Mode::File => DRIFT_REMEDIATION,
                    Mode::Inline => {
                        "The interpreter was terminated by a signal; check the container memory limit and any runtime security policy applied to the node."
                    }
                };
                meta.fail(
                    format!(
                        "{label} {interp} run was killed: exit {code} ({})",
                        signal_name(*signal)
                    ),
                    remediation,
                )
            }
            Invocation::Exited { code, stderr } => meta
                .fail(
                    format!("{label} {interp} run exited {code}"),
                    "Run the interpreter by hand inside the container and fix the reported error.",
                )
                .with_detail(stderr.as_str()),
            Invocation::TimedOut => meta.warn(
                format!("{label} {interp} run did not finish in time"),
                "A trivial program should finish instantly; check for a scanner holding the process or CPU throttling.",
            ),
            Invocation::NotStaged { reason } => meta.warn(
                format!("could not write a script to the temp dir ({reason})"),
                "Make the temp dir writable so file-based execution can be tested.",
            ),
            Invocation::Failed { reason } => meta.unobserved(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParityOutcome {
    pub inline: Invocation,
    pub file: Invocation,
}

impl Classify for ParityOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        use Invocation::*;
        match (&self.inline, &self.file) {
            (Unavailable { program }, _) | (_, Unavailable { program }) => meta.skipped(program),
            (Ok, Ok) => meta.pass("inline and file-based execution results match"),
            (Ok, Killed { code, signal }) => meta.fail(
                format!(
                    "execution mismatch: inline exits 0 but file-based is killed with exit {code} ({})",
                    signal_name(*signal)
                ),
                DRIFT_REMEDIATION,
            ),
            (Ok, NotStaged { reason }) => {
                meta.unobserved(format!("file-based run not attempted: {reason}"))
            }
            (Ok, other) => meta.fail(
                format!(
                    "execution mismatch: inline exits 0 but file-based gives {}",
                    other.describe()
                ),
                "File-backed processes are treated differently from inline ones; check noexec mounts on the temp dir and runtime security policies.",
            ),
            (inline, Ok) => meta.warn(
                format!(
                    "execution mismatch: file-based exits 0 but inline gives {}",
                    inline.describe()
                ),
                "Inline interpreter invocation is being blocked; check for a policy restricting `-c` style execution.",
            ),
            (inline, file) => meta.warn(
                format!(
                    "interpreter fails in both modes (inline: {}, file-based: {})",
                    inline.describe(),
                    file.describe()
                ),
                "Fix the interpreter itself first; parity cannot be judged while both modes fail.",
            ),
        }
    }
}

pub struct ExecInline;

impl<'a> Probe<WorkloadContext<'a>> for ExecInline {
    fn meta(&self) -> ProbeMeta {
        EXEC_INLINE
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        ExecOutcome {
            mode: Mode::Inline,
            interpreter: ctx.settings.interpreter.clone(),
            invocation: invoke(ctx, Mode::Inline),
        }
        .classify(&EXEC_INLINE)
    }
}

pub struct ExecFile;

impl<'a> Probe<WorkloadContext<'a>> for ExecFile {
    fn meta(&self) -> ProbeMeta {
        EXEC_FILE
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        ExecOutcome {
            mode: Mode::File,
            interpreter: ctx.settings.interpreter.clone(),
            invocation: invoke(ctx, Mode::File),
        }
        .classify(&EXEC_FILE)
    }
}

/// Re-runs both invocations itself so it does not depend on the other two
/// probes having run.
pub struct ExecParity;

impl<'a> Probe<WorkloadContext<'a>> for ExecParity {
    fn meta(&self) -> ProbeMeta {
        EXEC_PARITY
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        ParityOutcome {
            inline: invoke(ctx, Mode::Inline),
            file: invoke(ctx, Mode::File),
        }
        .classify(&EXEC_PARITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::probes::execute;
    use crate::probes::workload::testing::{FakeRunner, context, output, temp_dir};

    /// Inline prints `ok`; any file-based run is SIGKILLed.
    fn drift_runner() -> FakeRunner {
        FakeRunner::new(|_, args| {
            if args.first() == Some(&"-c") {
                assert_eq!(args.get(1), Some(&"print('ok')"));
                Ok(output(0, "ok\n"))
            } else {
                assert!(std::path::Path::new(args[0]).exists(), "script staged");
                let mut out = output(137, "");
                out.signal = Some(9);
                Ok(out)
            }
        })
    }

    #[test]
    fn file_exec_killed_scenario() {
        let root = temp_dir("exec-drift");
        let runner = drift_runner();
        let ctx = context(&runner, &root);

        let inline = execute(&ExecInline, &ctx);
        let file = execute(&ExecFile, &ctx);
        let parity = execute(&ExecParity, &ctx);

        assert_eq!(inline.status, Status::Pass);
        assert_eq!(file.status, Status::Fail);
        assert!(file.message.contains("137"));
        assert_eq!(parity.status, Status::Fail);
        assert!(parity.message.contains("mismatch"));
        assert_ne!(parity.message, file.message);

        let leftovers = std::fs::read_dir(&ctx.scratch_dir).expect("read").count();
        assert_eq!(leftovers, 0, "scratch scripts are removed");
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn healthy_interpreter_passes_all_three() {
        let root = temp_dir("exec-ok");
        let runner = FakeRunner::new(|_, _| Ok(output(0, "ok\n")));
        let ctx = context(&runner, &root);
        assert_eq!(execute(&ExecInline, &ctx).status, Status::Pass);
        assert_eq!(execute(&ExecFile, &ctx).status, Status::Pass);
        let parity = execute(&ExecParity, &ctx);
        assert_eq!(parity.status, Status::Pass);
        assert_eq!(parity.message, "inline and file-based execution results match");
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn shell_reported_137_without_signal_is_still_a_kill() {
        let root = temp_dir("exec-wrapped");
        let runner = FakeRunner::new(|_, args| {
            if args.first() == Some(&"-c") {
                Ok(output(0, "ok"))
            } else {
                let mut out = output(137, "");
                out.signal = None;
                Ok(out)
            }
        });
        let ctx = context(&runner, &root);
        let file = invoke(&ctx, Mode::File);
        assert_eq!(file, Invocation::Killed { code: 137, signal: 9 });
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_interpreter_is_skipped_everywhere() {
        let root = temp_dir("exec-missing");
        let runner = FakeRunner::missing();
        let ctx = context(&runner, &root);
        for probe in [&ExecInline as &dyn Probe<WorkloadContext<'_>>, &ExecFile, &ExecParity] {
            let r = execute(probe, &ctx);
            assert_eq!(r.status, Status::Info, "{}", r.id);
            assert!(r.message.contains("skipped"));
        }
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn shell_interpreter_uses_echo() {
        assert_eq!(snippet("/bin/sh"), ("echo ok", "sh"));
        assert_eq!(snippet("/usr/bin/python3.12"), ("print('ok')", "py"));
    }

    #[test]
    fn both_failing_is_not_reported_as_drift() {
        let r = ParityOutcome {
            inline: Invocation::Exited {
                code: 1,
                stderr: String::new(),
            },
            file: Invocation::Exited {
                code: 1,
                stderr: String::new(),
            },
        }
        .classify(&EXEC_PARITY);
        assert_eq!(r.status, Status::Warn);
        assert!(r.message.contains("both modes"));
    }
}
