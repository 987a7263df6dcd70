use anyhow::Error;
use std::fmt::Write as _;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{Origin, RunReport, ScopeSnapshot, Status, Verdict};
use crate::local::LocalReport;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - re-run with `--verbose` for more detail");
    let _ = writeln!(stderr, "  - see `--help` for the available commands and options");
}

pub fn print_report(report: &RunReport, cfg: &UiConfig) -> io::Result<()> {
    if cfg.quiet && report.verdict == Verdict::Pass {
        return Ok(());
    }
    write_stdout(&render_report(report, cfg.color, cfg.verbose))
}

pub fn print_local_report(report: &LocalReport, cfg: &UiConfig) -> io::Result<()> {
    if cfg.quiet && !report.workload.has_fail() {
        return Ok(());
    }
    write_stdout(&render_local_report(report, cfg.color, cfg.verbose))
}

fn write_stdout(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    match stdout.write_all(text.as_bytes()) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

pub fn render_report(report: &RunReport, color: bool, verbose: bool) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "agent-doctor {} ({})",
        report.tool_version, report.generated_at
    );
    match &report.target {
        Some(t) => {
            let _ = write!(out, "target:  {}/{}", t.namespace, t.pod);
            if let Some(c) = &t.container {
                let _ = write!(out, " container {c}");
            }
            if let Some(n) = &t.node {
                let _ = write!(out, " on {n}");
            }
            out.push('\n');
        }
        None => out.push_str("target:  (not resolved)\n"),
    }
    let _ = writeln!(out, "verdict: {}", format_verdict(report.verdict, color));

    if let Some(fatal) = &report.fatal {
        out.push('\n');
        let _ = writeln!(out, "{}", paint("could not complete diagnosis", "31", color));
        let _ = writeln!(out, "  phase:  {}", fatal.phase.as_str());
        let _ = writeln!(out, "  reason: {}", fatal.reason);
        let _ = writeln!(out, "  hint:   {}", fatal.hint);
        out.push('\n');
        out.push_str("evidence collected before the failure:\n");
        for r in &report.cluster.results {
            write_result_line(&mut out, r.status, &r.id, &r.message, color);
            if verbose && let Some(detail) = &r.detail {
                write_detail(&mut out, detail);
            }
        }
        out.push('\n');
        write_tallies(&mut out, &report.cluster, report.workload.as_ref());
        return out;
    }

    out.push('\n');
    write_confirmations(&mut out, &report.cluster, "cluster", color, verbose);
    match &report.workload {
        Some(w) => write_confirmations(&mut out, w, "workload", color, verbose),
        None => out.push_str("workload: not run (--cluster-only)\n\n"),
    }

    if !report.diagnoses.is_empty() {
        out.push_str("diagnoses:\n");
        for d in &report.diagnoses {
            let _ = writeln!(
                out,
                "  {}  {}  {}",
                pad_end_ansi(&format_status(d.status, color), 4),
                d.id,
                d.title
            );
            let _ = writeln!(out, "        {}", d.summary);
            let evidence: Vec<String> = d
                .evidence
                .iter()
                .map(|e| format!("{}/{}", e.scope, e.id))
                .collect();
            let _ = writeln!(out, "        evidence: {}", evidence.join(", "));
        }
        out.push('\n');
    }

    if report.remediation.is_empty() {
        out.push_str("remediation: nothing to fix\n");
    } else {
        out.push_str("remediation:\n");
        let width = report.remediation.len().to_string().len();
        for (i, item) in report.remediation.iter().enumerate() {
            let origin = match item.origin {
                Origin::Diagnosis => "diagnosis",
                Origin::Cluster => "cluster",
                Origin::Workload => "workload",
            };
            let _ = writeln!(
                out,
                "  {:>width$}. {} [{origin}] {}: {}",
                i + 1,
                pad_end_ansi(&format_status(item.status, color), 4),
                item.id,
                item.message,
            );
            let _ = writeln!(out, "  {:>width$}  -> {}", "", item.remediation);
        }
    }
    out.push('\n');

    write_tallies(&mut out, &report.cluster, report.workload.as_ref());
    out
}

pub fn render_local_report(report: &LocalReport, color: bool, verbose: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "agent-probe {} ({})",
        report.tool_version, report.generated_at
    );
    out.push('\n');
    for r in &report.workload.results {
        write_result_line(&mut out, r.status, &r.id, &r.message, color);
        if verbose && let Some(detail) = &r.detail {
            write_detail(&mut out, detail);
        }
        if let Some(fix) = &r.remediation {
            let _ = writeln!(out, "        -> {fix}");
        }
    }
    out.push('\n');
    write_tallies(&mut out, &report.workload, None);
    out
}

fn write_confirmations(
    out: &mut String,
    snap: &ScopeSnapshot,
    label: &str,
    color: bool,
    verbose: bool,
) {
    let _ = writeln!(out, "{label}:");
    let mut any = false;
    for r in snap.results.iter().filter(|r| !r.status.is_issue()) {
        any = true;
        write_result_line(out, r.status, &r.id, &r.message, color);
        if verbose && let Some(detail) = &r.detail {
            write_detail(out, detail);
        }
    }
    if !any {
        out.push_str("  (no passing checks)\n");
    }
    let issues = snap.issues.len();
    if issues > 0 {
        let _ = writeln!(
            out,
            "  {issues} issue{} listed under remediation",
            if issues == 1 { "" } else { "s" }
        );
    }
    out.push('\n');
}

fn write_result_line(out: &mut String, status: Status, id: &str, message: &str, color: bool) {
    let _ = writeln!(
        out,
        "  {}  {}  {}",
        pad_end_ansi(&format_status(status, color), 4),
        pad_end_ansi(id, 28),
        message
    );
}

fn write_detail(out: &mut String, detail: &str) {
    for line in detail.lines() {
        let _ = writeln!(out, "        | {line}");
    }
}

fn write_tallies(out: &mut String, cluster: &ScopeSnapshot, workload: Option<&ScopeSnapshot>) {
    out.push_str("summary:\n");
    for snap in std::iter::once(cluster).chain(workload) {
        let c = snap.counts;
        let _ = writeln!(
            out,
            "  {}  pass {}  info {}  warn {}  fail {}",
            pad_end_ansi(snap.scope.as_str(), 8),
            c.pass,
            c.info,
            c.warn,
            c.fail
        );
    }
}

pub fn format_status(status: Status, color: bool) -> String {
    let code = match status {
        Status::Pass => "32",
        Status::Info => "90",
        Status::Warn => "33",
        Status::Fail => "31",
    };
    paint(status.as_str(), code, color)
}

fn format_verdict(verdict: Verdict, color: bool) -> String {
    match verdict {
        Verdict::Pass => paint("PASS", "32", color),
        Verdict::Fail => paint("FAIL", "31", color),
    }
}

fn paint(s: &str, code: &str, color: bool) -> String {
    if color {
        format!("\x1b[{code}m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        return format!("{bytes} B");
    }
    if b < MB {
        return format!("{:.1} KiB", b / KB);
    }
    if b < GB {
        return format!("{:.1} MiB", b / MB);
    }
    if b < TB {
        return format!("{:.1} GiB", b / GB);
    }
    format!("{:.1} TiB", b / TB)
}
