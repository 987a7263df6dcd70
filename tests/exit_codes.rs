use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn doctor_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_agent-doctor"));
    cmd.env("HOME", home);
    for (key, _) in std::env::vars() {
        if key.starts_with("AGENT_DOCTOR_") {
            cmd.env_remove(key);
        }
    }
    cmd.env_remove("KUBECONFIG");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    doctor_cmd(home).args(args).output().expect("run agent-doctor")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);

    let temp = std::env::temp_dir();
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let uniq = format!("agent-doctor-exit-test-{}-{seq}", std::process::id());
    let home = temp.join(uniq);
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

#[cfg(unix)]
fn write_script(path: &Path, script: &str) {
    use std::os::unix::fs::PermissionsExt;

    write_file(path, script.as_bytes());
    let mut perms = std::fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod");
}

#[test]
fn unknown_flag_exits_with_invalid_args() {
    let home = make_temp_home();
    let out = run(&home, &["check", "--definitely-not-a-flag"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn zero_timeout_is_rejected() {
    let home = make_temp_home();
    let out = run(&home, &["--timeout", "0", "check"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("--timeout"), "stderr={stderr}");
}

#[test]
fn broken_config_file_is_invalid_args() {
    let home = make_temp_home();
    write_file(
        home.join(".config/agent-doctor/config.toml").as_path(),
        b"[probes]\nheadroom_warn_percent = \"eighty\"\n",
    );
    let out = run(&home, &["config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("config"), "stderr={stderr}");
}

#[cfg(unix)]
#[test]
fn unreachable_control_plane_is_run_fatal() {
    let home = make_temp_home();
    let kubectl = home.join("bin/kubectl");
    write_script(
        &kubectl,
        r#"#!/bin/sh
echo "The connection to the server 10.0.0.1:443 was refused - did you specify the right host or port?" >&2
exit 1
"#,
    );

    let out = run(
        &home,
        &["--no-color", "check", "--kubectl", kubectl.to_str().unwrap()],
    );
    assert_eq!(
        out.status.code(),
        Some(1),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("could not complete diagnosis"), "stdout={stdout}");
    assert!(stdout.contains("phase:  cluster"), "stdout={stdout}");
    assert!(!stdout.contains("remediation:"), "stdout={stdout}");
}

#[cfg(unix)]
#[test]
fn missing_kubectl_is_run_fatal_with_install_hint() {
    let home = make_temp_home();
    let missing = home.join("bin/no-such-kubectl");

    let out = run(
        &home,
        &["--json", "check", "--kubectl", missing.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(1));

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v["verdict"], "FAIL");
    assert_eq!(v["fatal"]["phase"], "cluster");
    assert!(
        v["fatal"]["hint"]
            .as_str()
            .unwrap_or_default()
            .contains("--kubectl")
    );
}
