use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

fn doctor_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_agent-doctor"));
    cmd.env("HOME", home);
    for (key, _) in std::env::vars() {
        if key.starts_with("AGENT_DOCTOR_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);

    let temp = std::env::temp_dir();
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let uniq = format!("agent-doctor-env-test-{}-{seq}", std::process::id());
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

#[test]
fn env_overrides_config_file() {
    let home = make_temp_home();
    write_file(
        home.join(".config/agent-doctor/config.toml").as_path(),
        br#"
[target]
namespace = "from-file"

[probes]
headroom_warn_percent = 70
"#,
    );

    let out = doctor_cmd(&home)
        .env("AGENT_DOCTOR_TARGET_NAMESPACE", "from-env")
        .env("AGENT_DOCTOR_PROBES_REQUIRED_ENV", "ACCOUNT_ID, AGENT_ID,")
        .env("AGENT_DOCTOR_CLOUD_PROVIDER", "EKS")
        .env("AGENT_DOCTOR_UI_COLOR", "off")
        .args(["config", "--show", "--json"])
        .output()
        .expect("run agent-doctor");
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v["target"]["namespace"], "from-env");
    assert_eq!(v["probes"]["headroom_warn_percent"], 70);
    assert_eq!(
        v["probes"]["required_env"],
        serde_json::json!(["ACCOUNT_ID", "AGENT_ID"])
    );
    assert_eq!(v["cloud"]["provider"], "aws");
    assert_eq!(v["ui"]["color"], false);
}

#[test]
fn invalid_env_values_are_invalid_args() {
    let home = make_temp_home();
    for (key, value) in [
        ("AGENT_DOCTOR_UI_COLOR", "sometimes"),
        ("AGENT_DOCTOR_PROBES_HEADROOM_WARN_PERCENT", "150"),
        ("AGENT_DOCTOR_CLOUD_PROVIDER", "gcp"),
    ] {
        let out = doctor_cmd(&home)
            .env(key, value)
            .args(["config", "--show"])
            .output()
            .expect("run agent-doctor");
        assert_eq!(out.status.code(), Some(2), "{key}={value}");
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert!(stderr.contains(key) || stderr.contains("headroom"), "stderr={stderr}");
    }
}
