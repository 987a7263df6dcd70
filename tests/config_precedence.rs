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
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    doctor_cmd(home).args(args).output().expect("run agent-doctor")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);

    let temp = std::env::temp_dir();
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let uniq = format!("agent-doctor-config-test-{}-{seq}", std::process::id());
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

fn show(home: &Path, extra: &[&str]) -> serde_json::Value {
    let mut args = extra.to_vec();
    args.extend(["config", "--show", "--json"]);
    let out = run(home, &args);
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("parse json")
}

#[test]
fn defaults_apply_without_a_config_file() {
    let home = make_temp_home();
    let v = show(&home, &[]);
    assert_eq!(v["target"]["namespace"], "default");
    assert_eq!(v["target"]["selector"], "app.kubernetes.io/name=agent");
    assert_eq!(v["probes"]["headroom_warn_percent"], 80);
    assert_eq!(v["probes"]["interpreter"], "python3");
    assert_eq!(v["cluster"]["min_supported_minor"], 29);
    assert!(v["config_path"].is_null());
}

#[test]
fn home_config_file_overrides_defaults() {
    let home = make_temp_home();
    write_file(
        home.join(".config/agent-doctor/config.toml").as_path(),
        br#"
[target]
namespace = "agents"

[probes]
interpreter = "python3.11"
required_env = ["ACCOUNT_ID"]

[cloud]
provider = "azure"
"#,
    );

    let v = show(&home, &[]);
    assert_eq!(v["target"]["namespace"], "agents");
    assert_eq!(v["probes"]["interpreter"], "python3.11");
    assert_eq!(v["probes"]["required_env"], serde_json::json!(["ACCOUNT_ID"]));
    assert_eq!(v["cloud"]["provider"], "azure");
    assert!(
        v["config_path"]
            .as_str()
            .unwrap_or_default()
            .ends_with(".config/agent-doctor/config.toml")
    );
}

#[test]
fn explicit_config_flag_beats_env_and_home_file() {
    let home = make_temp_home();
    write_file(
        home.join(".config/agent-doctor/config.toml").as_path(),
        b"[target]\nnamespace = \"from-home\"\n",
    );
    let env_file = home.join("env.toml");
    write_file(&env_file, b"[target]\nnamespace = \"from-env\"\n");
    let flag_file = home.join("flag.toml");
    write_file(&flag_file, b"[target]\nnamespace = \"from-flag\"\n");

    let out = doctor_cmd(&home)
        .env("AGENT_DOCTOR_CONFIG", &env_file)
        .args(["config", "--show", "--json"])
        .output()
        .expect("run agent-doctor");
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v["target"]["namespace"], "from-env");

    let out = doctor_cmd(&home)
        .env("AGENT_DOCTOR_CONFIG", &env_file)
        .arg("--config")
        .arg(&flag_file)
        .args(["config", "--show", "--json"])
        .output()
        .expect("run agent-doctor");
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v["target"]["namespace"], "from-flag");
}

#[test]
fn unknown_keys_are_rejected() {
    let home = make_temp_home();
    write_file(
        home.join(".config/agent-doctor/config.toml").as_path(),
        b"[probes]\ninterpretor = \"python3\"\n",
    );
    let out = run(&home, &["config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn inverted_version_window_is_rejected() {
    let home = make_temp_home();
    write_file(
        home.join(".config/agent-doctor/config.toml").as_path(),
        b"[cluster]\nmin_supported_minor = 33\nmax_validated_minor = 30\n",
    );
    let out = run(&home, &["config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("min_supported_minor"), "stderr={stderr}");
}

#[test]
fn text_show_is_toml() {
    let home = make_temp_home();
    let out = run(&home, &["config", "--show"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("[probes]"), "stdout={stdout}");
    assert!(stdout.contains("interpreter = \"python3\""), "stdout={stdout}");
}
