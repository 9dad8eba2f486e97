use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn meridian_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("meridian");
    path
}

fn run_meridian(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = meridian_binary();
    let output: Output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run meridian binary at {:?}: {}", binary, e));

    (String::from_utf8_lossy(&output.stdout).to_string(), String::from_utf8_lossy(&output.stderr).to_string(), output.status.success())
}

fn write_config(root: &Path, port: u16) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"
[global]
data_root = "{data_root}"
log_level = "info"

[data_manager]
embedding_provider = "disabled"
embedding_dim = 0
chunk_size = 500
chunk_overlap = 50

[a2rchi]
safety_enabled = false

[a2rchi.runtime]
retrieval_k = 5

[services]
host = "127.0.0.1"
port = {port}
cors_any = true

[sources]
uploads_enabled = true
"#,
        data_root = root.join("data").display(),
        port = port,
    );

    let config_path = config_dir.join("meridian.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn find_free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

#[test]
fn init_creates_database() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), find_free_port());

    let (stdout, stderr, success) = run_meridian(&config_path, &["init"]);
    assert!(success, "init failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("initialized"));

    let db_path = tmp.path().join("data").join("meridian.db");
    assert!(db_path.exists());
}

#[test]
fn init_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), find_free_port());

    let (_, _, first) = run_meridian(&config_path, &["init"]);
    assert!(first);
    let (_, _, second) = run_meridian(&config_path, &["init"]);
    assert!(second, "second init should succeed against an already-migrated database");
}

#[test]
fn gc_on_empty_catalog_removes_nothing() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), find_free_port());

    run_meridian(&config_path, &["init"]);
    let (stdout, stderr, success) = run_meridian(&config_path, &["gc"]);
    assert!(success, "gc failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("removed 0"));
}

#[test]
fn sync_rejects_unknown_source_name() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), find_free_port());

    run_meridian(&config_path, &["init"]);
    let (_, stderr, success) = run_meridian(&config_path, &["sync", "nonexistent"]);
    assert!(!success, "sync of an unconfigured source name should fail");
    assert!(stderr.contains("nonexistent"));
}

fn wait_for_health(port: u16) {
    let url = format!("http://127.0.0.1:{port}/health");
    for _ in 0..50 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("server did not become ready in time");
}

#[test]
fn serve_exposes_health_endpoint() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(tmp.path(), port);

    run_meridian(&config_path, &["init"]);

    let mut server = Command::new(meridian_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    wait_for_health(port);

    let resp = reqwest::blocking::get(format!("http://127.0.0.1:{port}/health")).unwrap();
    assert_eq!(resp.status(), 200);

    server.kill().ok();
    server.wait().ok();
}

#[test]
fn serve_runtime_config_requires_admin_token_when_configured() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(tmp.path(), port);

    run_meridian(&config_path, &["init"]);

    let mut server = Command::new(meridian_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    wait_for_health(port);

    // no admin_token configured, so the endpoint accepts unauthenticated patches
    let client = reqwest::blocking::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{port}/admin/runtime-config"))
        .json(&serde_json::json!({ "temperature": 0.7 }))
        .send()
        .unwrap();
    assert!(resp.status().is_success());

    server.kill().ok();
    server.wait().ok();
}
