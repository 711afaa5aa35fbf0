use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use garage_inventory::config::load_config;
use garage_inventory::items::{create_item, ItemFields};
use garage_inventory::{db, sessions};

fn garage_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("garage");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/garage.sqlite"

[storage]
data_dir = "{root}/data"

[server]
bind = "127.0.0.1:7332"

[detector]
provider = "stub"
label = "wrench"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("garage.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_garage(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = garage_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run garage binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_garage(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/garage.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_garage(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_garage(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_items_empty_inventory() {
    let (_tmp, config_path) = setup_test_env();
    run_garage(&config_path, &["init"]);

    let (stdout, stderr, success) = run_garage(&config_path, &["items"]);
    assert!(success, "items failed: stderr={}", stderr);
    assert!(stdout.contains("No items."));
}

#[test]
fn test_sessions_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_garage(&config_path, &["init"]);

    let (stdout, _, success) = run_garage(&config_path, &["sessions"]);
    assert!(success);
    assert!(stdout.contains("No capture sessions."));
}

#[test]
fn test_review_unknown_session_has_no_proposals() {
    let (_tmp, config_path) = setup_test_env();
    run_garage(&config_path, &["init"]);

    let (stdout, _, success) = run_garage(&config_path, &["review", "nosuchsession"]);
    assert!(success);
    assert!(stdout.contains("No proposals for session nosuchsession."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_garage(&missing, &["items"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, config_path) = setup_test_env();
    let mut content = fs::read_to_string(&config_path).unwrap();
    content.push_str("\n[stream]\nqueue_capacity = 0\n");
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, content).unwrap();

    let (_, stderr, success) = run_garage(&bad, &["init"]);
    assert!(!success);
    assert!(stderr.contains("queue_capacity"));
}

#[tokio::test]
async fn test_items_filtered_by_zone() {
    let (_tmp, config_path) = setup_test_env();
    run_garage(&config_path, &["init"]);

    let cfg = load_config(&config_path).unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    let mut drill = ItemFields::named("Cordless drill");
    drill.zone = Some("bench".to_string());
    drill.category = Some("Tools".to_string());
    create_item(&pool, drill).await.unwrap();
    let mut glue = ItemFields::named("Wood glue");
    glue.zone = Some("shelf".to_string());
    create_item(&pool, glue).await.unwrap();
    pool.close().await;

    let (stdout, _, success) = run_garage(&config_path, &["items", "--zone", "bench"]);
    assert!(success);
    assert!(stdout.contains("Cordless drill"));
    assert!(!stdout.contains("Wood glue"));
    assert!(stdout.contains("1 item(s)"));

    let (stdout, _, success) = run_garage(&config_path, &["items"]);
    assert!(success);
    assert!(stdout.contains("2 item(s)"));
}

#[tokio::test]
async fn test_sessions_lists_started_session() {
    let (_tmp, config_path) = setup_test_env();
    run_garage(&config_path, &["init"]);

    let cfg = load_config(&config_path).unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    let session = sessions::start_session(&pool).await.unwrap();
    pool.close().await;

    let (stdout, _, success) = run_garage(&config_path, &["sessions"]);
    assert!(success);
    assert!(stdout.contains(&session.id));
    assert!(stdout.contains("running"));
}
