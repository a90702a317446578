use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kmpi_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kmpi");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Search points at a closed port; none of these commands talk to it.
    let config_content = format!(
        r#"[db]
path = "{}/data/kmpi.sqlite"

[search]
base_url = "http://127.0.0.1:9"
page_size = 10

[logging]
level = "warn"
format = "json"
"#,
        root.display()
    );

    let config_path = config_dir.join("kmpi.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kmpi(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kmpi_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kmpi binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kmpi(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/kmpi.sqlite").exists());

    let (_, stderr, success) = run_kmpi(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_enqueue_ban_stats_drain() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_kmpi(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);

    let (stdout, stderr, success) =
        run_kmpi(&config_path, &["enqueue", "io.ktor:ktor-io:3.0.0"]);
    assert!(success, "enqueue failed: {}", stderr);
    assert!(stdout.contains("enqueued io.ktor:ktor-io:3.0.0"));

    let (stdout, _, success) = run_kmpi(&config_path, &["enqueue", "io.ktor:ktor-io:3.0.0"]);
    assert!(success);
    assert!(stdout.contains("already queued"));

    run_kmpi(&config_path, &["enqueue", "com.spam:junk:1.0"]);
    let (stdout, stderr, success) = run_kmpi(&config_path, &["ban", "com.spam"]);
    assert!(success, "ban failed: {}", stderr);
    assert!(stdout.contains("banned group com.spam"));

    let (stdout, stderr, success) = run_kmpi(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("KMP Indexer Queue Stats"));
    assert!(stdout.contains("Pending:     2"));
    assert!(stdout.contains("Bans:        1"));

    let (stdout, stderr, success) = run_kmpi(&config_path, &["drain"]);
    assert!(success, "drain failed: {}", stderr);
    assert!(stdout.contains("indexed: 1"), "{}", stdout);
    assert!(stdout.contains("removed: 1"), "{}", stdout);

    let (stdout, _, _) = run_kmpi(&config_path, &["stats"]);
    assert!(stdout.contains("Pending:     1"));
    assert!(stdout.contains("Indexed:     1 versions of 1 artifacts"));
}

#[test]
fn test_reindex_after_indexing() {
    let (_tmp, config_path) = setup_test_env();
    run_kmpi(&config_path, &["init"]);
    run_kmpi(&config_path, &["enqueue", "io.ktor:ktor-io:3.0.0"]);
    run_kmpi(&config_path, &["drain"]);

    let (stdout, _, success) =
        run_kmpi(&config_path, &["enqueue", "io.ktor:ktor-io:3.0.0", "--reindex"]);
    assert!(success);
    assert!(stdout.contains("(reindex)"));

    let (stdout, stderr, success) = run_kmpi(&config_path, &["drain"]);
    assert!(success, "drain failed: {}", stderr);
    assert!(stdout.contains("indexed: 1"));
    assert!(stdout.contains("removed: 1"));
}

#[test]
fn test_bad_input_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_kmpi(&config_path, &["init"]);

    let (_, stderr, success) = run_kmpi(&config_path, &["enqueue", "io.ktor:ktor-io"]);
    assert!(!success);
    assert!(stderr.contains("group:artifact:version"), "{}", stderr);

    let (_, _, success) = run_kmpi(&config_path, &["discover", "--since", "yesterday"]);
    assert!(!success);
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, success) = run_kmpi(Path::new("/nonexistent/kmpi.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
