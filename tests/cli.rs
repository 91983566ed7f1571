//! CLI smoke tests: run the built binary against a scratch config.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn lectern_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("lectern");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/lectern.sqlite"

[storage]
root = "{root}/files"

[server]
bind = "127.0.0.1:0"

[chunking]
window_chars = 300
overlap_chars = 60

[retrieval]
min_score = 0.1
"#,
        root = root.display()
    );

    let config_path = root.join("config/lectern.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_lectern(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = lectern_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lectern binary at {:?}: {}", binary, e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn init_creates_the_database() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, ok) = run_lectern(&config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/lectern.sqlite").exists());

    // Idempotent.
    let (_, stderr, ok) = run_lectern(&config_path, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn search_on_empty_course_reports_nothing_found() {
    let (_tmp, config_path) = setup_test_env();
    run_lectern(&config_path, &["init"]);

    let (stdout, stderr, ok) = run_lectern(&config_path, &["search", "1", "what is calculus"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("did not find this in your materials"));
    assert!(stdout.contains("\"citations\": []"));
}

#[test]
fn get_unknown_document_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_lectern(&config_path, &["init"]);

    let (_, stderr, ok) = run_lectern(&config_path, &["get", "no-such-id"]);
    assert!(!ok);
    assert!(stderr.contains("no document"));
}

#[test]
fn ingest_unknown_document_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_lectern(&config_path, &["init"]);

    let (_, _, ok) = run_lectern(&config_path, &["ingest", "no-such-id"]);
    assert!(!ok);
}
