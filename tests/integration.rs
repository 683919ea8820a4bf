use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn catalog_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("catalog");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Port 9 (discard) refuses connections, so index calls fail fast.
    let config_content = format!(
        r#"[db]
path = "{}/data/catalog.sqlite"

[index]
url = "http://127.0.0.1:9"
name = "datasets"
timeout_secs = 2
timeout_retries = 0

[sync]
per_page = 2
max_retries = 0
"#,
        root.display()
    );

    let config_path = config_dir.join("catalog.toml");
    fs::write(&config_path, config_content).unwrap();

    let seed = concat!(
        r#"{"id": "d1", "slug": "water-quality", "dcat": {"title": "Water Quality"}, "organization": {"id": "org-1", "name": "EPA", "slug": "epa"}}"#,
        "\n",
        r#"{"slug": "air-quality", "dcat": {"title": "Air Quality"}, "organization": {"id": "org-1", "name": "EPA", "slug": "epa"}, "last_harvested_date": "2024-03-01T12:00:00"}"#,
        "\n"
    );
    fs::write(root.join("datasets.jsonl"), seed).unwrap();

    (tmp, config_path)
}

fn run_catalog(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = catalog_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("OPENSEARCH_HOST")
        .env_remove("CATALOG_LOG")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run catalog binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn seed_path(config_path: &Path) -> String {
    let root = config_path.parent().unwrap().parent().unwrap();
    root.join("datasets.jsonl").to_str().unwrap().to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_catalog(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/catalog.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_catalog(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_catalog(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_seed_loads_records() {
    let (_tmp, config_path) = setup_test_env();
    let seed = seed_path(&config_path);

    run_catalog(&config_path, &["init"]);
    let (stdout, stderr, success) = run_catalog(&config_path, &["seed", &seed]);
    assert!(success, "seed failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Seeded 2 datasets."));
}

#[test]
fn test_seed_replaces_same_id() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("one.jsonl");
    fs::write(
        &file,
        r#"{"id": "d9", "slug": "once", "organization": {"id": "org-1", "name": "EPA", "slug": "epa"}}"#,
    )
    .unwrap();

    run_catalog(&config_path, &["init"]);
    let (_, _, first) = run_catalog(&config_path, &["seed", file.to_str().unwrap()]);
    let (stdout, stderr, second) = run_catalog(&config_path, &["seed", file.to_str().unwrap()]);
    assert!(first);
    assert!(second, "reseed failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_reseed_without_ids_reuses_slug_ids() {
    let (_tmp, config_path) = setup_test_env();
    let seed = seed_path(&config_path);

    run_catalog(&config_path, &["init"]);
    let (_, _, first) = run_catalog(&config_path, &["seed", &seed]);
    let (stdout, stderr, second) = run_catalog(&config_path, &["seed", &seed]);
    assert!(first);
    assert!(second, "reseed failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Seeded 2 datasets."));
}

#[test]
fn test_seed_rejects_bad_line() {
    let (tmp, config_path) = setup_test_env();
    let bad = tmp.path().join("bad.jsonl");
    fs::write(&bad, "{\"slug\": \"x\"}\n").unwrap();

    run_catalog(&config_path, &["init"]);
    let (_, stderr, success) = run_catalog(&config_path, &["seed", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("line 1"), "stderr={}", stderr);
}

#[test]
fn test_single_sync_unknown_dataset() {
    let (_tmp, config_path) = setup_test_env();

    run_catalog(&config_path, &["init"]);
    let (_, stderr, success) = run_catalog(&config_path, &["sync", "no-such-dataset"]);
    assert!(!success);
    assert!(
        stderr.contains("no dataset found with id or slug 'no-such-dataset'"),
        "stderr={}",
        stderr
    );
}

#[test]
fn test_single_sync_rejects_recreate() {
    let (_tmp, config_path) = setup_test_env();

    run_catalog(&config_path, &["init"]);
    let (_, stderr, success) =
        run_catalog(&config_path, &["sync", "water-quality", "--recreate-index"]);
    assert!(!success);
    assert!(stderr.contains("not allowed"), "stderr={}", stderr);
}

#[test]
fn test_sync_fails_when_index_unreachable() {
    let (_tmp, config_path) = setup_test_env();
    let seed = seed_path(&config_path);

    run_catalog(&config_path, &["init"]);
    run_catalog(&config_path, &["seed", &seed]);
    let (stdout, _, success) = run_catalog(&config_path, &["sync"]);
    assert!(!success, "sync should fail without a reachable index");
    assert!(!stdout.contains("Indexed"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_catalog(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_errors() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("catalog.toml");
    fs::write(&config_path, "[db]\npath = \"x.sqlite\"\n[sync]\nper_page = 0\n").unwrap();

    let (_, stderr, success) = run_catalog(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("per_page"), "stderr={}", stderr);
}

#[test]
fn test_unknown_sort_mode_errors() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_catalog(&config_path, &["search", "water", "--sort", "newest"]);
    assert!(!success);
    assert!(stderr.contains("newest"), "stderr={}", stderr);
}
