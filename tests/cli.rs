use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn chat_rag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_chat-rag"))
}

const THREADS_CSV: &str = r#"chat,messages_json
tbilisi,"[{""id"": 223, ""date_unixtime"": ""1648808078"", ""text"": ""How much is a flat in Tbilisi?""}, {""id"": 239, ""date_unixtime"": ""1648817374"", ""text"": [""About "", {""type"": ""bold"", ""text"": ""400$""}], ""reply_to_message_id"": 223}]"
broken,not json
empty,"[{""id"": 5, ""text"": ""   ""}]"
plumber,"[{""id"": 2, ""text"": ""Can anyone recommend a plumber?""}]"
"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(root.join("threads.csv"), THREADS_CSV).unwrap();
    fs::write(root.join("other.csv"), "chat,text\ngeneral,hello\n").unwrap();
    fs::write(root.join("notes.txt"), "not a table").unwrap();

    let config_content = r#"[vector_store]
backend = "memory"

[embedding]
provider = "disabled"
"#;
    let config_path = config_dir.join("chat-rag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_chat_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = chat_rag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("WEAVIATE_URL")
        .env_remove("OPENAI_BASE_URL")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run chat-rag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn data_path(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .and_then(Path::parent)
        .unwrap()
        .join(name)
        .to_string_lossy()
        .into_owned()
}

#[test]
fn test_index_dry_run_prints_documents() {
    let (_tmp, config_path) = setup_test_env();
    let file = data_path(&config_path, "threads.csv");

    let (stdout, stderr, success) = run_chat_rag(&config_path, &["index", &file, "--dry-run"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);

    let docs: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(docs.len(), 2);

    assert_eq!(
        docs[0]["content"],
        "How much is a flat in Tbilisi?\nAbout  400$"
    );
    assert_eq!(docs[0]["original_df_index"], 0);
    assert_eq!(docs[0]["start_time"], 1648808078);
    assert_eq!(docs[0]["end_time"], 1648817374);
    assert_eq!(docs[0]["message_ids"], "[223, 239]");

    assert_eq!(docs[1]["original_df_index"], 3);
    assert!(docs[1]["start_time"].is_null());
    assert_eq!(docs[1]["message_ids"], "[2]");
}

#[test]
fn test_index_missing_column_fails() {
    let (_tmp, config_path) = setup_test_env();
    let file = data_path(&config_path, "other.csv");

    let (_, stderr, success) = run_chat_rag(&config_path, &["index", &file, "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("'messages_json'"), "stderr={}", stderr);
}

#[test]
fn test_index_rejects_unknown_file_type() {
    let (_tmp, config_path) = setup_test_env();
    let file = data_path(&config_path, "notes.txt");

    let (_, stderr, success) = run_chat_rag(&config_path, &["index", &file, "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("Invalid file type"), "stderr={}", stderr);
}

#[test]
fn test_index_with_disabled_embeddings_counts_failures() {
    let (_tmp, config_path) = setup_test_env();
    let file = data_path(&config_path, "threads.csv");

    let (stdout, stderr, success) = run_chat_rag(&config_path, &["index", &file]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("rows: 4"));
    assert!(stdout.contains("documents: 2"));
    assert!(stdout.contains("indexed: 0"));
    assert!(stdout.contains("failed: 2"));
}

#[test]
fn test_health_with_memory_store() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_chat_rag(&config_path, &["health"]);
    assert!(success, "health failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("backend: memory"));
    assert!(stdout.contains("ready: true"));
}

#[test]
fn test_health_unreachable_weaviate() {
    let (tmp, _) = setup_test_env();
    let config_path = tmp.path().join("config").join("weaviate.toml");
    fs::write(
        &config_path,
        "[vector_store]\nurl = \"http://127.0.0.1:9\"\nready_timeout_secs = 1\n",
    )
    .unwrap();

    let (stdout, _, success) = run_chat_rag(&config_path, &["health"]);
    assert!(!success);
    assert!(stdout.contains("ready: false"));
}

#[test]
fn test_clear_with_memory_store() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_chat_rag(&config_path, &["clear"]);
    assert!(success, "clear failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("class: ChatThread"));
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _) = setup_test_env();
    let config_path = tmp.path().join("config").join("bad.toml");
    fs::write(&config_path, "[retrieval]\ndefault_top_k = 0\n").unwrap();

    let (_, stderr, success) = run_chat_rag(&config_path, &["health"]);
    assert!(!success);
    assert!(stderr.contains("default_top_k"));
}
