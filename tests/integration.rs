use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tempfile::TempDir;

fn fincop_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("fincop");
    path
}

fn seed_transactions(path: &Path) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        for stmt in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
            "CREATE TABLE transactions (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), amount REAL, merchant_city TEXT, errors TEXT)",
            "INSERT INTO users VALUES (1, 'Ada'), (2, 'Grace')",
            "INSERT INTO transactions VALUES (1, 1, 12.5, 'Beulah', NULL), (2, 1, 80.0, 'La Verne', 'Insufficient Balance'), (3, 2, 5.25, 'Beulah', NULL)",
        ] {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        pool.close().await;
    });
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    seed_transactions(&data_dir.join("transactions.sqlite"));

    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("world-equity.json"),
        r#"[
  {"content": "Objectives: tracks a global equity index.|||Risk indicator: class 4 of 7.", "product_name": "World Equity ETF", "manufacturer": "Acme AM", "risk_class": "4"},
  {"content": "Costs: ongoing charges of 0.20% per year.", "product_name": "", "manufacturer": "Acme AM"}
]"#,
    )
    .unwrap();
    fs::write(
        docs_dir.join("gold.txt"),
        "Physical gold commodity tracker.|||Recommended holding period: 5 years.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("export.json"),
        r#"[
  {"Chunk": "Short term bond ladder with low duration.", "from": "bond-kid.pdf", "type": "text", "product_name": "Short Bond ETF"},
  {"Chunk": "Past performance does not predict future returns.", "from": "bond-kid.pdf", "type": "text"}
]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/index.sqlite"

[sql]
path = "{root}/data/transactions.sqlite"
max_retries = 1
retry_delay_secs = 0

[retrieval]
index_name = "etf-kid"
top_k = 3

[logging]
level = "warn"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("fincop.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_fincop(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = fincop_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run fincop binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn docs(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("docs")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_creates_index_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fincop(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/index.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_fincop(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_fincop(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sql_discover_prints_schema() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fincop(&config_path, &["sql", "discover"]);
    assert!(success, "discover failed: {}", stderr);
    assert!(stdout.contains(
        "Table: transactions | Columns: [id INTEGER (PK), user_id INTEGER, amount REAL, merchant_city TEXT, errors TEXT] | Foreign Keys: [fk_transactions_0 -> users]"
    ));
    assert!(stdout.contains("Table: users | Columns: [id INTEGER (PK), name TEXT]"));
}

#[test]
fn test_sql_query_returns_rows() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fincop(
        &config_path,
        &[
            "sql",
            "query",
            "SELECT merchant_city, COUNT(*) AS n FROM transactions GROUP BY merchant_city ORDER BY n DESC",
        ],
    );
    assert!(success, "query failed: {}", stderr);

    let rows: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows[0]["merchant_city"], "Beulah");
    assert_eq!(rows[0]["n"], 2);
}

#[test]
fn test_sql_query_error_reports_no_result() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_fincop(
        &config_path,
        &["sql", "query", "SELECT TOP 1 * FROM transactions"],
    );
    assert!(success);
    assert_eq!(stdout.trim(), "No Result Found");
}

#[test]
fn test_sql_missing_database_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_file(tmp.path().join("data/transactions.sqlite")).unwrap();

    let (_, stderr, success) = run_fincop(&config_path, &["sql", "discover"]);
    assert!(!success);
    assert!(stderr.contains("Failed to connect to the database after multiple attempts"));
}

#[test]
fn test_index_create_search_remove() {
    let (_tmp, config_path) = setup_test_env();
    let equity = docs(&config_path, "world-equity.json");
    let gold = docs(&config_path, "gold.txt");

    let (stdout, stderr, success) =
        run_fincop(&config_path, &["index", "create", &equity, &gold]);
    assert!(success, "create failed: {}", stderr);
    assert!(stdout.contains("Created index 'etf-kid'"));

    let (stdout, _, _) = run_fincop(&config_path, &["index", "count"]);
    assert!(stdout.contains("records: 2"));

    let (stdout, stderr, success) =
        run_fincop(&config_path, &["search", "ongoing charges", "--top", "1"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("world-equity.json"));
    assert!(stdout.contains("product_name: World Equity ETF"));
    assert!(!stdout.contains("2. ["));

    let (stdout, _, success) = run_fincop(&config_path, &["index", "remove", &equity]);
    assert!(success);
    assert!(stdout.contains("Removed 1 records."));

    let (stdout, _, _) = run_fincop(&config_path, &["search", "ongoing charges"]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_index_add_creates_missing_index() {
    let (_tmp, config_path) = setup_test_env();
    let gold = docs(&config_path, "gold.txt");

    let (stdout, stderr, success) = run_fincop(&config_path, &["index", "add", &gold]);
    assert!(success, "add failed: {}", stderr);
    assert!(stdout.contains("Uploaded 1 records to 'etf-kid'."));

    let (stdout, _, _) = run_fincop(&config_path, &["index", "count", "--file", "gold.txt"]);
    assert!(stdout.contains("records: 1"));
}

#[test]
fn test_load_json_into_named_index() {
    let (_tmp, config_path) = setup_test_env();
    let export = docs(&config_path, "export.json");

    let (stdout, stderr, success) = run_fincop(
        &config_path,
        &["--index", "bonds", "index", "load-json", &export],
    );
    assert!(success, "load-json failed: {}", stderr);
    assert!(stdout.contains("Loaded 2 records into 'bonds'."));

    let (stdout, _, _) = run_fincop(&config_path, &["index", "list"]);
    assert!(stdout.contains("bonds"));

    let (stdout, _, _) = run_fincop(&config_path, &["--index", "bonds", "search", "bond duration"]);
    assert!(stdout.contains("bond-kid.pdf"));
    assert!(stdout.contains("product_name: Short Bond ETF"));
}

#[test]
fn test_ask_requires_chat_model() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_fincop(&config_path, &["ask", "How many transactions?"]);
    assert!(!success);
    assert!(stderr.contains("Chat needs a model"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_fincop(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
