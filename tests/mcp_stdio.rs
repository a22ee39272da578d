use std::path::{Path, PathBuf};

use docsift::{ConfigDb, config_db::Setting};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(data_dir: &Path, corpus_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(corpus_dir)?;
    std::fs::write(
        corpus_dir.join("budget.pdf.md"),
        "# Quarterly budget\n\nThe quarterly budget grows by four percent.\n",
    )?;
    std::fs::write(
        corpus_dir.join("standup.mp4.transcript.md"),
        "[00:00:05] Morning everyone.\n[00:00:20] The deploy went out last night.\n",
    )?;

    let config_db = ConfigDb::open(&data_dir.join("config.redb"))?;
    config_db.set(Setting::CorpusRoot, corpus_dir.to_str().unwrap())?;
    drop(config_db);

    let status = std::process::Command::new(docsift_bin()?)
        .arg("build")
        .env("DOCSIFT_DATA_DIR", data_dir)
        .env("DOCSIFT_EMBEDDER", "hashing")
        .status()?;
    assert!(status.success(), "docsift build failed: {status}");
    Ok(())
}

async fn call(
    client: &rmcp::service::RunningService<rmcp::RoleClient, ()>,
    name: &'static str,
    args: serde_json::Value,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new(name)
                .with_arguments(args.as_object().cloned().unwrap_or_default()),
        )
        .await?;
    assert_eq!(result.is_error, Some(false));
    Ok(result.structured_content.expect("structured content"))
}

#[tokio::test]
async fn mcp_stdio_retrieve_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    let data_dir = tempdir.path().join("data");
    std::fs::create_dir_all(&data_dir)?;
    setup_fixture(&data_dir, &tempdir.path().join("corpus"))?;

    let transport = TokioChildProcess::new(
        tokio::process::Command::new(docsift_bin()?).configure(|cmd| {
            cmd.arg("mcp")
                .env("DOCSIFT_DATA_DIR", &data_dir)
                .env("DOCSIFT_EMBEDDER", "hashing");
        }),
    )?;
    let client = ().serve(transport).await?;

    let response = call(
        &client,
        "docsift_retrieve",
        json!({ "query": "quarterly budget", "limit": 3 }),
    )
    .await?;
    assert_eq!(response["status"], "ok");
    let items = response["items"].as_array().expect("items array");
    assert!(!items.is_empty());
    assert_eq!(items[0]["doc_name"], "budget.pdf");
    assert_eq!(items[0]["rank"], 1);
    assert_eq!(items[0]["heading_path"], json!(["Quarterly budget"]));

    let response = call(
        &client,
        "docsift_retrieve",
        json!({ "query": "deploy", "docIds": [] }),
    )
    .await?;
    assert_eq!(response["status"], "no_results");
    assert_eq!(response["items"], json!([]));

    let stats = call(&client, "docsift_stats", json!({})).await?;
    assert_eq!(stats["documents"], 2);

    client.cancel().await?;
    Ok(())
}

fn docsift_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docsift") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docsift");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
