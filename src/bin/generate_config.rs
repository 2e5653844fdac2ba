//! Writes the default checkpoint config for a project.
//!
//! Usage: `generate_config [PROJECT_PATH]` (defaults to the current directory).

use std::path::PathBuf;

use anyhow::Context;
use checkpoint_lib::checkpoint::{CheckpointConfig, CONFIG_FILE_NAME};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let project_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = CheckpointConfig::for_project(&project_path);
    config.validate()?;

    let store_dir = config.store_dir();
    // project-relative on disk
    config.project_path = PathBuf::from(".");
    let content = serde_json::to_string_pretty(&config)?;

    println!("=== Default checkpoint config ===");
    println!("{content}");

    tokio::fs::create_dir_all(&store_dir)
        .await
        .with_context(|| format!("failed to create {}", store_dir.display()))?;

    let config_path = store_dir.join(CONFIG_FILE_NAME);
    if tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
        anyhow::bail!(
            "{} already exists, remove it first to regenerate",
            config_path.display()
        );
    }
    tokio::fs::write(&config_path, content)
        .await
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    println!("\n=== Config written to {} ===", config_path.display());
    Ok(())
}
