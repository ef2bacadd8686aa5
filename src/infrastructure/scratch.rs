use crate::config::TempFileConfig;
use anyhow::Result;
use tracing::info;

/// Prepare the scratch directory for this process.
///
/// Leftover files from a previous process are cleared: the handle map did
/// not survive the restart, so nothing can reference them anymore.
pub async fn setup_scratch(config: &TempFileConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.scratch_dir).await?;

    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(&config.scratch_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(
                    "failed to clear orphaned scratch file {}: {}",
                    entry.path().display(),
                    e
                );
            }
        }
    }

    if removed > 0 {
        info!("🧹 Cleared {} orphaned scratch file(s)", removed);
    }
    info!("📁 Scratch storage: {}", config.scratch_dir.display());

    Ok(())
}
