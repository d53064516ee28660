//! Post-delivery cleanup of the output and asset directories.

use crate::error::{DigestError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

/// Extensions of generated files removed from the output directory.
pub const CLEAN_EXTENSIONS: &[&str] = &["html", "zip", "mobi", "epub"];

/// Regular files directly inside `dir` whose extension is in `exts`.
/// An empty `exts` matches every file. A missing directory yields nothing.
pub async fn walk(dir: &Path, exts: &[&str]) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DigestError::io(dir, e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DigestError::io(dir, e))?
    {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        let matches = exts.is_empty()
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| exts.contains(&e));
        if is_file && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Delete generated documents and archives from `out_dir` and every cached
/// image from `asset_dir`. Returns how many files were removed.
#[instrument(level = "info", skip_all, fields(out_dir = %out_dir.display()))]
pub async fn clean(out_dir: &Path, asset_dir: &Path) -> Result<usize> {
    let mut targets = walk(out_dir, CLEAN_EXTENSIONS).await?;
    targets.extend(walk(asset_dir, &[]).await?);

    for file in &targets {
        fs::remove_file(file)
            .await
            .map_err(|e| DigestError::io(file, e))?;
        debug!(file = %file.display(), "Removed");
    }
    info!(removed = targets.len(), "Cleaned output");
    Ok(targets.len())
}
