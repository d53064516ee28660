//! Zip packaging of the run's documents and assets.

use crate::error::{DigestError, Result};
use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entry name of `file` inside the archive: its path relative to `root`,
/// with `/` separators, so `images/…` references keep working.
fn entry_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_archive(target: &Path, root: &Path, files: &[PathBuf]) -> Result<()> {
    let out = File::create(target).map_err(|e| DigestError::io(target, e))?;
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in files {
        let bytes = std::fs::read(file).map_err(|e| DigestError::io(file, e))?;
        writer.start_file(entry_name(root, file), options)?;
        writer
            .write_all(&bytes)
            .map_err(|e| DigestError::io(target, e))?;
    }
    writer.finish()?;
    Ok(())
}

/// Pack `files` into `<out_dir>/kindle_<unix millis>.zip`.
#[instrument(level = "info", skip(files), fields(files = files.len()))]
pub async fn archive(out_dir: &Path, files: Vec<PathBuf>) -> Result<PathBuf> {
    let target = out_dir.join(format!("kindle_{}.zip", Utc::now().timestamp_millis()));
    let root = out_dir.to_path_buf();
    let path = target.clone();
    tokio::task::spawn_blocking(move || write_archive(&path, &root, &files))
        .await
        .map_err(|e| DigestError::io(&target, std::io::Error::other(e)))??;
    info!(path = %target.display(), "Wrote archive");
    Ok(target)
}
