//! Utility functions for hashing, string manipulation, and file system checks.

use crate::error::{DigestError, Result};
use sha2::{Digest, Sha256};
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Hex-encoded SHA-256 of `input`.
///
/// Used both for ledger partition keys (hash of a source URL) and for
/// content-addressed asset filenames (hash of an image URL).
pub fn digest_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at the last char boundary before `max` bytes and get
/// a `"…(+N bytes)"` suffix.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Convert a title to a filename-friendly slug.
///
/// Lowercases, removes everything that is not alphanumeric (any script),
/// a space or a hyphen, and replaces spaces with hyphens.
///
/// # Arguments
///
/// * `title` - A source name or article title
///
/// # Returns
///
/// The slug, which is empty when `title` has no usable characters. Distinct
/// titles can share a slug (`"News"` and `"news"`), so callers that name
/// files with it must disambiguate.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World"), "hello-world");
/// assert_eq!(slugify_title("知乎 日报!"), "知乎-日报");
/// assert_eq!(slugify_title("!!!"), "");
/// ```
pub fn slugify_title(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .replace(' ', "-")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then probes it by creating and removing
/// a small file.
///
/// # Arguments
///
/// * `path` - The output directory
///
/// # Returns
///
/// `Ok(())` when a file could be created in `path`, otherwise
/// [`DigestError::Io`] naming the directory.
///
/// # Examples
///
/// ```ignore
/// ensure_writable_dir(Path::new("./out")).await?;
/// ```
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| DigestError::io(path, e))?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(DigestError::io(path, e)),
    }
}
