//! External e-reader converter.
//!
//! The converter runs once with every written document as trailing
//! arguments. It succeeds when it exits cleanly without writing anything to
//! stderr; any stderr output counts as a failure even with exit status 0.

use crate::error::{DigestError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConvertSettings {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extension of the files the converter produces next to each input
    /// (e.g. `mobi`); those are archived instead of the HTML documents.
    #[serde(default)]
    pub output_extension: Option<String>,
}

impl ConvertSettings {
    /// Paths the converter is expected to produce for `documents`.
    pub fn outputs(&self, documents: &[PathBuf]) -> Option<Vec<PathBuf>> {
        let ext = self.output_extension.as_deref()?;
        Some(documents.iter().map(|d| d.with_extension(ext)).collect())
    }
}

#[instrument(level = "info", skip_all, fields(program = %settings.program, documents = documents.len()))]
pub async fn convert(settings: &ConvertSettings, documents: &[PathBuf]) -> Result<()> {
    let output = Command::new(&settings.program)
        .args(&settings.args)
        .args(documents)
        .output()
        .await
        .map_err(|e| DigestError::Convert(format!("cannot start `{}`: {e}", settings.program)))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(stdout_bytes = output.stdout.len(), "Converter finished");
    if !stderr.trim().is_empty() {
        return Err(DigestError::Convert(stderr.trim().to_string()));
    }
    if !output.status.success() {
        return Err(DigestError::Convert(format!(
            "`{}` exited with {}",
            settings.program, output.status
        )));
    }
    info!("Converted documents");
    Ok(())
}
