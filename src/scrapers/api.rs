//! JSON API extraction: one endpoint returning an array of records.

use crate::error::{DigestError, Result};
use crate::fetch::Fetcher;
use crate::models::Candidate;
use crate::scrapers::xml::{lookup_path, value_text};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

fn default_title_field() -> String {
    "title".to_string()
}

fn default_content_field() -> String {
    "content".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiSource {
    pub url: String,
    /// Dot path to the record array; empty means the document root.
    #[serde(default)]
    pub items_path: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    #[serde(default = "default_content_field")]
    pub content_field: String,
}

impl ApiSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            items_path: String::new(),
            title_field: default_title_field(),
            content_field: default_content_field(),
        }
    }

    /// Map a JSON body to candidates. Records with neither a title nor
    /// content are skipped.
    pub fn parse(&self, body: &str) -> Result<Vec<Candidate>> {
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|source| DigestError::Json {
                url: self.url.clone(),
                source,
            })?;
        let records = lookup_path(&value, &self.items_path).ok_or_else(|| DigestError::Feed {
            url: self.url.clone(),
            reason: format!("no record list at `{}`", self.items_path),
        })?;

        Ok(records
            .into_iter()
            .filter_map(|record| {
                let title = record.get(&self.title_field).and_then(value_text).unwrap_or_default();
                let content = record
                    .get(&self.content_field)
                    .and_then(value_text)
                    .unwrap_or_default();
                if title.trim().is_empty() && content.trim().is_empty() {
                    None
                } else {
                    Some(Candidate::new(title.trim(), content))
                }
            })
            .collect())
    }

    #[instrument(level = "info", skip_all, fields(url = %self.url))]
    pub async fn extract(&self, fetcher: &Fetcher) -> Result<Vec<Candidate>> {
        let body = fetcher.text(&self.url).await?;
        let candidates = self.parse(&body)?;
        info!(count = candidates.len(), "Parsed API records");
        Ok(candidates)
    }
}
