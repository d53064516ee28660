//! Data models shared by extractors, the asset resolver and the assembler.
//!
//! - [`Candidate`]: a normalized `{title, content}` unit produced by a source
//! - [`AssetRef`]: one image reference and the local copy it maps to
//! - [`SourceOutcome`] / [`RunReport`]: what a pipeline run produced

use std::path::PathBuf;

/// A normalized article ready for assembly.
///
/// `content` is either a link/summary (feed sources) or scraped HTML (page
/// sources). Only the asset resolver rewrites it after extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub content: String,
    /// Dedup key still to be recorded once the item is fully resolved.
    pub key: Option<String>,
    /// Page the content came from; used to resolve relative image sources.
    pub url: Option<String>,
}

impl Candidate {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            key: None,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }
}

/// A remote image (`src`) and its content-addressed local path (`dist`),
/// relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub src: String,
    pub dist: String,
}

/// How a source finished in this run.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceStatus {
    /// Documents were written for `items` articles.
    Written { items: usize },
    /// Extraction worked but nothing new was left to publish.
    Empty,
    /// Extraction failed; the message is the logged error.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub name: String,
    pub status: SourceStatus,
    pub documents: Vec<PathBuf>,
}

impl SourceOutcome {
    pub fn failed(name: &str, reason: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            status: SourceStatus::Failed(reason.to_string()),
            documents: Vec::new(),
        }
    }

    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: SourceStatus::Empty,
            documents: Vec::new(),
        }
    }
}

/// Per-source outcomes of a full run, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<SourceOutcome>,
}

impl RunReport {
    /// Every document written in this run.
    pub fn documents(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .flat_map(|o| o.documents.iter().cloned())
            .collect()
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SourceStatus::Failed(_)))
            .map(|o| o.name.as_str())
            .collect()
    }
}
