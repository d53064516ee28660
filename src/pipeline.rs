//! Per-source orchestration: extract, dedup, localize images, assemble.
//!
//! Sources run concurrently and independently. A source whose extraction
//! fails is reported and skipped; the others carry on. Persistence failures
//! (ledger or document writes) end the whole run.
//!
//! Dedup keys that were not recorded during extraction are recorded only
//! after the item's document has been written, so an item whose images
//! could not be fetched is offered again on the next run.

use crate::assets::{AssetResolver, rewrite};
use crate::config::{OutputMode, SourceConfig};
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::ledger::Ledger;
use crate::models::{Candidate, RunReport, SourceOutcome, SourceStatus};
use crate::outputs::document::write_document;
use crate::utils::slugify_title;
use futures::future::join_all;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, instrument, warn};

/// Longest title slug used in a per-item document name.
const MAX_STEM_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct Pipeline {
    fetcher: Fetcher,
    ledger: Ledger,
    assets: AssetResolver,
    out_dir: PathBuf,
    /// Document stems handed out during the current run.
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl Pipeline {
    pub fn new(fetcher: Fetcher, ledger: Ledger, out_dir: &Path) -> Self {
        Self {
            assets: AssetResolver::new(fetcher.clone(), out_dir),
            fetcher,
            ledger,
            out_dir: out_dir.to_path_buf(),
            claimed: Arc::default(),
        }
    }

    pub fn assets(&self) -> &AssetResolver {
        &self.assets
    }

    /// Run every source and collect their outcomes in configuration order.
    ///
    /// Every document of a run gets its own file name. Combined documents
    /// claim theirs up front in configuration order; per-item documents
    /// claim theirs as they are written.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn run(&self, sources: &[SourceConfig]) -> Result<RunReport> {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let stems: Vec<Option<String>> = sources
            .iter()
            .map(|source| match source.output {
                OutputMode::Combined => Some(self.claim_stem(&source_stem(&source.name))),
                OutputMode::PerItem => None,
            })
            .collect();

        let outcomes = join_all(
            sources
                .iter()
                .zip(&stems)
                .map(|(source, stem)| self.run_source(source, stem.as_deref())),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
        let report = RunReport { outcomes };

        for outcome in &report.outcomes {
            match &outcome.status {
                SourceStatus::Written { items } => {
                    info!(source = %outcome.name, items, documents = outcome.documents.len(), "Source done")
                }
                SourceStatus::Empty => info!(source = %outcome.name, "Source had nothing new"),
                SourceStatus::Failed(reason) => {
                    warn!(source = %outcome.name, %reason, "Source failed")
                }
            }
        }
        info!(
            documents = report.documents().len(),
            failed = report.failed_sources().len(),
            "Pipeline finished"
        );
        Ok(report)
    }

    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    async fn run_source(&self, source: &SourceConfig, stem: Option<&str>) -> Result<SourceOutcome> {
        let extracted = source
            .strategy
            .extract(&self.fetcher, &self.ledger, source.localize_images)
            .await;
        let mut candidates = match extracted {
            Ok(candidates) => candidates,
            Err(e) if e.is_persistence() => return Err(e),
            Err(e) => {
                error!(url = %source.strategy.url(), error = %e, "Extraction failed");
                return Ok(SourceOutcome::failed(&source.name, e));
            }
        };

        if source.localize_images {
            candidates = self.localize(candidates).await?;
        }
        if candidates.is_empty() {
            return Ok(SourceOutcome::empty(&source.name));
        }

        let documents = self.write_documents(source, stem, &candidates).await?;

        let keys: Vec<String> = candidates.iter().filter_map(|c| c.key.clone()).collect();
        if !keys.is_empty() {
            self.ledger.record(source.strategy.url(), keys).await?;
        }

        Ok(SourceOutcome {
            name: source.name.clone(),
            status: SourceStatus::Written {
                items: candidates.len(),
            },
            documents,
        })
    }

    /// Resolve and rewrite the images of every candidate. A candidate whose
    /// images cannot all be fetched is left out of this run.
    async fn localize(&self, candidates: Vec<Candidate>) -> Result<Vec<Candidate>> {
        let resolved = join_all(candidates.into_iter().map(|mut candidate| async move {
            match self
                .assets
                .resolve(&candidate.content, candidate.url.as_deref())
                .await
                .and_then(|refs| rewrite(&candidate.content, &refs))
            {
                Ok(content) => {
                    candidate.content = content;
                    Ok(Some(candidate))
                }
                Err(e) if e.is_persistence() => Err(e),
                Err(e) => {
                    warn!(title = %candidate.title, error = %e, "Image localization failed; item deferred to next run");
                    Ok(None)
                }
            }
        }))
        .await;

        Ok(resolved
            .into_iter()
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect())
    }

    /// Write one combined document under `stem`, or one document per item
    /// when no combined stem was claimed.
    async fn write_documents(
        &self,
        source: &SourceConfig,
        stem: Option<&str>,
        candidates: &[Candidate],
    ) -> Result<Vec<PathBuf>> {
        if let Some(stem) = stem {
            let path = write_document(&self.out_dir, stem, &source.name, candidates).await?;
            return Ok(vec![path]);
        }

        let prefix = source_stem(&source.name);
        let mut paths = Vec::with_capacity(candidates.len());
        for (i, item) in candidates.iter().enumerate() {
            let stem = self.claim_stem(&item_stem(&prefix, i, item));
            let path = write_document(
                &self.out_dir,
                &stem,
                &item.title,
                std::slice::from_ref(item),
            )
            .await?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Reserve `base`, or the first free `base-2`, `base-3`, ... for this run.
    fn claim_stem(&self, base: &str) -> String {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if claimed.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{base}-{n}");
            if claimed.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn source_stem(name: &str) -> String {
    let slug = slugify_title(name);
    if slug.is_empty() {
        "source".to_string()
    } else {
        slug
    }
}

/// Base stem `<source>-<title slug>` of the `i`th per-item document; items
/// without a usable title fall back to their position.
fn item_stem(prefix: &str, i: usize, item: &Candidate) -> String {
    let slug: String = slugify_title(&item.title)
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        format!("{prefix}-{}", i + 1)
    } else {
        format!("{prefix}-{slug}")
    }
}
