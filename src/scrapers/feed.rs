//! Feed extraction (RSS/Atom or any XML with a list of items).
//!
//! The item list is located with a dot path (`rss.channel.item`), then each
//! item yields a title, a link (or whichever field is configured, e.g.
//! `description`) and an optional dedup key (e.g. `pubDate`). Items can be
//! used as they are, or their links followed and scraped as article pages.

use crate::error::{DigestError, Result};
use crate::fetch::Fetcher;
use crate::ledger::Ledger;
use crate::models::Candidate;
use crate::scrapers::page::{PageSelectors, PageTarget, default_concurrency, load_pages};
use crate::scrapers::xml::{lookup_path, value_text, xml_to_value};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

fn default_item_path() -> String {
    "rss.channel.item".to_string()
}

fn default_title_field() -> String {
    "title".to_string()
}

fn default_link_field() -> String {
    "link".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedSource {
    pub url: String,
    #[serde(default = "default_item_path")]
    pub item_path: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    /// Field holding the link to follow, or the content itself when
    /// `follow` is not set.
    #[serde(default = "default_link_field")]
    pub link_field: String,
    /// Item field used as the dedup key; no dedup when absent.
    #[serde(default)]
    pub dedup_key: Option<String>,
    /// Follow each item's link and scrape it with these selectors.
    #[serde(default)]
    pub follow: Option<PageSelectors>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl FeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            item_path: default_item_path(),
            title_field: default_title_field(),
            link_field: default_link_field(),
            dedup_key: None,
            follow: None,
            concurrency: default_concurrency(),
        }
    }
}

/// One feed item reduced to the configured fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub key: Option<String>,
}

/// Parse a feed body into entries. A body that is not XML, or in which the
/// item path does not exist, is a structural failure.
pub fn parse_feed(body: &str, source: &FeedSource) -> Result<Vec<FeedEntry>> {
    let malformed = |reason: String| DigestError::Feed {
        url: source.url.clone(),
        reason,
    };

    let value = xml_to_value(body).map_err(malformed)?;
    let items = lookup_path(&value, &source.item_path)
        .ok_or_else(|| malformed(format!("no item list at `{}`", source.item_path)))?;

    Ok(items
        .into_iter()
        .map(|item| {
            let field = |name: &str| item.get(name).and_then(value_text);
            FeedEntry {
                title: field(&source.title_field).unwrap_or_default().trim().to_string(),
                link: field(&source.link_field).unwrap_or_default().trim().to_string(),
                key: source.dedup_key.as_deref().and_then(field),
            }
        })
        .collect())
}

impl FeedSource {
    /// Fetch the feed, drop items already in the ledger, and produce
    /// candidates.
    ///
    /// Keys are recorded immediately only when nothing can fail after this
    /// point (no page following, `defer_commit` unset). Otherwise candidates
    /// carry their key and the caller records it once the item is written.
    #[instrument(level = "info", skip_all, fields(url = %self.url))]
    pub async fn extract(
        &self,
        fetcher: &Fetcher,
        ledger: &Ledger,
        defer_commit: bool,
    ) -> Result<Vec<Candidate>> {
        let body = fetcher.text(&self.url).await?;
        let entries = parse_feed(&body, self)?;
        let total = entries.len();

        let entries = match self.dedup_key {
            None => entries,
            Some(_) if defer_commit || self.follow.is_some() => {
                ledger.unseen(&self.url, entries, |e| e.key.as_deref()).await
            }
            Some(_) => ledger
                .filter(&self.url, entries, |e| e.key.as_deref())
                .await?
                .into_iter()
                .map(|e| FeedEntry { key: None, ..e })
                .collect(),
        };
        info!(total, unseen = entries.len(), "Parsed feed");

        match &self.follow {
            None => Ok(entries
                .into_iter()
                .map(|e| Candidate::new(e.title, e.link).with_key(e.key))
                .collect()),
            Some(selectors) => {
                let selectors = selectors.compile()?;
                let targets = entries
                    .into_iter()
                    .filter(|e| !e.link.is_empty())
                    .map(|e| PageTarget {
                        url: e.link,
                        key: e.key,
                        fallback_title: Some(e.title),
                    })
                    .collect();
                Ok(load_pages(fetcher, targets, &selectors, self.concurrency).await)
            }
        }
    }
}
