//! Source extractors.
//!
//! Every source is described by a [`Strategy`], a tagged variant carrying
//! its own configuration record:
//!
//! | Strategy | Module | Method |
//! |----------|--------|--------|
//! | `feed` | [`feed`] | XML feed, optionally following item links |
//! | `scrape` | [`page`] | one article page, or a directory page of links |
//! | `api` | [`api`] | JSON endpoint returning an array of records |
//!
//! All strategies produce [`Candidate`]s. A failure of the top-level fetch
//! or a malformed document fails the whole source; a failing article page
//! only drops that article.

pub mod api;
pub mod feed;
pub mod page;
pub mod xml;

use crate::error::Result;
use crate::fetch::Fetcher;
use crate::ledger::Ledger;
use crate::models::Candidate;
use serde::{Deserialize, Serialize};

pub use api::ApiSource;
pub use feed::FeedSource;
pub use page::{PageSelectors, ScrapeSource};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    Feed(FeedSource),
    Scrape(ScrapeSource),
    Api(ApiSource),
}

impl Strategy {
    /// The URL fetched first; also identifies the source's ledger partition.
    pub fn url(&self) -> &str {
        match self {
            Strategy::Feed(s) => &s.url,
            Strategy::Scrape(s) => &s.url,
            Strategy::Api(s) => &s.url,
        }
    }

    /// Produce candidates from the source.
    ///
    /// `defer_commit` asks dedup-enabled sources to leave keys on the
    /// candidates instead of recording them right away.
    pub async fn extract(
        &self,
        fetcher: &Fetcher,
        ledger: &Ledger,
        defer_commit: bool,
    ) -> Result<Vec<Candidate>> {
        match self {
            Strategy::Feed(source) => source.extract(fetcher, ledger, defer_commit).await,
            Strategy::Scrape(source) => source.extract(fetcher).await,
            Strategy::Api(source) => source.extract(fetcher).await,
        }
    }
}
