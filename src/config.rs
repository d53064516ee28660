//! Source, mail and converter configuration.
//!
//! Read from an optional YAML file. Without one, the built-in defaults
//! describe the five standard sources:
//!
//! ```yaml
//! sources:
//!   - name: zhihu
//!     strategy:
//!       kind: feed
//!       url: http://www.zhihu.com/rss
//!       link_field: description
//!       dedup_key: pubDate
//!   - name: jianshu
//!     localize_images: true
//!     output: per_item
//!     strategy:
//!       kind: scrape
//!       url: http://www.jianshu.com/
//!       link_selector: h4 a
//!       page: { title: h1.title, content: .show-content }
//! mail:
//!   subject: yo
//!   body: yo
//! convert:
//!   program: kindlegen
//!   output_extension: mobi
//! ```

use crate::error::{DigestError, Result};
use crate::outputs::convert::ConvertSettings;
use crate::outputs::mail::{DEFAULT_BODY, DEFAULT_SUBJECT};
use crate::scrapers::{ApiSource, FeedSource, PageSelectors, ScrapeSource, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, instrument};

/// How a source's items are laid out in documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// One document per source, named after the source.
    #[default]
    Combined,
    /// One document per item, named after the item title.
    PerItem,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    pub strategy: Strategy,
    /// Download embedded images and point the content at local copies.
    #[serde(default)]
    pub localize_images: bool,
    #[serde(default)]
    pub output: OutputMode,
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

fn default_body() -> String {
    DEFAULT_BODY.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MailSettings {
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default)]
    pub smtp_host: Option<String>,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            body: default_body(),
            smtp_host: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub mail: MailSettings,
    #[serde(default)]
    pub convert: Option<ConvertSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            mail: MailSettings::default(),
            convert: None,
        }
    }
}

fn follow(title: &str, content: &str) -> Option<PageSelectors> {
    Some(PageSelectors {
        title: title.to_string(),
        content: content.to_string(),
    })
}

/// The five standard sources.
pub fn default_sources() -> Vec<SourceConfig> {
    let cnbeta = FeedSource {
        dedup_key: Some("pubDate".to_string()),
        follow: follow("#news_title", ".article_content"),
        ..FeedSource::new("http://rss.cnbeta.com/rss")
    };
    let zhihu = FeedSource {
        link_field: "description".to_string(),
        dedup_key: Some("pubDate".to_string()),
        ..FeedSource::new("http://www.zhihu.com/rss")
    };
    let jiandan = FeedSource {
        dedup_key: Some("pubDate".to_string()),
        follow: follow("h1", "#content .post p"),
        ..FeedSource::new("http://jandan.net/feed")
    };
    let jianshu = ScrapeSource {
        url: "http://www.jianshu.com/".to_string(),
        link_selector: Some("h4 a".to_string()),
        page: PageSelectors {
            title: "h1.title".to_string(),
            content: ".show-content".to_string(),
        },
        concurrency: crate::scrapers::page::PAGE_CONCURRENCY,
    };

    vec![
        SourceConfig {
            name: "cnbeta".to_string(),
            strategy: Strategy::Feed(cnbeta),
            localize_images: true,
            output: OutputMode::Combined,
        },
        SourceConfig {
            name: "zhihu".to_string(),
            strategy: Strategy::Feed(zhihu),
            localize_images: false,
            output: OutputMode::Combined,
        },
        SourceConfig {
            name: "v2ex".to_string(),
            strategy: Strategy::Api(ApiSource::new("https://www.v2ex.com/api/topics/hot.json")),
            localize_images: false,
            output: OutputMode::Combined,
        },
        SourceConfig {
            name: "jiandan".to_string(),
            strategy: Strategy::Feed(jiandan),
            localize_images: true,
            output: OutputMode::Combined,
        },
        SourceConfig {
            name: "jianshu".to_string(),
            strategy: Strategy::Scrape(jianshu),
            localize_images: true,
            output: OutputMode::Combined,
        },
    ]
}

impl AppConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| DigestError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Source names are used as document names, so they must be non-empty
    /// and unique.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for source in &self.sources {
            let name = source.name.trim();
            if name.is_empty() {
                return Err(DigestError::Config("source with an empty name".to_string()));
            }
            if !names.insert(name) {
                return Err(DigestError::Config(format!("duplicate source name `{name}`")));
            }
            if source.strategy.url().trim().is_empty() {
                return Err(DigestError::Config(format!("source `{name}` has no URL")));
            }
        }
        Ok(())
    }
}

/// Load the configuration at `path`, or the defaults when no path is given.
#[instrument(level = "info")]
pub async fn load(path: Option<&Path>) -> Result<AppConfig> {
    let Some(path) = path else {
        info!("No configuration file given; using built-in sources");
        return Ok(AppConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DigestError::io(path, e))?;
    let config = AppConfig::from_yaml(&raw)?;
    info!(sources = config.sources.len(), "Loaded configuration");
    Ok(config)
}
