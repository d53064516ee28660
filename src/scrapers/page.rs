//! Page-scrape extraction: load article pages and pull a title and content
//! out of them with CSS selectors.
//!
//! Used directly by [`ScrapeSource`] (a single page, or every article linked
//! from a directory page) and by feed sources that follow their item links.

use crate::error::{DigestError, Result};
use crate::fetch::Fetcher;
use crate::models::Candidate;
use crate::queue::run_batched;
use itertools::Itertools;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// How many article pages are loaded at once.
pub const PAGE_CONCURRENCY: usize = 10;

pub(crate) fn default_concurrency() -> usize {
    PAGE_CONCURRENCY
}

/// Selectors locating the title and the content of an article page.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PageSelectors {
    pub title: String,
    pub content: String,
}

/// [`PageSelectors`] parsed once per extraction.
#[derive(Debug)]
pub struct CompiledSelectors {
    title: Selector,
    content: Selector,
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| DigestError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl PageSelectors {
    pub fn compile(&self) -> Result<CompiledSelectors> {
        Ok(CompiledSelectors {
            title: parse_selector(&self.title)?,
            content: parse_selector(&self.content)?,
        })
    }
}

/// A page to load, with what the caller already knows about it.
#[derive(Debug, Clone)]
pub struct PageTarget {
    pub url: String,
    pub key: Option<String>,
    pub fallback_title: Option<String>,
}

impl PageTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: None,
            fallback_title: None,
        }
    }
}

/// Extract a candidate from page HTML.
///
/// The title is the text of every title match; the content is the inner
/// markup of every content match, concatenated in document order. Returns
/// `None` when the content selector matches nothing.
pub fn extract_page(html: &str, url: &str, selectors: &CompiledSelectors) -> Option<Candidate> {
    let document = Html::parse_document(html);

    let title = document
        .select(&selectors.title)
        .flat_map(|el| el.text())
        .collect::<String>()
        .trim()
        .to_string();

    let content = document
        .select(&selectors.content)
        .map(|el| el.inner_html())
        .collect::<Vec<_>>()
        .join("");

    if content.trim().is_empty() {
        return None;
    }
    Some(Candidate::new(title, content).with_url(url))
}

/// Collect article links from a directory page, resolved against `base`
/// and de-duplicated in document order.
pub fn discover_links(html: &str, base: &Url, link_selector: &Selector) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(link_selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|u| u.to_string())
        .unique()
        .collect()
}

/// Load and extract one page.
#[instrument(level = "debug", skip(fetcher, selectors))]
pub async fn load_page(
    fetcher: &Fetcher,
    url: &str,
    selectors: &CompiledSelectors,
) -> Result<Option<Candidate>> {
    let body = fetcher.text(url).await?;
    Ok(extract_page(&body, url, selectors))
}

/// Load many pages, at most `limit` at a time.
///
/// A page that fails to load, or has no content, is left out; its batch
/// siblings are kept.
#[instrument(level = "info", skip_all, fields(pages = targets.len(), limit = limit))]
pub async fn load_pages(
    fetcher: &Fetcher,
    targets: Vec<PageTarget>,
    selectors: &CompiledSelectors,
    limit: usize,
) -> Vec<Candidate> {
    let requested = targets.len();
    let ops = targets.into_iter().map(|target| async move {
        match load_page(fetcher, &target.url, selectors).await {
            Ok(Some(mut candidate)) => {
                if candidate.title.is_empty() {
                    if let Some(title) = target.fallback_title {
                        candidate.title = title;
                    }
                }
                debug!(url = %target.url, "Loaded page");
                Ok(Some(candidate.with_key(target.key)))
            }
            Ok(None) => {
                warn!(url = %target.url, "Page produced no content; skipping");
                Ok(None)
            }
            Err(e) if e.is_transient() => {
                warn!(url = %target.url, error = %e, "Page failed to load; skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    });

    let result = run_batched(ops, Some(limit)).await;
    if !result.err_stack.is_empty() {
        warn!(
            failed_batches = result.err_stack.len(),
            lost = result.failed_operations(),
            "Some page batches were discarded"
        );
    }
    let pages: Vec<Candidate> = result.ret.into_iter().flatten().collect();
    info!(requested, loaded = pages.len(), "Loaded article pages");
    pages
}

/// A page-scrape source: either a single article page, or a directory page
/// whose links (matched by `link_selector`) are the articles.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScrapeSource {
    pub url: String,
    #[serde(default)]
    pub link_selector: Option<String>,
    pub page: PageSelectors,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl ScrapeSource {
    #[instrument(level = "info", skip_all, fields(url = %self.url))]
    pub async fn extract(&self, fetcher: &Fetcher) -> Result<Vec<Candidate>> {
        let selectors = self.page.compile()?;

        let Some(link_selector) = self.link_selector.as_deref() else {
            return Ok(load_page(fetcher, &self.url, &selectors)
                .await?
                .into_iter()
                .collect());
        };

        let link_selector = parse_selector(link_selector)?;
        let base = Url::parse(&self.url).map_err(|source| DigestError::Url {
            url: self.url.clone(),
            source,
        })?;
        let html = fetcher.text(&self.url).await?;
        let links = discover_links(&html, &base, &link_selector);
        info!(count = links.len(), "Indexed article links");

        let targets = links.into_iter().map(PageTarget::new).collect();
        Ok(load_pages(fetcher, targets, &selectors, self.concurrency).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchSettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn selectors() -> CompiledSelectors {
        PageSelectors {
            title: "h1.title".to_string(),
            content: ".show-content".to_string(),
        }
        .compile()
        .unwrap()
    }

    fn article(n: usize) -> String {
        format!(
            r#"<html><body><h1 class="title">Article {n}</h1>
            <div class="show-content"><p>Part one of {n}</p></div>
            <div class="show-content"><p>Part two of {n}</p></div></body></html>"#
        )
    }

    #[test]
    fn test_extract_page_concatenates_matches_in_order() {
        let c = extract_page(&article(1), "http://x/1", &selectors()).unwrap();
        assert_eq!(c.title, "Article 1");
        assert_eq!(c.content, "<p>Part one of 1</p><p>Part two of 1</p>");
        assert_eq!(c.url.as_deref(), Some("http://x/1"));
    }

    #[test]
    fn test_extract_page_without_content_is_none() {
        let html = "<html><body><h1 class=\"title\">Empty</h1></body></html>";
        assert!(extract_page(html, "http://x", &selectors()).is_none());
    }

    #[test]
    fn test_invalid_selector_is_structural_error() {
        let err = PageSelectors {
            title: "h1[".to_string(),
            content: "p".to_string(),
        }
        .compile()
        .unwrap_err();
        assert!(matches!(err, DigestError::Selector { .. }));
    }

    #[test]
    fn test_discover_links_resolves_and_dedups() {
        let html = r#"<h4><a href="/p/1">one</a></h4>
            <h4><a href="/p/2">two</a></h4>
            <h4><a href="/p/1">one again</a></h4>
            <h4><a href="https://other.example/p/3">three</a></h4>
            <h4><a href="javascript:void(0)">nope</a></h4>"#;
        let base = Url::parse("http://www.jianshu.com/").unwrap();
        let links = discover_links(html, &base, &parse_selector("h4 a").unwrap());
        assert_eq!(
            links,
            vec![
                "http://www.jianshu.com/p/1",
                "http://www.jianshu.com/p/2",
                "https://other.example/p/3",
            ]
        );
    }

    #[tokio::test]
    async fn test_one_failing_page_of_ten_keeps_the_other_nine() {
        let server = MockServer::start().await;
        let mut index = String::from("<html><body>");
        for n in 0..10 {
            index.push_str(&format!("<h4><a href=\"/p/{n}\">{n}</a></h4>"));
            let response = if n == 4 {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200).set_body_raw(article(n), "text/html")
            };
            Mock::given(method("GET"))
                .and(path(format!("/p/{n}")))
                .respond_with(response)
                .mount(&server)
                .await;
        }
        index.push_str("</body></html>");
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(index, "text/html"))
            .mount(&server)
            .await;

        let source = ScrapeSource {
            url: format!("{}/", server.uri()),
            link_selector: Some("h4 a".to_string()),
            page: PageSelectors {
                title: "h1.title".to_string(),
                content: ".show-content".to_string(),
            },
            concurrency: PAGE_CONCURRENCY,
        };
        let fetcher = Fetcher::new(&FetchSettings::default()).unwrap();
        let candidates = source.extract(&fetcher).await.unwrap();

        assert_eq!(candidates.len(), 9);
        assert!(candidates.iter().all(|c| c.title != "Article 4"));
        assert_eq!(candidates[0].title, "Article 0");
    }

    #[tokio::test]
    async fn test_directory_fetch_failure_fails_the_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = ScrapeSource {
            url: format!("{}/", server.uri()),
            link_selector: Some("h4 a".to_string()),
            page: PageSelectors {
                title: "h1".to_string(),
                content: "p".to_string(),
            },
            concurrency: 2,
        };
        let fetcher = Fetcher::new(&FetchSettings::default()).unwrap();
        assert!(source.extract(&fetcher).await.is_err());
    }
}
