//! Image localization.
//!
//! Every `<img src>` of a content fragment is downloaded once into the
//! asset directory under a content-addressed name, `<sha256(url)>.<ext>`,
//! and the fragment is rewritten to point at the local copies. The same URL
//! always maps to the same file, across fragments and across runs, so
//! concurrent sources can write into one directory without coordination.

use crate::error::{DigestError, Result};
use crate::fetch::Fetcher;
use crate::models::AssetRef;
use crate::utils::digest_hex;
use futures::future::try_join_all;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::{Captures, RegexBuilder};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};
use url::Url;

static IMG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img[src]").expect("static selector"));

/// Directory name of the asset cache inside the output directory.
pub const ASSET_DIR: &str = "images";

#[derive(Debug, Clone)]
pub struct AssetResolver {
    fetcher: Fetcher,
    dir: PathBuf,
    /// Prefix of `dist` paths, relative to the documents that embed them.
    prefix: String,
}

/// Image sources in document order, duplicates included. Empty sources and
/// inline `data:` images are skipped.
pub fn image_sources(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&IMG_SELECTOR)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.starts_with("data:"))
        .map(str::to_string)
        .collect()
}

/// File extension for a declared content type. Unknown or missing types
/// get the generic `img`.
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        _ => "img",
    }
}

/// Replace every occurrence of each `src` with its `dist`.
///
/// All sources are matched in one left-to-right pass, longest first, so a
/// URL that is a prefix of another cannot clobber it and a `dist` already
/// written is never matched again. The attribute-escaped spelling (`&amp;`)
/// is replaced as well since scraped markup is serialized with escaped
/// attributes.
pub fn rewrite(content: &str, refs: &[AssetRef]) -> Result<String> {
    let mut targets: HashMap<String, &str> = HashMap::new();
    for asset in refs.iter().filter(|a| !a.src.is_empty()) {
        targets.entry(asset.src.clone()).or_insert(&asset.dist);
        targets
            .entry(asset.src.replace('&', "&amp;"))
            .or_insert(&asset.dist);
    }
    if targets.is_empty() {
        return Ok(content.to_string());
    }

    let pattern = targets
        .keys()
        .sorted_by_key(|src| std::cmp::Reverse(src.len()))
        .map(|src| regex::escape(src))
        .join("|");
    let matcher = RegexBuilder::new(&pattern).size_limit(1 << 24).build()?;
    Ok(matcher
        .replace_all(content, |caps: &Captures| {
            targets.get(&caps[0]).copied().unwrap_or(&caps[0]).to_string()
        })
        .into_owned())
}

impl AssetResolver {
    /// Resolver storing files in `<out_dir>/images`.
    pub fn new(fetcher: Fetcher, out_dir: &Path) -> Self {
        Self {
            fetcher,
            dir: out_dir.join(ASSET_DIR),
            prefix: ASSET_DIR.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Download every distinct image of `html` and return one pair per
    /// occurrence, in document order.
    ///
    /// Relative sources are resolved against `base`. Any failed download
    /// fails the whole fragment.
    #[instrument(level = "debug", skip(self, html))]
    pub async fn resolve(&self, html: &str, base: Option<&str>) -> Result<Vec<AssetRef>> {
        let sources = image_sources(html);
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DigestError::io(&self.dir, e))?;

        let base = base.and_then(|b| Url::parse(b).ok());
        let distinct: Vec<&String> = sources.iter().unique().collect();
        let fetched = try_join_all(
            distinct
                .iter()
                .map(|src| self.fetch_one(src.as_str(), base.as_ref())),
        )
        .await?;

        let refs: Vec<AssetRef> = sources
            .iter()
            .map(|src| {
                let dist = distinct
                    .iter()
                    .position(|d| *d == src)
                    .map(|i| fetched[i].clone())
                    .unwrap_or_default();
                AssetRef {
                    src: src.clone(),
                    dist,
                }
            })
            .collect();
        info!(
            images = refs.len(),
            downloaded = distinct.len(),
            "Localized images"
        );
        Ok(refs)
    }

    /// Fetch one image and return its `dist` path.
    async fn fetch_one(&self, src: &str, base: Option<&Url>) -> Result<String> {
        let absolute = match base {
            Some(base) => base.join(src),
            None => Url::parse(src),
        }
        .map_err(|source| DigestError::Url {
            url: src.to_string(),
            source,
        })?;

        let fetched = self.fetcher.bytes(absolute.as_str()).await?;
        let file_name = format!(
            "{}.{}",
            digest_hex(absolute.as_str()),
            extension_for(fetched.content_type.as_deref())
        );
        let path = self.dir.join(&file_name);
        fs::write(&path, &fetched.bytes)
            .await
            .map_err(|e| DigestError::io(&path, e))?;
        debug!(src, file = %file_name, "Saved image");
        Ok(format!("{}/{}", self.prefix, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchSettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(out: &Path) -> AssetResolver {
        AssetResolver::new(Fetcher::new(&FetchSettings::default()).unwrap(), out)
    }

    #[test]
    fn test_image_sources_keeps_duplicates_and_skips_inline() {
        let html = r#"<p><img src="a.png"><img src="data:image/png;base64,AAAA">
            <img src=""><img src="b.jpg"><img src="a.png"><img alt="no src"></p>"#;
        assert_eq!(image_sources(html), vec!["a.png", "b.jpg", "a.png"]);
    }

    #[test]
    fn test_extension_for_content_types() {
        assert_eq!(extension_for(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for(Some("image/PNG; charset=binary")), "png");
        assert_eq!(extension_for(Some("image/svg+xml")), "svg");
        assert_eq!(extension_for(Some("application/octet-stream")), "img");
        assert_eq!(extension_for(None), "img");
    }

    #[test]
    fn test_rewrite_replaces_every_occurrence() {
        let content = r#"<img src="http://x/a.png?s=1&amp;t=2"><img src="http://x/a.png">"#;
        let refs = vec![
            AssetRef {
                src: "http://x/a.png".to_string(),
                dist: "images/short.png".to_string(),
            },
            AssetRef {
                src: "http://x/a.png?s=1&t=2".to_string(),
                dist: "images/long.png".to_string(),
            },
        ];
        assert_eq!(
            rewrite(content, &refs).unwrap(),
            r#"<img src="images/long.png"><img src="images/short.png">"#
        );
    }

    #[test]
    fn test_rewrite_never_rescans_written_paths() {
        // the short relative source is also the tail of the first dist
        let long_dist = format!("images/{}8.png", "c".repeat(63));
        let content = r#"<img src="http://x/img/photo.png"><img src="8.png">"#;
        let refs = vec![
            AssetRef {
                src: "http://x/img/photo.png".to_string(),
                dist: long_dist.clone(),
            },
            AssetRef {
                src: "8.png".to_string(),
                dist: "images/other.png".to_string(),
            },
        ];
        assert_eq!(
            rewrite(content, &refs).unwrap(),
            format!(r#"<img src="{long_dist}"><img src="images/other.png">"#)
        );
    }

    #[test]
    fn test_rewrite_without_refs_is_identity() {
        assert_eq!(rewrite("<p>plain</p>", &[]).unwrap(), "<p>plain</p>");
    }

    #[tokio::test]
    async fn test_same_image_twice_is_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/cat.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8, 2, 3], "image/png"))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let resolver = resolver(tmp.path());
        let src = format!("{}/img/cat.png", server.uri());
        let html = format!(r#"<p><img src="{src}"></p><p><img src="{src}"></p>"#);

        let refs = resolver.resolve(&html, None).await.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], refs[1]);
        assert_eq!(refs[0].dist, format!("images/{}.png", digest_hex(&src)));
        assert_eq!(
            std::fs::read(tmp.path().join(&refs[0].dist)).unwrap(),
            vec![1u8, 2, 3]
        );

        let rewritten = rewrite(&html, &refs).unwrap();
        assert!(!rewritten.contains(&src));
        assert_eq!(rewritten.matches(&refs[0].dist).count(), 2);
    }

    #[tokio::test]
    async fn test_relative_sources_resolve_against_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/static/pic.gif"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8], "image/gif"))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let page = format!("{}/articles/1.html", server.uri());
        let refs = resolver(tmp.path())
            .resolve(r#"<img src="/static/pic.gif">"#, Some(&page))
            .await
            .unwrap();
        assert_eq!(refs[0].src, "/static/pic.gif");
        let absolute = format!("{}/static/pic.gif", server.uri());
        assert_eq!(refs[0].dist, format!("images/{}.gif", digest_hex(&absolute)));
    }

    #[tokio::test]
    async fn test_failed_image_fails_the_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8], "image/png"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let html = format!(
            r#"<img src="{0}/ok.png"><img src="{0}/gone.png">"#,
            server.uri()
        );
        let err = resolver(tmp.path()).resolve(&html, None).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fragment_without_images_touches_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let resolver = resolver(tmp.path());
        let refs = resolver.resolve("<p>text only</p>", None).await.unwrap();
        assert!(refs.is_empty());
        assert!(!resolver.dir().exists());
    }
}
