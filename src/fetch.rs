//! Shared HTTP client used by every extractor and the asset resolver.

use crate::error::{DigestError, Result};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Upper bound for a whole request; a hung server fails the unit instead
    /// of stalling its branch of the pipeline.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("Mozilla/5.0 (compatible; kindle_digest/", env!("CARGO_PKG_VERSION"), ")")
                .to_string(),
        }
    }
}

/// A binary response body and its declared content type.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| DigestError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| DigestError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Fetch a page or document as text (charset taken from the response).
    #[instrument(level = "debug", skip(self))]
    pub async fn text(&self, url: &str) -> Result<String> {
        let body = self
            .get(url)
            .await?
            .text()
            .await
            .map_err(|source| DigestError::Fetch {
                url: url.to_string(),
                source,
            })?;
        debug!(bytes = body.len(), "Fetched text");
        Ok(body)
    }

    /// Fetch a binary resource together with its `Content-Type`.
    #[instrument(level = "debug", skip(self))]
    pub async fn bytes(&self, url: &str) -> Result<Fetched> {
        let response = self.get(url).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|source| DigestError::Fetch {
                url: url.to_string(),
                source,
            })?
            .to_vec();
        debug!(bytes = bytes.len(), ?content_type, "Fetched bytes");
        Ok(Fetched {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> Fetcher {
        Fetcher::new(&FetchSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_text_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>ok</html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let body = fetcher()
            .text(&format!("{}/page", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_bytes_reports_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pic"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, 0x50, 0x4e, 0x47], "image/png"))
            .mount(&server)
            .await;

        let fetched = fetcher()
            .bytes(&format!("{}/pic", server.uri()))
            .await
            .unwrap();
        assert_eq!(fetched.bytes, vec![0x89, 0x50, 0x4e, 0x47]);
        assert_eq!(fetched.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_http_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher()
            .text(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::Status { status: 404, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(300))
                    .set_body_string("slow"),
            )
            .mount(&server)
            .await;

        let settings = FetchSettings {
            request_timeout: Duration::from_millis(50),
            ..FetchSettings::default()
        };
        let err = Fetcher::new(&settings)
            .unwrap()
            .text(&format!("{}/slow", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::Fetch { .. }));
    }
}
