//! HTTP page fetcher backed by reqwest.

use async_trait::async_trait;
use std::error::Error as _;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult, ScoutError, SecurityError};
use crate::traits::fetcher::{FetchedPage, PageFetcher, UrlValidator};

/// Default user agent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; RfpScout/0.1)";

const MAX_REDIRECTS: usize = 10;

/// Fetches pages over HTTP(S).
///
/// Any response is returned as a [`FetchedPage`]; only transport failures
/// become errors. Every redirect hop is checked against a [`UrlValidator`]
/// before it is followed.
///
/// # Example
///
/// ```rust,ignore
/// use rfp_scout::fetchers::HttpFetcher;
/// use rfp_scout::traits::fetcher::ValidatedFetcher;
///
/// let fetcher = ValidatedFetcher::new(HttpFetcher::new(Duration::from_secs(20))?);
/// let page = fetcher.fetch("https://portal.ct.gov/DAS/CTSource/BidBoard").await?;
/// ```
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with the default user agent.
    pub fn new(timeout: Duration) -> Result<Self, ScoutError> {
        Self::with_user_agent(timeout, DEFAULT_USER_AGENT)
    }

    /// Build a fetcher with a custom user agent.
    pub fn with_user_agent(timeout: Duration, user_agent: &str) -> Result<Self, ScoutError> {
        Self::with_validator(timeout, user_agent, UrlValidator::new())
    }

    /// Build a fetcher whose redirect hops are checked by `validator`.
    pub fn with_validator(
        timeout: Duration,
        user_agent: &str,
        validator: UrlValidator,
    ) -> Result<Self, ScoutError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(redirect_policy(validator))
            .build()
            .map_err(|e| ScoutError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

}

/// Follow at most [`MAX_REDIRECTS`] hops, refusing any hop the validator
/// blocks before a connection is made to it.
fn redirect_policy(validator: UrlValidator) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {} redirects", MAX_REDIRECTS));
        }
        match validator.validate(attempt.url().as_str()) {
            Ok(()) => attempt.follow(),
            Err(blocked) => attempt.error(blocked),
        }
    })
}

/// Map a reqwest error onto the fetch taxonomy.
pub(crate) fn classify_reqwest_error(url: &str, e: reqwest::Error) -> FetchError {
    let url = url.to_string();
    if e.is_timeout() {
        return FetchError::Timeout { url };
    }
    if e.is_redirect() {
        let blocked = e.source().and_then(|s| s.downcast_ref::<SecurityError>()).cloned();
        return match blocked {
            Some(source) => FetchError::Blocked { url, source },
            None => FetchError::TooManyRedirects { url },
        };
    }
    if e.is_builder() {
        return FetchError::InvalidUrl { url };
    }

    let message = error_chain(&e);
    if e.is_connect() {
        let lowered = message.to_lowercase();
        if lowered.contains("dns") || lowered.contains("resolve") || lowered.contains("lookup") {
            return FetchError::Dns { url, message };
        }
        return FetchError::Connect { url, message };
    }
    if e.is_body() || e.is_decode() {
        return FetchError::Body { url, message };
    }
    FetchError::Connect { url, message }
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedPage> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        debug!(url = %url, "HTTP fetch starting");
        let response = self.client.get(parsed).send().await.map_err(|e| {
            let err = classify_reqwest_error(url, e);
            warn!(url = %url, error = %err, "HTTP request failed");
            err
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;

        debug!(
            url = %url,
            final_url = %final_url,
            status = status,
            content_length = body.len(),
            "HTTP fetch completed"
        );

        Ok(FetchedPage {
            requested_url: url.to_string(),
            final_url,
            status,
            body,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unparsable_url_is_invalid_not_network() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
        assert!(!err.is_network_failure());
    }

    /// Serve one response that redirects to `location`.
    async fn redirecting_server(location: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                location
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://{}/bids", addr)
    }

    #[tokio::test]
    async fn test_redirect_to_internal_host_is_not_followed() {
        let url = redirecting_server("http://169.254.169.254/latest/meta-data").await;
        let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();

        let err = fetcher.fetch(&url).await.unwrap_err();
        match err {
            FetchError::Blocked { source, .. } => {
                assert_eq!(source, SecurityError::BlockedCidr("169.254.169.254".into()));
            }
            other => panic!("expected blocked redirect, got {:?}", other),
        }
    }

    #[test]
    fn test_builds_with_custom_agent() {
        let fetcher = HttpFetcher::with_user_agent(Duration::from_secs(5), "TestBot/1.0");
        assert!(fetcher.is_ok());
        assert_eq!(fetcher.unwrap().name(), "http");
    }
}
