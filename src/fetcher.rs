use crate::{Config, ConversionError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Raw response of a single download attempt
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    /// Empty when `status` is outside the 2xx range; the body is not read.
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One GET per call, no retry and no caching.
///
/// Implementations report transport failures as [`ConversionError::Network`]
/// and leave status validation to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResult, ConversionError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, ConversionError> {
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = config.http_timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder
            .build()
            .map_err(|e| ConversionError::Configuration(e.to_string()))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResult, ConversionError> {
        let start = Instant::now();
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            let elapsed = start.elapsed();
            debug!("GET {} returned {} after {:?}", url, status, elapsed);
            return Ok(FetchResult {
                status,
                body: Vec::new(),
                elapsed,
            });
        }

        let body = response.bytes().await?.to_vec();
        let elapsed = start.elapsed();
        debug!("GET {} returned {} ({} bytes) in {:?}", url, status, body.len(), elapsed);

        Ok(FetchResult {
            status,
            body,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(path_str: &str, template: ResponseTemplate) -> (MockServer, Url) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(path_str))
            .respond_with(template)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}{}", server.uri(), path_str)).unwrap();
        (server, url)
    }

    #[tokio::test]
    async fn test_fetch_success_returns_body() {
        let (_server, url) = serve(
            "/photo.jpg",
            ResponseTemplate::new(200).set_body_bytes(b"jpeg bytes".to_vec()),
        )
        .await;

        let fetcher = HttpFetcher::new(&Config::default()).unwrap();
        let result = fetcher.fetch(&url).await.unwrap();

        assert_eq!(result.status, 200);
        assert!(result.is_success());
        assert_eq!(result.body, b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_fetch_does_not_validate_status() {
        let (_server, url) = serve(
            "/missing.jpg",
            ResponseTemplate::new(404).set_body_string("not found"),
        )
        .await;

        let fetcher = HttpFetcher::new(&Config::default()).unwrap();
        let result = fetcher.fetch(&url).await.unwrap();

        assert_eq!(result.status, 404);
        assert!(!result.is_success());
        assert!(result.body.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_sends_configured_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ua.jpg"))
            .and(header("user-agent", "topng-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config {
            user_agent: Some("topng-test/1.0".to_string()),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let url = Url::parse(&format!("{}/ua.jpg", server.uri())).unwrap();

        let result = fetcher.fetch(&url).await.unwrap();
        assert_eq!(result.status, 200);
    }

    #[tokio::test]
    async fn test_fetch_times_out_as_network_error() {
        let (_server, url) = serve(
            "/slow.jpg",
            ResponseTemplate::new(200).set_delay(Duration::from_secs(2)),
        )
        .await;

        let config = Config {
            http_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();

        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, ConversionError::Network(_)));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network_error() {
        // Reserve a free port, then release it so nothing is listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let url = Url::parse(&format!("http://127.0.0.1:{port}/gone.jpg")).unwrap();

        let fetcher = HttpFetcher::new(&Config::default()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, ConversionError::Network(_)));
    }

    #[test]
    fn test_status_class() {
        let result = |status| FetchResult {
            status,
            body: Vec::new(),
            elapsed: Duration::ZERO,
        };

        assert!(!result(199).is_success());
        assert!(result(200).is_success());
        assert!(result(299).is_success());
        assert!(!result(300).is_success());
        assert!(!result(500).is_success());
    }
}
