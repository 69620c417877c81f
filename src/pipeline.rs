//! Per-item conversion pipeline
//!
//! Composes source retrieval, status validation, PNG conversion and the
//! final write into a single operation. Cancellation is observed once, at
//! entry; a pipeline that has started always runs to completion or to its
//! first failure.

use crate::codec::convert_to_png_blocking;
use crate::{
    Config, ConversionError, ConversionOutput, ConversionRequest, ConversionResult, Fetch,
    HttpFetcher, Metrics, SourceLocation,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Download/read, decode, encode and write pipeline
///
/// Cheap to clone; clones share the fetcher and metrics handles.
///
/// # Examples
///
/// ```rust,no_run
/// use topng::{Config, ConversionPipeline, ConversionRequest, SourceLocation};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = ConversionPipeline::new(&Config::default())?;
///     let request = ConversionRequest::new(
///         SourceLocation::parse("https://example.com/photo.jpg")?,
///         "photo.png",
///     );
///
///     let output = pipeline.try_convert(request, &CancellationToken::new()).await?;
///     println!("{} -> {} bytes", output.source_bytes.len(), output.output_bytes.len());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ConversionPipeline {
    fetcher: Arc<dyn Fetch>,
    metrics: Arc<Metrics>,
}

impl ConversionPipeline {
    pub fn new(config: &Config) -> Result<Self, ConversionError> {
        Ok(Self::with_fetcher(Arc::new(HttpFetcher::new(config)?)))
    }

    pub fn with_fetcher(fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            fetcher,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Runs the full pipeline for one request.
    pub async fn convert(
        &self,
        request: ConversionRequest,
        cancel: &CancellationToken,
    ) -> ConversionResult {
        let start = Instant::now();

        if cancel.is_cancelled() {
            let error = ConversionError::Canceled;
            self.metrics.record_failure(start.elapsed(), 0, &error);
            return ConversionResult::failure(Vec::new(), error, start.elapsed());
        }

        let source_bytes = match self.read_source(&request.source).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.record_failure(start.elapsed(), 0, &e);
                return ConversionResult::failure(Vec::new(), e, start.elapsed());
            }
        };

        let (source_bytes, converted) = convert_to_png_blocking(source_bytes).await;
        let written = match converted {
            Ok(png) => write_output(&request.destination, &png).await.map(|_| png),
            Err(e) => Err(e),
        };

        let duration = start.elapsed();
        match written {
            Ok(png) => {
                debug!(
                    "Converted {} -> {} ({} -> {} bytes) in {:?}",
                    request.source,
                    request.destination.display(),
                    source_bytes.len(),
                    png.len(),
                    duration
                );
                self.metrics
                    .record_conversion(duration, source_bytes.len(), png.len());
                ConversionResult::success(source_bytes, png, duration)
            }
            Err(e) => {
                self.metrics
                    .record_failure(duration, source_bytes.len(), &e);
                ConversionResult::failure(source_bytes, e, duration)
            }
        }
    }

    pub async fn try_convert(
        &self,
        request: ConversionRequest,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutput, ConversionError> {
        self.convert(request, cancel).await.into_result()
    }

    /// Decodes and re-encodes in-memory bytes without touching storage.
    pub async fn convert_bytes(
        &self,
        source: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ConversionError> {
        if cancel.is_cancelled() {
            return Err(ConversionError::Canceled);
        }

        convert_to_png_blocking(source).await.1
    }

    /// Converts in-memory bytes and writes the PNG to `destination`.
    pub async fn convert_bytes_and_write(
        &self,
        source: Vec<u8>,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ConversionError> {
        let png = self.convert_bytes(source, cancel).await?;
        write_output(destination, &png).await?;
        Ok(png)
    }

    async fn read_source(&self, source: &SourceLocation) -> Result<Vec<u8>, ConversionError> {
        match source {
            SourceLocation::Local(path) => fs::read(path)
                .await
                .map_err(|e| ConversionError::Io(format!("reading {}: {}", path.display(), e))),
            SourceLocation::Remote(url) => self.download(url).await,
        }
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, ConversionError> {
        let fetched = self.fetcher.fetch(url).await.map_err(|e| match e {
            ConversionError::Network(msg) => {
                ConversionError::Network(format!("downloading {:?}: {}", url.as_str(), msg))
            }
            other => other,
        })?;

        if !fetched.is_success() {
            return Err(ConversionError::UnexpectedStatus {
                url: url.to_string(),
                code: fetched.status,
            });
        }

        Ok(fetched.body)
    }
}

async fn write_output(destination: &Path, png: &[u8]) -> Result<(), ConversionError> {
    fs::write(destination, png)
        .await
        .map_err(|e| ConversionError::Io(format!("writing {}: {}", destination.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::sample_jpeg;
    use crate::fetcher::{FetchResult, MockFetch};
    use crate::metrics::tests::{counting, Counts};
    use crate::ErrorClass;
    use std::time::Duration;
    use tempfile::TempDir;

    fn remote(path: &str) -> SourceLocation {
        SourceLocation::Remote(Url::parse(&format!("http://images.test{path}")).unwrap())
    }

    fn responding(status: u16, body: Vec<u8>) -> ConversionPipeline {
        let mut fetcher = MockFetch::new();
        fetcher.expect_fetch().times(1).returning(move |_| {
            Ok(FetchResult {
                status,
                body: body.clone(),
                elapsed: Duration::from_millis(1),
            })
        });
        ConversionPipeline::with_fetcher(Arc::new(fetcher))
    }

    #[tokio::test]
    async fn test_remote_conversion_writes_png() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out.png");
        let jpeg = sample_jpeg(40, 30);
        let pipeline = responding(200, jpeg.clone());

        let result = pipeline
            .convert(
                ConversionRequest::new(remote("/a.jpg"), &destination),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.source_bytes, jpeg);
        assert!(!result.output_bytes.is_empty());
        assert_eq!(std::fs::read(&destination).unwrap(), result.output_bytes);
    }

    #[tokio::test]
    async fn test_non_2xx_status_skips_decode() {
        for status in [199u16, 304, 301, 404, 500] {
            let dir = TempDir::new().unwrap();
            let destination = dir.path().join("out.png");
            // A body that would fail decoding proves decode was never reached.
            let pipeline = responding(status, b"not an image".to_vec());

            let result = pipeline
                .convert(
                    ConversionRequest::new(remote("/b.jpg"), &destination),
                    &CancellationToken::new(),
                )
                .await;

            match result.error {
                Some(ConversionError::UnexpectedStatus { code, .. }) => assert_eq!(code, status),
                other => panic!("expected UnexpectedStatus for {status}, got {other:?}"),
            }
            assert!(result.output_bytes.is_empty());
            assert!(!destination.exists());
        }
    }

    #[tokio::test]
    async fn test_malformed_source_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out.png");
        let pipeline = responding(200, b"\xff\xd8\xff garbage".to_vec());

        let result = pipeline
            .convert(
                ConversionRequest::new(remote("/c.jpg"), &destination),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.error.as_ref().map(|e| e.class()), Some(ErrorClass::Decode));
        assert!(result.output_bytes.is_empty());
        assert!(!result.source_bytes.is_empty());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_no_work() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out.png");
        let mut fetcher = MockFetch::new();
        fetcher.expect_fetch().times(0);
        let pipeline = ConversionPipeline::with_fetcher(Arc::new(fetcher));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline
            .convert(ConversionRequest::new(remote("/d.jpg"), &destination), &cancel)
            .await;

        assert!(matches!(result.error, Some(ConversionError::Canceled)));
        assert!(result.source_bytes.is_empty());
        assert!(!destination.exists());

        let err = pipeline.convert_bytes(sample_jpeg(4, 4), &cancel).await.unwrap_err();
        assert!(matches!(err, ConversionError::Canceled));
    }

    #[tokio::test]
    async fn test_cancelled_conversion_counts_as_failure() {
        let (metrics, counts) = counting();
        let pipeline = ConversionPipeline::with_fetcher(Arc::new(MockFetch::new()))
            .with_metrics(Arc::new(metrics));
        let dir = TempDir::new().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pipeline
            .convert(
                ConversionRequest::new(remote("/f.jpg"), dir.path().join("out.png")),
                &cancel,
            )
            .await;

        assert!(matches!(result.error, Some(ConversionError::Canceled)));
        assert_eq!(Counts::get(&counts.failures), 1);
        assert_eq!(Counts::get(&counts.conversions), 0);
    }

    #[tokio::test]
    async fn test_network_error_is_propagated() {
        let mut fetcher = MockFetch::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(ConversionError::Network("connection refused".to_string())));
        let pipeline = ConversionPipeline::with_fetcher(Arc::new(fetcher));
        let dir = TempDir::new().unwrap();

        let err = pipeline
            .try_convert(
                ConversionRequest::new(remote("/e.jpg"), dir.path().join("out.png")),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            ConversionError::Network(msg) => {
                assert!(msg.contains("http://images.test/e.jpg"));
                assert!(msg.contains("connection refused"));
            }
            other => panic!("expected Network, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_source_and_write_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.jpg");
        std::fs::write(&input, sample_jpeg(8, 8)).unwrap();
        let pipeline = ConversionPipeline::with_fetcher(Arc::new(MockFetch::new()));

        let output = pipeline
            .try_convert(
                ConversionRequest::local(&input, dir.path().join("in.png")),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!output.output_bytes.is_empty());

        let result = pipeline
            .convert(
                ConversionRequest::local(&input, dir.path().join("missing/dir/in.png")),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.error.as_ref().map(|e| e.class()), Some(ErrorClass::Io));
        assert!(result.output_bytes.is_empty());

        let result = pipeline
            .convert(
                ConversionRequest::local(dir.path().join("nope.jpg"), dir.path().join("x.png")),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.error.as_ref().map(|e| e.class()), Some(ErrorClass::Io));
    }

    #[tokio::test]
    async fn test_convert_bytes_and_write() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("bytes.png");
        let pipeline = ConversionPipeline::with_fetcher(Arc::new(MockFetch::new()));

        let png = pipeline
            .convert_bytes_and_write(sample_jpeg(12, 12), &destination, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), png);
    }
}
