//! Configuration management with serde serialization/deserialization
//!
//! This module holds the tool configuration together with the request and
//! result types that flow through the conversion pipeline.

use crate::error::ConversionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration structure for the converter
///
/// # Examples
///
/// ```rust
/// use topng::Config;
///
/// let config = Config {
///     workers: 8,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent workers used for batch conversions (default: number of CPUs)
    pub workers: usize,

    /// Timeout applied by the HTTP transport to each download (default: none)
    ///
    /// This is the only timeout in the system. Decode, encode and write
    /// steps always run to completion.
    pub http_timeout: Option<Duration>,

    /// Custom User-Agent header for downloads (default: reqwest default)
    pub user_agent: Option<String>,

    /// File extensions picked up when a batch input is a directory
    /// (default: jpg, jpeg). Matching is case-insensitive.
    pub extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            http_timeout: None,
            user_agent: None,
            extensions: vec!["jpg".to_string(), "jpeg".to_string()],
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConversionError> {
        if self.workers == 0 {
            return Err(ConversionError::Configuration(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        if let Some(timeout) = self.http_timeout {
            if timeout.is_zero() {
                return Err(ConversionError::Configuration(
                    "HTTP timeout must be greater than 0".to_string(),
                ));
            }
        }

        if self.extensions.is_empty() {
            return Err(ConversionError::Configuration(
                "At least one input extension is required".to_string(),
            ));
        }

        Ok(())
    }

    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

/// Where a source image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Downloaded over HTTP(S)
    Remote(Url),
    /// Read from local storage
    Local(PathBuf),
}

impl SourceLocation {
    /// Classifies a raw CLI/batch entry.
    ///
    /// Anything that parses as an `http` or `https` URL is remote; every
    /// other string is treated as a local path. Blank input is rejected.
    pub fn parse(raw: &str) -> Result<Self, ConversionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConversionError::InvalidSource(
                "empty source location".to_string(),
            ));
        }

        match Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Self::Remote(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|_| ConversionError::InvalidSource(trimmed.to_string())),
            Ok(url) if url.scheme().len() > 1 => Err(ConversionError::InvalidSource(format!(
                "unsupported scheme {:?} in {}",
                url.scheme(),
                trimmed
            ))),
            // Single-letter schemes are Windows drive letters, not URLs.
            _ => Ok(Self::Local(PathBuf::from(trimmed))),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Last path segment without extension, used to name batch outputs.
    pub fn file_stem(&self) -> Option<String> {
        match self {
            Self::Remote(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    Path::new(segment)
                        .file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_else(|| segment.to_string())
                }),
            Self::Local(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned()),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: SourceLocation,
    pub destination: PathBuf,
}

impl ConversionRequest {
    pub fn new(source: SourceLocation, destination: impl Into<PathBuf>) -> Self {
        Self {
            source,
            destination: destination.into(),
        }
    }

    pub fn remote(url: Url, destination: impl Into<PathBuf>) -> Self {
        Self::new(SourceLocation::Remote(url), destination)
    }

    pub fn local(path: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(SourceLocation::Local(path.into()), destination)
    }
}

/// Outcome of a single pipeline invocation
///
/// `output_bytes` is non-empty exactly when `error` is `None`.
/// `source_bytes` is kept whenever the source was obtained, even if a later
/// step failed, so batch size accounting still sees it.
#[derive(Debug)]
pub struct ConversionResult {
    pub source_bytes: Vec<u8>,
    pub output_bytes: Vec<u8>,
    pub error: Option<ConversionError>,
    pub duration: Duration,
}

impl ConversionResult {
    pub fn success(source_bytes: Vec<u8>, output_bytes: Vec<u8>, duration: Duration) -> Self {
        Self {
            source_bytes,
            output_bytes,
            error: None,
            duration,
        }
    }

    pub fn failure(source_bytes: Vec<u8>, error: ConversionError, duration: Duration) -> Self {
        Self {
            source_bytes,
            output_bytes: Vec::new(),
            error: Some(error),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<ConversionOutput, ConversionError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(ConversionOutput {
                source_bytes: self.source_bytes,
                output_bytes: self.output_bytes,
            }),
        }
    }
}

/// Bytes produced by a successful conversion
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub source_bytes: Vec<u8>,
    pub output_bytes: Vec<u8>,
}
