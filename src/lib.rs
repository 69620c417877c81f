//! # topng
//!
//! Downloads JPEG images, re-encodes them as PNG and writes them to local
//! storage, one at a time or in batches over a fixed-size worker pool.
//!
//! ## Pipeline
//!
//! Each item goes through the same steps:
//!
//! 1. cancellation check (only here, never mid-flight)
//! 2. read the local file or download the URL
//! 3. reject HTTP responses outside 2xx without decoding them
//! 4. decode, then encode as PNG (on the blocking thread pool)
//! 5. write the PNG to its destination
//!
//! Every error is returned unchanged to the caller. There is no retry.
//!
//! ## Batches
//!
//! [`BatchRunner::run_batch`] keeps at most `concurrency_limit` conversions
//! in flight. A failing item never stops its siblings; the first failure is
//! reported in [`BatchOutcome::first_error`] and all of them, ordered by item
//! index, in [`BatchOutcome::failures`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use topng::{Config, ConversionPipeline, ConversionRequest, SourceLocation};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = ConversionPipeline::new(&Config::default())?;
//!     let request = ConversionRequest::new(
//!         SourceLocation::parse("https://example.com/photo.jpg")?,
//!         "photo.png",
//!     );
//!     pipeline.try_convert(request, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! topng https://example.com/photo.jpg photo.png
//! topng batch --input urls.txt --output pngs/ --workers 32
//! ```
//!
//! ## Benchmarks
//!
//! ```bash
//! cargo bench
//! ```
//!
//! Runs read+convert, read+convert+write and download+convert+write over
//! worker fleets of 1 to 32.

/// Configuration, request and result types
pub mod config;

/// Error types
pub mod error;

/// JPEG/PNG codec adapter
pub mod codec;

/// HTTP download
pub mod fetcher;

/// Per-item conversion pipeline
pub mod pipeline;

/// Bounded worker pool for batch conversion
pub mod worker;

/// Command-line interface implementation
pub mod cli;

/// Conversion metrics
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use cli::*;
pub use codec::{convert_to_png, decode, encode_png};
pub use config::*;
pub use error::*;
pub use fetcher::*;
pub use crate::metrics::*;
pub use pipeline::*;
pub use utils::*;
pub use worker::*;
