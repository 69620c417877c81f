//! Thin adapter over the `image` crate
//!
//! Decoding accepts any format the `image` crate recognises from the byte
//! signature (JPEG and PNG in practice). Encoding always produces PNG.
//! These functions are CPU bound and never yield; async callers should run
//! them through [`convert_to_png_blocking`].

use crate::error::ConversionError;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ConversionError> {
    if bytes.is_empty() {
        return Err(ConversionError::Decode("empty image data".to_string()));
    }

    image::load_from_memory(bytes).map_err(|e| ConversionError::Decode(e.to_string()))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ConversionError> {
    let mut output = Cursor::new(Vec::new());
    image
        .write_to(&mut output, ImageOutputFormat::Png)
        .map_err(|e| ConversionError::Encode(e.to_string()))?;

    let output = output.into_inner();
    if output.is_empty() {
        return Err(ConversionError::Encode("empty PNG output".to_string()));
    }

    Ok(output)
}

pub fn convert_to_png(bytes: &[u8]) -> Result<Vec<u8>, ConversionError> {
    let image = decode(bytes)?;
    encode_png(&image)
}

/// Runs [`convert_to_png`] on the blocking thread pool.
///
/// Takes the source by value so it can move into the blocking task; the
/// buffer is handed back alongside the result for size accounting.
pub async fn convert_to_png_blocking(
    bytes: Vec<u8>,
) -> (Vec<u8>, Result<Vec<u8>, ConversionError>) {
    let joined = tokio::task::spawn_blocking(move || {
        let result = convert_to_png(&bytes);
        (bytes, result)
    })
    .await;

    match joined {
        Ok(pair) => pair,
        Err(e) => (Vec::new(), Err(ConversionError::from(e))),
    }
}
