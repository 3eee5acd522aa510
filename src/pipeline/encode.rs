//! Image encoding for both directions.
//!
//! * [`encode_image`] turns a rasterised page into PNG or JPEG file bytes.
//! * [`encode_for_embedding`] turns a decoded upload into a stream a PDF
//!   image XObject can carry: JPEG sources stay JPEG (`DCTDecode`), PNG
//!   sources become zlib RGB samples (`FlateDecode`) with an optional soft
//!   mask for the alpha channel.

use crate::config::OutputFormat;
use crate::output::Encoding;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::{Cursor, Write};
use tracing::debug;

/// Encode a rasterised page as a PNG or JPEG file.
///
/// JPEG has no alpha channel, so pages are flattened to RGB first.
pub fn encode_image(
    img: &DynamicImage,
    format: OutputFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        }
        OutputFormat::Jpeg => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, jpeg_quality.clamp(1, 100)).encode_image(&rgb)?;
        }
    }
    debug!(
        "Encoded {}x{} page → {} bytes {:?}",
        img.width(),
        img.height(),
        buf.len(),
        format
    );
    Ok(buf)
}

/// Pixel data ready to become a PDF image XObject.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
    pub encoding: Encoding,
}

/// Prepare a decoded upload for embedding.
///
/// `was_jpeg` selects the JPEG path; everything else is stored losslessly.
pub fn encode_for_embedding(
    img: &DynamicImage,
    was_jpeg: bool,
    jpeg_quality: u8,
) -> std::io::Result<EmbeddedImage> {
    let (width, height) = (img.width(), img.height());

    if was_jpeg {
        let rgb = img.to_rgb8();
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, jpeg_quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(std::io::Error::other)?;
        return Ok(EmbeddedImage {
            width,
            height,
            bytes,
            encoding: Encoding::Jpeg,
        });
    }

    let rgb = img.to_rgb8();
    let bytes = deflate(rgb.as_raw())?;
    let alpha = if img.color().has_alpha() {
        let plane: Vec<u8> = img.to_rgba8().pixels().map(|p| p.0[3]).collect();
        Some(deflate(&plane)?)
    } else {
        None
    };

    Ok(EmbeddedImage {
        width,
        height,
        bytes,
        encoding: Encoding::FlateRgb { alpha },
    })
}

fn deflate(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    encoder.finish()
}
