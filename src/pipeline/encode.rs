//! Image encoding: `DynamicImage` → PNG bytes for the asset directory.
//!
//! Embedded PDF rasters arrive as decoded bitmaps in whatever pixel format the
//! producer used (CMYK JPEG, 1-bit masks, RGBA). Re-encoding everything as
//! PNG gives one lossless, universally viewable format and a predictable
//! `.png` extension for the Markdown reference.

use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// File extension (without dot) of everything [`encode_png`] produces.
pub const PNG_EXTENSION: &str = "png";

/// Encode a decoded raster as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_png(&img).expect("encode should succeed");
        assert!(data.starts_with(b"\x89PNG\r\n\x1a\n"));
        let decoded = image::load_from_memory(&data).expect("valid png");
        assert_eq!(decoded.width(), 10);
    }
}
