//! Image encoding: `DynamicImage` → JPEG bytes → base64 `ImageData`.
//!
//! Pages are stored and passed around as JPEG because slide decks are mostly
//! large flat colour areas and photos, where JPEG at quality 85 is a fraction
//! of the PNG size and the model only needs to read headline-sized text.
//! The alpha channel is dropped first since the JPEG encoder rejects RGBA.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// MIME type of every rendered page.
pub const PAGE_MIME_TYPE: &str = "image/jpeg";

/// Encode a rasterised page as JPEG at `quality` (1–100).
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;
    debug!(
        "Encoded {}x{} page → {} bytes JPEG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Wrap JPEG bytes for a multimodal chat request.
///
/// `detail: "high"` lets GPT-4-class models tile the image instead of
/// looking at a single downscaled overview, which loses small slide text.
pub fn to_image_data(jpeg: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(jpeg), PAGE_MIME_TYPE).with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_rgba_image_as_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 128, 255, 255])));
        let jpeg = encode_jpeg(&img, 85).expect("encode should succeed");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "JPEG SOI marker");
    }

    #[test]
    fn image_data_is_base64_jpeg() {
        let data = to_image_data(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(data.mime_type, PAGE_MIME_TYPE);
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }
}
