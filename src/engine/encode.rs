//! Image encoding: PNG bytes for the image writer, base64 `ImageData` for
//! the vision model.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Lossless PNG encoding of a rendered page or cropped region.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a rendered page as a base64 PNG attachment.
///
/// `detail: "high"` keeps fine print legible to tiling vision models.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let b64 = STANDARD.encode(png_bytes(img)?);
    debug!("Encoded {}x{} page → {} bytes base64", img.width(), img.height(), b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Crop `bbox` (PDF points, top-left origin) out of a page rendered at
/// `scale` pixels per point. Returns `None` when the region is empty.
pub fn crop_region(page: &DynamicImage, bbox: [f32; 4], scale: f32) -> Option<DynamicImage> {
    let (w, h) = (page.width() as f32, page.height() as f32);
    let x0 = (bbox[0] * scale).clamp(0.0, w);
    let y0 = (bbox[1] * scale).clamp(0.0, h);
    let x1 = (bbox[2] * scale).clamp(0.0, w);
    let y1 = (bbox[3] * scale).clamp(0.0, h);
    let (cw, ch) = ((x1 - x0).floor() as u32, (y1 - y0).floor() as u32);
    if cw == 0 || ch == 0 {
        return None;
    }
    Some(page.crop_imm(x0 as u32, y0 as u32, cw, ch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let data = encode_page(&red(10, 10)).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn crop_scales_and_clamps() {
        let page = red(200, 100);
        let c = crop_region(&page, [10.0, 10.0, 50.0, 30.0], 2.0).unwrap();
        assert_eq!((c.width(), c.height()), (80, 40));

        let c = crop_region(&page, [90.0, 40.0, 500.0, 500.0], 2.0).unwrap();
        assert_eq!((c.width(), c.height()), (20, 20));

        assert!(crop_region(&page, [10.0, 10.0, 10.0, 30.0], 2.0).is_none());
    }
}
