//! Caller-facing preview: the accepted face outlined on a re-encoded JPEG.

use crate::types::FaceRegion;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use thiserror::Error;

const PREVIEW_JPEG_QUALITY: u8 = 80;
const PREVIEW_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const PREVIEW_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("region {0:?} has no area")]
    EmptyRegion(FaceRegion),
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Draw `region` onto a copy of `image` and encode it as JPEG.
pub fn render_preview(image: &RgbImage, region: &FaceRegion) -> Result<Vec<u8>, PreviewError> {
    if region.width() == 0 || region.height() == 0 {
        return Err(PreviewError::EmptyRegion(*region));
    }

    let mut canvas = image.clone();
    for inset in 0..PREVIEW_THICKNESS {
        let w = region.width().saturating_sub(inset * 2);
        let h = region.height().saturating_sub(inset * 2);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((region.left + inset) as i32, (region.top + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(&mut canvas, rect, PREVIEW_COLOR);
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, PREVIEW_JPEG_QUALITY).encode_image(&canvas)?;
    Ok(jpeg)
}
