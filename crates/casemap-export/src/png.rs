//! PNG export of the decoded intensity grid and of detected lines.
//!
//! The base bitmap shown under the contours. Samples are rescaled from
//! the header's `max_sample` to the full byte range, and samples missing
//! from a truncated body render as unknown space.
//!
//! The line overlay shows the edge map in white with detected segments
//! drawn over it in green.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, Luma, Rgb, RgbImage};

use casemap_geometry::raster::UNKNOWN_SAMPLE;
use casemap_geometry::{LineDetection, Raster};

use crate::ExportError;

/// Segment color in the line overlay.
const LINE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Render the raster as an 8-bit grayscale image.
///
/// Rasters declaring a `max_sample` below 255 are stretched so their
/// maximum maps to white; values above `max_sample` clamp to white.
///
/// # Errors
///
/// Returns [`ExportError::TooLarge`] if the declared grid exceeds
/// [`MAX_RENDER_PIXELS`](casemap_geometry::raster::MAX_RENDER_PIXELS).
pub fn display_image(raster: &Raster) -> Result<GrayImage, ExportError> {
    raster.check_renderable()?;
    let max = raster.max_sample;
    Ok(GrayImage::from_fn(raster.width, raster.height, |x, y| {
        let value = raster.get(x, y).map_or(UNKNOWN_SAMPLE, |s| scale(s, max));
        Luma([value])
    }))
}

/// Encode the raster as PNG bytes.
///
/// # Errors
///
/// Returns [`ExportError::TooLarge`] for a grid too large to render, and
/// [`ExportError::Png`] if the encoder rejects the image, for example a
/// raster with zero width or height.
pub fn encode_png(raster: &Raster) -> Result<Vec<u8>, ExportError> {
    let image = display_image(raster)?;
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::L8,
    )?;
    Ok(buf)
}

/// Render the edge map with detected segments drawn over it.
#[must_use]
pub fn line_overlay_image(detection: &LineDetection) -> RgbImage {
    let edges = &detection.edges;
    let mut image = RgbImage::from_fn(edges.width(), edges.height(), |x, y| {
        let v = edges.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    });
    #[allow(clippy::cast_possible_truncation)]
    for segment in &detection.segments {
        imageproc::drawing::draw_line_segment_mut(
            &mut image,
            (segment.start.x as f32, segment.start.y as f32),
            (segment.end.x as f32, segment.end.y as f32),
            LINE_COLOR,
        );
    }
    image
}

/// Encode [`line_overlay_image`] as PNG bytes.
///
/// # Errors
///
/// Returns [`ExportError::Png`] if the encoder rejects the image.
pub fn encode_line_overlay_png(detection: &LineDetection) -> Result<Vec<u8>, ExportError> {
    let image = line_overlay_image(detection);
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

fn scale(sample: u8, max_sample: u32) -> u8 {
    if max_sample == 0 || max_sample >= u32::from(u8::MAX) {
        return sample;
    }
    let stretched = u32::from(sample).min(max_sample) * u32::from(u8::MAX) / max_sample;
    u8::try_from(stretched).unwrap_or(u8::MAX)
}
