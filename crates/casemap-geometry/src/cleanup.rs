//! Occupancy map cleanup before contour tracing.
//!
//! Scanned maps carry speckle from sensor noise and hairline breaks where
//! a wall was only partly observed. Cleanup runs four steps:
//!
//! 1. Median filter to drop isolated speckle.
//! 2. Threshold: samples at or below `occupied_max` are walls.
//! 3. Morphological close to bridge hairline breaks in walls.
//! 4. Gap pruning: for growing radii, free space is dilated into the
//!    walls; each touched wall fragment that fits in a
//!    `max_gap_px x max_gap_px` box is turned into free space.
//!
//! The output is binary in occupancy polarity: walls are 0, everything
//! else is 255, matching the decoded map so both trace and display the
//! same way. Unknown space is not preserved.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::raster::{Raster, RasterTooLarge};
use crate::types::PipelineError;

const WALL: u8 = 0;
const FREE: u8 = u8::MAX;

/// Parameters for [`clean_map`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Median filter radius. `1` is a 3x3 window; `0` disables the filter.
    pub median_radius: u32,

    /// Highest sample value treated as a wall.
    pub occupied_max: u8,

    /// Closing radius (Chebyshev distance) used to bridge wall breaks.
    /// `0` disables closing.
    pub close_radius: u8,

    /// Largest wall fragment, in pixels per side, that gap pruning may
    /// remove. Radii `1..max_gap_px` (exclusive) are tried, so the default
    /// of 4 dilates with 3x3, 5x5 and 7x7 kernels.
    pub max_gap_px: u8,
}

impl CleanupConfig {
    /// Default median radius (3x3 window).
    pub const DEFAULT_MEDIAN_RADIUS: u32 = 1;

    /// Default wall cut-off.
    pub const DEFAULT_OCCUPIED_MAX: u8 = 1;

    /// Default closing radius.
    pub const DEFAULT_CLOSE_RADIUS: u8 = 1;

    /// 20 cm at 5 cm per pixel.
    pub const DEFAULT_MAX_GAP_PX: u8 = 4;

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `median_radius` is
    /// larger than 16.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.median_radius > 16 {
            return Err(PipelineError::InvalidConfig(format!(
                "cleanup median_radius must be <= 16, got {}",
                self.median_radius
            )));
        }
        Ok(())
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            median_radius: Self::DEFAULT_MEDIAN_RADIUS,
            occupied_max: Self::DEFAULT_OCCUPIED_MAX,
            close_radius: Self::DEFAULT_CLOSE_RADIUS,
            max_gap_px: Self::DEFAULT_MAX_GAP_PX,
        }
    }
}

/// Clean a grayscale occupancy image. See the module docs.
#[must_use = "returns the cleaned image"]
pub fn clean_map(image: &GrayImage, config: &CleanupConfig) -> GrayImage {
    let filtered = if config.median_radius == 0 {
        image.clone()
    } else {
        imageproc::filter::median_filter(image, config.median_radius, config.median_radius)
    };

    // Morphology works on non-zero foreground, so walls are 255 here.
    let walls = GrayImage::from_fn(filtered.width(), filtered.height(), |x, y| {
        let v = filtered.get_pixel(x, y).0[0];
        Luma([if v <= config.occupied_max { u8::MAX } else { 0 }])
    });
    let walls = if config.close_radius == 0 {
        walls
    } else {
        imageproc::morphology::close(&walls, Norm::LInf, config.close_radius)
    };

    let free = invert(&walls);
    let mut result = free.clone();
    let limit = u32::from(config.max_gap_px);

    for radius in 1..config.max_gap_px {
        let dilated = imageproc::morphology::dilate(&free, Norm::LInf, radius);
        let touched = GrayImage::from_fn(free.width(), free.height(), |x, y| {
            let reached = dilated.get_pixel(x, y).0[0] != WALL;
            let is_wall = free.get_pixel(x, y).0[0] == WALL;
            Luma([if reached && is_wall { u8::MAX } else { 0 }])
        });

        let labels = connected_components(&touched, Connectivity::Eight, Luma([0]));
        let small = small_components(&labels, limit);
        let mut pruned = 0_usize;
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label != 0 && small.get(label as usize).copied().unwrap_or(false) {
                result.put_pixel(x, y, Luma([FREE]));
                pruned += 1;
            }
        }
        debug!(radius, pruned, "gap pruning pass");
    }

    result
}

/// [`clean_map`] applied to a decoded raster.
///
/// Missing samples of a truncated raster are treated as unknown space, so
/// the cleaned raster is always complete.
///
/// # Errors
///
/// Returns [`RasterTooLarge`] if the declared grid is too large to
/// materialize.
pub fn clean_raster(raster: &Raster, config: &CleanupConfig) -> Result<Raster, RasterTooLarge> {
    let image = raster.to_gray_image()?;
    Ok(Raster::from_gray_image(&clean_map(&image, config)))
}

fn invert(image: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = u8::MAX - pixel.0[0];
    }
    out
}

/// For each label, whether its bounding box fits in `limit x limit` and its
/// area is at most `limit^2`. Index 0 (background) is always `false`.
fn small_components(labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>, limit: u32) -> Vec<bool> {
    #[derive(Clone, Copy)]
    struct Extent {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        area: u64,
    }

    let count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut extents: Vec<Option<Extent>> = vec![None; count + 1];

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        let extent = extents[label].get_or_insert(Extent {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
        });
        extent.min_x = extent.min_x.min(x);
        extent.min_y = extent.min_y.min(y);
        extent.max_x = extent.max_x.max(x);
        extent.max_y = extent.max_y.max(y);
        extent.area += 1;
    }

    let max_area = u64::from(limit) * u64::from(limit);
    extents
        .iter()
        .map(|extent| {
            extent.is_some_and(|e| {
                let side = (e.max_x - e.min_x + 1).max(e.max_y - e.min_y + 1);
                side <= limit && e.area <= max_area
            })
        })
        .collect()
}
