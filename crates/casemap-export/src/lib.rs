//! casemap-export: Pure output serializers (sans-IO)
//!
//! Converts loaded maps into output formats: SVG for contours with
//! evidence markers, PNG for the base bitmap and the detected line
//! overlay.

pub mod png;
pub mod svg;

pub use png::{
    display_image, encode_line_overlay_png, encode_png, line_overlay_image,
};
pub use svg::{SvgMetadata, build_path_data, to_svg};

/// Errors from export serializers.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The PNG encoder rejected the image.
    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),

    /// The raster declares more pixels than may be rendered.
    #[error(transparent)]
    TooLarge(#[from] casemap_geometry::RasterTooLarge),
}
