//! Square crop tool.
//!
//! The crop always reads from the original upload, so repeated crops start
//! from the same source pixels and never compound.

use image::GenericImageView;
use serde::{Deserialize, Serialize};

use crate::working_image::ImageData;

#[derive(Debug, thiserror::Error)]
pub enum CropError {
    #[error("Crop selection must not be empty")]
    EmptySelection,
    #[error("Crop selection {x},{y} size {size} exceeds image bounds {width}x{height}")]
    OutOfBounds {
        x: u32,
        y: u32,
        size: u32,
        width: u32,
        height: u32,
    },
    #[error("Invalid crop view: {0}")]
    InvalidView(String),
    #[error("Failed to rasterize crop: {0}")]
    Rasterize(#[from] image::ImageError),
}

/// Square region in original pixel coordinates. One edge length keeps the
/// selection aspect-locked regardless of the source orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropSelection {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl CropSelection {
    pub fn new(x: u32, y: u32, size: u32) -> Self {
        Self { x, y, size }
    }

    /// Derives the selection shown by the pan/zoom overlay.
    ///
    /// `zoom` 1.0 selects the largest square that fits the shorter side;
    /// `center_x`/`center_y` are fractions of the image width/height. The
    /// square is clamped so it always stays inside the image.
    pub fn from_view(
        width: u32,
        height: u32,
        zoom: f64,
        center_x: f64,
        center_y: f64,
    ) -> Result<Self, CropError> {
        if width == 0 || height == 0 {
            return Err(CropError::EmptySelection);
        }
        if !zoom.is_finite() || zoom < 1.0 {
            return Err(CropError::InvalidView(format!(
                "zoom must be >= 1.0, got {}",
                zoom
            )));
        }
        if !center_x.is_finite() || !center_y.is_finite() {
            return Err(CropError::InvalidView("center must be finite".to_string()));
        }

        let base = width.min(height) as f64;
        let size = ((base / zoom).round() as u32).clamp(1, width.min(height));

        let half = size as f64 / 2.0;
        let cx = center_x.clamp(0.0, 1.0) * width as f64;
        let cy = center_y.clamp(0.0, 1.0) * height as f64;

        let x = (cx - half).round().clamp(0.0, (width - size) as f64) as u32;
        let y = (cy - half).round().clamp(0.0, (height - size) as f64) as u32;

        Ok(Self { x, y, size })
    }

    /// Largest centred square; what the overlay shows when it opens.
    pub fn centered(width: u32, height: u32) -> Result<Self, CropError> {
        Self::from_view(width, height, 1.0, 0.5, 0.5)
    }

    pub fn validate(&self, width: u32, height: u32) -> Result<(), CropError> {
        if self.size == 0 {
            return Err(CropError::EmptySelection);
        }

        let fits_x = self.x.checked_add(self.size).is_some_and(|end| end <= width);
        let fits_y = self.y.checked_add(self.size).is_some_and(|end| end <= height);
        if !fits_x || !fits_y {
            return Err(CropError::OutOfBounds {
                x: self.x,
                y: self.y,
                size: self.size,
                width,
                height,
            });
        }

        Ok(())
    }
}

/// Copies exactly the selected region of `original` into a new image at its
/// native resolution.
pub fn crop(original: &ImageData, selection: &CropSelection) -> Result<ImageData, CropError> {
    let (width, height) = original.pixels().dimensions();
    selection.validate(width, height)?;

    let region = original
        .pixels()
        .crop_imm(selection.x, selection.y, selection.size, selection.size);

    Ok(ImageData::from_pixels(region)?)
}
