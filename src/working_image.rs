//! Working image of a studio session.
//!
//! Holds the uploaded `original` (never modified after upload) and the
//! `current` image that crops and background removal replace. Images are
//! stored decoded and as a PNG encoding so they can be served, cropped and
//! forwarded without re-decoding.

use std::io::Cursor;
use std::sync::Arc;

use exif::{In, Reader, Tag};
use image::{DynamicImage, GenericImageView, ImageFormat};
use log::debug;
use sha2::{Digest, Sha256};

use crate::image_crop::{self, CropError, CropSelection};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Uploaded file is empty")]
    Empty,
    #[error("Uploaded file is not a supported image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Decoded image plus its PNG encoding and content hash.
#[derive(Debug)]
pub struct ImageData {
    pixels: DynamicImage,
    png: Vec<u8>,
    hash: String,
}

impl ImageData {
    pub fn from_pixels(pixels: DynamicImage) -> Result<Self, image::ImageError> {
        let mut png = Vec::new();
        pixels.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        let hash = content_hash(&png);
        Ok(Self { pixels, png, hash })
    }

    /// Decodes user supplied bytes and applies the EXIF orientation so the
    /// pixels are upright.
    pub fn decode(bytes: &[u8]) -> Result<Self, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }

        let img = image::load_from_memory(bytes).map_err(UploadError::Decode)?;
        let img = match read_orientation(bytes) {
            Some(orientation) => apply_orientation(img, orientation),
            None => img,
        };

        Self::from_pixels(img).map_err(UploadError::Encode)
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ImageInfo {
    pub version: String,
    pub width: u32,
    pub height: u32,
}

impl From<&ImageData> for ImageInfo {
    fn from(data: &ImageData) -> Self {
        let (width, height) = data.dimensions();
        Self {
            version: data.hash().to_string(),
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkingImageInfo {
    pub original: ImageInfo,
    pub current: ImageInfo,
    pub can_undo_background: bool,
}

#[derive(Debug, Clone)]
pub struct WorkingImage {
    original: Arc<ImageData>,
    current: Arc<ImageData>,
    before_background: Option<Arc<ImageData>>,
}

impl WorkingImage {
    pub fn upload(bytes: &[u8]) -> Result<Self, UploadError> {
        let data = Arc::new(ImageData::decode(bytes)?);
        let (width, height) = data.dimensions();
        debug!("Uploaded image {}x{} ({})", width, height, data.hash());

        Ok(Self {
            original: data.clone(),
            current: data,
            before_background: None,
        })
    }

    pub fn original(&self) -> &Arc<ImageData> {
        &self.original
    }

    pub fn current(&self) -> &Arc<ImageData> {
        &self.current
    }

    /// Crops `original` and makes the result current. On error nothing changes.
    pub fn apply_crop(&mut self, selection: &CropSelection) -> Result<(), CropError> {
        let cropped = image_crop::crop(&self.original, selection)?;
        self.current = Arc::new(cropped);
        self.before_background = None;
        Ok(())
    }

    pub fn apply_background_result(&mut self, processed: ImageData) {
        let previous = std::mem::replace(&mut self.current, Arc::new(processed));
        self.before_background = Some(previous);
    }

    /// Restores the image that was current before the last background removal.
    pub fn undo_background(&mut self) -> bool {
        match self.before_background.take() {
            Some(previous) => {
                self.current = previous;
                true
            }
            None => false,
        }
    }

    pub fn info(&self) -> WorkingImageInfo {
        WorkingImageInfo {
            original: ImageInfo::from(self.original.as_ref()),
            current: ImageInfo::from(self.current.as_ref()),
            can_undo_background: self.before_background.is_some(),
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn read_orientation(bytes: &[u8]) -> Option<u32> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.fliph().rotate270(),
        6 => img.rotate90(),
        7 => img.fliph().rotate90(),
        8 => img.rotate270(),
        _ => img, // 1 or unknown = no transformation
    }
}
