//! A4 raster of a render plan, used for "Save as image".

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba, RgbaImage};
use log::debug;
use std::io::Cursor;

use crate::layout_renderer::{CellContent, RenderPlan};
use crate::package_catalog::{A4_HEIGHT_IN, A4_WIDTH_IN, PRINT_TOP_PADDING_IN, PRINT_WIDTH_IN};
use crate::working_image::ImageData;

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const CUT_GUIDE: Rgba<u8> = Rgba([0xdd, 0xdd, 0xdd, 255]);
const PLACEHOLDER_FILL: Rgba<u8> = Rgba([244, 244, 245, 255]);
const PLACEHOLDER_GLYPH: Rgba<u8> = Rgba([212, 212, 216, 255]);

pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 600;

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("DPI must be between {MIN_DPI} and {MAX_DPI}, got {0}")]
    InvalidDpi(u32),
    #[error("Failed to encode sheet: {0}")]
    Encode(#[from] image::ImageError),
}

fn to_px(inches: f64, dpi: u32) -> u32 {
    (inches * dpi as f64).round() as u32
}

/// Pixel rectangle of one cell on the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Lays the plan out on an A4 page: an 8in content block centred
/// horizontally, groups stacked below the top padding. Cells touch.
pub fn cell_rects(plan: &RenderPlan, dpi: u32) -> Vec<CellRect> {
    let left_in = (A4_WIDTH_IN - PRINT_WIDTH_IN) / 2.0;
    let mut top_in = PRINT_TOP_PADDING_IN;
    let mut rects = Vec::with_capacity(plan.cell_count());

    for group in &plan.groups {
        for cell in &group.cells {
            let x_in = left_in + cell.column as f64 * group.width_in;
            let y_in = top_in + cell.row as f64 * group.height_in;
            rects.push(CellRect {
                x: to_px(x_in, dpi),
                y: to_px(y_in, dpi),
                width: to_px(group.width_in, dpi),
                height: to_px(group.height_in, dpi),
            });
        }
        top_in += group.rows as f64 * group.height_in;
    }

    rects
}

/// Rasterizes the plan onto a white A4 portrait sheet.
pub fn compose_sheet(
    plan: &RenderPlan,
    image: Option<&ImageData>,
    dpi: u32,
) -> Result<RgbaImage, SheetError> {
    if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
        return Err(SheetError::InvalidDpi(dpi));
    }

    let mut canvas: RgbaImage =
        ImageBuffer::from_pixel(to_px(A4_WIDTH_IN, dpi), to_px(A4_HEIGHT_IN, dpi), PAPER);

    // One resized tile per size class, reused for every cell of that size
    let mut tiles: Vec<((u32, u32), RgbaImage)> = Vec::new();

    for ((_, cell), rect) in plan.cells().zip(cell_rects(plan, dpi)) {
        match (&cell.content, image) {
            (CellContent::Image { .. }, Some(image)) => {
                let key = (rect.width, rect.height);
                let tile = match tiles.iter().position(|(k, _)| *k == key) {
                    Some(idx) => &tiles[idx].1,
                    None => {
                        let resized = image
                            .pixels()
                            .resize_to_fill(rect.width, rect.height, FilterType::Lanczos3)
                            .to_rgba8();
                        tiles.push((key, resized));
                        &tiles[tiles.len() - 1].1
                    }
                };
                imageops::overlay(&mut canvas, tile, rect.x as i64, rect.y as i64);
            }
            _ => draw_placeholder(&mut canvas, rect),
        }
        draw_outline(&mut canvas, rect, CUT_GUIDE);
    }

    debug!(
        "Composed {} sheet with {} cells at {} dpi",
        plan.package_id,
        plan.cell_count(),
        dpi
    );
    Ok(canvas)
}

pub fn encode_png(sheet: RgbaImage) -> Result<Vec<u8>, SheetError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(sheet).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn draw_placeholder(canvas: &mut RgbaImage, rect: CellRect) {
    fill_rect(canvas, rect, PLACEHOLDER_FILL);

    // Diagonal cross in the middle third of the cell
    let side = rect.width.min(rect.height) / 3;
    let ox = rect.x + (rect.width - side) / 2;
    let oy = rect.y + (rect.height - side) / 2;
    for i in 0..side {
        put(canvas, ox + i, oy + i, PLACEHOLDER_GLYPH);
        put(canvas, ox + side - 1 - i, oy + i, PLACEHOLDER_GLYPH);
    }
}

fn fill_rect(canvas: &mut RgbaImage, rect: CellRect, color: Rgba<u8>) {
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            put(canvas, x, y, color);
        }
    }
}

fn draw_outline(canvas: &mut RgbaImage, rect: CellRect, color: Rgba<u8>) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let right = rect.x + rect.width - 1;
    let bottom = rect.y + rect.height - 1;
    for x in rect.x..=right {
        put(canvas, x, rect.y, color);
        put(canvas, x, bottom, color);
    }
    for y in rect.y..=bottom {
        put(canvas, rect.x, y, color);
        put(canvas, right, y, color);
    }
}

fn put(canvas: &mut RgbaImage, x: u32, y: u32, color: Rgba<u8>) {
    if x < canvas.width() && y < canvas.height() {
        canvas.put_pixel(x, y, color);
    }
}
