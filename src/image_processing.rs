//! Image normalization for the 16-level gray e-paper display
//!
//! - Flatten transparency onto white
//! - Rotate landscape sources to portrait
//! - Scale to the display width
//! - Quantize to a 16-level gray palette (no dithering)
//! - Compose onto a white 540x960 canvas
//! - Encode as 4-bit indexed PNG

use crate::error::AppError;
use crate::palette::{GrayPalette, MAX_COLORS};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use png::{BitDepth, ColorType, Compression, Encoder};
use std::io::Cursor;

/// Display width in pixels (portrait)
pub const DISPLAY_WIDTH: u32 = 540;

/// Display height in pixels (portrait)
pub const DISPLAY_HEIGHT: u32 = 960;

/// A display-ready paletted image
#[derive(Debug, Clone)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub palette: GrayPalette,
    /// One palette index per pixel, row-major
    pub indices: Vec<u8>,
}

impl Raster {
    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.indices[(y * self.width + x) as usize]
    }
}

/// Decode and normalize arbitrary image bytes into a display raster
pub fn normalize(image_data: &[u8]) -> Result<Raster, AppError> {
    let img = image::load_from_memory(image_data)
        .map_err(|e| AppError::ImageProcessing(format!("Failed to decode image: {}", e)))?;

    tracing::info!("Source image size: {}x{}", img.width(), img.height());

    Ok(normalize_image(&img))
}

/// Normalize an already decoded image
pub fn normalize_image(img: &DynamicImage) -> Raster {
    let flattened = flatten_onto_white(img);
    let portrait = to_portrait(flattened);

    let (src_width, src_height) = portrait.dimensions();
    let new_height = scaled_height(src_width, src_height);

    // Only rows that land on the canvas are resampled
    let resized = if new_height > DISPLAY_HEIGHT {
        let visible_rows = visible_source_rows(src_width, src_height);
        tracing::debug!(
            "Cropping {}x{} source to its top {} rows before scaling",
            src_width,
            src_height,
            visible_rows
        );
        let cropped = imageops::crop_imm(&portrait, 0, 0, src_width, visible_rows).to_image();
        imageops::resize(&cropped, DISPLAY_WIDTH, DISPLAY_HEIGHT, FilterType::CatmullRom)
    } else {
        imageops::resize(&portrait, DISPLAY_WIDTH, new_height, FilterType::CatmullRom)
    };

    let gray = to_luma(&resized);
    let palette = GrayPalette::from_pixels(gray.as_raw(), MAX_COLORS);

    compose(&gray, palette)
}

/// Flatten alpha onto an opaque white background, using alpha as the mask
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    tracing::debug!("Image has transparency; flattening onto white");
    let rgba = img.to_rgba8();
    let mut output = RgbImage::new(rgba.width(), rgba.height());
    for (src, dst) in rgba.pixels().zip(output.pixels_mut()) {
        let alpha = src[3] as u32;
        for c in 0..3 {
            dst[c] = ((src[c] as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        }
    }
    output
}

/// Rotate 90 degrees counter-clockwise when wider than tall
fn to_portrait(img: RgbImage) -> RgbImage {
    if img.width() > img.height() {
        tracing::debug!("Rotating {}x{} source to portrait", img.width(), img.height());
        imageops::rotate270(&img)
    } else {
        img
    }
}

/// Height after scaling a `width` x `height` source to the display width
pub fn scaled_height(width: u32, height: u32) -> u32 {
    let scale = DISPLAY_WIDTH as f64 / width as f64;
    ((height as f64 * scale).round_ties_even() as u32).max(1)
}

/// Source rows covering the full canvas height once scaled to the display width
fn visible_source_rows(width: u32, height: u32) -> u32 {
    let rows = (DISPLAY_HEIGHT as u64 * width as u64).div_ceil(DISPLAY_WIDTH as u64);
    (rows as u32).clamp(1, height)
}

/// Top offset that centers content of `height` rows, or 0 once it fills the canvas
pub fn vertical_offset(height: u32) -> u32 {
    if height < DISPLAY_HEIGHT {
        (DISPLAY_HEIGHT - height) / 2
    } else {
        0
    }
}

/// 8-bit luma using ITU-R 601 weights
fn to_luma(img: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(img.width(), img.height());
    for (src, dst) in img.pixels().zip(gray.pixels_mut()) {
        let [r, g, b] = src.0;
        dst[0] = ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8;
    }
    gray
}

/// Quantize the scaled image and paste it onto a white-filled display canvas
fn compose(gray: &GrayImage, palette: GrayPalette) -> Raster {
    let white_index = match palette.white_index() {
        Some(index) => index,
        None => {
            tracing::warn!("Could not determine white index for palette, defaulting to 0");
            0
        }
    };

    let mut indices = vec![white_index; (DISPLAY_WIDTH * DISPLAY_HEIGHT) as usize];

    let lookup = palette.lookup_table();
    let y_offset = vertical_offset(gray.height());
    let rows = gray.height().min(DISPLAY_HEIGHT - y_offset);
    let width = gray.width().min(DISPLAY_WIDTH) as usize;

    for y in 0..rows {
        let src_start = (y * gray.width()) as usize;
        let src_row = &gray.as_raw()[src_start..src_start + width];
        let dst_start = ((y + y_offset) * DISPLAY_WIDTH) as usize;
        for (dst, &level) in indices[dst_start..dst_start + width].iter_mut().zip(src_row) {
            *dst = lookup[level as usize];
        }
    }

    tracing::debug!(
        "Composed {}x{} image at y_offset={} with palette {:?}",
        gray.width(),
        gray.height(),
        y_offset,
        palette.levels()
    );

    Raster {
        width: DISPLAY_WIDTH,
        height: DISPLAY_HEIGHT,
        palette,
        indices,
    }
}

/// Encode a raster as a compressed 4-bit indexed PNG
pub fn encode_indexed_png(raster: &Raster) -> Result<Vec<u8>, AppError> {
    let mut output = Vec::new();

    // PLTE must hold at least one entry
    let plte = if raster.palette.is_empty() {
        vec![255, 255, 255]
    } else {
        raster.palette.png_palette()
    };

    let row_bytes = raster.width.div_ceil(2) as usize;
    let mut packed = Vec::with_capacity(row_bytes * raster.height as usize);
    for row in raster.indices.chunks(raster.width as usize) {
        for pair in row.chunks(2) {
            let hi = pair[0] & 0x0f;
            let lo = pair.get(1).copied().unwrap_or(0) & 0x0f;
            packed.push((hi << 4) | lo);
        }
    }

    {
        let mut encoder = Encoder::new(Cursor::new(&mut output), raster.width, raster.height);
        encoder.set_color(ColorType::Indexed);
        encoder.set_depth(BitDepth::Four);
        encoder.set_palette(plte);
        encoder.set_compression(Compression::Best);

        let mut writer = encoder
            .write_header()
            .map_err(|e| AppError::ImageProcessing(format!("PNG header error: {}", e)))?;

        writer
            .write_image_data(&packed)
            .map_err(|e| AppError::ImageProcessing(format!("PNG write error: {}", e)))?;
    }

    Ok(output)
}
