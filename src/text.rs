//! Text rendering for quote cards and messages
//!
//! Renders text with a TrueType font loaded at startup. Quote cards are
//! drawn as landscape grayscale images; messages are drawn black on a
//! transparent canvas. Both are handed to the normalizer afterwards.

use std::path::Path;

use ab_glyph::{point, Font, FontArc, PxScale, ScaleFont};
use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::error::AppError;

/// Quote card canvas (landscape, rotated to portrait by the normalizer)
pub const QUOTE_CARD_WIDTH: u32 = 960;
pub const QUOTE_CARD_HEIGHT: u32 = 540;

const QUOTE_FONT_SIZE: f32 = 30.0;
const QUOTE_MAX_TEXT_WIDTH: f32 = (QUOTE_CARD_WIDTH - 60) as f32;
const FOOTER_MARGIN: f32 = 20.0;

const MESSAGE_FONT_SIZE: f32 = 28.0;
const MESSAGE_PADDING: u32 = 20;
const MESSAGE_MAX_WIDTH: u32 = 540;

/// Load a TrueType/OpenType font from disk
pub fn load_font(path: &Path) -> Result<FontArc, AppError> {
    let data = std::fs::read(path)
        .map_err(|e| AppError::Font(format!("Failed to read {}: {}", path.display(), e)))?;
    FontArc::try_from_vec(data)
        .map_err(|e| AppError::Font(format!("Invalid font {}: {}", path.display(), e)))
}

/// Measure the width of text at a given scale
pub fn measure_text_width(font: &FontArc, text: &str, scale: PxScale) -> f32 {
    let scaled_font = font.as_scaled(scale);
    text.chars()
        .map(|c| scaled_font.h_advance(font.glyph_id(c)))
        .sum()
}

/// Greedy word wrap on whitespace
pub fn wrap_words(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    let mut current = first.to_string();
    for word in words {
        let candidate = format!("{} {}", current, word);
        if measure(&candidate) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    lines.push(current);
    lines
}

/// Wrap free-form text: newlines are kept, words wrap, over-long words break
pub fn wrap_message(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split(' ') {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };

            if measure(&candidate) <= max_width {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }

            // Break the word itself when it cannot fit on a line of its own
            for c in word.chars() {
                current.push(c);
                if measure(&current) > max_width && current.chars().count() > 1 {
                    current.pop();
                    lines.push(std::mem::take(&mut current));
                    current.push(c);
                }
            }
        }
        lines.push(current);
    }

    lines
}

/// Render a quote card: centered dialogue block above a centered footer
pub fn render_quote_card(font: &FontArc, dialogue: &[String], footer: &str) -> GrayImage {
    let mut card = GrayImage::from_pixel(QUOTE_CARD_WIDTH, QUOTE_CARD_HEIGHT, Luma([255]));
    let scale = PxScale::from(QUOTE_FONT_SIZE);
    let line_height = font.as_scaled(scale).height();
    let measure = |s: &str| measure_text_width(font, s, scale);

    let wrapped: Vec<String> = dialogue
        .iter()
        .flat_map(|line| wrap_words(line, QUOTE_MAX_TEXT_WIDTH, measure))
        .collect();

    let footer_y = QUOTE_CARD_HEIGHT as f32 - line_height - FOOTER_MARGIN;
    let block_height = wrapped.len() as f32 * line_height;
    let mut y = (footer_y - block_height) / 2.0;

    let mut plot = |x: u32, y: u32, coverage: f32| {
        let pixel = card.get_pixel_mut(x, y);
        let ink = (255.0 * (1.0 - coverage)).round() as u8;
        pixel[0] = pixel[0].min(ink);
    };

    for line in &wrapped {
        let x = (QUOTE_CARD_WIDTH as f32 - measure(line)) / 2.0;
        draw_text(font, line, scale, x, y, QUOTE_CARD_WIDTH, QUOTE_CARD_HEIGHT, &mut plot);
        y += line_height;
    }

    let footer_x = (QUOTE_CARD_WIDTH as f32 - measure(footer)) / 2.0;
    draw_text(
        font,
        footer,
        scale,
        footer_x,
        footer_y,
        QUOTE_CARD_WIDTH,
        QUOTE_CARD_HEIGHT,
        &mut plot,
    );

    card
}

/// Render a message black on transparent, shrink-wrapped to its content
pub fn render_message(font: &FontArc, text: &str) -> RgbaImage {
    let scale = PxScale::from(MESSAGE_FONT_SIZE);
    let scaled_font = font.as_scaled(scale);
    let line_height = scaled_font.height() + scaled_font.line_gap();
    let measure = |s: &str| measure_text_width(font, s, scale);

    let max_text_width = (MESSAGE_MAX_WIDTH - 2 * MESSAGE_PADDING) as f32;
    let lines = wrap_message(text, max_text_width, measure);

    let content_width = lines.iter().map(|l| measure(l)).fold(0.0_f32, f32::max);
    let width = (content_width.ceil() as u32 + 2 * MESSAGE_PADDING).min(MESSAGE_MAX_WIDTH);
    let height = (lines.len() as f32 * line_height).ceil() as u32 + 2 * MESSAGE_PADDING;

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let mut plot = |x: u32, y: u32, coverage: f32| {
        let pixel = canvas.get_pixel_mut(x, y);
        let alpha = (255.0 * coverage).round() as u8;
        pixel[3] = pixel[3].max(alpha);
    };

    let mut y = MESSAGE_PADDING as f32;
    for line in &lines {
        draw_text(font, line, scale, MESSAGE_PADDING as f32, y, width, height, &mut plot);
        y += line_height;
    }

    canvas
}

/// Draw one line of text with its top edge at `y`, reporting glyph coverage per pixel
#[allow(clippy::too_many_arguments)]
fn draw_text(
    font: &FontArc,
    text: &str,
    scale: PxScale,
    x: f32,
    y: f32,
    width: u32,
    height: u32,
    plot: &mut impl FnMut(u32, u32, f32),
) {
    let scaled_font = font.as_scaled(scale);
    let baseline = y + scaled_font.ascent();
    let mut cursor_x = x;

    for c in text.chars() {
        let glyph_id = font.glyph_id(c);
        let glyph = glyph_id.with_scale_and_position(scale, point(cursor_x, baseline));

        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                    plot(px as u32, py as u32, coverage.clamp(0.0, 1.0));
                }
            });
        }

        cursor_x += scaled_font.h_advance(glyph_id);
    }
}
