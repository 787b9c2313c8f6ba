//! Styled multi-block text layout for thermal printer images.
//!
//! A [`TextDocument`] is laid out once into [`TextLayout`] (sorted blocks,
//! word-wrapped lines, vertical positions) and the raster is drawn from that
//! layout, so measurement and drawing always agree on line breaks.

use std::collections::HashMap;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compose;
use crate::pipeline::{CancelCheck, checkpoint};
use crate::{ConvertError, Result};

/// Left/right and top/bottom padding around the text.
pub const PADDING: u32 = 10;

/// Vertical gap between consecutive blocks.
pub const BLOCK_SPACING: u32 = 10;

/// Line height as a multiple of the font size.
pub const LINE_HEIGHT_FACTOR: f32 = 1.2;

/// Minimum raster height, so an empty document still rasterizes.
pub const MIN_HEIGHT: u32 = 50;

/// Distance of the underline below the baseline.
pub const UNDERLINE_OFFSET: f32 = 2.0;

/// Horizontal shear used for synthetic italics.
const ITALIC_SHEAR: f32 = 0.2;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Font settings for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextStyle {
    pub font_family: String,
    /// Font size in pixels.
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "sans-serif".into(),
            font_size: 24.0,
            bold: false,
            italic: false,
            underline: false,
        }
    }
}

impl TextStyle {
    pub fn line_height(&self) -> f32 {
        self.font_size * LINE_HEIGHT_FACTOR
    }
}

/// One styled paragraph group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub id: String,
    /// Text content; may contain explicit line breaks.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default)]
    pub order: i32,
}

/// An ordered set of text blocks rendered at the paper width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocument {
    #[serde(default)]
    pub blocks: Vec<TextBlock>,
    pub paper_width: u32,
}

impl TextDocument {
    pub fn new(paper_width: u32) -> Self {
        Self {
            blocks: Vec::new(),
            paper_width,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ConvertError::Validation(e.to_string()))
    }

    /// Blocks sorted by `order`; ties keep input order.
    pub fn sorted_blocks(&self) -> Vec<&TextBlock> {
        let mut blocks: Vec<&TextBlock> = self.blocks.iter().collect();
        blocks.sort_by_key(|b| b.order);
        blocks
    }
}

/// Host text facility: string measurement and drawing.
pub trait TextMetrics: Send + Sync {
    /// Advance width of `text` in pixels.
    fn measure_width(&self, text: &str, style: &TextStyle) -> f32;

    /// Draw `text` in black with its line box's top-left corner at `(x, y)`.
    fn draw_text(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, style: &TextStyle);

    /// Distance from the top of the line box to the baseline.
    fn baseline(&self, style: &TextStyle) -> f32 {
        style.font_size
    }
}

/// A wrapped line and where it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct LaidLine {
    pub text: String,
    /// Index into [`TextLayout::styles`].
    pub block: usize,
    /// Top of the line box.
    pub y: f32,
    pub width: f32,
}

/// Result of the measurement pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub width: u32,
    pub height: u32,
    pub styles: Vec<TextStyle>,
    pub lines: Vec<LaidLine>,
}

/// Measure and wrap every block of `doc`.
///
/// `cancel` is polled before each block is measured.
pub fn layout(
    doc: &TextDocument,
    metrics: &dyn TextMetrics,
    cancel: &dyn CancelCheck,
) -> Result<TextLayout> {
    if doc.paper_width <= PADDING * 2 {
        return Err(ConvertError::Validation(format!(
            "paper width {} leaves no room for text",
            doc.paper_width
        )));
    }
    let max_width = (doc.paper_width - PADDING * 2) as f32;

    let mut styles = Vec::new();
    let mut lines = Vec::new();
    let mut y = PADDING as f32;

    for (index, block) in doc.sorted_blocks().into_iter().enumerate() {
        checkpoint(cancel)?;
        if block.style.font_size <= 0.0 || !block.style.font_size.is_finite() {
            return Err(ConvertError::Validation(format!(
                "block '{}' has invalid font size {}",
                block.id, block.style.font_size
            )));
        }
        if index > 0 {
            y += BLOCK_SPACING as f32;
        }
        let line_height = block.style.line_height();
        for paragraph in block.content.split('\n') {
            let paragraph = paragraph.strip_suffix('\r').unwrap_or(paragraph);
            for text in wrap_text(metrics, &block.style, paragraph, max_width) {
                let width = metrics.measure_width(&text, &block.style);
                lines.push(LaidLine {
                    text,
                    block: styles.len(),
                    y,
                    width,
                });
                y += line_height;
            }
        }
        styles.push(block.style.clone());
    }

    let height = ((y + PADDING as f32).ceil() as u32).max(MIN_HEIGHT);
    debug!(
        blocks = styles.len(),
        lines = lines.len(),
        height,
        "Laid out text document"
    );

    Ok(TextLayout {
        width: doc.paper_width,
        height,
        styles,
        lines,
    })
}

/// Lay out and draw `doc` onto a white raster of the paper width.
///
/// `cancel` is polled before each block is measured and before each block
/// is drawn.
pub fn render(
    doc: &TextDocument,
    metrics: &dyn TextMetrics,
    cancel: &dyn CancelCheck,
) -> Result<RgbaImage> {
    let layout = layout(doc, metrics, cancel)?;
    let mut img = compose::blank_canvas(layout.width, layout.height);

    let mut drawing_block = None;
    for line in &layout.lines {
        if drawing_block != Some(line.block) {
            checkpoint(cancel)?;
            drawing_block = Some(line.block);
        }
        let style = &layout.styles[line.block];
        let top = line.y.round() as i32;
        metrics.draw_text(&mut img, &line.text, PADDING as i32, top, style);

        if style.underline && line.width > 0.0 {
            let thickness = (style.font_size / 15.0).round().max(1.0) as u32;
            let underline_y = (line.y + metrics.baseline(style) + UNDERLINE_OFFSET).round() as i32;
            draw_filled_rect_mut(
                &mut img,
                Rect::at(PADDING as i32, underline_y).of_size(line.width.ceil() as u32, thickness),
                BLACK,
            );
        }
    }

    Ok(img)
}

/// Greedily wrap one paragraph to `max_width`.
///
/// Words wider than a full line are broken between characters. An empty
/// paragraph yields one empty line.
pub fn wrap_text(
    metrics: &dyn TextMetrics,
    style: &TextStyle,
    text: &str,
    max_width: f32,
) -> Vec<String> {
    let fits = |s: &str| metrics.measure_width(s.trim_end(), style) <= max_width;
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_inclusive(char::is_whitespace) {
        let candidate = format!("{current}{word}");
        if current.is_empty() || fits(&candidate) {
            current = candidate;
        } else {
            lines.push(current.trim_end().to_string());
            current = word.to_string();
        }

        // If a single word exceeds max_width, force-break it character by character
        while !fits(&current) && current.trim_end().chars().count() > 1 {
            let split = longest_fitting_prefix(&current, &fits);
            lines.push(current[..split].trim_end().to_string());
            current = current[split..].to_string();
        }
    }

    lines.push(current.trim_end().to_string());
    lines
}

/// Byte length of the longest prefix that fits, at least one character.
fn longest_fitting_prefix(text: &str, fits: &dyn Fn(&str) -> bool) -> usize {
    let mut best = text.chars().next().map_or(0, char::len_utf8);
    for (idx, ch) in text.char_indices().skip(1) {
        let end = idx + ch.len_utf8();
        if !fits(&text[..end]) {
            break;
        }
        best = end;
    }
    best
}

/// [`TextMetrics`] backed by `ab_glyph` fonts.
///
/// Families without a registered face fall back to the default font. Bold
/// is synthesized by a second strike one pixel to the right; italic by
/// shearing the drawn line.
pub struct GlyphTextMetrics {
    default_font: FontVec,
    families: HashMap<String, FontVec>,
}

impl GlyphTextMetrics {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Ok(Self {
            default_font: parse_font(data)?,
            families: HashMap::new(),
        })
    }

    /// Register a face for a family name (case-insensitive).
    pub fn with_family(mut self, family: &str, data: Vec<u8>) -> Result<Self> {
        self.families
            .insert(family.to_lowercase(), parse_font(data)?);
        Ok(self)
    }

    fn font_for(&self, style: &TextStyle) -> &FontVec {
        self.families
            .get(&style.font_family.to_lowercase())
            .unwrap_or(&self.default_font)
    }

    fn advance(&self, text: &str, style: &TextStyle) -> f32 {
        let scaled = self.font_for(style).as_scaled(PxScale::from(style.font_size));
        let mut width = 0.0f32;
        let mut prev_glyph: Option<ab_glyph::GlyphId> = None;

        for ch in text.chars() {
            let glyph_id = scaled.glyph_id(ch);
            if let Some(prev) = prev_glyph {
                width += scaled.kern(prev, glyph_id);
            }
            width += scaled.h_advance(glyph_id);
            prev_glyph = Some(glyph_id);
        }

        width
    }

    fn strike(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, style: &TextStyle) {
        let font = self.font_for(style);
        let scale = PxScale::from(style.font_size);
        draw_text_mut(canvas, BLACK, x, y, scale, font, text);
        if style.bold {
            draw_text_mut(canvas, BLACK, x + 1, y, scale, font, text);
        }
    }
}

impl TextMetrics for GlyphTextMetrics {
    fn measure_width(&self, text: &str, style: &TextStyle) -> f32 {
        let width = self.advance(text, style);
        if style.bold && !text.is_empty() { width + 1.0 } else { width }
    }

    fn draw_text(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, style: &TextStyle) {
        if !style.italic {
            self.strike(canvas, text, x, y, style);
            return;
        }

        let line_height = style.line_height().ceil() as u32 + 2;
        let slant = (line_height as f32 * ITALIC_SHEAR).ceil() as u32;
        let width = self.measure_width(text, style).ceil() as u32 + slant + 2;
        let mut line = RgbaImage::new(width.max(1), line_height);
        self.strike(&mut line, text, 0, 0, style);

        for row in 0..line_height {
            let shift = ((line_height - row) as f32 * ITALIC_SHEAR).round() as i64;
            let strip = image::imageops::crop_imm(&line, 0, row, line.width(), 1).to_image();
            compose::overlay(canvas, &strip, i64::from(x) + shift, i64::from(y) + i64::from(row));
        }
    }

    fn baseline(&self, style: &TextStyle) -> f32 {
        self.font_for(style)
            .as_scaled(PxScale::from(style.font_size))
            .ascent()
    }
}

fn parse_font(data: Vec<u8>) -> Result<FontVec> {
    FontVec::try_from_vec(data)
        .map_err(|e| ConvertError::Validation(format!("invalid font data: {e}")))
}
