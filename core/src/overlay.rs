//! Axis-guide overlay for navigation thumbnails.
//!
//! The model reads absolute Level-0 coordinates off evenly spaced guide lines
//! drawn over the thumbnail. Lines carry their Level-0 coordinate as a label:
//! vertical guides at the top edge, horizontal guides at the left edge.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Result, bail};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

/// Visual styling for the axis guides.
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub line_color: Rgba<u8>,
    pub line_width: u32,
    pub label_color: Rgba<u8>,
    pub font_size: f32,
    pub label_padding: u32,
    /// Guide lines per axis.
    pub num_guides: u32,
    /// Fail instead of falling back to the built-in digit face when no
    /// TrueType font can be loaded.
    pub strict_font_check: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            line_color: Rgba([255, 0, 0, 180]),
            line_width: 2,
            label_color: Rgba([255, 255, 255, 255]),
            font_size: 12.0,
            label_padding: 5,
            num_guides: 4,
            strict_font_check: false,
        }
    }
}

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

enum LabelFace {
    TrueType(FontVec),
    /// 5x7 bitmap digits; coordinate labels are decimal integers only.
    Bitmap,
}

/// Renders axis-guide overlays sized to a thumbnail.
pub struct AxisGuideGenerator {
    style: OverlayStyle,
    face: LabelFace,
}

impl AxisGuideGenerator {
    /// Resolve the label font up front so a strict font failure surfaces
    /// before any slide work happens.
    pub fn new(style: OverlayStyle) -> Result<Self> {
        let face = resolve_label_face(style.strict_font_check)?;
        Ok(Self { style, face })
    }

    /// Produce a transparent RGBA layer with guide lines and Level-0 labels.
    pub fn generate(
        &self,
        thumbnail_size: (u32, u32),
        slide_size: (u32, u32),
    ) -> Result<RgbaImage> {
        let (tw, th) = thumbnail_size;
        let (sw, sh) = slide_size;
        if tw == 0 || th == 0 {
            bail!("thumbnail size must be positive, got {tw}x{th}");
        }
        if sw == 0 || sh == 0 {
            bail!("slide size must be positive, got {sw}x{sh}");
        }

        let mut overlay = RgbaImage::from_pixel(tw, th, Rgba([0, 0, 0, 0]));
        let n = self.style.num_guides;
        let step_x = f64::from(tw) / f64::from(n + 1);
        let step_y = f64::from(th) / f64::from(n + 1);

        for i in 1..=n {
            let x = (step_x * f64::from(i)) as u32;
            let l0_x = u64::from(x) * u64::from(sw) / u64::from(tw);
            draw_filled_rect_mut(
                &mut overlay,
                Rect::at(x as i32, 0).of_size(self.style.line_width, th),
                self.style.line_color,
            );
            self.draw_label(
                &mut overlay,
                &l0_x.to_string(),
                x as i32,
                self.style.label_padding as i32,
                Anchor::TopCenter,
            );
        }

        for i in 1..=n {
            let y = (step_y * f64::from(i)) as u32;
            let l0_y = u64::from(y) * u64::from(sh) / u64::from(th);
            draw_filled_rect_mut(
                &mut overlay,
                Rect::at(0, y as i32).of_size(tw, self.style.line_width),
                self.style.line_color,
            );
            self.draw_label(
                &mut overlay,
                &l0_y.to_string(),
                self.style.label_padding as i32,
                y as i32,
                Anchor::LeftMiddle,
            );
        }

        Ok(overlay)
    }

    fn draw_label(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, anchor: Anchor) {
        let (w, h) = self.measure(text);
        let (ox, oy) = match anchor {
            Anchor::TopCenter => (x - (w as i32) / 2, y),
            Anchor::LeftMiddle => (x, y - (h as i32) / 2),
        };

        let shadow = Rgba([0, 0, 0, 200]);
        for (dx, dy) in [(1, 1), (-1, -1), (1, -1), (-1, 1)] {
            self.draw_text(canvas, shadow, ox + dx, oy + dy, text);
        }
        self.draw_text(canvas, self.style.label_color, ox, oy, text);
    }

    fn measure(&self, text: &str) -> (u32, u32) {
        match &self.face {
            LabelFace::TrueType(font) => text_size(PxScale::from(self.style.font_size), font, text),
            LabelFace::Bitmap => {
                let scale = bitmap_scale(self.style.font_size);
                (text.len() as u32 * 6 * scale, 7 * scale)
            }
        }
    }

    fn draw_text(&self, canvas: &mut RgbaImage, color: Rgba<u8>, x: i32, y: i32, text: &str) {
        match &self.face {
            LabelFace::TrueType(font) => {
                draw_text_mut(
                    canvas,
                    color,
                    x,
                    y,
                    PxScale::from(self.style.font_size),
                    font,
                    text,
                );
            }
            LabelFace::Bitmap => {
                draw_bitmap_text(canvas, color, x, y, bitmap_scale(self.style.font_size), text);
            }
        }
    }
}

enum Anchor {
    TopCenter,
    LeftMiddle,
}

fn resolve_label_face(strict: bool) -> Result<LabelFace> {
    for path in FONT_CANDIDATES {
        if let Ok(bytes) = std::fs::read(path)
            && let Ok(font) = FontVec::try_from_vec(bytes)
        {
            return Ok(LabelFace::TrueType(font));
        }
    }
    if strict {
        bail!(
            "no TrueType font available (tried {}) and strict font checking is enabled",
            FONT_CANDIDATES.join(", ")
        );
    }
    tracing::warn!("no TrueType font available, using built-in bitmap digits for axis labels");
    Ok(LabelFace::Bitmap)
}

fn bitmap_scale(font_size: f32) -> u32 {
    ((font_size / 7.0).round() as u32).max(1)
}

/// 5x7 glyph rows, most significant bit leftmost. Digits only; coordinate
/// labels never contain anything else.
const DIGIT_GLYPHS: [[u8; 7]; 10] = [
    [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
    [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
    [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
    [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
    [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
    [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
    [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
    [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
    [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
    [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
];

fn draw_bitmap_text(canvas: &mut RgbaImage, color: Rgba<u8>, x: i32, y: i32, scale: u32, text: &str) {
    let mut cursor = x;
    for ch in text.chars() {
        if let Some(digit) = ch.to_digit(10) {
            let glyph = &DIGIT_GLYPHS[digit as usize];
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..5u32 {
                    if bits & (1 << (4 - col)) == 0 {
                        continue;
                    }
                    for sy in 0..scale {
                        for sx in 0..scale {
                            let px = cursor + (col * scale + sx) as i32;
                            let py = y + (row as u32 * scale + sy) as i32;
                            if px >= 0
                                && py >= 0
                                && (px as u32) < canvas.width()
                                && (py as u32) < canvas.height()
                            {
                                canvas.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        cursor += (6 * scale) as i32;
    }
}

/// Alpha-blend an RGBA overlay onto an RGB thumbnail and flatten back to RGB.
pub fn composite_onto(thumbnail: &RgbImage, overlay: &RgbaImage) -> RgbImage {
    let mut out = thumbnail.clone();
    for (x, y, px) in out.enumerate_pixels_mut() {
        if x >= overlay.width() || y >= overlay.height() {
            continue;
        }
        let over = overlay.get_pixel(x, y);
        let alpha = u32::from(over.0[3]);
        if alpha == 0 {
            continue;
        }
        let inv = 255 - alpha;
        px.0 = [
            ((u32::from(over.0[0]) * alpha + u32::from(px.0[0]) * inv) / 255) as u8,
            ((u32::from(over.0[1]) * alpha + u32::from(px.0[1]) * inv) / 255) as u8,
            ((u32::from(over.0[2]) * alpha + u32::from(px.0[2]) * inv) / 255) as u8,
        ];
    }
    out
}

/// Convenience wrapper: build the overlay for a slide and flatten it onto the
/// thumbnail in one step.
pub fn navigable_thumbnail(
    thumbnail: &RgbImage,
    slide_size: (u32, u32),
    style: OverlayStyle,
) -> Result<RgbImage> {
    let generator = AxisGuideGenerator::new(style)?;
    let overlay = generator.generate(thumbnail.dimensions(), slide_size)?;
    Ok(composite_onto(thumbnail, &overlay))
}
