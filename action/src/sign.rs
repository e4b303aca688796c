//! Sign rendering: fits text into an off-screen RGBA canvas shaped after
//! the sign surface, with a deliberate bias towards filling the quad (a
//! shrink-to-fit pass followed by a fill-upscale pass capped at 3×).

use image::{Rgba, RgbaImage};
use rusttype::{point, Font, Scale};

use veld_core::material::ColorF;

use crate::color::parse_color;
use crate::command::ActionCommand;

/// Hard cap on the second (fill) fitting pass.
pub const MAX_FILL_UPSCALE: f32 = 3.0;

const BASE_TEXT_PX: f32 = 32.0;
const CANVAS_HEIGHT: u32 = 128;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignSpec {
    pub text: String,
    pub color: ColorF,
    pub bcolor: ColorF,
    pub align: SignAlign,
    pub scale: f32,
    pub shadow: bool,
    /// Fraction of the canvas kept clear on each side.
    pub hmargin: f32,
    pub vmargin: f32,
}

impl Default for SignSpec {
    fn default() -> Self {
        Self {
            text: String::new(),
            color: ColorF::WHITE,
            bcolor: ColorF::new(0.0, 0.0, 0.5, 1.0),
            align: SignAlign::Center,
            scale: 1.0,
            shadow: false,
            hmargin: 0.05,
            vmargin: 0.05,
        }
    }
}

/// Reads the sign parameters off a command. The text comes from `text=`
/// or from the positional arguments; a bare `shadow` token enables the
/// drop shadow.
pub fn parse_sign(command: &ActionCommand) -> SignSpec {
    let mut spec = SignSpec::default();

    let positional: Vec<&str> = command
        .positional_without_tag()
        .into_iter()
        .filter(|token| {
            if token.eq_ignore_ascii_case("shadow") {
                spec.shadow = true;
                false
            } else {
                true
            }
        })
        .collect();

    spec.text = match command.named_arg("text") {
        Some(text) => text.to_string(),
        None => positional.join(" "),
    };
    if let Some(color) = command.named_arg("color").and_then(|c| parse_color(c).ok()) {
        spec.color = color;
    }
    if let Some(bcolor) = command.named_arg("bcolor").and_then(|c| parse_color(c).ok()) {
        spec.bcolor = bcolor;
    }
    if let Some(align) = command.named_arg("align") {
        spec.align = match align.to_ascii_lowercase().as_str() {
            "left" => SignAlign::Left,
            "right" => SignAlign::Right,
            _ => SignAlign::Center,
        };
    }
    if let Some(scale) = command.named_f32("scale") {
        spec.scale = scale.clamp(0.05, 10.0);
    }
    if command.named_arg("shadow").is_some() {
        spec.shadow = true;
    }
    // `margin` sets both axes, `hmargin`/`vmargin`/`pad` refine.
    if let Some(margin) = command.named_f32("margin") {
        spec.hmargin = margin.clamp(0.0, 0.45);
        spec.vmargin = spec.hmargin;
    }
    if let Some(pad) = command.named_f32("pad") {
        spec.hmargin = (spec.hmargin + pad).clamp(0.0, 0.45);
        spec.vmargin = (spec.vmargin + pad).clamp(0.0, 0.45);
    }
    if let Some(hmargin) = command.named_f32("hmargin") {
        spec.hmargin = hmargin.clamp(0.0, 0.45);
    }
    if let Some(vmargin) = command.named_f32("vmargin") {
        spec.vmargin = vmargin.clamp(0.0, 0.45);
    }
    spec
}

/// How much a text block of `block` (w, h) may scale to sit inside
/// `inner` (w, h).
pub fn fit_scale(block: (f32, f32), inner: (f32, f32)) -> f32 {
    if block.0 <= f32::EPSILON || block.1 <= f32::EPSILON {
        return 1.0;
    }
    (inner.0 / block.0).min(inner.1 / block.1)
}

/// The two fitting passes: shrink to fit, then upscale towards filling the
/// box, capped at [`MAX_FILL_UPSCALE`]. `measure` reports the block size
/// at a given pixel size (re-wrapping included).
pub fn fitted_px(base_px: f32, inner: (f32, f32), mut measure: impl FnMut(f32) -> (f32, f32)) -> f32 {
    let shrink = fit_scale(measure(base_px), inner).min(1.0);
    let px = (base_px * shrink).max(1.0);
    let fill = fit_scale(measure(px), inner).min(MAX_FILL_UPSCALE);
    (px * fill.max(1.0)).max(1.0)
}

pub fn align_offset(align: SignAlign, inner_width: f32, line_width: f32) -> f32 {
    match align {
        SignAlign::Left => 0.0,
        SignAlign::Center => (inner_width - line_width) * 0.5,
        SignAlign::Right => inner_width - line_width,
    }
}

fn line_width(font: &Font, text: &str, px: f32) -> f32 {
    let scale = Scale::uniform(px);
    font.layout(text, scale, point(0.0, 0.0))
        .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
        .last()
        .unwrap_or(0.0)
}

/// Greedy word wrap against a maximum line width in pixels.
fn wrap_lines(font: &Font, text: &str, px: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if !current.is_empty() && line_width(font, &candidate, px) > max_width {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn measure_block(font: &Font, text: &str, px: f32, max_width: f32) -> (f32, f32) {
    let lines = wrap_lines(font, text, px, max_width);
    let widest = lines
        .iter()
        .map(|line| line_width(font, line, px))
        .fold(0.0f32, f32::max);
    (widest, lines.len() as f32 * px * 1.2)
}

fn blend(canvas: &mut RgbaImage, x: i64, y: i64, color: ColorF, coverage: f32) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    let alpha = (coverage * color.a).clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let pixel = canvas.get_pixel_mut(x as u32, y as u32);
    let mix = |dst: u8, src: f32| -> u8 {
        (dst as f32 * (1.0 - alpha) + src * 255.0 * alpha).round() as u8
    };
    *pixel = Rgba([
        mix(pixel[0], color.r),
        mix(pixel[1], color.g),
        mix(pixel[2], color.b),
        pixel[3].max((alpha * 255.0) as u8),
    ]);
}

fn draw_line(
    canvas: &mut RgbaImage,
    font: &Font,
    text: &str,
    px: f32,
    origin: (f32, f32),
    color: ColorF,
) {
    let scale = Scale::uniform(px);
    let ascent = font.v_metrics(scale).ascent;
    for glyph in font.layout(text, scale, point(origin.0, origin.1 + ascent)) {
        if let Some(bb) = glyph.pixel_bounding_box() {
            glyph.draw(|gx, gy, v| {
                blend(
                    canvas,
                    bb.min.x as i64 + gx as i64,
                    bb.min.y as i64 + gy as i64,
                    color,
                    v,
                );
            });
        }
    }
}

/// Renders a sign into an RGBA canvas whose aspect follows the target
/// surface. The caller applies the result as a transparent, white-tinted
/// texture on the sign-tagged materials.
pub fn render_sign(spec: &SignSpec, aspect: f32, font: &Font) -> RgbaImage {
    let aspect = if aspect.is_finite() && aspect > 0.01 {
        aspect.min(8.0)
    } else {
        1.0
    };
    let height = CANVAS_HEIGHT;
    let width = ((height as f32 * aspect).round() as u32).clamp(16, 1024);

    let background = Rgba([
        (spec.bcolor.r * 255.0) as u8,
        (spec.bcolor.g * 255.0) as u8,
        (spec.bcolor.b * 255.0) as u8,
        (spec.bcolor.a * 255.0) as u8,
    ]);
    let mut canvas = RgbaImage::from_pixel(width, height, background);
    if spec.text.trim().is_empty() {
        return canvas;
    }

    let inner_w = width as f32 * (1.0 - 2.0 * spec.hmargin);
    let inner_h = height as f32 * (1.0 - 2.0 * spec.vmargin);
    let base_px = BASE_TEXT_PX * spec.scale;
    let px = fitted_px(base_px, (inner_w, inner_h), |candidate_px| {
        measure_block(font, &spec.text, candidate_px, inner_w)
    });

    let lines = wrap_lines(font, &spec.text, px, inner_w);
    let line_height = px * 1.2;
    let block_height = lines.len() as f32 * line_height;
    let origin_x = width as f32 * spec.hmargin;
    let mut y = height as f32 * spec.vmargin + ((inner_h - block_height) * 0.5).max(0.0);

    let shadow_offset = (px / 16.0).ceil().max(1.0);
    for line in &lines {
        let w = line_width(font, line, px);
        let x = origin_x + align_offset(spec.align, inner_w, w);
        if spec.shadow {
            draw_line(
                &mut canvas,
                font,
                line,
                px,
                (x + shadow_offset, y + shadow_offset),
                ColorF::new(0.0, 0.0, 0.0, 0.8),
            );
        }
        draw_line(&mut canvas, font, line, px, (x, y), spec.color);
        y += line_height;
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_script;

    #[test]
    fn parse_defaults_and_overrides() {
        let script =
            parse_script("create sign text=\"hello world\" color=red align=left shadow margin=0.1");
        let spec = parse_sign(&script.create[0]);
        assert_eq!(spec.text, "hello world");
        assert_eq!(spec.color, ColorF::rgb(1.0, 0.0, 0.0));
        assert_eq!(spec.align, SignAlign::Left);
        assert!(spec.shadow);
        assert_eq!(spec.hmargin, 0.1);
        assert_eq!(spec.vmargin, 0.1);
    }

    #[test]
    fn positional_text_fallback() {
        let script = parse_script("create sign welcome home");
        let spec = parse_sign(&script.create[0]);
        assert_eq!(spec.text, "welcome home");
    }

    #[test]
    fn fit_scale_limits_by_the_tighter_axis() {
        assert_eq!(fit_scale((100.0, 10.0), (50.0, 100.0)), 0.5);
        assert_eq!(fit_scale((10.0, 100.0), (100.0, 50.0)), 0.5);
    }

    #[test]
    fn fitted_px_shrinks_oversized_text() {
        // Block twice as wide as the box at any px: expect half size.
        let px = fitted_px(32.0, (100.0, 100.0), |p| (p * 2.0 * (100.0 / 32.0), p));
        assert!(px < 32.0);
    }

    #[test]
    fn fitted_px_upscale_is_capped() {
        // Tiny text in a huge box: capped at 3x, not 100x.
        let px = fitted_px(10.0, (1000.0, 1000.0), |p| (p, p));
        assert!(px <= 10.0 * MAX_FILL_UPSCALE + 1e-3);
        assert!(px >= 10.0 * (MAX_FILL_UPSCALE - 0.01));
    }

    #[test]
    fn align_offsets() {
        assert_eq!(align_offset(SignAlign::Left, 100.0, 40.0), 0.0);
        assert_eq!(align_offset(SignAlign::Center, 100.0, 40.0), 30.0);
        assert_eq!(align_offset(SignAlign::Right, 100.0, 40.0), 60.0);
    }
}
