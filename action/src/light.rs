//! The `light` command: parsing and effect waveforms.
//!
//! A light attaches as a child node; its intensity (and for `rainbow` its
//! color) is re-evaluated by the streamer each tick from the monotonic
//! clock, so effects stay in phase regardless of frame rate.

use veld_core::material::ColorF;
use veld_core::scene::{Light, LightFx, LightKind};

use crate::color::parse_color;
use crate::command::ActionCommand;

/// Builds a light from the command's named arguments. Unknown or invalid
/// arguments fall back to the defaults.
pub fn parse_light(command: &ActionCommand) -> Light {
    let mut light = Light::default();
    if let Some(spec) = command.named_arg("color") {
        if let Ok(color) = parse_color(spec) {
            light.color = color;
        }
    }
    if let Some(radius) = command.named_f32("radius") {
        light.radius = radius.max(0.0);
    }
    if let Some(brightness) = command.named_f32("brightness") {
        light.brightness = brightness.max(0.0);
    }
    if let Some(kind) = command.named_arg("type") {
        light.kind = match kind.to_ascii_lowercase().as_str() {
            "spot" => LightKind::Spot,
            _ => LightKind::Point,
        };
    }
    if let Some(angle) = command.named_f32("angle") {
        light.angle = angle.clamp(0.0, 180.0);
    }
    if let Some(fx) = command.named_arg("fx") {
        light.fx = parse_fx(fx);
    }
    if let Some(time) = command.named_f32("time") {
        light.fx_period = time.max(0.01);
    }
    if let Some(max_dist) = command.named_f32("maxdist") {
        light.max_dist = max_dist.max(0.0);
    }
    light
}

fn parse_fx(token: &str) -> Option<LightFx> {
    match token.to_ascii_lowercase().as_str() {
        "blink" => Some(LightFx::Blink),
        "fadein" => Some(LightFx::FadeIn),
        "fadeout" => Some(LightFx::FadeOut),
        "fire" => Some(LightFx::Fire),
        "pulse" => Some(LightFx::Pulse),
        "rainbow" => Some(LightFx::Rainbow),
        _ => None,
    }
}

/// Intensity multiplier of an fx loop at `elapsed` seconds into the
/// effect, in [0, 1]. `period` is the loop length.
pub fn fx_intensity(fx: LightFx, elapsed: f32, period: f32) -> f32 {
    let period = period.max(0.01);
    let phase = (elapsed / period).rem_euclid(1.0);
    match fx {
        LightFx::Blink => {
            if phase < 0.5 {
                1.0
            } else {
                0.0
            }
        }
        LightFx::FadeIn => (elapsed / period).clamp(0.0, 1.0),
        LightFx::FadeOut => 1.0 - (elapsed / period).clamp(0.0, 1.0),
        LightFx::Pulse => 0.5 + 0.5 * (phase * std::f32::consts::TAU).sin(),
        LightFx::Fire => {
            // Layered sines give a deterministic flicker that never drops
            // to full darkness.
            let t = elapsed * 11.0;
            let n = (t.sin() + (t * 2.7).sin() + (t * 0.83).sin()) / 3.0;
            0.7 + 0.3 * n
        }
        LightFx::Rainbow => 1.0,
    }
}

/// Color of an fx loop: rainbow lights cycle through the hue wheel, every
/// other effect keeps the configured color.
pub fn fx_color(fx: LightFx, base: ColorF, elapsed: f32, period: f32) -> ColorF {
    if fx != LightFx::Rainbow {
        return base;
    }
    let period = period.max(0.01);
    let hue = (elapsed / period).rem_euclid(1.0) * 360.0;
    hue_to_rgb(hue)
}

fn hue_to_rgb(hue_deg: f32) -> ColorF {
    let h = (hue_deg / 60.0).rem_euclid(6.0);
    let x = 1.0 - (h.rem_euclid(2.0) - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    ColorF::rgb(r, g, b)
}
