//! Applies one parsed command to a model instance.
//!
//! The executor runs on the scheduler thread and mutates the scene
//! directly. Synchronous verbs finish in one call; `texture` and
//! `normalmap` hide the instance behind the action gate and hand a
//! [`TextureFetch`] back to the caller, which polls it across frames.

use std::sync::Arc;

use veld_core::asset::AssetSource;
use veld_core::material::{AlphaMode, ColorF, MaterialStore};
use veld_core::scene::{Collider, NodeId, SceneGraph};
use veld_core::texture::{TextureCache, TextureKey};
use veld_core::warn_once;

use crate::color::parse_color_tokens;
use crate::command::ActionCommand;
use crate::fetch::{FetchKind, TextureFetch};
use crate::light::parse_light;
use crate::numeric::{self, NumericAction, NumericVerb};
use crate::sign;

/// The sign verb only ever touches materials with this tag.
pub const SIGN_TAG: i32 = 100;

/// Everything a command application may touch. Borrowed fresh per step so
/// the scheduler keeps ownership between steps.
pub struct ExecCtx<'a> {
    pub scene: &'a mut SceneGraph,
    pub materials: &'a mut MaterialStore,
    pub textures: &'a mut TextureCache,
    pub assets: &'a dyn AssetSource,
    pub object_path: &'a str,
    pub password: Option<&'a str>,
    pub sign_font: Option<&'a rusttype::Font<'static>>,
}

#[derive(Debug)]
pub enum ExecOutcome {
    /// Command fully applied.
    Done,
    /// Asynchronous continuation; the instance is gated until it resolves.
    Fetch(TextureFetch),
}

/// Renderer slots (node, submesh index) a tag filter selects on an
/// instance subtree. `None` selects every slot.
pub fn affected_slots(
    scene: &SceneGraph,
    materials: &MaterialStore,
    instance: NodeId,
    tag: Option<i32>,
) -> Vec<(NodeId, usize)> {
    let mut slots = Vec::new();
    for id in scene.descendants(instance) {
        let Some(node) = scene.get(id) else { continue };
        let Some(renderer) = node.renderer.as_ref() else {
            continue;
        };
        for (index, &handle) in renderer.materials.iter().enumerate() {
            let matches = match tag {
                Some(wanted) => materials.get(handle).tag == wanted,
                None => true,
            };
            if matches {
                slots.push((id, index));
            }
        }
    }
    slots
}

fn switch_slot_variant(ctx: &mut ExecCtx, slot: (NodeId, usize), mode: AlphaMode) {
    let Some(node) = ctx.scene.get(slot.0) else {
        return;
    };
    let Some(renderer) = node.renderer.as_ref() else {
        return;
    };
    let Some(&base) = renderer.materials.get(slot.1) else {
        return;
    };
    let variant = ctx.materials.variant(base, mode);
    if let Some(renderer) = ctx.scene.get_mut(slot.0).and_then(|n| n.renderer.as_mut()) {
        renderer.materials[slot.1] = variant;
    }
}

/// Re-applies the instance-wide color state onto the selected slots and
/// switches translucent slots to the transparent variant.
pub fn refresh_color_slots(ctx: &mut ExecCtx, instance: NodeId, tag: Option<i32>) {
    let state = match ctx.scene.get(instance).and_then(|n| n.instance.as_ref()) {
        Some(s) => s.color.clone(),
        None => return,
    };
    let effective = state.effective_color();
    let translucent = state.is_translucent();
    for slot in affected_slots(ctx.scene, ctx.materials, instance, tag) {
        if let Some(renderer) = ctx.scene.get_mut(slot.0).and_then(|n| n.renderer.as_mut()) {
            renderer.overrides[slot.1].color = Some(effective);
        }
        if translucent {
            switch_slot_variant(ctx, slot, AlphaMode::Transparent);
        }
    }
}

/// Fast path for precomputed numeric records; invalid records are skipped.
pub fn apply_numeric(ctx: &mut ExecCtx, instance: NodeId, action: &NumericAction) {
    if !action.valid || !ctx.scene.contains(instance) {
        return;
    }
    match action.verb {
        NumericVerb::Ambient => {
            if let Some(state) = ctx.scene.get_mut(instance).and_then(|n| n.instance.as_mut()) {
                state.color.ambient = action.values[0];
                state.color.sequence += 1;
            }
            refresh_color_slots(ctx, instance, None);
        }
        NumericVerb::Diffuse => {
            if let Some(state) = ctx.scene.get_mut(instance).and_then(|n| n.instance.as_mut()) {
                state.color.diffuse = action.values[0];
                state.color.sequence += 1;
            }
            refresh_color_slots(ctx, instance, None);
        }
        NumericVerb::Visible => ctx.scene.set_desired_visible(instance, action.flag),
        NumericVerb::Solid => ctx.scene.set_desired_solid(instance, action.flag),
        NumericVerb::Scale => apply_scale(ctx, instance, [action.values[0], action.values[1], action.values[2]]),
        NumericVerb::Shear => apply_shear(ctx, instance, &action.values),
    }
}

fn apply_scale(ctx: &mut ExecCtx, instance: NodeId, factors: [f32; 3]) {
    if let Some(node) = ctx.scene.get_mut(instance) {
        node.local.scale.x *= factors[0];
        node.local.scale.y *= factors[1];
        node.local.scale.z *= factors[2];
    }
}

/// Object-local shear. The coefficients are given in world axes; vertices
/// are stored with X flipped, so every term pairing X with another axis
/// changes sign.
fn apply_shear(ctx: &mut ExecCtx, instance: NodeId, raw: &[f32; 6]) {
    let [z_plus, x_plus, y_plus, y_minus, z_minus, x_minus] =
        raw.map(|v| v.clamp(-numeric::SHEAR_LIMIT, numeric::SHEAR_LIMIT) / numeric::SHEAR_LIMIT);
    for id in ctx.scene.descendants(instance) {
        let Some(renderer) = ctx.scene.get_mut(id).and_then(|n| n.renderer.as_mut()) else {
            continue;
        };
        let mesh = Arc::make_mut(&mut renderer.mesh);
        for v in mesh.vertices.iter_mut() {
            let (x, y, z) = (v.x, v.y, v.z);
            v.x = x - x_plus * z + x_minus * y;
            v.y = y - y_plus * x - y_minus * z;
            v.z = z + z_plus * y + z_minus * x;
        }
        mesh.recompute_normals();
        mesh.recompute_bounds();
        let bounds = mesh.bounds;
        if let Some(collider) = ctx.scene.get_mut(id).and_then(|n| n.collider.as_mut()) {
            *collider = Collider::bounding(bounds);
        }
    }
}

/// Applies a fetched (or cached) main texture to the selected slots,
/// switching Standard materials to Cutout for PNG-suggesting names or back
/// to Opaque otherwise; translucent color state upgrades to Transparent.
/// The Cutout decision reads the texture's resolved source name, so a
/// cache hit picks the same variant as the fetch that populated it.
pub(crate) fn apply_main_texture(
    ctx: &mut ExecCtx,
    instance: NodeId,
    tag: Option<i32>,
    texture: Arc<veld_core::texture::DecodedTexture>,
) {
    let translucent = ctx
        .scene
        .get(instance)
        .and_then(|n| n.instance.as_ref())
        .map_or(false, |s| s.color.is_translucent());
    let mode = if translucent {
        AlphaMode::Transparent
    } else if texture.png_like() {
        AlphaMode::Cutout
    } else {
        AlphaMode::Opaque
    };
    for slot in affected_slots(ctx.scene, ctx.materials, instance, tag) {
        if let Some(renderer) = ctx.scene.get_mut(slot.0).and_then(|n| n.renderer.as_mut()) {
            let block = &mut renderer.overrides[slot.1];
            block.main_texture = Some(texture.clone());
            block.clear_main_texture = false;
        }
        switch_slot_variant(ctx, slot, mode);
    }
}

pub(crate) fn apply_bump_texture(
    ctx: &mut ExecCtx,
    instance: NodeId,
    tag: Option<i32>,
    texture: Arc<veld_core::texture::DecodedTexture>,
) {
    for slot in affected_slots(ctx.scene, ctx.materials, instance, tag) {
        if let Some(renderer) = ctx.scene.get_mut(slot.0).and_then(|n| n.renderer.as_mut()) {
            let block = &mut renderer.overrides[slot.1];
            block.bump_texture = Some(texture.clone());
            block.normal_map = true;
        }
    }
}

fn execute_texture(
    ctx: &mut ExecCtx,
    instance: NodeId,
    command: &ActionCommand,
    kind: FetchKind,
) -> ExecOutcome {
    let tag = command.tag();
    let Some(name) = command.positional_without_tag().first().map(|s| s.to_string()) else {
        warn_once!(
            format!("{}-noarg:{}", command.verb, command.raw),
            "{} command without a texture name: `{}`",
            command.verb,
            command.raw
        );
        return ExecOutcome::Done;
    };

    // Cache hit applies synchronously, no gate round-trip.
    let key = TextureKey::new(ctx.object_path, name.clone());
    if let Some(texture) = ctx.textures.get(&key) {
        match kind {
            FetchKind::Main => apply_main_texture(ctx, instance, tag, texture),
            FetchKind::Bump => apply_bump_texture(ctx, instance, tag, texture),
        }
        return ExecOutcome::Done;
    }

    ctx.scene.begin_action(instance);
    let mut fetch = TextureFetch::new(instance, tag, kind, ctx.object_path, &name);
    fetch.start(ctx.assets, ctx.password);
    ExecOutcome::Fetch(fetch)
}

fn execute_color(ctx: &mut ExecCtx, instance: NodeId, command: &ActionCommand) {
    let tag = command.tag();
    let args = command.positional_without_tag();
    let tint = args.iter().any(|a| a.eq_ignore_ascii_case("tint"));
    let spec: Vec<&str> = args
        .iter()
        .copied()
        .filter(|a| !a.eq_ignore_ascii_case("tint"))
        .collect();
    // Invalid specs fall back to white.
    let color = parse_color_tokens(&spec).unwrap_or(ColorF::WHITE);

    if tag.is_none() {
        if let Some(state) = ctx.scene.get_mut(instance).and_then(|n| n.instance.as_mut()) {
            state.color.color = color;
            state.color.has_color = true;
            state.color.sequence += 1;
        }
        refresh_color_slots(ctx, instance, None);
        if !tint {
            // Color dominates: drop the texture to plain white.
            for slot in affected_slots(ctx.scene, ctx.materials, instance, None) {
                if let Some(renderer) =
                    ctx.scene.get_mut(slot.0).and_then(|n| n.renderer.as_mut())
                {
                    let block = &mut renderer.overrides[slot.1];
                    block.main_texture = None;
                    block.clear_main_texture = true;
                }
            }
        }
        if color.a < 1.0 {
            for slot in affected_slots(ctx.scene, ctx.materials, instance, None) {
                switch_slot_variant(ctx, slot, AlphaMode::Transparent);
            }
        }
    } else {
        for slot in affected_slots(ctx.scene, ctx.materials, instance, tag) {
            if let Some(renderer) = ctx.scene.get_mut(slot.0).and_then(|n| n.renderer.as_mut()) {
                renderer.overrides[slot.1].color = Some(color);
            }
            if color.a < 1.0 {
                switch_slot_variant(ctx, slot, AlphaMode::Transparent);
            }
        }
    }
}

fn execute_opacity(ctx: &mut ExecCtx, instance: NodeId, command: &ActionCommand) {
    let tag = command.tag();
    let alpha = command
        .positional_without_tag()
        .first()
        .and_then(|a| a.parse::<f32>().ok())
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);

    if tag.is_none() {
        if let Some(state) = ctx.scene.get_mut(instance).and_then(|n| n.instance.as_mut()) {
            state.color.opacity = alpha;
            state.color.sequence += 1;
        }
        refresh_color_slots(ctx, instance, None);
    } else {
        for slot in affected_slots(ctx.scene, ctx.materials, instance, tag) {
            if let Some(renderer) = ctx.scene.get_mut(slot.0).and_then(|n| n.renderer.as_mut()) {
                renderer.overrides[slot.1].opacity = Some(alpha);
            }
            if alpha < 1.0 {
                switch_slot_variant(ctx, slot, AlphaMode::Transparent);
            }
        }
    }
}

fn execute_sign(ctx: &mut ExecCtx, instance: NodeId, command: &ActionCommand) {
    let spec = sign::parse_sign(command);
    let Some(font) = ctx.sign_font else {
        warn_once!(
            "sign-no-font".to_string(),
            "sign command ignored: no sign font configured"
        );
        return;
    };
    let slots = affected_slots(ctx.scene, ctx.materials, instance, Some(SIGN_TAG));
    if slots.is_empty() {
        return;
    }
    // Size the canvas after the first sign surface.
    let aspect = slots
        .first()
        .and_then(|&(id, _)| ctx.scene.get(id))
        .and_then(|n| n.renderer.as_ref())
        .map(|r| {
            let size = r.mesh.bounds.size();
            if size.y.abs() > f32::EPSILON {
                (size.x / size.y).abs()
            } else {
                1.0
            }
        })
        .unwrap_or(1.0);
    let image = sign::render_sign(&spec, aspect, font);
    let texture = Arc::new(veld_core::texture::DecodedTexture::new(image));
    for slot in slots {
        if let Some(renderer) = ctx.scene.get_mut(slot.0).and_then(|n| n.renderer.as_mut()) {
            let block = &mut renderer.overrides[slot.1];
            block.main_texture = Some(texture.clone());
            block.color = Some(ColorF::WHITE);
            block.clear_main_texture = false;
        }
        switch_slot_variant(ctx, slot, AlphaMode::Transparent);
    }
}

fn execute_light(ctx: &mut ExecCtx, instance: NodeId, command: &ActionCommand) {
    let light = parse_light(command);
    let node = ctx.scene.create_node("light", instance);
    if let Some(data) = ctx.scene.get_mut(node) {
        data.light = Some(light);
    }
}

/// Dispatches a single command. Unknown verbs log once and do nothing;
/// numeric verbs funnel through the same records the fast path uses.
pub fn execute_command(ctx: &mut ExecCtx, instance: NodeId, command: &ActionCommand) -> ExecOutcome {
    if !ctx.scene.contains(instance) {
        return ExecOutcome::Done;
    }
    if let Some(numeric_action) = numeric::preprocess(command) {
        apply_numeric(ctx, instance, &numeric_action);
        return ExecOutcome::Done;
    }
    match command.verb.as_str() {
        "texture" => return execute_texture(ctx, instance, command, FetchKind::Main),
        "normalmap" => return execute_texture(ctx, instance, command, FetchKind::Bump),
        "color" => execute_color(ctx, instance, command),
        "opacity" => execute_opacity(ctx, instance, command),
        "sign" => execute_sign(ctx, instance, command),
        "light" => execute_light(ctx, instance, command),
        other => {
            warn_once!(
                format!("verb:{}", other),
                "unknown action verb `{}` in `{}`",
                other,
                command.raw
            );
        }
    }
    ExecOutcome::Done
}
