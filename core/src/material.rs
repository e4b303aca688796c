//! Materials, alpha-mode variants and per-renderer property overrides.
//!
//! Base materials live in the [`MaterialStore`] and are shared: an instance
//! never mutates a stored material. Everything instance-specific (tint,
//! opacity, fetched textures) goes through the [`PropertyBlock`] kept on the
//! renderer per submesh slot. Alpha-mode changes go through the variant
//! cache, which returns one canonical handle per `(base, mode)` pair.

use std::sync::Arc;

use crate::texture::DecodedTexture;
use crate::FastHashMap;

/// Straight-alpha linear color.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ColorF {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ColorF {
    pub const WHITE: ColorF = ColorF::rgb(1.0, 1.0, 1.0);
    pub const BLACK: ColorF = ColorF::rgb(0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn scale_rgb(self, factor: f32) -> Self {
        Self {
            r: self.r * factor,
            g: self.g * factor,
            b: self.b * factor,
            a: self.a,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }
}

impl Default for ColorF {
    fn default() -> Self {
        ColorF::WHITE
    }
}

/// How a material resolves alpha. Selects blend state, z-write and render
/// queue for `Standard`-family shaders.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlphaMode {
    Opaque,
    Cutout,
    Transparent,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    One,
    Zero,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub z_write: bool,
}

pub const RENDER_QUEUE_GEOMETRY: i32 = 2000;
pub const RENDER_QUEUE_CUTOUT: i32 = 2450;
pub const RENDER_QUEUE_TRANSPARENT: i32 = 3000;

impl AlphaMode {
    pub fn blend_state(self) -> BlendState {
        match self {
            AlphaMode::Opaque | AlphaMode::Cutout => BlendState {
                src: BlendFactor::One,
                dst: BlendFactor::Zero,
                z_write: true,
            },
            AlphaMode::Transparent => BlendState {
                src: BlendFactor::SrcAlpha,
                dst: BlendFactor::OneMinusSrcAlpha,
                z_write: false,
            },
        }
    }

    pub fn render_queue(self) -> i32 {
        match self {
            AlphaMode::Opaque => RENDER_QUEUE_GEOMETRY,
            AlphaMode::Cutout => RENDER_QUEUE_CUTOUT,
            AlphaMode::Transparent => RENDER_QUEUE_TRANSPARENT,
        }
    }

    pub fn alpha_cutoff(self) -> Option<f32> {
        match self {
            AlphaMode::Cutout => Some(0.5),
            _ => None,
        }
    }
}

/// Shader families the executor can reason about. Only `Standard` materials
/// participate in alpha-mode variants; everything else is passed through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderFamily {
    Standard,
    Unlit,
    Other(String),
}

impl ShaderFamily {
    pub fn is_standard(&self) -> bool {
        matches!(self, ShaderFamily::Standard)
    }
}

/// Shader keywords toggled by alpha modes and the normal-map path.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MaterialKeywords {
    pub alpha_test: bool,
    pub alpha_blend: bool,
    pub normal_map: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub shader: ShaderFamily,
    /// Action tag; 0 means untagged, 100 is the sign tag.
    pub tag: i32,
    pub alpha_mode: AlphaMode,
    pub blend: BlendState,
    pub render_queue: i32,
    pub alpha_cutoff: Option<f32>,
    pub keywords: MaterialKeywords,
    pub base_color: ColorF,
    pub main_texture: Option<Arc<DecodedTexture>>,
}

impl Material {
    pub fn standard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shader: ShaderFamily::Standard,
            tag: 0,
            alpha_mode: AlphaMode::Opaque,
            blend: AlphaMode::Opaque.blend_state(),
            render_queue: RENDER_QUEUE_GEOMETRY,
            alpha_cutoff: None,
            keywords: MaterialKeywords::default(),
            base_color: ColorF::WHITE,
            main_texture: None,
        }
    }

    pub fn with_tag(mut self, tag: i32) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_shader(mut self, shader: ShaderFamily) -> Self {
        self.shader = shader;
        self
    }
}

/// Handle into the [`MaterialStore`]. Handle equality is object identity:
/// the variant cache hands out the same handle for the same `(base, mode)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterialHandle {
    id: usize,
}

impl MaterialHandle {
    pub fn index(self) -> usize {
        self.id
    }
}

/// Instance-specific overrides applied on top of a shared material, one per
/// renderer submesh slot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PropertyBlock {
    pub color: Option<ColorF>,
    pub opacity: Option<f32>,
    pub main_texture: Option<Arc<DecodedTexture>>,
    pub bump_texture: Option<Arc<DecodedTexture>>,
    /// Set when an untagged, un-tinted `color` command replaced the texture
    /// with plain white so the color dominates.
    pub clear_main_texture: bool,
    pub normal_map: bool,
}

impl PropertyBlock {
    pub fn is_empty(&self) -> bool {
        *self == PropertyBlock::default()
    }
}

#[derive(Debug, Default)]
pub struct MaterialStore {
    materials: Vec<Material>,
    variants: FastHashMap<(MaterialHandle, AlphaMode), MaterialHandle>,
}

impl MaterialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) -> MaterialHandle {
        let id = self.materials.len();
        self.materials.push(material);
        MaterialHandle { id }
    }

    pub fn get(&self, handle: MaterialHandle) -> &Material {
        &self.materials[handle.id]
    }

    pub fn get_mut(&mut self, handle: MaterialHandle) -> &mut Material {
        &mut self.materials[handle.id]
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Returns the canonical variant of `base` in the requested alpha mode.
    ///
    /// Non-`Standard` materials are returned unchanged, as is a base that
    /// already is in the requested mode. Derived variants are cached so all
    /// callers share one handle per `(base, mode)`.
    pub fn variant(&mut self, base: MaterialHandle, mode: AlphaMode) -> MaterialHandle {
        {
            let material = self.get(base);
            if !material.shader.is_standard() || material.alpha_mode == mode {
                return base;
            }
        }
        if let Some(&cached) = self.variants.get(&(base, mode)) {
            return cached;
        }
        let mut derived = self.get(base).clone();
        derived.alpha_mode = mode;
        derived.blend = mode.blend_state();
        derived.render_queue = mode.render_queue();
        derived.alpha_cutoff = mode.alpha_cutoff();
        derived.keywords.alpha_test = mode == AlphaMode::Cutout;
        derived.keywords.alpha_blend = mode == AlphaMode::Transparent;
        let handle = self.insert(derived);
        self.variants.insert((base, mode), handle);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_is_canonical() {
        let mut store = MaterialStore::new();
        let base = store.insert(Material::standard("wood"));
        let a = store.variant(base, AlphaMode::Transparent);
        let b = store.variant(base, AlphaMode::Transparent);
        assert_eq!(a, b);
        assert_ne!(a, base);
        assert_eq!(store.get(a).render_queue, RENDER_QUEUE_TRANSPARENT);
        assert!(!store.get(a).blend.z_write);
    }

    #[test]
    fn variant_of_matching_mode_is_base() {
        let mut store = MaterialStore::new();
        let base = store.insert(Material::standard("opaque"));
        assert_eq!(store.variant(base, AlphaMode::Opaque), base);
    }

    #[test]
    fn non_standard_shader_passes_through() {
        let mut store = MaterialStore::new();
        let base = store.insert(
            Material::standard("water").with_shader(ShaderFamily::Other("Ocean".into())),
        );
        assert_eq!(store.variant(base, AlphaMode::Transparent), base);
    }

    #[test]
    fn cutout_variant_sets_cutoff_and_keyword() {
        let mut store = MaterialStore::new();
        let base = store.insert(Material::standard("leaf"));
        let v = store.variant(base, AlphaMode::Cutout);
        assert_eq!(store.get(v).alpha_cutoff, Some(0.5));
        assert!(store.get(v).keywords.alpha_test);
        assert_eq!(store.get(v).render_queue, RENDER_QUEUE_CUTOUT);
    }
}
