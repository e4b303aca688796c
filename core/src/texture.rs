//! Decoded textures and the process-wide bounded LRU cache.
//!
//! The cache is only ever touched from the scheduler thread; download
//! workers hand raw bytes back and decoding + insertion happen on insert.

use std::num::NonZeroUsize;
use std::sync::Arc;

use image::RgbaImage;
use lru::LruCache;

/// Texture addressing wrap mode, forwarded to the renderer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WrapMode {
    #[default]
    Clamp,
    Repeat,
}

/// A decoded RGBA8 image ready for upload by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTexture {
    pub pixels: RgbaImage,
    pub wrap: WrapMode,
    /// File name the image was actually decoded from. Cache keys keep the
    /// *requested* name, which may lack an extension; alpha-mode decisions
    /// must follow the resolved name so every consumer of the cached entry
    /// picks the same variant.
    pub source_name: Option<String>,
}

impl DecodedTexture {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            wrap: WrapMode::Clamp,
            source_name: None,
        }
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    /// True when the resolved file name suggests PNG alpha; drives the
    /// cutout variant for Standard materials.
    pub fn png_like(&self) -> bool {
        self.source_name
            .as_deref()
            .map_or(false, |name| name.to_ascii_lowercase().ends_with(".png"))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TextureDecodeError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("empty image data")]
    Empty,
}

/// Decodes raw image bytes (any format the `image` crate understands here:
/// JPEG, PNG, BMP, DDS) into RGBA8.
pub fn decode_texture(bytes: &[u8]) -> Result<DecodedTexture, TextureDecodeError> {
    if bytes.is_empty() {
        return Err(TextureDecodeError::Empty);
    }
    let decoded = image::load_from_memory(bytes)?;
    Ok(DecodedTexture::new(decoded.to_rgba8()))
}

/// First bytes of an undecodable blob, for the one-shot failure log.
pub fn signature_prefix(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cache key: texture name resolved against an object path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureKey {
    pub object_path: String,
    pub name: String,
}

impl TextureKey {
    pub fn new(object_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            object_path: object_path.into(),
            name: name.into(),
        }
    }
}

/// Bounded LRU cache of decoded textures, keyed by `(object_path, name)`.
///
/// `get` promotes, `put` replaces-and-promotes, and the size never exceeds
/// the capacity passed at construction (eviction is strict LRU).
pub struct TextureCache {
    inner: LruCache<TextureKey, Arc<DecodedTexture>>,
}

impl TextureCache {
    pub const DEFAULT_CAPACITY: usize = 512;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, key: &TextureKey) -> Option<Arc<DecodedTexture>> {
        self.inner.get(key).cloned()
    }

    /// Inserts (or replaces) an entry at the head, evicting from the tail
    /// while over capacity. The evicted image is dropped here; renderers
    /// holding an `Arc` keep it alive until their next sync.
    pub fn put(&mut self, key: TextureKey, texture: Arc<DecodedTexture>) {
        self.inner.put(key, texture);
    }

    /// Non-promoting lookup.
    pub fn contains(&self, key: &TextureKey) -> bool {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    /// Keys from most- to least-recently used.
    pub fn keys_mru(&self) -> impl Iterator<Item = &TextureKey> {
        self.inner.iter().map(|(k, _)| k)
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tex() -> Arc<DecodedTexture> {
        Arc::new(DecodedTexture::new(RgbaImage::new(1, 1)))
    }

    fn key(name: &str) -> TextureKey {
        TextureKey::new("http://objects.example/v1", name)
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut cache = TextureCache::new(3);
        for name in ["a", "b", "c", "d", "e"] {
            cache.put(key(name), tex());
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn eviction_is_least_recently_used() {
        // put(A) put(B) put(C) get(A) put(D) -> {A, C, D}, head order D A C
        let mut cache = TextureCache::new(3);
        cache.put(key("a"), tex());
        cache.put(key("b"), tex());
        cache.put(key("c"), tex());
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("d"), tex());
        assert!(!cache.contains(&key("b")));
        let order: Vec<&str> = cache.keys_mru().map(|k| k.name.as_str()).collect();
        assert_eq!(order, vec!["d", "a", "c"]);
    }

    #[test]
    fn put_replaces_existing_and_promotes() {
        let mut cache = TextureCache::new(2);
        cache.put(key("a"), tex());
        cache.put(key("b"), tex());
        let replacement = Arc::new(DecodedTexture::new(RgbaImage::new(2, 2)));
        cache.put(key("a"), replacement.clone());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a")).unwrap().width(), 2);
        let order: Vec<&str> = cache.keys_mru().map(|k| k.name.as_str()).collect();
        assert_eq!(order[0], "a");
    }

    #[test]
    fn png_like_follows_the_resolved_name() {
        let plain = DecodedTexture::new(RgbaImage::new(1, 1));
        assert!(!plain.png_like());
        // requested "stone1", resolved to "stone1.png"
        let resolved = DecodedTexture::new(RgbaImage::new(1, 1)).with_source_name("stone1.png");
        assert!(resolved.png_like());
        let upper = DecodedTexture::new(RgbaImage::new(1, 1)).with_source_name("LEAF.PNG");
        assert!(upper.png_like());
        let jpg = DecodedTexture::new(RgbaImage::new(1, 1)).with_source_name("stone1.jpg");
        assert!(!jpg.png_like());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_texture(&[1, 2, 3]).is_err());
        assert!(decode_texture(&[]).is_err());
    }

    #[test]
    fn signature_prefix_is_bounded() {
        assert_eq!(signature_prefix(&[0xde, 0xad]), "de ad");
        assert_eq!(signature_prefix(&[0; 32]).split(' ').count(), 8);
    }
}
