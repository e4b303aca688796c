//! Terrain material registry against a fake asset source: per-id
//! deduplication, jpg→png fallback and repeat-wrap assignment on arrival.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use veld_core::asset::{AssetError, AssetResult, AssetSource};
use veld_core::material::MaterialStore;
use veld_core::task::TaskHandle;
use veld_core::texture::{TextureCache, WrapMode};
use veld_terrain::materials::TerrainMaterialRegistry;

fn png_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image::RgbaImage::new(2, 2))
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
    bytes
}

/// Serves `.png` files only; counts every download attempt.
struct PngOnlyAssets {
    attempts: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl PngOnlyAssets {
    fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }
}

impl AssetSource for PngOnlyAssets {
    fn download_asset(
        &self,
        _object_path: &str,
        filename: &str,
        _password: Option<&str>,
    ) -> TaskHandle<AssetResult> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(filename.to_string());
        if filename.ends_with(".png") {
            TaskHandle::ready(Ok(png_bytes()))
        } else {
            TaskHandle::ready(Err(AssetError::NotFound(filename.to_string())))
        }
    }
}

#[test]
fn terrain_texture_falls_back_to_png_and_wraps_repeat() {
    let mut store = MaterialStore::new();
    let mut textures = TextureCache::new(8);
    let assets = PngOnlyAssets::new();
    let mut registry = TerrainMaterialRegistry::new(&mut store);

    let handle = registry.material_for(&mut store, 7, &assets, "op", None);
    // repeated requests for the same id reuse material and fetch
    let again = registry.material_for(&mut store, 7, &assets, "op", None);
    assert_eq!(handle, again);
    assert_eq!(registry.pending_count(), 1);

    // first poll: jpg 404s, png starts; second poll: png arrives
    registry.poll(&mut store, &mut textures, &assets, "op", None);
    registry.poll(&mut store, &mut textures, &assets, "op", None);

    assert_eq!(registry.pending_count(), 0);
    let material = store.get(handle);
    let texture = material.main_texture.as_ref().expect("texture assigned");
    assert_eq!(texture.wrap, WrapMode::Repeat);

    let log = assets.log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec!["textures/terrain7.jpg".to_string(), "textures/terrain7.png".to_string()]
    );
}

#[test]
fn missing_terrain_texture_fails_once_and_stops_retrying() {
    struct NoAssets(AtomicUsize);
    impl AssetSource for NoAssets {
        fn download_asset(
            &self,
            _object_path: &str,
            filename: &str,
            _password: Option<&str>,
        ) -> TaskHandle<AssetResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            TaskHandle::ready(Err(AssetError::NotFound(filename.to_string())))
        }
    }

    let mut store = MaterialStore::new();
    let mut textures = TextureCache::new(8);
    let assets = NoAssets(AtomicUsize::new(0));
    let mut registry = TerrainMaterialRegistry::new(&mut store);

    let handle = registry.material_for(&mut store, 3, &assets, "op", None);
    for _ in 0..10 {
        registry.poll(&mut store, &mut textures, &assets, "op", None);
    }
    assert_eq!(registry.pending_count(), 0);
    // jpg + png, then no more retries
    assert_eq!(assets.0.load(Ordering::SeqCst), 2);
    assert!(store.get(handle).main_texture.is_none());

    // a later request does not restart the chain
    let _ = registry.material_for(&mut store, 3, &assets, "op", None);
    assert_eq!(assets.0.load(Ordering::SeqCst), 2);
}
