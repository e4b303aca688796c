//! Per-texture-id terrain materials.
//!
//! Every texture id seen in a tile gets one material, derived from a
//! shared template. The matching texture downloads asynchronously as
//! `textures/terrain<id>.{jpg,png}` relative to the object path (the
//! asset manager owns URL assembly and password escaping) and is assigned
//! on arrival with repeat wrapping; in-flight downloads are deduplicated
//! per id, and a failed id is not retried.

use std::sync::Arc;

use veld_core::asset::{AssetError, AssetResult, AssetSource};
use veld_core::material::{Material, MaterialHandle, MaterialStore};
use veld_core::task::{TaskHandle, TaskPoll};
use veld_core::texture::{decode_texture, TextureCache, TextureKey, WrapMode};
use veld_core::warn_once;
use veld_core::{FastHashMap, FastHashSet};

struct TextureFetch {
    candidates: Vec<String>,
    next: usize,
    current: Option<TaskHandle<AssetResult>>,
}

impl TextureFetch {
    fn new(texture_id: u16) -> Self {
        Self {
            candidates: vec![
                format!("textures/terrain{}.jpg", texture_id),
                format!("textures/terrain{}.png", texture_id),
            ],
            next: 0,
            current: None,
        }
    }

    fn start(&mut self, assets: &dyn AssetSource, object_path: &str, password: Option<&str>) -> bool {
        let Some(candidate) = self.candidates.get(self.next).cloned() else {
            return false;
        };
        self.next += 1;
        self.current = Some(assets.download_asset(object_path, &candidate, password));
        true
    }
}

pub struct TerrainMaterialRegistry {
    template: MaterialHandle,
    materials: FastHashMap<u16, MaterialHandle>,
    pending: FastHashMap<u16, TextureFetch>,
    failed: FastHashSet<u16>,
}

impl TerrainMaterialRegistry {
    pub fn new(store: &mut MaterialStore) -> Self {
        let template = store.insert(Material::standard("terrain"));
        Self {
            template,
            materials: FastHashMap::default(),
            pending: FastHashMap::default(),
            failed: FastHashSet::default(),
        }
    }

    /// The material for a texture id, derived from the template on first
    /// use; the texture download starts alongside unless one is already in
    /// flight or the id already failed every candidate.
    pub fn material_for(
        &mut self,
        store: &mut MaterialStore,
        texture_id: u16,
        assets: &dyn AssetSource,
        object_path: &str,
        password: Option<&str>,
    ) -> MaterialHandle {
        if let Some(&handle) = self.materials.get(&texture_id) {
            return handle;
        }
        let mut material = store.get(self.template).clone();
        material.name = format!("terrain{}", texture_id);
        let handle = store.insert(material);
        self.materials.insert(texture_id, handle);

        if !self.failed.contains(&texture_id) && !self.pending.contains_key(&texture_id) {
            let mut fetch = TextureFetch::new(texture_id);
            if fetch.start(assets, object_path, password) {
                self.pending.insert(texture_id, fetch);
            }
        }
        handle
    }

    /// Polls in-flight texture downloads, assigning arrivals to their
    /// material (repeat wrap) and caching the decode.
    pub fn poll(
        &mut self,
        store: &mut MaterialStore,
        textures: &mut TextureCache,
        assets: &dyn AssetSource,
        object_path: &str,
        password: Option<&str>,
    ) {
        let ids: Vec<u16> = self.pending.keys().copied().collect();
        for texture_id in ids {
            let Some(fetch) = self.pending.get_mut(&texture_id) else {
                continue;
            };
            let Some(handle) = fetch.current.as_mut() else {
                self.pending.remove(&texture_id);
                continue;
            };
            match handle.poll() {
                TaskPoll::Pending => {}
                TaskPoll::Ready(Ok(bytes)) => {
                    self.pending.remove(&texture_id);
                    match decode_texture(&bytes) {
                        Ok(texture) => {
                            let texture = Arc::new(texture.with_wrap(WrapMode::Repeat));
                            textures.put(
                                TextureKey::new(object_path, format!("terrain{}", texture_id)),
                                texture.clone(),
                            );
                            if let Some(&material) = self.materials.get(&texture_id) {
                                store.get_mut(material).main_texture = Some(texture);
                            }
                        }
                        Err(err) => {
                            self.failed.insert(texture_id);
                            warn_once!(
                                format!("terrain-decode:{}", texture_id),
                                "terrain texture {} failed to decode: {}",
                                texture_id,
                                err
                            );
                        }
                    }
                }
                TaskPoll::Ready(Err(AssetError::NotFound(_))) | TaskPoll::Gone => {
                    if !fetch.start(assets, object_path, password) {
                        self.pending.remove(&texture_id);
                        self.failed.insert(texture_id);
                        warn_once!(
                            format!("terrain-404:{}", texture_id),
                            "no terrain texture found for id {}",
                            texture_id
                        );
                    }
                }
                TaskPoll::Ready(Err(AssetError::Transfer(reason))) => {
                    self.pending.remove(&texture_id);
                    self.failed.insert(texture_id);
                    warn_once!(
                        format!("terrain-io:{}", texture_id),
                        "terrain texture {} download failed: {}",
                        texture_id,
                        reason
                    );
                }
            }
        }
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_filenames_follow_the_id() {
        let fetch = TextureFetch::new(42);
        assert_eq!(
            fetch.candidates,
            vec![
                "textures/terrain42.jpg".to_string(),
                "textures/terrain42.png".to_string(),
            ]
        );
    }
}
