//! Template and pool registry.
//!
//! One hidden template subtree per model id, loaded at most once at a
//! time; spawns clone it. Unloaded instances return to a per-id LIFO pool
//! (capped) instead of being destroyed, ready for the next acquire.

use std::sync::Arc;

use veld_core::material::{Material, MaterialStore, PropertyBlock};
use veld_core::scene::{Collider, InstanceState, NodeId, Renderer, SceneGraph};
use veld_core::task::{TaskHandle, TaskPoll};
use veld_core::warn_once;
use veld_core::{FastHashMap, geometry::RenderVector};

use crate::interfaces::{ModelLoadError, ModelLoader, ModelPrototype};

pub enum TemplateStatus {
    Loading,
    Ready(NodeId),
    /// Load aborted; spawns for this id discard silently.
    Failed,
}

struct TemplateEntry {
    status: TemplateStatus,
    load: Option<TaskHandle<Result<ModelPrototype, ModelLoadError>>>,
}

pub struct TemplateRegistry {
    entries: FastHashMap<String, TemplateEntry>,
    pools: FastHashMap<String, Vec<NodeId>>,
    template_root: NodeId,
    pool_root: NodeId,
    pooling: bool,
    max_pool: usize,
}

impl TemplateRegistry {
    /// Creates the hidden template/pool roots under the scene root.
    pub fn new(scene: &mut SceneGraph, pooling: bool, max_pool: usize) -> Self {
        let template_root = scene.create_node("templates", scene.root());
        scene.set_active(template_root, false);
        let pool_root = scene.create_node("pool", scene.root());
        scene.set_active(pool_root, false);
        Self {
            entries: FastHashMap::default(),
            pools: FastHashMap::default(),
            template_root,
            pool_root,
            pooling,
            max_pool,
        }
    }

    pub fn status(&self, model_id: &str) -> Option<&TemplateStatus> {
        self.entries.get(model_id).map(|e| &e.status)
    }

    pub fn loads_in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.status, TemplateStatus::Loading))
            .count()
    }

    pub fn templates_ready(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.status, TemplateStatus::Ready(_)))
            .count()
    }

    pub fn pooled_count(&self) -> usize {
        self.pools.values().map(Vec::len).sum()
    }

    /// Requests a template load. A second request for an id that is
    /// already loading (or done) is a no-op, which is what keeps the
    /// one-load-per-id invariant.
    pub fn request(
        &mut self,
        model_id: &str,
        loader: &dyn ModelLoader,
        object_path: &str,
        password: Option<&str>,
    ) {
        if self.entries.contains_key(model_id) {
            return;
        }
        let load = loader.load_model(model_id, object_path, password);
        self.entries.insert(
            model_id.to_string(),
            TemplateEntry {
                status: TemplateStatus::Loading,
                load: Some(load),
            },
        );
    }

    /// Polls in-flight template loads and instantiates finished
    /// prototypes as hidden template subtrees.
    pub fn poll_loads(&mut self, scene: &mut SceneGraph, materials: &mut MaterialStore) {
        let template_root = self.template_root;
        for (model_id, entry) in self.entries.iter_mut() {
            let Some(handle) = entry.load.as_mut() else {
                continue;
            };
            match handle.poll() {
                TaskPoll::Pending => {}
                TaskPoll::Ready(Ok(prototype)) => {
                    entry.load = None;
                    let node = instantiate_prototype(scene, materials, &prototype, template_root);
                    entry.status = TemplateStatus::Ready(node);
                }
                TaskPoll::Ready(Err(err)) => {
                    entry.load = None;
                    entry.status = TemplateStatus::Failed;
                    warn_once!(
                        format!("model-load:{}", model_id),
                        "model `{}` failed to load: {}",
                        model_id,
                        err
                    );
                }
                TaskPoll::Gone => {
                    entry.load = None;
                    entry.status = TemplateStatus::Failed;
                    warn_once!(
                        format!("model-load:{}", model_id),
                        "model `{}` loader went away",
                        model_id
                    );
                }
            }
        }
    }

    /// Takes an instance for `model_id`: from the pool when possible,
    /// otherwise as a fresh clone of the template. The instance comes back
    /// inactive, parented under `parent`; the caller places then
    /// activates.
    pub fn acquire(
        &mut self,
        scene: &mut SceneGraph,
        model_id: &str,
        parent: NodeId,
    ) -> Option<NodeId> {
        if let Some(pool) = self.pools.get_mut(model_id) {
            while let Some(instance) = pool.pop() {
                if scene.contains(instance) {
                    scene.set_parent(instance, parent);
                    scene.set_active(instance, false);
                    return Some(instance);
                }
            }
        }
        let template = match self.entries.get(model_id) {
            Some(TemplateEntry {
                status: TemplateStatus::Ready(node),
                ..
            }) => *node,
            _ => return None,
        };
        let instance = scene.clone_subtree(template, parent)?;
        let base_scale = scene.get(instance).map(|n| n.local.scale)?;
        if let Some(node) = scene.get_mut(instance) {
            let mut state = InstanceState::new(model_id);
            state.base_scale = base_scale;
            node.instance = Some(state);
            node.active = false;
        }
        Some(instance)
    }

    /// Returns an instance to its pool (resetting per-instance action
    /// state) or destroys it when pooling is off, the pool is full, or the
    /// instance lost its template.
    pub fn release(&mut self, scene: &mut SceneGraph, instance: NodeId) {
        let model_id = match scene.get(instance).and_then(|n| n.instance.as_ref()) {
            Some(state) => state.model_id.clone(),
            None => {
                scene.destroy_subtree(instance);
                return;
            }
        };
        let poolable = self.pooling
            && self.entries.contains_key(&model_id)
            && self.pools.get(&model_id).map_or(0, Vec::len) < self.max_pool;
        if !poolable {
            scene.destroy_subtree(instance);
            return;
        }

        let base_scale = scene
            .get(instance)
            .and_then(|n| n.instance.as_ref())
            .map_or(RenderVector::new(1.0, 1.0, 1.0), |s| s.base_scale);
        if let Some(node) = scene.get_mut(instance) {
            if let Some(state) = node.instance.as_mut() {
                state.reset();
            }
            node.local = Default::default();
            node.local.scale = base_scale;
        }
        for id in scene.descendants(instance) {
            if let Some(renderer) = scene.get_mut(id).and_then(|n| n.renderer.as_mut()) {
                for block in renderer.overrides.iter_mut() {
                    *block = PropertyBlock::default();
                }
                renderer.enabled = true;
            }
            if let Some(collider) = scene.get_mut(id).and_then(|n| n.collider.as_mut()) {
                collider.enabled = true;
            }
        }
        scene.set_active(instance, false);
        scene.set_parent(instance, self.pool_root);
        self.pools.entry(model_id).or_default().push(instance);
    }
}

/// Direct-load fallback (`use_templates` off): builds the prototype
/// subtree once, straight under its cell root, and stamps it as an
/// instance. Stays inactive until the caller placed it.
pub(crate) fn instantiate_direct(
    scene: &mut SceneGraph,
    materials: &mut MaterialStore,
    prototype: &ModelPrototype,
    parent: NodeId,
) -> NodeId {
    let instance = instantiate_prototype(scene, materials, prototype, parent);
    let base_scale = scene
        .get(instance)
        .map_or(RenderVector::new(1.0, 1.0, 1.0), |n| n.local.scale);
    if let Some(node) = scene.get_mut(instance) {
        let mut state = InstanceState::new(prototype.id.clone());
        state.base_scale = base_scale;
        node.instance = Some(state);
    }
    instance
}

/// Builds the hidden template subtree for a prototype: one child per
/// part, renderers wired to freshly inserted materials, a box collider
/// per part, base scale applied once on the root, inactive.
fn instantiate_prototype(
    scene: &mut SceneGraph,
    materials: &mut MaterialStore,
    prototype: &ModelPrototype,
    template_root: NodeId,
) -> NodeId {
    let root = scene.create_node(&prototype.id, template_root);
    scene.set_active(root, false);
    if let Some(node) = scene.get_mut(root) {
        let s = prototype.base_scale;
        node.local.scale = RenderVector::new(s, s, s);
    }
    for part in &prototype.parts {
        let part_node = scene.create_node(&part.name, root);
        let handles = part
            .materials
            .iter()
            .map(|spec| {
                let mut material = Material::standard(spec.name.clone());
                material.shader = spec.shader.clone();
                material.tag = spec.tag;
                material.base_color = spec.base_color;
                materials.insert(material)
            })
            .collect();
        let renderer = Renderer::new(Arc::clone(&part.mesh), handles);
        let bounds = part.mesh.bounds;
        if let Some(node) = scene.get_mut(part_node) {
            node.local = part.local.clone();
            node.renderer = Some(renderer);
            node.collider = Some(Collider::bounding(bounds));
        }
    }
    root
}
