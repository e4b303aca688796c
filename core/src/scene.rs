//! The retained scene: an arena of nodes with parent/child links.
//!
//! Nodes are addressed by generational [`NodeId`]s so that work items which
//! outlive their target (an unloaded cell, a pooled instance) resolve to
//! `None` instead of aliasing a reused slot. Templates, pools, cell roots
//! and terrain tiles are all subtrees of the same arena; the renderer walks
//! it read-only between ticks.

use std::sync::Arc;

use euclid::{Rotation3D, Transform3D};

use crate::geometry::{RenderPoint, RenderRotation, RenderSpace, RenderVector};
use crate::material::{ColorF, MaterialHandle, PropertyBlock};

pub use self::node_id::NodeId;

mod node_id {
    use std::fmt;

    /// Handle to a scene node. Carries a generation so ids of destroyed
    /// nodes never resolve to a reused slot.
    #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct NodeId {
        pub(super) index: u32,
        pub(super) generation: u32,
    }

    impl NodeId {
        #[inline]
        pub(super) fn new(index: u32, generation: u32) -> Self {
            Self { index, generation }
        }

        #[inline]
        pub fn index(&self) -> usize {
            self.index as usize
        }
    }

    impl fmt::Debug for NodeId {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "NodeId({}v{})", self.index, self.generation)
        }
    }
}

/// Local transform relative to the parent node.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTransform {
    pub position: RenderVector,
    pub rotation: RenderRotation,
    pub scale: RenderVector,
}

impl Default for LocalTransform {
    fn default() -> Self {
        Self {
            position: RenderVector::zero(),
            rotation: Rotation3D::identity(),
            scale: RenderVector::new(1.0, 1.0, 1.0),
        }
    }
}

impl LocalTransform {
    pub fn to_transform(&self) -> Transform3D<f32, RenderSpace, RenderSpace> {
        Transform3D::scale(self.scale.x, self.scale.y, self.scale.z)
            .then(&self.rotation.to_transform())
            .then(&Transform3D::translation(
                self.position.x,
                self.position.y,
                self.position.z,
            ))
    }
}

/// Axis-aligned bounds in render space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: RenderPoint,
    pub max: RenderPoint,
}

impl Aabb {
    pub const ZERO: Aabb = Aabb {
        min: RenderPoint::new(0.0, 0.0, 0.0),
        max: RenderPoint::new(0.0, 0.0, 0.0),
    };

    pub fn from_points<I: IntoIterator<Item = RenderPoint>>(points: I) -> Self {
        let mut iter = points.into_iter();
        let first = match iter.next() {
            Some(p) => p,
            None => return Aabb::ZERO,
        };
        let mut bounds = Aabb {
            min: first,
            max: first,
        };
        for p in iter {
            bounds.min.x = bounds.min.x.min(p.x);
            bounds.min.y = bounds.min.y.min(p.y);
            bounds.min.z = bounds.min.z.min(p.z);
            bounds.max.x = bounds.max.x.max(p.x);
            bounds.max.y = bounds.max.y.max(p.y);
            bounds.max.z = bounds.max.z.max(p.z);
        }
        bounds
    }

    pub fn size(&self) -> RenderVector {
        self.max - self.min
    }

    pub fn center(&self) -> RenderPoint {
        RenderPoint::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
            (self.min.z + self.max.z) * 0.5,
        )
    }
}

/// Triangle indices of one submesh; 16-bit where the vertex count allows.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl MeshIndices {
    pub fn len(&self) -> usize {
        match self {
            MeshIndices::U16(v) => v.len(),
            MeshIndices::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            MeshIndices::U16(v) => Box::new(v.iter().map(|&i| i as u32)),
            MeshIndices::U32(v) => Box::new(v.iter().copied()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubMesh {
    pub indices: MeshIndices,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<RenderPoint>,
    pub normals: Vec<RenderVector>,
    pub uvs: Vec<[f32; 2]>,
    pub submeshes: Vec<SubMesh>,
    pub bounds: Aabb,
}

impl Mesh {
    pub fn new(
        vertices: Vec<RenderPoint>,
        normals: Vec<RenderVector>,
        uvs: Vec<[f32; 2]>,
        submeshes: Vec<SubMesh>,
    ) -> Self {
        let bounds = Aabb::from_points(vertices.iter().copied());
        Self {
            vertices,
            normals,
            uvs,
            submeshes,
            bounds,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn recompute_bounds(&mut self) {
        self.bounds = Aabb::from_points(self.vertices.iter().copied());
    }

    /// Rebuilds smooth per-vertex normals from the triangle geometry
    /// (area-weighted face normal accumulation).
    pub fn recompute_normals(&mut self) {
        let mut accum = vec![RenderVector::zero(); self.vertices.len()];
        for submesh in &self.submeshes {
            let indices: Vec<u32> = submesh.indices.iter().collect();
            for tri in indices.chunks_exact(3) {
                let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
                let face = (self.vertices[b] - self.vertices[a])
                    .cross(self.vertices[c] - self.vertices[a]);
                accum[a] += face;
                accum[b] += face;
                accum[c] += face;
            }
        }
        self.normals = accum
            .into_iter()
            .map(|n| {
                let len = n.length();
                if len > f32::EPSILON {
                    n / len
                } else {
                    RenderVector::new(0.0, 1.0, 0.0)
                }
            })
            .collect();
    }
}

/// Renderable payload of a node. `materials` and `overrides` run parallel,
/// one slot per submesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Renderer {
    pub mesh: Arc<Mesh>,
    pub materials: Vec<MaterialHandle>,
    pub overrides: Vec<PropertyBlock>,
    pub enabled: bool,
}

impl Renderer {
    pub fn new(mesh: Arc<Mesh>, materials: Vec<MaterialHandle>) -> Self {
        let overrides = vec![PropertyBlock::default(); materials.len()];
        Self {
            mesh,
            materials,
            overrides,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    Box(Aabb),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collider {
    pub shape: ColliderShape,
    pub enabled: bool,
}

impl Collider {
    pub fn bounding(bounds: Aabb) -> Self {
        Self {
            shape: ColliderShape::Box(bounds),
            enabled: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LightKind {
    Point,
    Spot,
}

/// Light effect loop, driven by the streamer's monotonic clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LightFx {
    Blink,
    FadeIn,
    FadeOut,
    Fire,
    Pulse,
    Rainbow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: ColorF,
    pub radius: f32,
    pub brightness: f32,
    /// Spot cone angle in degrees; ignored for point lights.
    pub angle: f32,
    pub fx: Option<LightFx>,
    /// Effect period in seconds.
    pub fx_period: f32,
    pub max_dist: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            color: ColorF::WHITE,
            radius: 10.0,
            brightness: 0.5,
            angle: 45.0,
            fx: None,
            fx_period: 1.0,
            max_dist: 100.0,
        }
    }
}

/// Object-wide color/opacity state of a model instance. Richer than the
/// per-material overrides: ambient/diffuse factors and the sequence counter
/// let later commands observe what earlier ones already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorState {
    pub color: ColorF,
    pub has_color: bool,
    pub opacity: f32,
    pub ambient: f32,
    pub diffuse: f32,
    pub sequence: u32,
}

impl Default for ColorState {
    fn default() -> Self {
        Self {
            color: ColorF::WHITE,
            has_color: false,
            opacity: 1.0,
            ambient: 1.0,
            diffuse: 1.0,
            sequence: 0,
        }
    }
}

impl ColorState {
    /// The color written into the property blocks: base color scaled by the
    /// ambient/diffuse factors, alpha from the object-wide opacity.
    pub fn effective_color(&self) -> ColorF {
        let mut c = self.color.scale_rgb(self.ambient * self.diffuse).clamped();
        c.a = self.opacity.clamp(0.0, 1.0);
        c
    }

    pub fn is_translucent(&self) -> bool {
        self.opacity < 1.0 || self.color.a < 1.0
    }
}

/// Per-instance streaming state, present on the root node of every spawned
/// model instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState {
    pub model_id: String,
    pub description: Option<String>,
    /// Local scale at placement time; `scale` commands multiply on top and
    /// pool return restores it.
    pub base_scale: RenderVector,
    /// Action gate: number of in-flight asynchronous actions. While
    /// non-zero, renderers and colliders of the subtree stay disabled.
    pub pending_actions: u32,
    pub desired_visible: bool,
    pub desired_solid: bool,
    pub color: ColorState,
}

impl InstanceState {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            description: None,
            base_scale: RenderVector::new(1.0, 1.0, 1.0),
            pending_actions: 0,
            desired_visible: true,
            desired_solid: true,
            color: ColorState::default(),
        }
    }

    /// Back to the just-spawned state; called on pool return.
    pub fn reset(&mut self) {
        self.pending_actions = 0;
        self.desired_visible = true;
        self.desired_solid = true;
        self.color = ColorState::default();
        self.description = None;
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub local: LocalTransform,
    pub active: bool,
    pub renderer: Option<Renderer>,
    pub collider: Option<Collider>,
    pub light: Option<Light>,
    pub instance: Option<InstanceState>,
}

impl SceneNode {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            children: Vec::new(),
            local: LocalTransform::default(),
            active: true,
            renderer: None,
            collider: None,
            light: None,
            instance: None,
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

pub struct SceneGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
}

impl SceneGraph {
    pub fn new() -> Self {
        let root_node = SceneNode::named("scene");
        let slots = vec![Slot {
            generation: 0,
            node: Some(root_node),
        }];
        Self {
            slots,
            free: Vec::new(),
            root: NodeId::new(0, 0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .map_or(false, |s| s.generation == id.generation && s.node.is_some())
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// Number of live nodes, the root included.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the root always exists
    }

    pub fn create_node(&mut self, name: &str, parent: NodeId) -> NodeId {
        debug_assert!(self.contains(parent));
        let mut node = SceneNode::named(name);
        node.parent = Some(parent);
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::new(index, 0)
            }
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    /// Moves `id` under `new_parent`, keeping its local transform.
    pub fn set_parent(&mut self, id: NodeId, new_parent: NodeId) {
        if !self.contains(id) || !self.contains(new_parent) || id == new_parent {
            return;
        }
        let old_parent = self.get(id).and_then(|n| n.parent);
        if let Some(op) = old_parent {
            if let Some(node) = self.get_mut(op) {
                node.children.retain(|&c| c != id);
            }
        }
        if let Some(node) = self.get_mut(id) {
            node.parent = Some(new_parent);
        }
        if let Some(node) = self.get_mut(new_parent) {
            node.children.push(id);
        }
    }

    pub fn set_active(&mut self, id: NodeId, active: bool) {
        if let Some(node) = self.get_mut(id) {
            node.active = active;
        }
    }

    pub fn is_active(&self, id: NodeId) -> bool {
        self.get(id).map_or(false, |n| n.active)
    }

    /// Pre-order traversal of `id` and everything below it.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.get(current) {
                out.push(current);
                for &child in node.children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Destroys `id` and its whole subtree, unlinking it from its parent.
    pub fn destroy_subtree(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        if let Some(parent) = self.get(id).and_then(|n| n.parent) {
            if let Some(node) = self.get_mut(parent) {
                node.children.retain(|&c| c != id);
            }
        }
        for node_id in self.descendants(id) {
            let slot = &mut self.slots[node_id.index()];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(node_id.index() as u32);
        }
    }

    /// Deep-copies the subtree rooted at `source` under `new_parent` and
    /// returns the copy's root. Meshes are shared (`Arc`), everything else
    /// is cloned.
    pub fn clone_subtree(&mut self, source: NodeId, new_parent: NodeId) -> Option<NodeId> {
        if !self.contains(source) || !self.contains(new_parent) {
            return None;
        }
        let mut stack = vec![(source, new_parent)];
        let mut cloned_root = None;
        while let Some((src, parent)) = stack.pop() {
            let (mut data, children) = {
                let node = self.get(src)?;
                (node.clone(), node.children.clone())
            };
            data.parent = Some(parent);
            data.children = Vec::new();
            let id = match self.free.pop() {
                Some(index) => {
                    let slot = &mut self.slots[index as usize];
                    slot.node = Some(data);
                    NodeId::new(index, slot.generation)
                }
                None => {
                    let index = self.slots.len() as u32;
                    self.slots.push(Slot {
                        generation: 0,
                        node: Some(data),
                    });
                    NodeId::new(index, 0)
                }
            };
            if let Some(p) = self.get_mut(parent) {
                p.children.push(id);
            }
            if cloned_root.is_none() {
                cloned_root = Some(id);
            }
            for child in children {
                stack.push((child, id));
            }
        }
        cloned_root
    }

    /// Composed transform from node space to scene space.
    pub fn world_transform(&self, id: NodeId) -> Transform3D<f32, RenderSpace, RenderSpace> {
        let mut transform = Transform3D::identity();
        let mut current = Some(id);
        while let Some(node_id) = current {
            match self.get(node_id) {
                Some(node) => {
                    transform = transform.then(&node.local.to_transform());
                    current = node.parent;
                }
                None => break,
            }
        }
        transform
    }

    // -- Action gate

    /// Marks the start of an asynchronous action on an instance. The first
    /// pending action hides the subtree (renderers and colliders off).
    pub fn begin_action(&mut self, instance: NodeId) {
        let went_busy = match self.get_mut(instance).and_then(|n| n.instance.as_mut()) {
            Some(state) => {
                state.pending_actions += 1;
                state.pending_actions == 1
            }
            None => false,
        };
        if went_busy {
            self.set_subtree_flags(instance, false, false);
        }
    }

    /// Marks the end of an asynchronous action. When the last one
    /// completes, the subtree reflects the desired visible/solid flags.
    pub fn end_action(&mut self, instance: NodeId) {
        let went_idle = match self.get_mut(instance).and_then(|n| n.instance.as_mut()) {
            Some(state) => {
                state.pending_actions = state.pending_actions.saturating_sub(1);
                state.pending_actions == 0
            }
            None => false,
        };
        if went_idle {
            self.apply_desired_flags(instance);
        }
    }

    pub fn pending_actions(&self, instance: NodeId) -> u32 {
        self.get(instance)
            .and_then(|n| n.instance.as_ref())
            .map_or(0, |s| s.pending_actions)
    }

    /// Updates the desired visible flag; takes effect immediately when the
    /// gate is idle, otherwise when the last pending action completes.
    pub fn set_desired_visible(&mut self, instance: NodeId, visible: bool) {
        let idle = match self.get_mut(instance).and_then(|n| n.instance.as_mut()) {
            Some(state) => {
                state.desired_visible = visible;
                state.pending_actions == 0
            }
            None => return,
        };
        if idle {
            self.apply_desired_flags(instance);
        }
    }

    pub fn set_desired_solid(&mut self, instance: NodeId, solid: bool) {
        let idle = match self.get_mut(instance).and_then(|n| n.instance.as_mut()) {
            Some(state) => {
                state.desired_solid = solid;
                state.pending_actions == 0
            }
            None => return,
        };
        if idle {
            self.apply_desired_flags(instance);
        }
    }

    fn apply_desired_flags(&mut self, instance: NodeId) {
        let (visible, solid) = match self.get(instance).and_then(|n| n.instance.as_ref()) {
            Some(state) => (state.desired_visible, state.desired_solid),
            None => return,
        };
        self.set_subtree_flags(instance, visible, solid);
    }

    fn set_subtree_flags(&mut self, root: NodeId, renderers: bool, colliders: bool) {
        for id in self.descendants(root) {
            if let Some(node) = self.get_mut(id) {
                if let Some(renderer) = node.renderer.as_mut() {
                    renderer.enabled = renderers;
                }
                if let Some(collider) = node.collider.as_mut() {
                    collider.enabled = colliders;
                }
            }
        }
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialStore;
    use crate::material::Material;

    fn unit_quad() -> Mesh {
        Mesh::new(
            vec![
                RenderPoint::new(0.0, 0.0, 0.0),
                RenderPoint::new(1.0, 0.0, 0.0),
                RenderPoint::new(0.0, 0.0, 1.0),
                RenderPoint::new(1.0, 0.0, 1.0),
            ],
            vec![RenderVector::new(0.0, 1.0, 0.0); 4],
            vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            vec![SubMesh {
                indices: MeshIndices::U16(vec![0, 2, 1, 1, 2, 3]),
            }],
        )
    }

    fn instance_with_renderer(scene: &mut SceneGraph, store: &mut MaterialStore) -> NodeId {
        let root = scene.root();
        let instance = scene.create_node("pp16", root);
        scene.get_mut(instance).unwrap().instance = Some(InstanceState::new("pp16"));
        let part = scene.create_node("part", instance);
        let material = store.insert(Material::standard("m"));
        let node = scene.get_mut(part).unwrap();
        node.renderer = Some(Renderer::new(Arc::new(unit_quad()), vec![material]));
        node.collider = Some(Collider::bounding(Aabb::ZERO));
        instance
    }

    fn renderer_enabled(scene: &SceneGraph, instance: NodeId) -> bool {
        scene
            .descendants(instance)
            .iter()
            .filter_map(|&id| scene.get(id).and_then(|n| n.renderer.as_ref()))
            .all(|r| r.enabled)
    }

    #[test]
    fn create_and_destroy_subtree() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node("a", scene.root());
        let b = scene.create_node("b", a);
        let _c = scene.create_node("c", b);
        assert_eq!(scene.len(), 4);
        scene.destroy_subtree(a);
        assert_eq!(scene.len(), 1);
        assert!(!scene.contains(a));
        assert!(!scene.contains(b));
    }

    #[test]
    fn stale_id_does_not_alias_reused_slot() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node("a", scene.root());
        scene.destroy_subtree(a);
        let b = scene.create_node("b", scene.root());
        // b reuses a's slot but a's id must stay dead
        assert_eq!(a.index(), b.index());
        assert!(!scene.contains(a));
        assert!(scene.contains(b));
        assert!(scene.get(a).is_none());
    }

    #[test]
    fn clone_subtree_copies_structure() {
        let mut scene = SceneGraph::new();
        let template = scene.create_node("template", scene.root());
        let child = scene.create_node("part", template);
        scene.get_mut(child).unwrap().local.position = RenderVector::new(1.0, 2.0, 3.0);
        let copy = scene.clone_subtree(template, scene.root()).unwrap();
        assert_ne!(copy, template);
        let copy_children = scene.get(copy).unwrap().children.clone();
        assert_eq!(copy_children.len(), 1);
        let copied_child = scene.get(copy_children[0]).unwrap();
        assert_eq!(copied_child.name, "part");
        assert_eq!(copied_child.local.position, RenderVector::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn reparent_moves_child_lists() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node("a", scene.root());
        let b = scene.create_node("b", scene.root());
        let c = scene.create_node("c", a);
        scene.set_parent(c, b);
        assert!(scene.get(a).unwrap().children.is_empty());
        assert_eq!(scene.get(b).unwrap().children, vec![c]);
        assert_eq!(scene.get(c).unwrap().parent, Some(b));
    }

    #[test]
    fn gate_hides_until_idle() {
        let mut scene = SceneGraph::new();
        let mut store = MaterialStore::new();
        let instance = instance_with_renderer(&mut scene, &mut store);
        assert!(renderer_enabled(&scene, instance));

        scene.begin_action(instance);
        assert!(!renderer_enabled(&scene, instance));
        scene.begin_action(instance);
        scene.end_action(instance);
        // still one pending
        assert!(!renderer_enabled(&scene, instance));
        scene.end_action(instance);
        assert!(renderer_enabled(&scene, instance));
    }

    #[test]
    fn visible_toggles_survive_pending_gate() {
        let mut scene = SceneGraph::new();
        let mut store = MaterialStore::new();
        let instance = instance_with_renderer(&mut scene, &mut store);

        scene.set_desired_visible(instance, true);
        scene.begin_action(instance);
        scene.set_desired_visible(instance, false);
        scene.set_desired_visible(instance, true);
        assert!(!renderer_enabled(&scene, instance));
        scene.end_action(instance);
        assert!(renderer_enabled(&scene, instance));
    }

    #[test]
    fn desired_invisible_applies_when_idle() {
        let mut scene = SceneGraph::new();
        let mut store = MaterialStore::new();
        let instance = instance_with_renderer(&mut scene, &mut store);
        scene.set_desired_visible(instance, false);
        assert!(!renderer_enabled(&scene, instance));
    }

    #[test]
    fn recomputed_quad_normals_point_up() {
        let mut mesh = unit_quad();
        mesh.normals.clear();
        mesh.recompute_normals();
        assert_eq!(mesh.normals.len(), 4);
        for n in &mesh.normals {
            assert!((n.y - 1.0).abs() < 1e-5, "normal {:?} not up", n);
        }
    }

    #[test]
    fn world_transform_composes_parent_chain() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node("a", scene.root());
        scene.get_mut(a).unwrap().local.position = RenderVector::new(10.0, 0.0, 0.0);
        let b = scene.create_node("b", a);
        scene.get_mut(b).unwrap().local.position = RenderVector::new(0.0, 5.0, 0.0);
        let world = scene.world_transform(b);
        let p = world
            .transform_point3d(RenderPoint::new(0.0, 0.0, 0.0))
            .unwrap();
        assert!((p.x - 10.0).abs() < 1e-5);
        assert!((p.y - 5.0).abs() < 1e-5);
    }
}
