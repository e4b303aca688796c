//! Level-of-detail selection and instanced draw list building.
//!
//! Cells inside `full_detail_radius` spawn real instances; the middle
//! band renders by GPU instancing straight off the template's meshes and
//! the placement transforms; the outer band keeps only proxy colliders so
//! picking and navigation still work.

use std::sync::Arc;

use euclid::Transform3D;

use veld_core::config::StreamConfig;
use veld_core::geometry::RenderSpace;
use veld_core::material::MaterialHandle;
use veld_core::scene::{Mesh, NodeId, SceneGraph};
use veld_core::FastHashMap;

/// Hard cap on matrices per instanced draw call.
pub const MAX_INSTANCES_PER_DRAW: usize = 1023;

pub type RenderTransform = Transform3D<f32, RenderSpace, RenderSpace>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LodState {
    Full,
    Instanced,
    Proxy,
}

/// LOD for a cell at the given Chebyshev distance from the viewer.
pub fn lod_for_distance(config: &StreamConfig, chebyshev: i32) -> LodState {
    if chebyshev <= config.full_detail_radius {
        LodState::Full
    } else if chebyshev <= config.instanced_radius {
        LodState::Instanced
    } else {
        LodState::Proxy
    }
}

/// One instanced draw: a template submesh plus the world transforms of
/// every placement using it, chunked to [`MAX_INSTANCES_PER_DRAW`].
#[derive(Clone)]
pub struct InstancedBatch {
    pub mesh: Arc<Mesh>,
    pub material: MaterialHandle,
    pub submesh: usize,
    pub transforms: Vec<RenderTransform>,
}

/// Composes each template part's offset with each placement transform and
/// groups the results by `(mesh, material, submesh)`.
pub fn build_instanced_draws(
    scene: &SceneGraph,
    template: NodeId,
    placements: &[RenderTransform],
) -> Vec<InstancedBatch> {
    struct PartDraw {
        mesh: Arc<Mesh>,
        material: MaterialHandle,
        submesh: usize,
        offset: RenderTransform,
    }

    // Collect the template's renderer parts with their transform relative
    // to the template root (the root's own scale included).
    let mut parts: Vec<PartDraw> = Vec::new();
    let mut stack = vec![(template, Transform3D::identity())];
    while let Some((id, parent_transform)) = stack.pop() {
        let Some(node) = scene.get(id) else { continue };
        let transform = node.local.to_transform().then(&parent_transform);
        if let Some(renderer) = node.renderer.as_ref() {
            for (submesh, &material) in renderer.materials.iter().enumerate() {
                parts.push(PartDraw {
                    mesh: Arc::clone(&renderer.mesh),
                    material,
                    submesh,
                    offset: transform,
                });
            }
        }
        for &child in &node.children {
            stack.push((child, transform));
        }
    }

    let mut groups: FastHashMap<(usize, MaterialHandle, usize), InstancedBatch> =
        FastHashMap::default();
    for part in &parts {
        let key = (Arc::as_ptr(&part.mesh) as usize, part.material, part.submesh);
        let batch = groups.entry(key).or_insert_with(|| InstancedBatch {
            mesh: Arc::clone(&part.mesh),
            material: part.material,
            submesh: part.submesh,
            transforms: Vec::new(),
        });
        for placement in placements {
            batch.transforms.push(part.offset.then(placement));
        }
    }

    // Chunk oversized groups into ≤1023-matrix draws.
    let mut out = Vec::new();
    for (_, batch) in groups {
        if batch.transforms.len() <= MAX_INSTANCES_PER_DRAW {
            out.push(batch);
            continue;
        }
        for chunk in batch.transforms.chunks(MAX_INSTANCES_PER_DRAW) {
            out.push(InstancedBatch {
                mesh: Arc::clone(&batch.mesh),
                material: batch.material,
                submesh: batch.submesh,
                transforms: chunk.to_vec(),
            });
        }
    }
    out
}
