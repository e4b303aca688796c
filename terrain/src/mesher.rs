//! The tile mesher.
//!
//! A tile's nodes flatten into a dense cell grid, the grid becomes a
//! `(span+1)²` vertex height field, and every non-hole cell emits one quad
//! (four vertices, two triangles) bucketed per texture id into submeshes.
//! Edge vertices resolve through the global border cache so two loaded
//! neighbors read bit-identical heights on their shared edge.

use std::collections::BTreeMap;

use veld_core::geometry::{RenderPoint, RenderVector, TileCoord};
use veld_core::scene::{Mesh, MeshIndices, SubMesh};

use crate::cell_cache::{BorderCell, BorderCellCache};
use crate::data::{TerrainCell, TerrainNode};

/// Above this vertex count the mesh switches to 32-bit indices.
pub const MAX_U16_VERTICES: usize = 65000;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MeshParams {
    /// Cells per tile edge.
    pub tile_span: usize,
    /// Cells per node edge.
    pub node_span: usize,
    pub world_units_per_cell: f32,
    pub render_units_per_world_unit: f32,
    /// Render-space Y offset against z-fighting with ground objects.
    pub height_offset: f32,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            tile_span: 32,
            node_span: 8,
            world_units_per_cell: 10.0,
            render_units_per_world_unit: 1.0,
            height_offset: -0.01,
        }
    }
}

#[derive(Debug)]
pub struct TileMeshOutput {
    pub mesh: Mesh,
    /// Texture id of each submesh, parallel to `mesh.submeshes`.
    pub texture_ids: Vec<u16>,
}

/// One quarter turn, 90° clockwise: `(u, v) → (v, 1 − u)`.
#[inline]
pub fn rotate_uv_quarter(uv: [f32; 2]) -> [f32; 2] {
    [uv[1], 1.0 - uv[0]]
}

/// The UV rotation count for a cell's `rotation_quarter`: rotated counter
/// to the cell rotation to undo the vertical flip baked into the atlas
/// orientation.
#[inline]
pub fn uv_rotation_steps(rotation_quarter: u8) -> u8 {
    (((-(rotation_quarter as i32)) % 4 + 4) % 4) as u8
}

/// Flattens a tile's nodes into a row-major `tile_span²` cell grid and
/// mirrors every cell into the border cache under its world coordinates.
pub fn flatten_nodes(
    tile: TileCoord,
    nodes: &[TerrainNode],
    params: &MeshParams,
    cache: &mut BorderCellCache,
) -> Vec<Option<TerrainCell>> {
    let span = params.tile_span;
    let node_span = params.node_span;
    let origin_cx = tile.tx * span as i32;
    let origin_cz = tile.tz * span as i32;

    let mut grid: Vec<Option<TerrainCell>> = vec![None; span * span];
    for node in nodes {
        if node.x < 0 || node.z < 0 {
            continue;
        }
        let base_x = node.x as usize * node_span;
        let base_z = node.z as usize * node_span;
        for local_z in 0..node_span {
            for local_x in 0..node_span {
                let Some(&cell) = node.cell(local_x, local_z, node_span) else {
                    continue;
                };
                let gx = base_x + local_x;
                let gz = base_z + local_z;
                if gx >= span || gz >= span {
                    continue;
                }
                grid[gz * span + gx] = Some(cell);
                cache.insert(
                    origin_cx + gx as i32,
                    origin_cz + gz as i32,
                    BorderCell {
                        height: cell.height,
                        is_hole: cell.is_hole,
                    },
                );
            }
        }
    }
    grid
}

/// Resolves one vertex height. The four cells owning the corner are tried
/// in a fixed order through the border cache (so an already-loaded
/// neighbor tile supplies consistent edge heights), then a deterministic
/// expanding-radius search (1, then 2), then 0.
fn resolve_vertex_height(cache: &BorderCellCache, world_vx: i32, world_vz: i32) -> f32 {
    const CORNER_OWNERS: [(i32, i32); 4] = [(0, 0), (-1, 0), (0, -1), (-1, -1)];
    for (dx, dz) in CORNER_OWNERS {
        if let Some(cell) = cache.get(world_vx + dx, world_vz + dz) {
            return cell.height;
        }
    }
    for radius in [1i32, 2] {
        for dz in -radius..=radius {
            for dx in -radius..=radius {
                if dx.abs() < radius && dz.abs() < radius {
                    continue; // inner ring already visited
                }
                if let Some(cell) = cache.get(world_vx + dx, world_vz + dz) {
                    return cell.height;
                }
            }
        }
    }
    0.0
}

/// Builds the `(span+1)²` vertex height grid for a tile.
pub fn build_height_grid(
    tile: TileCoord,
    params: &MeshParams,
    cache: &BorderCellCache,
) -> Vec<f32> {
    let span = params.tile_span;
    let origin_cx = tile.tx * span as i32;
    let origin_cz = tile.tz * span as i32;
    let stride = span + 1;
    let mut heights = vec![0.0f32; stride * stride];
    for vz in 0..stride {
        for vx in 0..stride {
            heights[vz * stride + vx] =
                resolve_vertex_height(cache, origin_cx + vx as i32, origin_cz + vz as i32);
        }
    }
    heights
}

/// Smooth vertex normal from central differences on the height grid,
/// mapped into render space (X flip included).
fn grid_normal(heights: &[f32], stride: usize, vx: usize, vz: usize, cell_size: f32) -> RenderVector {
    let h = |x: usize, z: usize| heights[z * stride + x];
    let x0 = vx.saturating_sub(1);
    let x1 = (vx + 1).min(stride - 1);
    let z0 = vz.saturating_sub(1);
    let z1 = (vz + 1).min(stride - 1);
    let dhdx = (h(x1, vz) - h(x0, vz)) / ((x1 - x0).max(1) as f32 * cell_size);
    let dhdz = (h(vx, z1) - h(vx, z0)) / ((z1 - z0).max(1) as f32 * cell_size);
    let n = RenderVector::new(dhdx, 1.0, -dhdz);
    n / n.length()
}

/// Meshes one tile. `cache` must already contain (or is filled with) the
/// tile's own cells; neighbor tiles that are loaded contribute their
/// border cells automatically.
pub fn build_tile_mesh(
    tile: TileCoord,
    nodes: &[TerrainNode],
    params: &MeshParams,
    cache: &mut BorderCellCache,
) -> TileMeshOutput {
    let span = params.tile_span;
    let stride = span + 1;
    let grid = flatten_nodes(tile, nodes, params, cache);
    let heights = build_height_grid(tile, params, cache);

    let k = params.render_units_per_world_unit;
    let cell_world = params.world_units_per_cell;
    let cell_render = cell_world * k;
    let origin_cx = tile.tx * span as i32;
    let origin_cz = tile.tz * span as i32;

    let mut vertices = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut buckets: BTreeMap<u16, Vec<u32>> = BTreeMap::new();

    // Corner offsets in (x, z) and their unrotated UVs.
    const CORNERS: [(usize, usize); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];
    const CORNER_UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]];

    for cz in 0..span {
        for cx in 0..span {
            let Some(cell) = grid[cz * span + cx] else {
                continue;
            };
            if cell.is_hole {
                continue;
            }
            let base = vertices.len() as u32;
            let steps = uv_rotation_steps(cell.rotation_quarter);
            for (corner, uv) in CORNERS.iter().zip(CORNER_UVS.iter()) {
                let vx = cx + corner.0;
                let vz = cz + corner.1;
                let world_x = (origin_cx + vx as i32) as f32 * cell_world;
                let world_z = (origin_cz + vz as i32) as f32 * cell_world;
                let height = heights[vz * stride + vx];
                vertices.push(RenderPoint::new(
                    -world_x * k,
                    height * k + params.height_offset,
                    world_z * k,
                ));
                normals.push(grid_normal(&heights, stride, vx, vz, cell_render));
                let mut rotated = *uv;
                for _ in 0..steps {
                    rotated = rotate_uv_quarter(rotated);
                }
                uvs.push(rotated);
            }
            let indices = buckets.entry(cell.texture_id).or_default();
            // Wound for up-facing normals in the X-flipped render space.
            indices.extend_from_slice(&[base, base + 1, base + 2]);
            indices.extend_from_slice(&[base + 1, base + 3, base + 2]);
        }
    }

    let use_u16 = vertices.len() <= MAX_U16_VERTICES;
    let mut texture_ids = Vec::with_capacity(buckets.len());
    let mut submeshes = Vec::with_capacity(buckets.len());
    for (texture_id, indices) in buckets {
        texture_ids.push(texture_id);
        let indices = if use_u16 {
            MeshIndices::U16(indices.into_iter().map(|i| i as u16).collect())
        } else {
            MeshIndices::U32(indices)
        };
        submeshes.push(SubMesh { indices });
    }

    TileMeshOutput {
        mesh: Mesh::new(vertices, normals, uvs, submeshes),
        texture_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_node(node_span: usize, height: f32, texture_id: u16) -> TerrainNode {
        TerrainNode {
            x: 0,
            z: 0,
            cells: vec![
                TerrainCell {
                    height,
                    texture_id,
                    rotation_quarter: 0,
                    is_hole: false,
                };
                node_span * node_span
            ],
        }
    }

    fn small_params() -> MeshParams {
        MeshParams {
            tile_span: 4,
            node_span: 4,
            world_units_per_cell: 1.0,
            render_units_per_world_unit: 1.0,
            height_offset: 0.0,
        }
    }

    #[test]
    fn uv_quarter_rotation_has_period_four() {
        let start = [0.25, 0.75];
        let mut uv = start;
        for _ in 0..4 {
            uv = rotate_uv_quarter(uv);
        }
        assert_eq!(uv, start);

        // 4n + r turns equal r turns
        for r in 0..4u8 {
            let mut a = start;
            let mut b = start;
            for _ in 0..r {
                a = rotate_uv_quarter(a);
            }
            for _ in 0..(4 * 2 + r) {
                b = rotate_uv_quarter(b);
            }
            assert_eq!(a, b, "rotation {}", r);
        }
    }

    #[test]
    fn rotation_steps_invert_cell_rotation() {
        assert_eq!(uv_rotation_steps(0), 0);
        assert_eq!(uv_rotation_steps(1), 3);
        assert_eq!(uv_rotation_steps(2), 2);
        assert_eq!(uv_rotation_steps(3), 1);
    }

    #[test]
    fn full_tile_emits_quads_per_cell() {
        let params = small_params();
        let mut cache = BorderCellCache::new();
        let out = build_tile_mesh(
            TileCoord::new(0, 0),
            &[flat_node(4, 2.0, 7)],
            &params,
            &mut cache,
        );
        assert_eq!(out.mesh.vertex_count(), 4 * 4 * 4);
        assert_eq!(out.texture_ids, vec![7]);
        assert_eq!(out.mesh.submeshes.len(), 1);
        assert_eq!(out.mesh.submeshes[0].indices.len(), 4 * 4 * 6);
        // all heights at 2.0
        for v in &out.mesh.vertices {
            assert_eq!(v.y, 2.0);
        }
    }

    #[test]
    fn holes_emit_no_geometry() {
        let params = small_params();
        let mut node = flat_node(4, 0.0, 1);
        node.cells[0].is_hole = true;
        let mut cache = BorderCellCache::new();
        let out = build_tile_mesh(TileCoord::new(0, 0), &[node], &params, &mut cache);
        assert_eq!(out.mesh.vertex_count(), (4 * 4 - 1) * 4);
    }

    #[test]
    fn texture_ids_bucket_into_separate_submeshes() {
        let params = small_params();
        let mut node = flat_node(4, 0.0, 1);
        for i in 0..4 {
            node.cells[i].texture_id = 9;
        }
        let mut cache = BorderCellCache::new();
        let out = build_tile_mesh(TileCoord::new(0, 0), &[node], &params, &mut cache);
        assert_eq!(out.texture_ids, vec![1, 9]);
        assert_eq!(out.mesh.submeshes.len(), 2);
    }

    #[test]
    fn flat_tile_normals_point_up() {
        let params = small_params();
        let mut cache = BorderCellCache::new();
        let out = build_tile_mesh(
            TileCoord::new(0, 0),
            &[flat_node(4, 3.0, 0)],
            &params,
            &mut cache,
        );
        for n in &out.mesh.normals {
            assert!((n.y - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn neighbor_tiles_share_edge_heights() {
        // Tile (0,0) at height 1, tile (1,0) at height 5. After both are
        // meshed (the second re-meshing the first, as the streamer's
        // neighbor rebuild does), the shared column reads identical
        // heights from either side.
        let params = small_params();
        let mut cache = BorderCellCache::new();

        let left = build_tile_mesh(
            TileCoord::new(0, 0),
            &[flat_node(4, 1.0, 0)],
            &params,
            &mut cache,
        );
        let right = build_tile_mesh(
            TileCoord::new(1, 0),
            &[flat_node(4, 5.0, 0)],
            &params,
            &mut cache,
        );
        // rebuild left now that the right tile's cells are cached
        let left_rebuilt = build_tile_mesh(
            TileCoord::new(0, 0),
            &[flat_node(4, 1.0, 0)],
            &params,
            &mut cache,
        );

        let shared_world_x = 4.0 * params.world_units_per_cell;
        let edge_heights = |mesh: &veld_core::scene::Mesh, world_x: f32| -> Vec<(f32, f32)> {
            let mut out: Vec<(f32, f32)> = mesh
                .vertices
                .iter()
                .filter(|v| (v.x - -world_x).abs() < 1e-6)
                .map(|v| (v.z, v.y))
                .collect();
            out.sort_by(|a, b| a.0.total_cmp(&b.0));
            out.dedup();
            out
        };

        let left_edge = edge_heights(&left_rebuilt.mesh, shared_world_x);
        let right_edge = edge_heights(&right.mesh, shared_world_x);
        assert!(!left_edge.is_empty());
        assert_eq!(left_edge, right_edge);
        // the stale first build would have read its own heights only
        assert_ne!(edge_heights(&left.mesh, shared_world_x), left_edge);
    }

    #[test]
    fn vertex_count_stays_in_u16_range_for_default_span() {
        let params = MeshParams::default();
        assert!(params.tile_span * params.tile_span * 4 <= MAX_U16_VERTICES);
    }
}
