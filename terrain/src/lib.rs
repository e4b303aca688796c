//! Terrain pipeline: per-tile height/texture grids stitched into seamless
//! meshes.
//!
//! The server hands out tiles as 16 nodes of cells; the mesher flattens
//! them into one quad mesh per tile with one submesh per texture id. A
//! global border cell cache keeps edge heights consistent between
//! neighboring tiles, and tiles rebuild their cardinal neighbors after
//! loading so seams re-read the now-populated borders.

/// The shared `(world cell) → {height, hole}` border cache
pub mod cell_cache;
/// Tile/node wire data model
pub mod data;
/// The tile mesher
pub mod mesher;
/// Per-texture-id terrain materials and their texture fetches
pub mod materials;

pub use cell_cache::BorderCellCache;
pub use data::{TerrainCell, TerrainNode, NODES_PER_TILE};
pub use mesher::{build_tile_mesh, MeshParams, TileMeshOutput};
