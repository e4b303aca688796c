//! The streamer configuration surface.
//!
//! One plain struct, deserializable from whatever format the embedder
//! prefers. Radii are in cells (Chebyshev), distances in world units,
//! budgets in milliseconds, cooldowns in seconds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    // -- residency radii (cells around the viewer cell)
    /// Cells inside this Chebyshev radius are queried and kept resident.
    pub load_radius: i32,
    /// Loaded cells beyond this radius are destroyed. Must be ≥ `load_radius`.
    pub unload_radius: i32,
    /// Cells at most this far get full instances, actions and colliders.
    pub full_detail_radius: i32,
    /// Cells at most this far render as GPU-instanced batches.
    pub instanced_radius: i32,
    /// Cells at most this far keep only proxy colliders.
    pub proxy_radius: i32,

    // -- terrain residency (tiles around the viewer tile)
    pub terrain_load_radius: i32,
    pub terrain_unload_radius: i32,

    // -- concurrency caps
    pub max_concurrent_cell_queries: usize,
    pub max_concurrent_terrain_queries: usize,
    /// In batched mode this primarily caps template loads in flight.
    pub max_concurrent_spawns: usize,
    pub max_spawn_starts_per_frame: usize,
    pub max_batch_spawns_per_frame: usize,

    // -- action loop
    /// Main-thread milliseconds per frame for applying actions.
    pub action_budget_ms: f32,
    pub cache_parsed_actions: bool,

    // -- reprioritization
    pub reprioritize_cooldown_seconds: f32,
    pub periodic_reprioritize_seconds: f32,
    /// Viewer movement (world units) that triggers a re-score.
    pub move_threshold: f32,
    /// Viewer rotation (degrees) that triggers a re-score.
    pub rotate_threshold_deg: f32,
    /// Cells within this radius get `near_boost_priority` added.
    pub near_boost_radius: i32,
    /// Additive priority for near cells (negative = sooner).
    pub near_boost_priority: f32,
    /// Prefer work in front of the viewer.
    pub prioritize_frustum: bool,
    /// Additive priority for in-frustum work (negative = sooner).
    pub frustum_bonus: f32,

    // -- spawning
    pub enable_batching: bool,
    /// Batch region edge length in cells.
    pub batch_region_size_cells: i32,
    pub use_templates: bool,
    pub enable_pooling: bool,
    pub max_pool_per_model: usize,

    // -- cancellation
    pub drop_from_unloaded_cells: bool,
    pub drop_from_unloaded_tiles: bool,

    // -- terrain geometry
    /// Terrain tile edge length in cells (16 nodes per tile).
    pub tile_cell_span: usize,
    /// Terrain node edge length in cells.
    pub node_cell_span: usize,
    /// Vertical offset applied to terrain meshes against z-fighting.
    pub terrain_height_offset: f32,

    // -- units
    pub world_units_per_cell: f32,
    pub render_units_per_world_unit: f32,

    // -- caches
    pub max_cached_textures: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            load_radius: 4,
            unload_radius: 6,
            full_detail_radius: 2,
            instanced_radius: 4,
            proxy_radius: 6,
            terrain_load_radius: 2,
            terrain_unload_radius: 3,
            max_concurrent_cell_queries: 4,
            max_concurrent_terrain_queries: 2,
            max_concurrent_spawns: 8,
            max_spawn_starts_per_frame: 16,
            max_batch_spawns_per_frame: 8,
            action_budget_ms: 3.0,
            cache_parsed_actions: true,
            reprioritize_cooldown_seconds: 0.5,
            periodic_reprioritize_seconds: 2.0,
            move_threshold: 5.0,
            rotate_threshold_deg: 30.0,
            near_boost_radius: 1,
            near_boost_priority: -50.0,
            prioritize_frustum: true,
            frustum_bonus: -25.0,
            enable_batching: true,
            batch_region_size_cells: 5,
            use_templates: true,
            enable_pooling: true,
            max_pool_per_model: 32,
            drop_from_unloaded_cells: true,
            drop_from_unloaded_tiles: true,
            tile_cell_span: 32,
            node_cell_span: 8,
            terrain_height_offset: -0.01,
            world_units_per_cell: 10.0,
            render_units_per_world_unit: 1.0,
            max_cached_textures: 512,
        }
    }
}

impl StreamConfig {
    /// Clamps the obviously inconsistent combinations (unload inside load
    /// radius, zero spans) instead of failing; the streamer never rejects a
    /// config.
    pub fn sanitized(mut self) -> Self {
        // a negative unload radius disables unloading entirely
        if self.unload_radius >= 0 {
            self.unload_radius = self.unload_radius.max(self.load_radius);
        }
        self.terrain_unload_radius = self.terrain_unload_radius.max(self.terrain_load_radius);
        self.tile_cell_span = self.tile_cell_span.max(1);
        self.node_cell_span = self.node_cell_span.clamp(1, self.tile_cell_span);
        self.world_units_per_cell = self.world_units_per_cell.max(f32::EPSILON);
        self.render_units_per_world_unit = self.render_units_per_world_unit.max(f32::EPSILON);
        self.max_cached_textures = self.max_cached_textures.max(1);
        self.batch_region_size_cells = self.batch_region_size_cells.max(1);
        self
    }
}
