//! The streamer orchestrator.
//!
//! One `tick` per frame drives every stage: login, residency retargeting,
//! cell and terrain queries, template loads, batched spawning, the
//! budgeted action loop and the LOD pass. All scene mutation happens
//! inside `tick` on the calling thread; the external collaborators only
//! ever hand completion handles back.

use std::sync::Arc;
use std::time::Instant;

use veld_action::executor::{self, ExecCtx};
use veld_action::parser::ParseCache;
use veld_action::ParsedScript;
use veld_core::config::StreamConfig;
use veld_core::geometry::{cell_of_position, CellCoord, CoordMap, TileCoord, WorldPoint};
use veld_core::heap::WorkHeap;
use veld_core::material::MaterialStore;
use veld_core::scene::{Collider, NodeId, SceneGraph};
use veld_core::task::{TaskHandle, TaskPoll};
use veld_core::texture::TextureCache;
use veld_core::warn_once;
use veld_core::FastHashMap;
use veld_terrain::materials::TerrainMaterialRegistry;
use veld_terrain::mesher::{build_tile_mesh, MeshParams};
use veld_terrain::{BorderCellCache, TerrainNode};

use crate::batch::{Batch, BatchKey, BatchQueue};
use crate::interfaces::{
    AssetSource, CellQueryResult, Credentials, ModelLoader, Placement, ServerError, WorldClient,
    WorldInfo, TERRAIN_NODE_MASK_ALL,
};
use crate::lod::{build_instanced_draws, lod_for_distance, InstancedBatch, LodState};
use crate::overlay::OverlayCounters;
use crate::registry::{TemplateRegistry, TemplateStatus};
use crate::residency::{Completion, ResidencyMap};
use crate::scheduler::ActionStage;

/// Where the viewer is and looks; fed into every tick.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewer {
    pub position: WorldPoint,
    /// Heading in degrees around Y; 0 looks along +Z, 90 along +X.
    pub yaw_deg: f32,
}

impl Default for Viewer {
    fn default() -> Self {
        Self {
            position: WorldPoint::new(0.0, 0.0, 0.0),
            yaw_deg: 0.0,
        }
    }
}

enum LoginState {
    Offline,
    Pending(TaskHandle<Result<WorldInfo, ServerError>>),
    Ready,
    Failed,
}

/// Everything resident for one loaded cell.
pub struct CellRecord {
    pub root: NodeId,
    pub lod: LodState,
    pub placements: Vec<Placement>,
    pub instances: Vec<NodeId>,
    pub instanced_draws: Vec<InstancedBatch>,
    proxy_nodes: Vec<NodeId>,
    /// Placements handed to the spawn pipeline for the current Full stint.
    spawned: bool,
}

pub struct TileRecord {
    pub root: NodeId,
    pub nodes: Vec<TerrainNode>,
}

struct SpawnItem {
    cell: CellCoord,
    placement: Placement,
}

struct ActiveBatch {
    batch: Batch,
    next: usize,
}

/// One per-instance model load when template cloning is disabled.
struct DirectLoad {
    cell: CellCoord,
    placement: Placement,
    handle: TaskHandle<Result<crate::interfaces::ModelPrototype, crate::interfaces::ModelLoadError>>,
}

pub struct Streamer<W: WorldClient, M: ModelLoader, A: AssetSource> {
    config: StreamConfig,
    coord_map: CoordMap,
    pub scene: SceneGraph,
    pub materials: MaterialStore,
    pub textures: TextureCache,
    parse_cache: ParseCache,
    registry: TemplateRegistry,
    pub overlay: OverlayCounters,

    login: LoginState,
    world: Option<WorldInfo>,

    // cells
    cells: ResidencyMap<CellCoord>,
    cell_records: FastHashMap<CellCoord, CellRecord>,
    cell_queries: Vec<(CellCoord, TaskHandle<Result<CellQueryResult, ServerError>>)>,
    cells_root: NodeId,

    // spawning
    batches: BatchQueue,
    spawn_items: WorkHeap<SpawnItem>,
    waiting_batches: Vec<Batch>,
    active_batches: Vec<ActiveBatch>,
    direct_loads: Vec<DirectLoad>,

    // actions
    actions: ActionStage,
    activate_store: FastHashMap<NodeId, Arc<ParsedScript>>,
    sign_font: Option<rusttype::Font<'static>>,

    // terrain
    tiles: ResidencyMap<TileCoord>,
    tile_records: FastHashMap<TileCoord, TileRecord>,
    tile_queries: Vec<(TileCoord, TaskHandle<Result<Vec<TerrainNode>, ServerError>>)>,
    terrain_root: NodeId,
    border_cache: BorderCellCache,
    terrain_materials: TerrainMaterialRegistry,

    // viewer + reprioritization
    viewer: Viewer,
    viewer_cell: Option<CellCoord>,
    last_reprioritize: Instant,
    reprioritize_anchor: Viewer,
    started: Instant,

    client: W,
    loader: M,
    assets: A,
}

impl<W: WorldClient, M: ModelLoader, A: AssetSource> Streamer<W, M, A> {
    pub fn new(config: StreamConfig, client: W, loader: M, assets: A) -> Self {
        let config = config.sanitized();
        let mut scene = SceneGraph::new();
        let registry =
            TemplateRegistry::new(&mut scene, config.enable_pooling, config.max_pool_per_model);
        let cells_root = scene.create_node("cells", scene.root());
        let terrain_root = scene.create_node("terrain", scene.root());
        let mut materials = MaterialStore::new();
        let terrain_materials = TerrainMaterialRegistry::new(&mut materials);
        let now = Instant::now();
        Self {
            coord_map: CoordMap::new(config.render_units_per_world_unit),
            textures: TextureCache::new(config.max_cached_textures),
            parse_cache: ParseCache::new(config.cache_parsed_actions),
            config,
            scene,
            materials,
            registry,
            overlay: OverlayCounters::default(),
            login: LoginState::Offline,
            world: None,
            cells: ResidencyMap::new(),
            cell_records: FastHashMap::default(),
            cell_queries: Vec::new(),
            cells_root,
            batches: BatchQueue::new(),
            spawn_items: WorkHeap::new(),
            waiting_batches: Vec::new(),
            active_batches: Vec::new(),
            direct_loads: Vec::new(),
            actions: ActionStage::new(),
            activate_store: FastHashMap::default(),
            sign_font: None,
            tiles: ResidencyMap::new(),
            tile_records: FastHashMap::default(),
            tile_queries: Vec::new(),
            terrain_root,
            border_cache: BorderCellCache::new(),
            terrain_materials,
            viewer: Viewer::default(),
            viewer_cell: None,
            last_reprioritize: now,
            reprioritize_anchor: Viewer::default(),
            started: now,
            client,
            loader,
            assets,
        }
    }

    /// Starts the asynchronous login; queries begin once it completes.
    pub fn connect(&mut self, credentials: &Credentials, world: &str) {
        self.login = LoginState::Pending(self.client.login_and_enter(credentials, world));
    }

    /// Skips the login round-trip (tests, local worlds).
    pub fn set_world(&mut self, world: WorldInfo) {
        self.world = Some(world);
        self.login = LoginState::Ready;
    }

    /// Font used by `sign` commands; without one, signs are skipped.
    pub fn set_sign_font(&mut self, font_bytes: Vec<u8>) -> bool {
        match rusttype::Font::try_from_vec(font_bytes) {
            Some(font) => {
                self.sign_font = Some(font);
                true
            }
            None => false,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn cell_record(&self, cell: &CellCoord) -> Option<&CellRecord> {
        self.cell_records.get(cell)
    }

    pub fn tile_record(&self, tile: &TileCoord) -> Option<&TileRecord> {
        self.tile_records.get(tile)
    }

    /// Seconds on the monotonic engine clock, the time base for light fx.
    pub fn clock_seconds(&self) -> f32 {
        self.started.elapsed().as_secs_f32()
    }

    /// Runs the stored activate-phase commands of an instance (picking,
    /// approach triggers). Returns false when the instance has none.
    pub fn trigger_activate(&mut self, instance: NodeId) -> bool {
        let Some(script) = self.activate_store.get(&instance).cloned() else {
            return false;
        };
        let world = self.world.clone().unwrap_or(WorldInfo {
            object_path: String::new(),
            object_password: None,
        });
        let mut ctx = ExecCtx {
            scene: &mut self.scene,
            materials: &mut self.materials,
            textures: &mut self.textures,
            assets: &self.assets,
            object_path: &world.object_path,
            password: world.object_password.as_deref(),
            sign_font: self.sign_font.as_ref(),
        };
        for command in &script.activate {
            // activation actions run to completion; fetches re-enter the
            // parked pipeline via the action stage next tick
            if let executor::ExecOutcome::Fetch(fetch) = executor::execute_command(&mut ctx, instance, command) {
                self.actions.park_fetch(instance, fetch);
            }
        }
        true
    }

    // -- tick

    pub fn tick(&mut self, viewer: Viewer) {
        self.viewer = viewer;
        if !self.poll_login() {
            return;
        }

        let viewer_cell = cell_of_position(viewer.position, self.config.world_units_per_cell);
        let cell_changed = self.viewer_cell != Some(viewer_cell);
        self.viewer_cell = Some(viewer_cell);

        if cell_changed {
            self.unload_far_cells(viewer_cell);
            self.unload_far_tiles(viewer_cell);
            self.apply_lod_pass(viewer_cell);
            self.reprioritize(viewer_cell);
        } else {
            self.maybe_reprioritize(viewer_cell);
        }

        self.poll_cell_queries();
        self.start_cell_queries();

        self.registry.poll_loads(&mut self.scene, &mut self.materials);
        self.promote_waiting_batches();
        self.poll_direct_loads();
        self.drive_spawns(viewer_cell);

        self.run_actions();

        self.poll_tile_queries();
        self.start_tile_queries();
        self.poll_terrain_materials();

        self.materialize_instanced_cells(viewer_cell);
        self.update_overlay(viewer_cell);
    }

    fn poll_login(&mut self) -> bool {
        match &mut self.login {
            LoginState::Ready => true,
            LoginState::Offline | LoginState::Failed => false,
            LoginState::Pending(handle) => match handle.poll() {
                TaskPoll::Pending => false,
                TaskPoll::Ready(Ok(world)) => {
                    self.world = Some(world);
                    self.login = LoginState::Ready;
                    true
                }
                TaskPoll::Ready(Err(err)) => {
                    log::error!("login failed: {}", err);
                    self.login = LoginState::Failed;
                    false
                }
                TaskPoll::Gone => {
                    log::error!("login task vanished");
                    self.login = LoginState::Failed;
                    false
                }
            },
        }
    }

    // -- priorities

    fn score_cell(&self, cell: CellCoord, viewer_cell: CellCoord) -> f32 {
        let mut priority = cell.base_priority(viewer_cell);
        if cell.chebyshev(viewer_cell) <= self.config.near_boost_radius {
            priority += self.config.near_boost_priority;
        }
        if self.config.prioritize_frustum && self.cell_in_frustum(cell) {
            priority += self.config.frustum_bonus;
        }
        priority
    }

    /// Rough frustum test: is the cell's center within ±60° of the
    /// viewer's heading.
    fn cell_in_frustum(&self, cell: CellCoord) -> bool {
        let w = self.config.world_units_per_cell;
        let center_x = (cell.cx as f32 + 0.5) * w;
        let center_z = (cell.cy as f32 + 0.5) * w;
        let dx = center_x - self.viewer.position.x;
        let dz = center_z - self.viewer.position.z;
        if dx.abs() < w && dz.abs() < w {
            return true; // standing in or next to it
        }
        let bearing = dx.atan2(dz).to_degrees();
        let mut diff = bearing - self.viewer.yaw_deg;
        while diff > 180.0 {
            diff -= 360.0;
        }
        while diff < -180.0 {
            diff += 360.0;
        }
        diff.abs() <= 60.0
    }

    fn reprioritize(&mut self, viewer_cell: CellCoord) {
        self.last_reprioritize = Instant::now();
        self.reprioritize_anchor = self.viewer;

        // retargeting also re-queues cells whose earlier query failed
        self.retarget_cells(viewer_cell);
        self.retarget_tiles(viewer_cell);

        if self.config.enable_batching {
            let mut scores: FastHashMap<CellCoord, f32> = FastHashMap::default();
            let mut batches = std::mem::take(&mut self.batches);
            batches.rescore(|cell| {
                *scores
                    .entry(*cell)
                    .or_insert_with(|| self.score_cell(*cell, viewer_cell))
            });
            self.batches = batches;
        } else {
            let mut items = std::mem::take(&mut self.spawn_items);
            items.rescore(|item| {
                if self.cell_records.contains_key(&item.cell) {
                    Some(self.score_cell(item.cell, viewer_cell))
                } else {
                    None
                }
            });
            self.spawn_items = items;
        }

        let mut cells = std::mem::take(&mut self.cells);
        cells.rescore(|cell| self.score_cell(*cell, viewer_cell));
        self.cells = cells;
        let viewer_tile = viewer_cell.tile(self.config.tile_cell_span as i32);
        self.tiles.rescore(|tile| tile.base_priority(viewer_tile));
    }

    /// Render-space world transform of a placement.
    fn placement_transform(&self, placement: &Placement) -> crate::lod::RenderTransform {
        let position = self.coord_map.world_to_render(placement.position);
        let rotation = self
            .coord_map
            .rotation_to_render(placement.rotation_axis, placement.rotation_angle);
        rotation.to_transform().then(&euclid::Transform3D::translation(
            position.x, position.y, position.z,
        ))
    }

    fn maybe_reprioritize(&mut self, viewer_cell: CellCoord) {
        let elapsed = self.last_reprioritize.elapsed().as_secs_f32();
        if elapsed < self.config.reprioritize_cooldown_seconds {
            return;
        }
        let moved = {
            let d = self.viewer.position - self.reprioritize_anchor.position;
            (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
        };
        let mut rotated = (self.viewer.yaw_deg - self.reprioritize_anchor.yaw_deg).abs();
        if rotated > 180.0 {
            rotated = 360.0 - rotated;
        }
        let periodic = elapsed >= self.config.periodic_reprioritize_seconds;
        if moved >= self.config.move_threshold
            || rotated >= self.config.rotate_threshold_deg
            || periodic
        {
            self.reprioritize(viewer_cell);
        }
    }

    // -- cell residency

    fn retarget_cells(&mut self, viewer_cell: CellCoord) {
        let radius = self.config.load_radius;
        let mut desired = Vec::with_capacity(((radius * 2 + 1) * (radius * 2 + 1)) as usize);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let cell = CellCoord::new(viewer_cell.cx + dx, viewer_cell.cy + dy);
                desired.push((cell, self.score_cell(cell, viewer_cell)));
            }
        }
        self.cells.retarget(desired);
    }

    fn unload_far_cells(&mut self, viewer_cell: CellCoord) {
        if self.config.unload_radius < 0 {
            return;
        }
        let radius = self.config.unload_radius;
        let evicted = self
            .cells
            .unload_filter(|cell| cell.chebyshev(viewer_cell) <= radius);
        for cell in evicted {
            self.destroy_cell(cell);
        }
    }

    fn destroy_cell(&mut self, cell: CellCoord) {
        let Some(record) = self.cell_records.remove(&cell) else {
            return;
        };
        for instance in record.instances {
            self.activate_store.remove(&instance);
            self.actions.discard_instance(instance);
            self.registry.release(&mut self.scene, instance);
        }
        self.scene.destroy_subtree(record.root);
        self.batches.retain_cells(|c| *c != cell);
    }

    fn start_cell_queries(&mut self) {
        while self.cell_queries.len() < self.config.max_concurrent_cell_queries {
            let Some(cell) = self.cells.start_next() else {
                break;
            };
            let handle = self.client.query_cell(cell);
            self.cell_queries.push((cell, handle));
        }
    }

    fn poll_cell_queries(&mut self) {
        let mut finished: Vec<(CellCoord, Option<CellQueryResult>)> = Vec::new();
        self.cell_queries.retain_mut(|(cell, handle)| match handle.poll() {
            TaskPoll::Pending => true,
            TaskPoll::Ready(Ok(result)) => {
                finished.push((*cell, Some(result)));
                false
            }
            TaskPoll::Ready(Err(err)) => {
                warn_once!(
                    format!("cell-query:{},{}", cell.cx, cell.cy),
                    "cell query ({}, {}) failed: {}",
                    cell.cx,
                    cell.cy,
                    err
                );
                finished.push((*cell, None));
                false
            }
            TaskPoll::Gone => {
                finished.push((*cell, None));
                false
            }
        });
        for (cell, result) in finished {
            let success = result.is_some();
            match self
                .cells
                .complete(cell, success, self.config.drop_from_unloaded_cells)
            {
                Completion::Keep => {
                    if let Some(result) = result {
                        self.materialize_cell(cell, result);
                    }
                }
                Completion::Dropped | Completion::Failed => {}
            }
        }
    }

    /// Creates the cell root (exactly once per load) and routes the
    /// placements by the cell's current LOD.
    fn materialize_cell(&mut self, cell: CellCoord, result: CellQueryResult) {
        let root = self
            .scene
            .create_node(&format!("cell_{}_{}", cell.cx, cell.cy), self.cells_root);
        let viewer_cell = self.viewer_cell.unwrap_or(cell);
        let lod = lod_for_distance(&self.config, cell.chebyshev(viewer_cell));
        let record = CellRecord {
            root,
            lod,
            placements: result.objects,
            instances: Vec::new(),
            instanced_draws: Vec::new(),
            proxy_nodes: Vec::new(),
            spawned: false,
        };
        self.cell_records.insert(cell, record);
        self.enter_lod(cell);
    }

    // -- LOD

    fn apply_lod_pass(&mut self, viewer_cell: CellCoord) {
        let coords: Vec<CellCoord> = self.cell_records.keys().copied().collect();
        for cell in coords {
            let desired = lod_for_distance(&self.config, cell.chebyshev(viewer_cell));
            let current = match self.cell_records.get(&cell) {
                Some(record) => record.lod,
                None => continue,
            };
            if current != desired {
                if let Some(record) = self.cell_records.get_mut(&cell) {
                    record.lod = desired;
                }
                self.leave_lod(cell, current);
                self.enter_lod(cell);
            }
        }
    }

    fn leave_lod(&mut self, cell: CellCoord, previous: LodState) {
        let Some(record) = self.cell_records.get_mut(&cell) else {
            return;
        };
        match previous {
            LodState::Full => {
                let instances = std::mem::take(&mut record.instances);
                record.spawned = false;
                for instance in instances {
                    self.activate_store.remove(&instance);
                    self.actions.discard_instance(instance);
                    self.registry.release(&mut self.scene, instance);
                }
                self.batches.retain_cells(|c| *c != cell);
            }
            LodState::Instanced => {
                record.instanced_draws.clear();
            }
            LodState::Proxy => {
                let proxies = std::mem::take(&mut record.proxy_nodes);
                for node in proxies {
                    self.scene.destroy_subtree(node);
                }
            }
        }
    }

    fn enter_lod(&mut self, cell: CellCoord) {
        let Some(record) = self.cell_records.get(&cell) else {
            return;
        };
        match record.lod {
            LodState::Full => self.enqueue_cell_spawns(cell),
            LodState::Instanced => {
                // draws are built lazily once the templates are ready
                self.request_cell_templates(cell);
            }
            LodState::Proxy => self.build_proxies(cell),
        }
    }

    fn enqueue_cell_spawns(&mut self, cell: CellCoord) {
        let viewer_cell = self.viewer_cell.unwrap_or(cell);
        let Some(record) = self.cell_records.get_mut(&cell) else {
            return;
        };
        if record.spawned {
            return;
        }
        record.spawned = true;
        let placements = record.placements.clone();
        let priority = self.score_cell(cell, viewer_cell);
        for placement in placements {
            // batching requires templates: a batch shares one loaded model
            if self.config.enable_batching && self.config.use_templates {
                let key = BatchKey {
                    region: cell.region(self.config.batch_region_size_cells),
                    model: placement.model.clone(),
                    action: placement.action.clone(),
                };
                self.batches.add(key, cell, placement, priority);
            } else {
                self.spawn_items.push(priority, SpawnItem { cell, placement });
            }
        }
    }

    fn request_cell_templates(&mut self, cell: CellCoord) {
        let Some(world) = self.world.clone() else {
            return;
        };
        let Some(record) = self.cell_records.get(&cell) else {
            return;
        };
        let models: Vec<String> = record.placements.iter().map(|p| p.model.clone()).collect();
        for model in models {
            if self.registry.loads_in_flight() >= self.config.max_concurrent_spawns {
                break;
            }
            self.registry.request(
                &model,
                &self.loader,
                &world.object_path,
                world.object_password.as_deref(),
            );
        }
    }

    /// Builds instanced draw lists for cells sitting in the Instanced band
    /// whose templates have all arrived.
    fn materialize_instanced_cells(&mut self, _viewer_cell: CellCoord) {
        let coords: Vec<CellCoord> = self
            .cell_records
            .iter()
            .filter(|(_, r)| r.lod == LodState::Instanced && r.instanced_draws.is_empty())
            .map(|(c, _)| *c)
            .collect();
        for cell in coords {
            self.request_cell_templates(cell);
            let Some(record) = self.cell_records.get(&cell) else {
                continue;
            };
            let mut ready = true;
            let mut per_model: FastHashMap<String, Vec<crate::lod::RenderTransform>> =
                FastHashMap::default();
            for placement in &record.placements {
                match self.registry.status(&placement.model) {
                    Some(TemplateStatus::Ready(_)) => {
                        per_model
                            .entry(placement.model.clone())
                            .or_default()
                            .push(self.placement_transform(placement));
                    }
                    Some(TemplateStatus::Failed) => {} // skipped silently
                    _ => {
                        ready = false;
                        break;
                    }
                }
            }
            if !ready {
                continue;
            }
            let mut draws = Vec::new();
            for (model, transforms) in per_model {
                if let Some(TemplateStatus::Ready(template)) = self.registry.status(&model) {
                    draws.extend(build_instanced_draws(&self.scene, *template, &transforms));
                }
            }
            if let Some(record) = self.cell_records.get_mut(&cell) {
                record.instanced_draws = draws;
            }
        }
    }

    fn build_proxies(&mut self, cell: CellCoord) {
        let Some(record) = self.cell_records.get(&cell) else {
            return;
        };
        let root = record.root;
        let placements = record.placements.clone();
        let mut proxies = Vec::with_capacity(placements.len());
        for placement in &placements {
            let bounds = match self.registry.status(&placement.model) {
                Some(TemplateStatus::Ready(template)) => {
                    template_bounds(&self.scene, *template)
                }
                _ => None,
            };
            let node = self.scene.create_node("proxy", root);
            let position = self.coord_map.world_to_render(placement.position);
            if let Some(data) = self.scene.get_mut(node) {
                data.local.position = position.to_vector();
                data.collider = Some(Collider::bounding(bounds.unwrap_or(
                    veld_core::scene::Aabb {
                        min: veld_core::geometry::RenderPoint::new(-0.5, 0.0, -0.5),
                        max: veld_core::geometry::RenderPoint::new(0.5, 1.0, 0.5),
                    },
                )));
            }
            proxies.push(node);
        }
        if let Some(record) = self.cell_records.get_mut(&cell) {
            record.proxy_nodes = proxies;
        }
    }

    // -- spawning

    fn spawns_in_flight(&self) -> usize {
        self.registry.loads_in_flight() + self.active_batches.len() + self.direct_loads.len()
    }

    /// Resolves per-instance loads of the direct (template-less) path.
    fn poll_direct_loads(&mut self) {
        let mut finished = Vec::new();
        self.direct_loads.retain_mut(|load| match load.handle.poll() {
            TaskPoll::Pending => true,
            TaskPoll::Ready(Ok(prototype)) => {
                finished.push((load.cell, load.placement.clone(), prototype));
                false
            }
            TaskPoll::Ready(Err(err)) => {
                warn_once!(
                    format!("model-load:{}", load.placement.model),
                    "model `{}` failed to load: {}",
                    load.placement.model,
                    err
                );
                false
            }
            TaskPoll::Gone => false,
        });
        for (cell, placement, prototype) in finished {
            // cell may have unloaded or left the Full band mid-load
            let root = match self.cell_records.get(&cell) {
                Some(record) if record.lod == LodState::Full => record.root,
                _ => continue,
            };
            let instance = crate::registry::instantiate_direct(
                &mut self.scene,
                &mut self.materials,
                &prototype,
                root,
            );
            self.place_and_queue(cell, &placement, instance);
        }
    }

    fn promote_waiting_batches(&mut self) {
        let mut still_waiting = Vec::new();
        for batch in self.waiting_batches.drain(..) {
            match self.registry.status(&batch.key.model) {
                Some(TemplateStatus::Ready(_)) => {
                    self.active_batches.push(ActiveBatch { batch, next: 0 });
                }
                Some(TemplateStatus::Failed) => {} // dropped silently
                _ => still_waiting.push(batch),
            }
        }
        self.waiting_batches = still_waiting;
    }

    fn drive_spawns(&mut self, viewer_cell: CellCoord) {
        let Some(world) = self.world.clone() else {
            return;
        };
        let mut starts = 0usize;

        // pull new work while capacity remains
        while self.spawns_in_flight() < self.config.max_concurrent_spawns
            && starts < self.config.max_spawn_starts_per_frame
        {
            if !self.config.use_templates {
                // direct-load fallback: one loader call per instance
                let Some((_, item)) = self.spawn_items.pop_min() else {
                    break;
                };
                let live = self
                    .cell_records
                    .get(&item.cell)
                    .map_or(false, |r| r.lod == LodState::Full);
                if !live {
                    continue;
                }
                starts += 1;
                let handle = self.loader.load_model(
                    &item.placement.model,
                    &world.object_path,
                    world.object_password.as_deref(),
                );
                self.direct_loads.push(DirectLoad {
                    cell: item.cell,
                    placement: item.placement,
                    handle,
                });
            } else if self.config.enable_batching {
                let Some(batch) = self.batches.pop_best() else {
                    break;
                };
                starts += 1;
                self.registry.request(
                    &batch.key.model,
                    &self.loader,
                    &world.object_path,
                    world.object_password.as_deref(),
                );
                match self.registry.status(&batch.key.model) {
                    Some(TemplateStatus::Ready(_)) => {
                        self.active_batches.push(ActiveBatch { batch, next: 0 })
                    }
                    Some(TemplateStatus::Failed) => {}
                    _ => self.waiting_batches.push(batch),
                }
            } else {
                let Some((_, item)) = self.spawn_items.pop_min() else {
                    break;
                };
                // stale check against the authoritative records
                let live = self
                    .cell_records
                    .get(&item.cell)
                    .map_or(false, |r| r.lod == LodState::Full);
                if !live {
                    continue;
                }
                starts += 1;
                self.registry.request(
                    &item.placement.model,
                    &self.loader,
                    &world.object_path,
                    world.object_password.as_deref(),
                );
                match self.registry.status(&item.placement.model) {
                    Some(TemplateStatus::Ready(_)) => {
                        self.spawn_one(item.cell, &item.placement);
                    }
                    Some(TemplateStatus::Failed) => {}
                    _ => {
                        // keep it queued until the template resolves
                        let priority = self.score_cell(item.cell, viewer_cell);
                        self.spawn_items.push(priority, item);
                        break;
                    }
                }
            }
        }

        // drip active batches
        let mut batches = std::mem::take(&mut self.active_batches);
        for active in batches.iter_mut() {
            let mut spawned_this_frame = 0;
            while spawned_this_frame < self.config.max_batch_spawns_per_frame
                && active.next < active.batch.placements.len()
            {
                let pending = active.batch.placements[active.next].clone();
                active.next += 1;
                let live = self
                    .cell_records
                    .get(&pending.cell)
                    .map_or(false, |r| r.lod == LodState::Full && r.spawned);
                if !live {
                    continue;
                }
                self.spawn_one(pending.cell, &pending.placement);
                spawned_this_frame += 1;
            }
        }
        batches.retain(|a| a.next < a.batch.placements.len());
        self.active_batches = batches;
    }

    /// Acquires (pool or clone), places, activates and queues the action
    /// script of one instance. The final transform is set before
    /// activation so the instance never flashes at the origin.
    fn spawn_one(&mut self, cell: CellCoord, placement: &Placement) {
        let Some(record) = self.cell_records.get(&cell) else {
            return;
        };
        let root = record.root;
        let Some(instance) = self
            .registry
            .acquire(&mut self.scene, &placement.model, root)
        else {
            return; // template failed or missing; discard silently
        };
        self.place_and_queue(cell, placement, instance);
    }

    /// Final transform, activation and action enqueue of a just-acquired
    /// (still inactive) instance.
    fn place_and_queue(&mut self, cell: CellCoord, placement: &Placement, instance: NodeId) {
        let position = self.coord_map.world_to_render(placement.position);
        let rotation = self
            .coord_map
            .rotation_to_render(placement.rotation_axis, placement.rotation_angle);
        if let Some(node) = self.scene.get_mut(instance) {
            node.local.position = position.to_vector();
            node.local.rotation = rotation;
            if let Some(state) = node.instance.as_mut() {
                state.description = placement.description.clone();
            }
        }
        self.scene.set_active(instance, true);

        if let Some(record) = self.cell_records.get_mut(&cell) {
            record.instances.push(instance);
        }
        let script = self.parse_cache.parse(&placement.action);
        self.actions.enqueue(instance, script);
    }

    fn run_actions(&mut self) {
        let world = self.world.clone().unwrap_or(WorldInfo {
            object_path: String::new(),
            object_password: None,
        });
        let mut ctx = ExecCtx {
            scene: &mut self.scene,
            materials: &mut self.materials,
            textures: &mut self.textures,
            assets: &self.assets,
            object_path: &world.object_path,
            password: world.object_password.as_deref(),
            sign_font: self.sign_font.as_ref(),
        };
        let stats = self.actions.run(
            &mut ctx,
            self.config.action_budget_ms,
            &mut self.activate_store,
        );
        self.overlay.action_out_of_budget = stats.out_of_budget;
    }

    // -- terrain

    fn mesh_params(&self) -> MeshParams {
        MeshParams {
            tile_span: self.config.tile_cell_span,
            node_span: self.config.node_cell_span,
            world_units_per_cell: self.config.world_units_per_cell,
            render_units_per_world_unit: self.config.render_units_per_world_unit,
            height_offset: self.config.terrain_height_offset,
        }
    }

    fn retarget_tiles(&mut self, viewer_cell: CellCoord) {
        let viewer_tile = viewer_cell.tile(self.config.tile_cell_span as i32);
        let radius = self.config.terrain_load_radius;
        let mut desired = Vec::new();
        for dz in -radius..=radius {
            for dx in -radius..=radius {
                let tile = TileCoord::new(viewer_tile.tx + dx, viewer_tile.tz + dz);
                desired.push((tile, tile.base_priority(viewer_tile)));
            }
        }
        self.tiles.retarget(desired);
    }

    fn unload_far_tiles(&mut self, viewer_cell: CellCoord) {
        let viewer_tile = viewer_cell.tile(self.config.tile_cell_span as i32);
        let radius = self.config.terrain_unload_radius;
        let evicted = self
            .tiles
            .unload_filter(|tile| tile.chebyshev(viewer_tile) <= radius);
        let span = self.config.tile_cell_span as i32;
        for tile in evicted {
            if let Some(record) = self.tile_records.remove(&tile) {
                self.scene.destroy_subtree(record.root);
            }
            let origin = tile.origin_cell(span);
            self.border_cache.remove_tile(origin.cx, origin.cy, span);
        }
    }

    fn start_tile_queries(&mut self) {
        while self.tile_queries.len() < self.config.max_concurrent_terrain_queries {
            let Some(tile) = self.tiles.start_next() else {
                break;
            };
            let handle = self.client.query_terrain(tile, TERRAIN_NODE_MASK_ALL);
            self.tile_queries.push((tile, handle));
        }
    }

    fn poll_tile_queries(&mut self) {
        let mut finished: Vec<(TileCoord, Option<Vec<TerrainNode>>)> = Vec::new();
        self.tile_queries.retain_mut(|(tile, handle)| match handle.poll() {
            TaskPoll::Pending => true,
            TaskPoll::Ready(Ok(nodes)) => {
                finished.push((*tile, Some(nodes)));
                false
            }
            TaskPoll::Ready(Err(err)) => {
                warn_once!(
                    format!("tile-query:{},{}", tile.tx, tile.tz),
                    "terrain query ({}, {}) failed: {}",
                    tile.tx,
                    tile.tz,
                    err
                );
                finished.push((*tile, None));
                false
            }
            TaskPoll::Gone => {
                finished.push((*tile, None));
                false
            }
        });
        for (tile, nodes) in finished {
            let success = nodes.is_some();
            match self
                .tiles
                .complete(tile, success, self.config.drop_from_unloaded_tiles)
            {
                Completion::Keep => {
                    if let Some(nodes) = nodes {
                        self.build_tile(tile, nodes);
                        // seams: neighbors re-read the fresh border cells
                        for neighbor in tile.neighbors() {
                            if self.tile_records.contains_key(&neighbor) {
                                self.rebuild_tile(neighbor);
                            }
                        }
                    }
                }
                Completion::Dropped | Completion::Failed => {}
            }
        }
    }

    fn build_tile(&mut self, tile: TileCoord, nodes: Vec<TerrainNode>) {
        let root = self
            .scene
            .create_node(&format!("tile_{}_{}", tile.tx, tile.tz), self.terrain_root);
        self.tile_records.insert(tile, TileRecord { root, nodes });
        self.rebuild_tile(tile);
    }

    /// (Re)meshes a resident tile from its stored nodes.
    fn rebuild_tile(&mut self, tile: TileCoord) {
        let params = self.mesh_params();
        let world = self.world.clone().unwrap_or(WorldInfo {
            object_path: String::new(),
            object_password: None,
        });
        let Some(record) = self.tile_records.get(&tile) else {
            return;
        };
        let root = record.root;
        let nodes = record.nodes.clone();
        let output = build_tile_mesh(tile, &nodes, &params, &mut self.border_cache);

        let handles: Vec<_> = output
            .texture_ids
            .iter()
            .map(|&id| {
                self.terrain_materials.material_for(
                    &mut self.materials,
                    id,
                    &self.assets,
                    &world.object_path,
                    world.object_password.as_deref(),
                )
            })
            .collect();
        if let Some(node) = self.scene.get_mut(root) {
            node.renderer = Some(veld_core::scene::Renderer::new(
                Arc::new(output.mesh),
                handles,
            ));
        }
    }

    fn poll_terrain_materials(&mut self) {
        let world = self.world.clone().unwrap_or(WorldInfo {
            object_path: String::new(),
            object_password: None,
        });
        self.terrain_materials.poll(
            &mut self.materials,
            &mut self.textures,
            &self.assets,
            &world.object_path,
            world.object_password.as_deref(),
        );
    }

    // -- overlay

    fn update_overlay(&mut self, viewer_cell: CellCoord) {
        self.overlay.viewer_cell = viewer_cell;
        self.overlay.cells_loaded = self.cells.loaded_count();
        self.overlay.cells_queued = self.cells.queued_count();
        self.overlay.cells_querying = self.cells.querying_count();
        self.overlay.tiles_loaded = self.tiles.loaded_count();
        self.overlay.tiles_queued = self.tiles.queued_count();
        self.overlay.tiles_querying = self.tiles.querying_count();
        self.overlay.spawn_pending =
            self.batches.placement_count() + self.spawn_items.len();
        self.overlay.spawns_in_flight = self.spawns_in_flight();
        self.overlay.action_queue = self.actions.queue_len();
        self.overlay.action_budget_ms = self.config.action_budget_ms;
        self.overlay.seconds_since_reprioritize = self.last_reprioritize.elapsed().as_secs_f32();
        self.overlay.templates_ready = self.registry.templates_ready();
        self.overlay.template_loads_in_flight = self.registry.loads_in_flight();
        self.overlay.pooled_instances = self.registry.pooled_count();
    }
}

fn template_bounds(scene: &SceneGraph, template: NodeId) -> Option<veld_core::scene::Aabb> {
    let mut bounds: Option<veld_core::scene::Aabb> = None;
    for id in scene.descendants(template) {
        if let Some(renderer) = scene.get(id).and_then(|n| n.renderer.as_ref()) {
            let b = renderer.mesh.bounds;
            bounds = Some(match bounds {
                None => b,
                Some(acc) => veld_core::scene::Aabb {
                    min: veld_core::geometry::RenderPoint::new(
                        acc.min.x.min(b.min.x),
                        acc.min.y.min(b.min.y),
                        acc.min.z.min(b.min.z),
                    ),
                    max: veld_core::geometry::RenderPoint::new(
                        acc.max.x.max(b.max.x),
                        acc.max.y.max(b.max.y),
                        acc.max.z.max(b.max.z),
                    ),
                },
            });
        }
    }
    bounds
}
