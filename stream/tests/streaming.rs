//! Streamer scenarios against fake collaborators. The fakes answer
//! synchronously through `TaskHandle::ready`, so every async edge runs in
//! a deterministic number of ticks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use veld_core::config::StreamConfig;
use veld_core::geometry::{CellCoord, RenderPoint, RenderVector, TileCoord, WorldPoint, WorldVector};
use veld_core::material::ColorF;
use veld_core::scene::{LocalTransform, Mesh, MeshIndices, SubMesh};
use veld_core::task::TaskHandle;
use veld_core::FastHashMap;
use veld_stream::interfaces::*;
use veld_stream::lod::LodState;
use veld_stream::{Streamer, Viewer};
use veld_terrain::{TerrainCell, TerrainNode};

// -- fakes

#[derive(Default)]
struct WorldData {
    placements: FastHashMap<CellCoord, Vec<Placement>>,
    tile_height: FastHashMap<TileCoord, f32>,
}

struct FakeClient {
    data: Arc<WorldData>,
    cell_queries: Arc<Mutex<Vec<CellCoord>>>,
    node_span: usize,
}

impl WorldClient for FakeClient {
    fn login_and_enter(
        &self,
        _credentials: &Credentials,
        _world: &str,
    ) -> TaskHandle<Result<WorldInfo, ServerError>> {
        TaskHandle::ready(Ok(WorldInfo {
            object_path: "http://objects.example/world".into(),
            object_password: None,
        }))
    }

    fn query_cell(&self, cell: CellCoord) -> TaskHandle<Result<CellQueryResult, ServerError>> {
        self.cell_queries.lock().unwrap().push(cell);
        let objects = self.data.placements.get(&cell).cloned().unwrap_or_default();
        TaskHandle::ready(Ok(CellQueryResult { objects }))
    }

    fn query_terrain(
        &self,
        tile: TileCoord,
        _node_mask: [i32; 16],
    ) -> TaskHandle<Result<Vec<TerrainNode>, ServerError>> {
        let height = self.data.tile_height.get(&tile).copied().unwrap_or(0.0);
        let node = TerrainNode {
            x: 0,
            z: 0,
            cells: vec![
                TerrainCell {
                    height,
                    texture_id: 1,
                    rotation_quarter: 0,
                    is_hole: false,
                };
                self.node_span * self.node_span
            ],
        };
        TaskHandle::ready(Ok(vec![node]))
    }
}

struct FakeLoader {
    loads: Arc<Mutex<Vec<String>>>,
}

impl ModelLoader for FakeLoader {
    fn load_model(
        &self,
        id: &str,
        _object_path: &str,
        _password: Option<&str>,
    ) -> TaskHandle<Result<ModelPrototype, ModelLoadError>> {
        self.loads.lock().unwrap().push(id.to_string());
        if id == "broken" {
            return TaskHandle::ready(Err(ModelLoadError::Malformed(id.to_string())));
        }
        let mesh = Arc::new(Mesh::new(
            vec![
                RenderPoint::new(-0.5, 0.0, -0.5),
                RenderPoint::new(0.5, 0.0, -0.5),
                RenderPoint::new(-0.5, 1.0, 0.5),
            ],
            vec![RenderVector::new(0.0, 1.0, 0.0); 3],
            vec![[0.0, 0.0]; 3],
            vec![SubMesh {
                indices: MeshIndices::U16(vec![0, 1, 2]),
            }],
        ));
        TaskHandle::ready(Ok(ModelPrototype {
            id: id.to_string(),
            parts: vec![ModelPart {
                name: format!("{}-body", id),
                local: LocalTransform::default(),
                mesh,
                materials: vec![MaterialSpec {
                    name: format!("{}-mat", id),
                    shader: veld_core::material::ShaderFamily::Standard,
                    tag: 0,
                    base_color: ColorF::WHITE,
                }],
            }],
            base_scale: 1.0,
        }))
    }
}

struct FakeAssets {
    downloads: Arc<AtomicUsize>,
}

impl AssetSource for FakeAssets {
    fn download_asset(
        &self,
        _object_path: &str,
        filename: &str,
        _password: Option<&str>,
    ) -> TaskHandle<AssetResult> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        TaskHandle::ready(Err(AssetError::NotFound(filename.to_string())))
    }
}

struct Harness {
    streamer: Streamer<FakeClient, FakeLoader, FakeAssets>,
    cell_queries: Arc<Mutex<Vec<CellCoord>>>,
    loads: Arc<Mutex<Vec<String>>>,
}

fn test_config() -> StreamConfig {
    StreamConfig {
        load_radius: 2,
        unload_radius: 3,
        full_detail_radius: 2,
        instanced_radius: 3,
        proxy_radius: 4,
        terrain_load_radius: 1,
        terrain_unload_radius: 2,
        tile_cell_span: 4,
        node_cell_span: 4,
        world_units_per_cell: 10.0,
        ..StreamConfig::default()
    }
}

fn harness(config: StreamConfig, data: WorldData) -> Harness {
    let cell_queries = Arc::new(Mutex::new(Vec::new()));
    let loads = Arc::new(Mutex::new(Vec::new()));
    let node_span = config.node_cell_span;
    let client = FakeClient {
        data: Arc::new(data),
        cell_queries: cell_queries.clone(),
        node_span,
    };
    let loader = FakeLoader {
        loads: loads.clone(),
    };
    let assets = FakeAssets {
        downloads: Arc::new(AtomicUsize::new(0)),
    };
    let mut streamer = Streamer::new(config, client, loader, assets);
    streamer.set_world(WorldInfo {
        object_path: "http://objects.example/world".into(),
        object_password: None,
    });
    Harness {
        streamer,
        cell_queries,
        loads,
    }
}

fn placement(model: &str, x: f32, z: f32, action: &str) -> Placement {
    Placement {
        model: model.to_string(),
        position: WorldPoint::new(x, 0.0, z),
        rotation_axis: WorldVector::new(0.0, 1.0, 0.0),
        rotation_angle: 0.0,
        action: action.to_string(),
        description: None,
    }
}

fn tick_n(harness: &mut Harness, viewer: Viewer, n: usize) {
    for _ in 0..n {
        harness.streamer.tick(viewer);
    }
}

// S5: ten placements of one model sharing an action batch into exactly
// one template load and ten placed clones, none of them at the origin.
#[test]
fn batched_spawn_loads_template_once_and_places_all_clones() {
    let mut data = WorldData::default();
    for i in 0..10i32 {
        let cell = CellCoord::new(i % 2, (i / 2) % 2);
        data.placements.entry(cell).or_default().push(placement(
            "pp16",
            (i as f32 + 1.0) * 3.0,
            (i as f32 + 1.0) * 2.0,
            "create visible yes",
        ));
    }
    let mut h = harness(test_config(), data);
    tick_n(&mut h, Viewer::default(), 20);

    assert_eq!(h.loads.lock().unwrap().len(), 1, "one template load");

    let mut total = 0;
    for i in 0..4i32 {
        let cell = CellCoord::new(i % 2, i / 2);
        if let Some(record) = h.streamer.cell_record(&cell) {
            total += record.instances.len();
            for &instance in &record.instances {
                let node = h.streamer.scene.get(instance).unwrap();
                assert!(node.active, "placed instances are active");
                let p = node.local.position;
                assert!(
                    p.x.abs() + p.z.abs() > 0.5,
                    "no instance sits at the origin: {:?}",
                    p
                );
            }
        }
    }
    assert_eq!(total, 10);
}

#[test]
fn each_cell_is_queried_at_most_once_while_resident() {
    let mut h = harness(test_config(), WorldData::default());
    tick_n(&mut h, Viewer::default(), 30);

    let queries = h.cell_queries.lock().unwrap().clone();
    let unique: std::collections::HashSet<_> = queries.iter().collect();
    assert_eq!(queries.len(), unique.len(), "duplicate in-flight cell query");
    // the whole load neighborhood got queried
    assert_eq!(queries.len(), (2 * 2 + 1) * (2 * 2 + 1));
}

#[test]
fn failed_template_load_discards_spawns_silently() {
    let mut data = WorldData::default();
    data.placements
        .entry(CellCoord::new(0, 0))
        .or_default()
        .push(placement("broken", 5.0, 5.0, ""));
    let mut h = harness(test_config(), data);
    tick_n(&mut h, Viewer::default(), 10);

    // exactly one load attempt, no instances, no panic
    assert_eq!(h.loads.lock().unwrap().len(), 1);
    let record = h.streamer.cell_record(&CellCoord::new(0, 0)).unwrap();
    assert!(record.instances.is_empty());
}

#[test]
fn teleporting_unloads_cells_and_pools_instances() {
    let mut data = WorldData::default();
    data.placements
        .entry(CellCoord::new(0, 0))
        .or_default()
        .push(placement("pp16", 5.0, 5.0, ""));
    let mut h = harness(test_config(), data);
    tick_n(&mut h, Viewer::default(), 15);
    assert!(h
        .streamer
        .cell_record(&CellCoord::new(0, 0))
        .map_or(false, |r| r.instances.len() == 1));

    // teleport far away: the old neighborhood unloads
    let far = Viewer {
        position: WorldPoint::new(1000.0, 0.0, 1000.0),
        yaw_deg: 0.0,
    };
    tick_n(&mut h, far, 5);
    assert!(h.streamer.cell_record(&CellCoord::new(0, 0)).is_none());
    assert_eq!(h.streamer.overlay.pooled_instances, 1);

    // coming back re-queries and reuses the pooled clone: still one load
    tick_n(&mut h, Viewer::default(), 15);
    assert_eq!(h.loads.lock().unwrap().len(), 1);
    assert!(h
        .streamer
        .cell_record(&CellCoord::new(0, 0))
        .map_or(false, |r| r.instances.len() == 1));
    assert_eq!(h.streamer.overlay.pooled_instances, 0);
}

#[test]
fn neighboring_tiles_agree_on_shared_edge_heights() {
    let mut data = WorldData::default();
    data.tile_height.insert(TileCoord::new(0, 0), 2.0);
    data.tile_height.insert(TileCoord::new(1, 0), 8.0);
    let mut h = harness(test_config(), data);
    tick_n(&mut h, Viewer::default(), 40);

    let span = 4usize;
    let shared_render_x = -(span as f32 * 10.0); // world column 4, X flipped

    let edge = |tile: TileCoord| -> Vec<(f32, f32)> {
        let record = h.streamer.tile_record(&tile).expect("tile loaded");
        let mesh = &h
            .streamer
            .scene
            .get(record.root)
            .unwrap()
            .renderer
            .as_ref()
            .expect("tile mesh")
            .mesh;
        let mut out: Vec<(f32, f32)> = mesh
            .vertices
            .iter()
            .filter(|v| (v.x - shared_render_x).abs() < 1e-4)
            .map(|v| (v.z, v.y))
            .collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0));
        out.dedup();
        out
    };

    let left = edge(TileCoord::new(0, 0));
    let right = edge(TileCoord::new(1, 0));
    assert!(!left.is_empty());
    assert_eq!(left, right, "seam heights must be bit-identical");
}

#[test]
fn distant_cells_render_instanced_without_instances() {
    let mut data = WorldData::default();
    // cell at Chebyshev distance 3: inside instanced_radius, outside full
    let far_cell = CellCoord::new(3, 0);
    for i in 0..4 {
        data.placements
            .entry(far_cell)
            .or_default()
            .push(placement("pp16", 31.0 + i as f32, 5.0, ""));
    }
    let mut config = test_config();
    config.load_radius = 3;
    config.unload_radius = 4;
    let mut h = harness(config, data);
    tick_n(&mut h, Viewer::default(), 30);

    let record = h.streamer.cell_record(&far_cell).expect("cell loaded");
    assert_eq!(record.lod, LodState::Instanced);
    assert!(record.instances.is_empty());
    assert_eq!(record.instanced_draws.len(), 1);
    assert_eq!(record.instanced_draws[0].transforms.len(), 4);
}

#[test]
fn overlay_reports_residency_counts() {
    let mut h = harness(test_config(), WorldData::default());
    tick_n(&mut h, Viewer::default(), 30);
    let overlay = &h.streamer.overlay;
    assert_eq!(overlay.viewer_cell, CellCoord::new(0, 0));
    assert_eq!(overlay.cells_loaded, 25);
    assert_eq!(overlay.cells_querying, 0);
    let text = overlay.to_string();
    assert!(text.contains("cells  loaded 25"));
}

#[test]
fn direct_load_fallback_spawns_without_templates() {
    let mut data = WorldData::default();
    data.placements
        .entry(CellCoord::new(0, 0))
        .or_default()
        .push(placement("pp16", 5.0, 5.0, ""));
    let mut config = test_config();
    config.use_templates = false;
    config.enable_pooling = false;
    let mut h = harness(config, data);
    tick_n(&mut h, Viewer::default(), 15);

    let record = h.streamer.cell_record(&CellCoord::new(0, 0)).unwrap();
    assert_eq!(record.instances.len(), 1);
    assert_eq!(h.loads.lock().unwrap().len(), 1);
    let node = h.streamer.scene.get(record.instances[0]).unwrap();
    assert!(node.active);
    assert!(node.instance.is_some());
}
