//! External collaborator interfaces.
//!
//! The engine never talks to a socket or parses a model file itself; the
//! world server, model loader and asset manager are handed in as trait
//! objects producing [`TaskHandle`]s the scheduler polls between frames.
//! Test fakes implement the same traits with `TaskHandle::ready`.

use std::sync::Arc;

use veld_core::geometry::{CellCoord, TileCoord, WorldPoint, WorldVector};
use veld_core::material::{ColorF, ShaderFamily};
use veld_core::scene::{LocalTransform, Mesh};
use veld_core::task::TaskHandle;
use veld_terrain::TerrainNode;

pub use veld_core::asset::{AssetError, AssetResult, AssetSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Where the world's assets live; the result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldInfo {
    pub object_path: String,
    pub object_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    #[error("server timeout")]
    Timeout,
    #[error("login refused: {0}")]
    Refused(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("model data malformed: {0}")]
    Malformed(String),
}

/// One server-provided object placement inside a cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub model: String,
    /// World units.
    pub position: WorldPoint,
    pub rotation_axis: WorldVector,
    /// Radians; ±∞ marks the axis as Euler angles in degrees.
    pub rotation_angle: f64,
    pub action: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellQueryResult {
    pub objects: Vec<Placement>,
}

/// Node mask requesting every node of a tile.
pub const TERRAIN_NODE_MASK_ALL: [i32; 16] = [-1; 16];

pub trait WorldClient {
    fn login_and_enter(
        &self,
        credentials: &Credentials,
        world: &str,
    ) -> TaskHandle<Result<WorldInfo, ServerError>>;

    fn query_cell(&self, cell: CellCoord) -> TaskHandle<Result<CellQueryResult, ServerError>>;

    fn query_terrain(
        &self,
        tile: TileCoord,
        node_mask: [i32; 16],
    ) -> TaskHandle<Result<Vec<TerrainNode>, ServerError>>;
}

/// Material description inside a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialSpec {
    pub name: String,
    pub shader: ShaderFamily,
    /// Action tag baked into the model (0 = untagged, 100 = sign surface).
    pub tag: i32,
    pub base_color: ColorF,
}

/// One renderable part of a loaded model, in render units relative to the
/// model root.
#[derive(Debug, Clone)]
pub struct ModelPart {
    pub name: String,
    pub local: LocalTransform,
    pub mesh: Arc<Mesh>,
    pub materials: Vec<MaterialSpec>,
}

/// A loaded model, ready to be instantiated as a template subtree.
#[derive(Debug, Clone)]
pub struct ModelPrototype {
    pub id: String,
    pub parts: Vec<ModelPart>,
    /// Uniform scale the template applies once (model units → render units).
    pub base_scale: f32,
}

pub trait ModelLoader {
    fn load_model(
        &self,
        id: &str,
        object_path: &str,
        password: Option<&str>,
    ) -> TaskHandle<Result<ModelPrototype, ModelLoadError>>;
}
