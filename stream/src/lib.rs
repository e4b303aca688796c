//! The veld streaming engine.
//!
//! Keeps a neighborhood of a cell-partitioned 3D world resident around a
//! moving viewer: cell queries, template loads, pooled instance spawns,
//! budgeted action application and terrain tile meshing, all driven from
//! one cooperative `tick` per frame.
//!
//! ```no_run
//! # use veld_stream::{Streamer, Viewer, interfaces::*};
//! # fn demo<W: WorldClient, M: ModelLoader, A: AssetSource>(client: W, loader: M, assets: A) {
//! let config = veld_core::config::StreamConfig::default();
//! let mut streamer = Streamer::new(config, client, loader, assets);
//! streamer.connect(
//!     &Credentials { username: "guest".into(), password: "".into() },
//!     "gateway",
//! );
//! loop {
//!     streamer.tick(Viewer::default());
//!     // hand streamer.scene to the renderer
//! }
//! # }
//! ```

/// Spawn batching by `(region, model, action)`
pub mod batch;
/// External collaborator traits and wire types
pub mod interfaces;
/// LOD selection and instanced draw lists
pub mod lod;
/// Optional fern-based logging bootstrap
#[cfg(feature = "logging")]
pub mod logging;
/// Debug overlay counters
pub mod overlay;
/// Template subtrees and instance pools
pub mod registry;
/// Desired/queued/querying/loaded bookkeeping per domain
pub mod residency;
/// The budgeted action-apply stage
pub mod scheduler;
/// The orchestrator
pub mod streamer;

pub use overlay::OverlayCounters;
pub use streamer::{CellRecord, Streamer, TileRecord, Viewer};
