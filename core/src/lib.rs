//! Shared datatypes for the veld-* crates
//!
//! Everything in here is renderer-agnostic: the scene arena, the material
//! store and the texture cache describe *what* should be on screen, the
//! embedding renderer decides *how*. All mutation happens on the thread that
//! drives the streamer; worker threads only ever hand finished values back
//! through [`task::TaskHandle`].

use std::collections::{HashMap, HashSet};

/// External asset fetching seam (`download_asset`)
pub mod asset;
/// The full configuration surface of the streamer
pub mod config;
/// Cell/tile/region coordinates and world ↔ render unit conversion
pub mod geometry;
/// Generic min-heap keyed by float priority, stale-entry tolerant
pub mod heap;
/// One-shot log filter for "log once" failure reporting
pub mod log_once;
/// Material store, alpha-mode variants, per-renderer property blocks
pub mod material;
/// Arena scene graph: hierarchy, transforms, renderers, action gate
pub mod scene;
/// Completion handles for background work + per-frame millisecond budget
pub mod task;
/// Decoded textures and the bounded LRU texture cache
pub mod texture;

pub type FastHashMap<T, U> = HashMap<T, U>;
pub type FastHashSet<T> = HashSet<T>;
