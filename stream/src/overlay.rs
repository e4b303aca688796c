//! Debug overlay counters.
//!
//! Updated once per tick by the streamer; `Display` renders the overlay
//! text the embedder can draw into any UI.

use std::fmt;

use veld_core::geometry::CellCoord;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OverlayCounters {
    pub viewer_cell: CellCoord,
    pub cells_loaded: usize,
    pub cells_queued: usize,
    pub cells_querying: usize,
    pub tiles_loaded: usize,
    pub tiles_queued: usize,
    pub tiles_querying: usize,
    pub spawn_pending: usize,
    pub spawns_in_flight: usize,
    pub action_queue: usize,
    pub action_budget_ms: f32,
    pub action_out_of_budget: bool,
    pub seconds_since_reprioritize: f32,
    pub templates_ready: usize,
    pub template_loads_in_flight: usize,
    pub pooled_instances: usize,
}

impl fmt::Display for OverlayCounters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "cell {},{}",
            self.viewer_cell.cx, self.viewer_cell.cy
        )?;
        writeln!(
            f,
            "cells  loaded {} queued {} querying {}",
            self.cells_loaded, self.cells_queued, self.cells_querying
        )?;
        writeln!(
            f,
            "tiles  loaded {} queued {} querying {}",
            self.tiles_loaded, self.tiles_queued, self.tiles_querying
        )?;
        writeln!(
            f,
            "spawn  pending {} in-flight {}",
            self.spawn_pending, self.spawns_in_flight
        )?;
        writeln!(
            f,
            "action queue {} budget {:.1}ms{}",
            self.action_queue,
            self.action_budget_ms,
            if self.action_out_of_budget { " (saturated)" } else { "" }
        )?;
        writeln!(
            f,
            "templates {} loading {} pooled {}",
            self.templates_ready, self.template_loads_in_flight, self.pooled_instances
        )?;
        write!(
            f,
            "reprioritized {:.1}s ago",
            self.seconds_since_reprioritize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_renders_every_counter_group() {
        let overlay = OverlayCounters {
            viewer_cell: CellCoord::new(3, -2),
            cells_loaded: 42,
            action_budget_ms: 3.0,
            action_out_of_budget: true,
            ..Default::default()
        };
        let text = overlay.to_string();
        assert!(text.contains("cell 3,-2"));
        assert!(text.contains("loaded 42"));
        assert!(text.contains("(saturated)"));
        assert!(text.contains("templates"));
    }
}
