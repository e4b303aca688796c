//! Spawn batching.
//!
//! In batched mode the spawn stage works on batches keyed by
//! `(region, model id, exact action string)`: one template ensure, then a
//! drip of clones per frame until the batch drains. A batch's priority is
//! the best priority of any placement in it.

use veld_core::geometry::{CellCoord, RegionCoord};
use veld_core::heap::WorkHeap;
use veld_core::FastHashMap;

use crate::interfaces::Placement;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub region: RegionCoord,
    pub model: String,
    pub action: String,
}

#[derive(Debug, Clone)]
pub struct PendingPlacement {
    pub cell: CellCoord,
    pub placement: Placement,
    pub priority: f32,
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub key: BatchKey,
    /// Insertion order; spawning drains front to back.
    pub placements: Vec<PendingPlacement>,
    pub best_priority: f32,
}

#[derive(Default)]
pub struct BatchQueue {
    heap: WorkHeap<BatchKey>,
    batches: FastHashMap<BatchKey, Batch>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: BatchKey, cell: CellCoord, placement: Placement, priority: f32) {
        let batch = self.batches.entry(key.clone()).or_insert_with(|| Batch {
            key: key.clone(),
            placements: Vec::new(),
            best_priority: f32::INFINITY,
        });
        batch.placements.push(PendingPlacement {
            cell,
            placement,
            priority,
        });
        if priority < batch.best_priority {
            batch.best_priority = priority;
            // duplicate heap entries are fine, the pop filters
            self.heap.push(priority, key);
        }
    }

    /// Takes the best batch off the queue; the caller owns it until its
    /// placements drained.
    pub fn pop_best(&mut self) -> Option<Batch> {
        while let Some((_, key)) = self.heap.pop_min() {
            if let Some(batch) = self.batches.remove(&key) {
                return Some(batch);
            }
        }
        None
    }

    /// Re-scores every pending placement (and batch) after a viewer move.
    pub fn rescore(&mut self, mut score: impl FnMut(&CellCoord) -> f32) {
        self.heap.clear();
        for (key, batch) in self.batches.iter_mut() {
            let mut best = f32::INFINITY;
            for pending in batch.placements.iter_mut() {
                pending.priority = score(&pending.cell);
                best = best.min(pending.priority);
            }
            batch.best_priority = best;
            self.heap.push(best, key.clone());
        }
    }

    /// Drops pending placements whose cell went away; empty batches
    /// disappear with them.
    pub fn retain_cells(&mut self, mut keep: impl FnMut(&CellCoord) -> bool) {
        self.batches.retain(|_, batch| {
            batch.placements.retain(|p| keep(&p.cell));
            !batch.placements.is_empty()
        });
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn placement_count(&self) -> usize {
        self.batches.values().map(|b| b.placements.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_core::geometry::WorldPoint;
    use veld_core::geometry::WorldVector;

    fn placement(model: &str, action: &str) -> Placement {
        Placement {
            model: model.to_string(),
            position: WorldPoint::new(0.0, 0.0, 0.0),
            rotation_axis: WorldVector::new(0.0, 1.0, 0.0),
            rotation_angle: 0.0,
            action: action.to_string(),
            description: None,
        }
    }

    fn key(region: (i32, i32), model: &str, action: &str) -> BatchKey {
        BatchKey {
            region: RegionCoord {
                rx: region.0,
                ry: region.1,
            },
            model: model.to_string(),
            action: action.to_string(),
        }
    }

    #[test]
    fn same_key_buckets_together() {
        let mut queue = BatchQueue::new();
        for i in 0..10 {
            queue.add(
                key((0, 0), "pp16", "create texture wood"),
                CellCoord::new(i, 0),
                placement("pp16", "create texture wood"),
                100.0 + i as f32,
            );
        }
        assert_eq!(queue.batch_count(), 1);
        assert_eq!(queue.placement_count(), 10);
        let batch = queue.pop_best().unwrap();
        assert_eq!(batch.placements.len(), 10);
        assert_eq!(batch.best_priority, 100.0);
        // insertion order preserved
        assert_eq!(batch.placements[0].cell, CellCoord::new(0, 0));
    }

    #[test]
    fn different_action_strings_split_batches() {
        let mut queue = BatchQueue::new();
        queue.add(
            key((0, 0), "pp16", "create color red"),
            CellCoord::new(0, 0),
            placement("pp16", "create color red"),
            10.0,
        );
        queue.add(
            key((0, 0), "pp16", "create color blue"),
            CellCoord::new(0, 0),
            placement("pp16", "create color blue"),
            20.0,
        );
        assert_eq!(queue.batch_count(), 2);
    }

    #[test]
    fn pop_returns_best_batch_first() {
        let mut queue = BatchQueue::new();
        queue.add(key((0, 0), "far", ""), CellCoord::new(9, 9), placement("far", ""), 900.0);
        queue.add(key((0, 0), "near", ""), CellCoord::new(1, 0), placement("near", ""), 100.0);
        assert_eq!(queue.pop_best().unwrap().key.model, "near");
        assert_eq!(queue.pop_best().unwrap().key.model, "far");
        assert!(queue.pop_best().is_none());
    }

    #[test]
    fn rescore_reorders_batches() {
        let mut queue = BatchQueue::new();
        queue.add(key((0, 0), "a", ""), CellCoord::new(0, 0), placement("a", ""), 1.0);
        queue.add(key((1, 0), "b", ""), CellCoord::new(8, 0), placement("b", ""), 2.0);
        // viewer moved next to cell (8,0)
        queue.rescore(|cell| cell.base_priority(CellCoord::new(8, 0)));
        assert_eq!(queue.pop_best().unwrap().key.model, "b");
    }

    #[test]
    fn retain_cells_drops_unloaded() {
        let mut queue = BatchQueue::new();
        queue.add(key((0, 0), "a", ""), CellCoord::new(0, 0), placement("a", ""), 1.0);
        queue.add(key((0, 0), "a", ""), CellCoord::new(1, 0), placement("a", ""), 2.0);
        queue.retain_cells(|cell| cell.cx != 0);
        assert_eq!(queue.placement_count(), 1);
    }
}
