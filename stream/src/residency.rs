//! Residency bookkeeping for one streaming domain (cells or tiles).
//!
//! Every coordinate is in at most one of `queued`, `querying`, `loaded`;
//! `desired` overlays them all. The queue heap tolerates stale entries:
//! membership in `queued` is the authoritative check when popping.

use std::hash::Hash;

use veld_core::heap::WorkHeap;
use veld_core::FastHashSet;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Loaded and resident; the caller materializes it.
    Keep,
    /// Result discarded: the coordinate left the desired set mid-query.
    Dropped,
    /// Query failed; the coordinate re-queues on a later retarget.
    Failed,
}

pub struct ResidencyMap<C> {
    desired: FastHashSet<C>,
    queued: FastHashSet<C>,
    querying: FastHashSet<C>,
    loaded: FastHashSet<C>,
    queue: WorkHeap<C>,
}

impl<C: Copy + Eq + Hash> ResidencyMap<C> {
    pub fn new() -> Self {
        Self {
            desired: FastHashSet::default(),
            queued: FastHashSet::default(),
            querying: FastHashSet::default(),
            loaded: FastHashSet::default(),
            queue: WorkHeap::new(),
        }
    }

    /// Replaces the desired set. New coordinates (absent from every other
    /// set) enter the queue with their given priority; queued coordinates
    /// that fell out of the desired set are dropped from it.
    pub fn retarget<I: IntoIterator<Item = (C, f32)>>(&mut self, desired: I) {
        self.desired.clear();
        for (coord, priority) in desired {
            self.desired.insert(coord);
            if !self.queued.contains(&coord)
                && !self.querying.contains(&coord)
                && !self.loaded.contains(&coord)
            {
                self.queued.insert(coord);
                self.queue.push(priority, coord);
            }
        }
        let desired = &self.desired;
        self.queued.retain(|c| desired.contains(c));
    }

    /// Pops the best queued coordinate and marks it querying.
    pub fn start_next(&mut self) -> Option<C> {
        while let Some((_, coord)) = self.queue.pop_min() {
            if self.queued.remove(&coord) {
                self.querying.insert(coord);
                return Some(coord);
            }
            // stale heap entry, skip
        }
        None
    }

    /// Finishes an in-flight query. With `drop_if_undesired`, a result for
    /// a coordinate that left the desired set is discarded.
    pub fn complete(&mut self, coord: C, success: bool, drop_if_undesired: bool) -> Completion {
        self.querying.remove(&coord);
        if !success {
            return Completion::Failed;
        }
        if drop_if_undesired && !self.desired.contains(&coord) {
            return Completion::Dropped;
        }
        self.loaded.insert(coord);
        Completion::Keep
    }

    /// Evicts loaded coordinates failing `keep` and returns them.
    pub fn unload_filter(&mut self, mut keep: impl FnMut(&C) -> bool) -> Vec<C> {
        let evicted: Vec<C> = self.loaded.iter().copied().filter(|c| !keep(c)).collect();
        for coord in &evicted {
            self.loaded.remove(coord);
        }
        evicted
    }

    /// Re-scores queued entries after the viewer moved. Entries no longer
    /// queued are dropped from the heap.
    pub fn rescore(&mut self, mut score: impl FnMut(&C) -> f32) {
        let queued = &self.queued;
        self.queue
            .rescore(|c| if queued.contains(c) { Some(score(c)) } else { None });
    }

    pub fn is_loaded(&self, coord: &C) -> bool {
        self.loaded.contains(coord)
    }

    pub fn is_desired(&self, coord: &C) -> bool {
        self.desired.contains(coord)
    }

    pub fn querying_count(&self) -> usize {
        self.querying.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn loaded_iter(&self) -> impl Iterator<Item = &C> {
        self.loaded.iter()
    }
}

impl<C: Copy + Eq + Hash> Default for ResidencyMap<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_core::geometry::CellCoord;

    fn neighborhood(center: CellCoord, radius: i32) -> Vec<(CellCoord, f32)> {
        let mut out = Vec::new();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let c = CellCoord::new(center.cx + dx, center.cy + dy);
                out.push((c, c.base_priority(center)));
            }
        }
        out
    }

    #[test]
    fn retarget_queues_new_coordinates_closest_first() {
        let mut residency = ResidencyMap::new();
        residency.retarget(neighborhood(CellCoord::new(0, 0), 1));
        assert_eq!(residency.queued_count(), 9);
        let first = residency.start_next().unwrap();
        assert_eq!(first, CellCoord::new(0, 0));
    }

    #[test]
    fn coordinate_is_in_one_active_set_at_a_time() {
        let mut residency = ResidencyMap::new();
        residency.retarget(vec![(CellCoord::new(1, 1), 1.0)]);
        let c = residency.start_next().unwrap();
        assert_eq!(residency.queued_count(), 0);
        assert_eq!(residency.querying_count(), 1);
        // no second query can start for the same coordinate
        assert!(residency.start_next().is_none());
        assert_eq!(residency.complete(c, true, true), Completion::Keep);
        assert_eq!(residency.querying_count(), 0);
        assert!(residency.is_loaded(&c));
    }

    #[test]
    fn failed_query_requeues_on_next_retarget() {
        let mut residency = ResidencyMap::new();
        let target = vec![(CellCoord::new(2, 0), 5.0)];
        residency.retarget(target.clone());
        let c = residency.start_next().unwrap();
        assert_eq!(residency.complete(c, false, true), Completion::Failed);
        assert!(!residency.is_loaded(&c));

        residency.retarget(target);
        assert_eq!(residency.start_next(), Some(c));
    }

    #[test]
    fn undesired_results_are_dropped() {
        let mut residency = ResidencyMap::new();
        residency.retarget(vec![(CellCoord::new(3, 3), 1.0)]);
        let c = residency.start_next().unwrap();
        // viewer moved away mid-query
        residency.retarget(vec![(CellCoord::new(50, 50), 1.0)]);
        assert_eq!(residency.complete(c, true, true), Completion::Dropped);
        assert!(!residency.is_loaded(&c));
    }

    #[test]
    fn unload_filter_returns_evicted() {
        let mut residency = ResidencyMap::new();
        residency.retarget(neighborhood(CellCoord::new(0, 0), 1));
        while let Some(c) = residency.start_next() {
            residency.complete(c, true, true);
        }
        let viewer = CellCoord::new(10, 0);
        let evicted = residency.unload_filter(|c| c.chebyshev(viewer) <= 6);
        assert!(!evicted.is_empty());
        assert_eq!(residency.loaded_count(), 9 - evicted.len());
    }

    #[test]
    fn stale_heap_entries_are_skipped() {
        let mut residency = ResidencyMap::new();
        residency.retarget(vec![(CellCoord::new(0, 0), 1.0), (CellCoord::new(1, 0), 2.0)]);
        // drop (0,0) from desired; its heap entry goes stale
        residency.retarget(vec![(CellCoord::new(1, 0), 2.0)]);
        assert_eq!(residency.start_next(), Some(CellCoord::new(1, 0)));
        assert_eq!(residency.start_next(), None);
    }
}
