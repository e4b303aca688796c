//! The budgeted action-apply stage.
//!
//! A FIFO of per-instance work items is drained under a millisecond
//! budget each frame. Each step applies one precomputed numeric record or
//! dispatches one command through the executor; when the budget runs out
//! mid-item the item keeps its step cursor and resumes next frame. A
//! `texture`/`normalmap` step parks the item on its fetch so create-phase
//! order within the instance is preserved.

use std::collections::VecDeque;
use std::sync::Arc;

use veld_action::executor::{self, ExecCtx, ExecOutcome};
use veld_action::fetch::{FetchStatus, TextureFetch};
use veld_action::numeric::{preprocess_batch, NumericAction};
use veld_action::ParsedScript;
use veld_core::scene::NodeId;
use veld_core::task::FrameBudget;
use veld_core::FastHashMap;

pub struct ActionWorkItem {
    pub instance: NodeId,
    pub script: Arc<ParsedScript>,
    /// Precomputed records, parallel to `script.create`.
    numeric: Vec<Option<NumericAction>>,
    /// Next create-phase command to apply.
    cursor: usize,
}

impl ActionWorkItem {
    pub fn new(instance: NodeId, script: Arc<ParsedScript>) -> Self {
        let numeric = preprocess_batch(&script.create);
        Self {
            instance,
            script,
            numeric,
            cursor: 0,
        }
    }
}

struct ParkedItem {
    item: ActionWorkItem,
    fetch: TextureFetch,
}

#[derive(Debug, Default, Copy, Clone)]
pub struct ActionStats {
    pub steps: usize,
    pub out_of_budget: bool,
}

#[derive(Default)]
pub struct ActionStage {
    queue: VecDeque<ActionWorkItem>,
    parked: Vec<ParkedItem>,
}

impl ActionStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, instance: NodeId, script: Arc<ParsedScript>) {
        if script.is_empty() {
            return;
        }
        self.queue.push_back(ActionWorkItem::new(instance, script));
    }

    /// Adopts a fetch started outside the stage (activate-phase
    /// commands); it polls alongside the create-phase fetches.
    pub fn park_fetch(&mut self, instance: NodeId, fetch: TextureFetch) {
        let item = ActionWorkItem {
            instance,
            script: Arc::new(ParsedScript::default()),
            numeric: Vec::new(),
            cursor: 0,
        };
        self.parked.push(ParkedItem { item, fetch });
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len() + self.parked.len()
    }

    /// Drops all queued and parked work of an instance. Called on unload
    /// so a pooled instance never receives actions from its previous
    /// life.
    pub fn discard_instance(&mut self, instance: NodeId) {
        self.queue.retain(|item| item.instance != instance);
        self.parked.retain(|parked| parked.item.instance != instance);
    }

    /// One frame's worth of action work. Completed instances get their
    /// activate-phase command list stored into `activate_store` (only
    /// after every create-phase command finished).
    pub fn run(
        &mut self,
        ctx: &mut ExecCtx,
        budget_ms: f32,
        activate_store: &mut FastHashMap<NodeId, Arc<ParsedScript>>,
    ) -> ActionStats {
        let mut stats = ActionStats::default();

        // Parked fetches poll once per frame, outside the budget: each is
        // one try_recv plus at most one decode.
        let mut still_parked = Vec::with_capacity(self.parked.len());
        for mut parked in self.parked.drain(..) {
            match parked.fetch.poll(ctx) {
                FetchStatus::Pending => still_parked.push(parked),
                FetchStatus::Finished => {
                    if parked.item.cursor < parked.item.script.create.len() {
                        self.queue.push_front(parked.item);
                    } else {
                        finalize(ctx, parked.item, activate_store);
                    }
                }
            }
        }
        self.parked = still_parked;

        let budget = FrameBudget::start(budget_ms);
        while let Some(mut item) = self.queue.pop_front() {
            if !ctx.scene.contains(item.instance) {
                continue; // instance unloaded while waiting
            }
            let mut pending_fetch = None;
            while item.cursor < item.script.create.len() {
                let index = item.cursor;
                item.cursor += 1;
                stats.steps += 1;
                let outcome = match item.numeric.get(index).copied().flatten() {
                    Some(numeric) => {
                        executor::apply_numeric(ctx, item.instance, &numeric);
                        ExecOutcome::Done
                    }
                    None => executor::execute_command(ctx, item.instance, &item.script.create[index]),
                };
                if let ExecOutcome::Fetch(fetch) = outcome {
                    pending_fetch = Some(fetch);
                    break;
                }
                if budget.exhausted() {
                    break;
                }
            }
            if let Some(fetch) = pending_fetch {
                self.parked.push(ParkedItem { item, fetch });
                if budget.exhausted() {
                    stats.out_of_budget = true;
                    break;
                }
                continue;
            }
            if item.cursor < item.script.create.len() {
                // out of budget mid-item; resume here next frame
                self.queue.push_front(item);
                stats.out_of_budget = true;
                break;
            }
            finalize(ctx, item, activate_store);
            if budget.exhausted() {
                stats.out_of_budget = !self.queue.is_empty();
                break;
            }
        }
        stats
    }
}

/// Stores the activate-phase list once all create-phase work (including
/// parked fetches) has completed.
fn finalize(
    ctx: &mut ExecCtx,
    item: ActionWorkItem,
    activate_store: &mut FastHashMap<NodeId, Arc<ParsedScript>>,
) {
    if !ctx.scene.contains(item.instance) {
        return;
    }
    if !item.script.activate.is_empty() {
        activate_store.insert(item.instance, item.script.clone());
    }
}
