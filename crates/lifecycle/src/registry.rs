//! In-memory cache of the last known lifecycle state of each task.
//!
//! Every write is a read-modify-write under the shard lock of its key, so a
//! status refresh and a mutation confirmation for the same task can never
//! interleave. Reads never wait on other keys.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use gaia_ledger_gateway::TaskId;
use tokio::time::Instant;
use tracing::warn;

use crate::NodeLifecycleState;

/// A cached state together with its bookkeeping.
#[derive(Clone, Debug)]
pub struct TaskEntry {
    /// Bumped on every accepted write.
    pub revision: u64,

    /// When the task entered its current phase.
    pub since: Instant,

    /// The cached state.
    pub state: NodeLifecycleState,
}

impl TaskEntry {
    fn first(state: NodeLifecycleState) -> Self {
        Self {
            revision: 1,
            since: Instant::now(),
            state,
        }
    }

    fn advance(&mut self, task_id: TaskId, next: NodeLifecycleState) {
        if !self.state.can_transition_to(&next) {
            warn!(
                "ignoring transition of task {task_id} from {} to {next}",
                self.state
            );
            return;
        }

        if self.state == next {
            return;
        }

        if !self.state.same_phase(&next) {
            self.since = Instant::now();
        }
        self.state = next;
        self.revision += 1;
    }
}

/// Concurrent map from task id to the last confirmed or observed state.
#[derive(Clone, Debug, Default)]
pub struct TaskRegistry {
    entries: Arc<DashMap<TaskId, TaskEntry>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached state of a task, `Unknown` if it was never recorded.
    #[must_use]
    pub fn get(&self, task_id: TaskId) -> NodeLifecycleState {
        self.entries
            .get(&task_id)
            .map(|entry| entry.state.clone())
            .unwrap_or_default()
    }

    /// The cached entry of a task, if any.
    #[must_use]
    pub fn entry(&self, task_id: TaskId) -> Option<TaskEntry> {
        self.entries.get(&task_id).map(|entry| entry.clone())
    }

    /// Records a new state, subject to the lifecycle transition rules.
    ///
    /// Returns the entry as stored afterwards, which keeps the previous state
    /// when the transition is not allowed.
    pub fn record(&self, task_id: TaskId, state: NodeLifecycleState) -> TaskEntry {
        self.update_with(task_id, |_| state)
    }

    /// Computes the next state from the current entry and records it atomically.
    pub fn update_with<F>(&self, task_id: TaskId, next: F) -> TaskEntry
    where
        F: FnOnce(Option<&TaskEntry>) -> NodeLifecycleState,
    {
        match self.entries.entry(task_id) {
            Entry::Occupied(mut occupied) => {
                let state = next(Some(occupied.get()));
                occupied.get_mut().advance(task_id, state);
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let state = next(None);
                if state == NodeLifecycleState::Unknown {
                    return TaskEntry::first(state);
                }
                vacant.insert(TaskEntry::first(state)).clone()
            }
        }
    }

    /// Puts back `previous` if the entry is still at `revision`.
    ///
    /// Used to undo a provisional marker once it is known the mutation behind
    /// it did not apply. A restore to "never seen" drops the entry. Returns
    /// whether anything was restored.
    pub fn restore(&self, task_id: TaskId, revision: u64, previous: Option<TaskEntry>) -> bool {
        match self.entries.entry(task_id) {
            Entry::Occupied(mut occupied) if occupied.get().revision == revision => {
                match previous {
                    Some(previous) => {
                        let entry = occupied.get_mut();
                        entry.state = previous.state;
                        entry.since = previous.since;
                        entry.revision += 1;
                    }
                    None => {
                        occupied.remove();
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// All cached states ordered by task id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(TaskId, NodeLifecycleState)> {
        let mut states: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().state.clone()))
            .collect();
        states.sort_by_key(|(task_id, _)| *task_id);
        states
    }

    /// Number of tasks with a cached state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
