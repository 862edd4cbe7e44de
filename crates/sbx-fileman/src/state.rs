//! Per-chunk and per-run state tracking.

use std::collections::HashMap;

/// Lifecycle of one chunk inside a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight,
    Stored,
    Failed,
}

/// Lifecycle of a whole run. `Committed` is reached only when every chunk
/// is `Stored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Committed,
    Aborted,
}

/// Index-ordered chunk bookkeeping for one run. Lookup is by chunk id,
/// since that is what the outcome stream tags results with.
#[derive(Debug, Default)]
pub struct ChunkLedger {
    ids: Vec<String>,
    states: Vec<ChunkState>,
    index_by_id: HashMap<String, usize>,
}

impl ChunkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next chunk (index order) as `Pending`.
    pub fn push(&mut self, id: String) {
        let index = self.ids.len();
        self.index_by_id.insert(id.clone(), index);
        self.ids.push(id);
        self.states.push(ChunkState::Pending);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn mark_in_flight(&mut self, id: &str) {
        self.set(id, ChunkState::InFlight);
    }

    pub fn mark_stored(&mut self, id: &str) {
        self.set(id, ChunkState::Stored);
    }

    pub fn mark_failed(&mut self, id: &str) {
        self.set(id, ChunkState::Failed);
    }

    fn set(&mut self, id: &str, state: ChunkState) {
        if let Some(&index) = self.index_by_id.get(id) {
            self.states[index] = state;
        }
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_by_id.get(id).copied()
    }

    pub fn state_of(&self, id: &str) -> Option<ChunkState> {
        self.index_of(id).map(|i| self.states[i])
    }

    pub fn all_stored(&self) -> bool {
        self.states.iter().all(|s| *s == ChunkState::Stored)
    }

    /// Ids of chunks that made it to the backend, in index order.
    pub fn stored_ids(&self) -> Vec<String> {
        self.ids
            .iter()
            .zip(&self.states)
            .filter(|(_, s)| **s == ChunkState::Stored)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_transitions_by_id() {
        let mut ledger = ChunkLedger::new();
        ledger.push("a".into());
        ledger.push("b".into());

        assert_eq!(ledger.state_of("a"), Some(ChunkState::Pending));
        ledger.mark_in_flight("a");
        ledger.mark_stored("a");
        ledger.mark_in_flight("b");
        ledger.mark_failed("b");

        assert_eq!(ledger.state_of("a"), Some(ChunkState::Stored));
        assert_eq!(ledger.state_of("b"), Some(ChunkState::Failed));
        assert!(!ledger.all_stored());
        assert_eq!(ledger.stored_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn empty_ledger_is_all_stored() {
        // zero-chunk files commit trivially
        assert!(ChunkLedger::new().all_stored());
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut ledger = ChunkLedger::new();
        ledger.push("a".into());
        ledger.mark_stored("nope");
        assert_eq!(ledger.state_of("a"), Some(ChunkState::Pending));
    }
}
