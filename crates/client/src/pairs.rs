//! Round-robin queue of negotiated pairs per origin

use std::collections::{HashMap, VecDeque};

use mterelay_core::{Origin, PairId, RelayError, Result};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
pub struct PairRegistry {
    queues: Mutex<HashMap<Origin, VecDeque<PairId>>>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair whose encoder and decoder states are already stored
    pub fn enqueue(&self, origin: &Origin, pair_id: PairId) {
        self.queues
            .lock()
            .entry(origin.clone())
            .or_default()
            .push_back(pair_id);
    }

    /// Rotate the queue and return the pair that was at its head
    pub fn acquire_next(&self, origin: &Origin) -> Result<PairId> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(origin)
            .ok_or_else(|| RelayError::QueueEmpty(origin.to_string()))?;
        let pair_id = queue
            .pop_front()
            .ok_or_else(|| RelayError::QueueEmpty(origin.to_string()))?;
        queue.push_back(pair_id.clone());
        Ok(pair_id)
    }

    /// Drop a pair; its stored states are left orphaned
    pub fn evict(&self, origin: &Origin, pair_id: &PairId) -> bool {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(origin) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|p| p != pair_id);
        let removed = queue.len() != before;
        if removed {
            debug!("Evicted pair {} for {}", pair_id.short(), origin);
        }
        removed
    }

    pub fn len(&self, origin: &Origin) -> usize {
        self.queues.lock().get(origin).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, origin: &Origin) -> bool {
        self.len(origin) == 0
    }

    /// Drop every pair for an origin, returning them
    pub fn clear(&self, origin: &Origin) -> Vec<PairId> {
        self.queues
            .lock()
            .remove(origin)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Queue contents in rotation order
    pub fn pairs(&self, origin: &Origin) -> Vec<PairId> {
        self.queues
            .lock()
            .get(origin)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}
