use ahash::AHashSet as HashSet;
use parking_lot::Mutex;
use policy_agent_core::RuleId;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::Notify;

/// A deduplicating FIFO of dirty rule IDs.
///
/// `push` collapses IDs that are already pending, so a burst of mutations
/// touching the same rule costs the consumer one sync. Once an ID has been
/// popped it may be pushed again; the consumer re-reads the cache anyway.
///
/// `push` never blocks, which makes it safe to call from the cache's dirty
/// handler while the cache lock is held.
#[derive(Clone, Debug, Default)]
pub struct DirtyQueue(Arc<Shared>);

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct State {
    order: VecDeque<RuleId>,
    pending: HashSet<RuleId>,
}

// === impl DirtyQueue ===

impl DirtyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an ID unless it is already pending.
    pub fn push(&self, id: RuleId) {
        let mut state = self.0.state.lock();
        if state.pending.insert(id.clone()) {
            state.order.push_back(id);
            drop(state);
            self.0.notify.notify_one();
        }
    }

    /// Dequeues the oldest pending ID, waiting for one to arrive if the
    /// queue is empty.
    pub async fn pop(&self) -> RuleId {
        loop {
            // Register for notification before checking so a push between
            // the check and the await is not lost.
            let notified = self.0.notify.notified();
            if let Some(id) = self.take() {
                return id;
            }
            notified.await;
        }
    }

    fn take(&self) -> Option<RuleId> {
        let mut state = self.0.state.lock();
        let id = state.order.pop_front()?;
        state.pending.remove(&id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.0.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
