//! Bounded window of recently counted event ids.

use std::collections::{HashSet, VecDeque};

use event_store::EventId;
use tokio::sync::Mutex;

#[derive(Default)]
struct Window {
    ids: HashSet<EventId>,
    order: VecDeque<EventId>,
}

/// Remembers the last `capacity` event ids that were counted so that a
/// redelivered change is not counted twice.
///
/// The window is in memory and bounded: a duplicate arriving after
/// `capacity` newer events, or after a restart, is counted again.
pub struct RecentEventIds {
    capacity: usize,
    window: Mutex<Window>,
}

impl RecentEventIds {
    /// Creates a window holding at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Mutex::new(Window::default()),
        }
    }

    /// Maximum number of ids remembered.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claims an id before counting it. Returns false if the id is already
    /// in the window.
    pub async fn claim(&self, event_id: EventId) -> bool {
        let mut window = self.window.lock().await;
        if !window.ids.insert(event_id) {
            return false;
        }
        window.order.push_back(event_id);
        while window.order.len() > self.capacity {
            if let Some(evicted) = window.order.pop_front() {
                window.ids.remove(&evicted);
            }
        }
        true
    }

    /// Gives back a claim whose increment failed, so a retry counts it.
    pub async fn release(&self, event_id: EventId) {
        let mut window = self.window.lock().await;
        if window.ids.remove(&event_id) {
            window.order.retain(|id| *id != event_id);
        }
    }

    /// Number of ids currently remembered.
    pub async fn len(&self) -> usize {
        self.window.lock().await.ids.len()
    }

    /// Whether no ids are remembered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
