use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Dispatches whose call task is still running, keyed by dispatch id.
#[derive(Clone, Default)]
pub struct DispatchRegistry {
    active: Arc<Mutex<HashMap<String, String>>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh dispatch id and the room its call runs in.
    pub fn allocate() -> (String, String) {
        let id = format!("AD_{}", Uuid::new_v4().simple());
        let room = format!("call-{id}");
        (id, room)
    }

    /// Track a dispatch and return how many are active in its room, itself included.
    pub fn insert(&self, dispatch_id: &str, room: &str) -> usize {
        let Ok(mut active) = self.active.lock() else {
            return 0;
        };
        active.insert(dispatch_id.to_string(), room.to_string());
        active.values().filter(|r| r.as_str() == room).count()
    }

    pub fn remove(&self, dispatch_id: &str) -> bool {
        self.active
            .lock()
            .map(|mut active| active.remove(dispatch_id).is_some())
            .unwrap_or(false)
    }

    /// Dispatches whose call is still running, across all rooms.
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }
}
