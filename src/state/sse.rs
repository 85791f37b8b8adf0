use tokio::sync::{Mutex, broadcast};

use crate::dto::sse::ServerEvent;

const PUBLIC_CAPACITY: usize = 64;
const ADMIN_CAPACITY: usize = 32;

/// Broadcast hubs of both SSE streams plus the admin token slot.
pub struct SseState {
    public: SseHub,
    admin: SseHub,
    /// Token of the single connected admin stream, `None` while nobody holds it.
    admin_token: Mutex<Option<String>>,
}

impl SseState {
    pub fn new() -> Self {
        Self {
            public: SseHub::new(PUBLIC_CAPACITY),
            admin: SseHub::new(ADMIN_CAPACITY),
            admin_token: Mutex::new(None),
        }
    }

    pub fn public(&self) -> &SseHub {
        &self.public
    }

    pub fn admin(&self) -> &SseHub {
        &self.admin
    }

    pub fn admin_token(&self) -> &Mutex<Option<String>> {
        &self.admin_token
    }
}

impl Default for SseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Fan-out of [`ServerEvent`]s to every subscriber of one stream.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers. Events sent with nobody listening are dropped.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}
