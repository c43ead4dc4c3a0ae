pub mod error;
pub mod locations;
pub mod memory;
pub mod ports;
pub mod subscriptions;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use error::{GatewayError, StoreError};
use ports::{ContextDirectory, MessageStore, SessionValidator};

/// Opaque handle for one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tunables for the gateway, filled from the server config.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub heartbeat_interval: Duration,
    pub max_content_length: usize,
    pub outbound_queue_capacity: usize,
    pub max_frame_bytes: usize,
    pub max_events_per_minute: u32,
    pub max_location_updates_per_minute: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_content_length: 4000,
            outbound_queue_capacity: 256,
            max_frame_bytes: 64 * 1024,
            max_events_per_minute: 240,
            max_location_updates_per_minute: 120,
        }
    }
}

/// Handles to every external collaborator. Cheap to clone.
#[derive(Clone)]
pub struct Collaborators {
    pub messages: Arc<dyn MessageStore>,
    pub contexts: Arc<dyn ContextDirectory>,
    pub sessions: Arc<dyn SessionValidator>,
}

impl Collaborators {
    /// Use one backend for all three ports.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: MessageStore + ContextDirectory + SessionValidator + 'static,
    {
        Self {
            messages: backend.clone(),
            contexts: backend.clone(),
            sessions: backend,
        }
    }
}
