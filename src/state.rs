use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::media::MediaSource;
use crate::session::SessionRegistry;

/// Application-wide state shared across handlers
///
/// Signaling connections reach the media engine only through `registry`;
/// `source` is the producer every session consumes.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// The video source offered to clients
    pub source: MediaSource,
    /// Live signaling sessions
    pub registry: Arc<SessionRegistry>,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ConfigStore,
        source: MediaSource,
        registry: Arc<SessionRegistry>,
        events: Arc<EventBus>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            source,
            registry,
            events,
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
