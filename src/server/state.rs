//! Shared application state for the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{Config, ConnectionSettings};
use crate::hub::{Broadcaster, Registry};
use crate::shutdown::ShutdownSignal;

/// Application state shared across all handlers.
#[derive(Debug)]
pub struct AppState {
    /// Live subscribers.
    pub registry: Arc<Registry>,

    pub broadcaster: Broadcaster,

    /// Applied to every accepted connection.
    pub connection: ConnectionSettings,

    /// File being tailed, reported by `/health`.
    pub file: PathBuf,

    pub started_at: DateTime<Utc>,

    pub shutdown: ShutdownSignal,
}

impl AppState {
    /// Creates new app state around the given broadcaster.
    pub fn new(config: &Config, broadcaster: Broadcaster, shutdown: ShutdownSignal) -> Self {
        Self {
            registry: Arc::clone(broadcaster.registry()),
            broadcaster,
            connection: config.connection,
            file: config.file.clone(),
            started_at: Utc::now(),
            shutdown,
        }
    }
}
