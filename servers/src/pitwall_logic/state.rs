use lib_pitwall::LiveEngine;
use lib_pitwall::core::ConnectionHub;
use std::sync::Arc;

/// Shared by every route: the engine and the connection registry it delivers through.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LiveEngine>,
    pub hub: Arc<ConnectionHub>,
}

impl AppState {
    pub fn new(engine: Arc<LiveEngine>, hub: Arc<ConnectionHub>) -> Self {
        Self { engine, hub }
    }
}
