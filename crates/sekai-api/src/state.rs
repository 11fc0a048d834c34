//! Shared application context for the HTTP facade.

use std::collections::HashMap;
use std::sync::Arc;

use sekai_client::SekaiClientManager;
use sekai_core::{SekaiError, ServerRegion};

use crate::users::UserStore;

/// Everything the facade handlers need, constructed once at startup and
/// injected through axum state.
pub struct AppContext {
    pub managers: HashMap<ServerRegion, Arc<SekaiClientManager>>,
    /// `None` disables facade authentication entirely.
    pub users: Option<UserStore>,
}

impl AppContext {
    /// Resolves a path segment to the region's pool.
    pub fn manager(&self, server: &str) -> Result<Arc<SekaiClientManager>, SekaiError> {
        let region: ServerRegion = server.parse()?;
        self.managers
            .get(&region)
            .cloned()
            .ok_or(SekaiError::NoClientAvailable)
    }
}
