//! HTTP API for pagemate
//!
//! Frontends post commands and hold one SSE stream per target for the
//! events of the streaming requests they start.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::channel::TargetRegistry;
use crate::router::RequestRouter;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<RequestRouter>,
    pub targets: Arc<TargetRegistry>,
}

impl AppState {
    pub fn new(router: Arc<RequestRouter>, targets: Arc<TargetRegistry>) -> Self {
        Self { router, targets }
    }
}
