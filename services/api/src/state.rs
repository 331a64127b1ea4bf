//! Application state shared across handlers

use std::sync::Arc;

use catalog::{VideoQueries, VideoService, VideoStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VideoStore>,
    pub videos: VideoService,
}

impl AppState {
    pub fn new(store: Arc<dyn VideoStore>) -> Self {
        let videos = VideoService::new(store.clone());
        Self { store, videos }
    }

    /// See [`VideoService::with_write_attempts`]
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.videos = self.videos.with_write_attempts(attempts);
        self
    }

    pub fn queries(&self) -> &VideoQueries {
        self.videos.queries()
    }
}
