//! Video metadata catalog
//!
//! A video is stored as an aggregate: the video row plus its encoded
//! variants, subtitle tracks and course links. Writers send the complete
//! desired aggregate and the catalog reconciles each child collection
//! against what is stored.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use catalog::{MemoryStore, VideoPayload, VideoService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::with_profiles(&["mobile", "desktop"]).await?;
//! let service = VideoService::new(Arc::new(store));
//!
//! let payload: VideoPayload = serde_json::from_value(serde_json::json!({
//!     "edx_video_id": "fish",
//!     "duration": 122.0,
//!     "status": "test",
//!     "encoded_videos": [
//!         {"profile": "mobile", "url": "http://example.com/fish.mp4", "file_size": 11, "bitrate": 22}
//!     ]
//! }))?;
//! let video = service.create(payload).await?;
//! assert_eq!(video.encoded_videos.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod models;
pub mod profiles;
pub mod query;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod validation;
pub mod xml;

pub use error::{
    CatalogError, CatalogResult, ErrorEntry, FieldError, NON_FIELD_ERRORS, StoreError,
    StoreResult, ValidationErrors,
};
pub use models::*;
pub use profiles::ProfileRegistry;
pub use query::VideoQueries;
pub use service::{DEFAULT_WRITE_ATTEMPTS, VideoService};
pub use store::{MemoryStore, PgStore, StoreTransaction, VideoStore};
