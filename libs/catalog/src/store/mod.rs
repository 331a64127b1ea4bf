//! Storage seam for the catalog
//!
//! The catalog talks to its relational store only through these traits. A
//! [`StoreTransaction`] groups every write of one aggregate request; dropping
//! it without calling [`StoreTransaction::commit`] rolls everything back.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::models::{
    CourseVideo, EncodedVideo, Profile, Subtitle, SubtitleSpec, VariantSpec, Video, VideoFields,
    VideoFilter,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read access plus transaction factory
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Open a serializable write transaction
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    async fn find_video(&self, edx_video_id: &str) -> StoreResult<Option<Video>>;

    /// Videos matching `filter`, in insertion order unless a sort is given
    async fn list_videos(&self, filter: &VideoFilter) -> StoreResult<Vec<Video>>;

    /// Variants of all given videos in one read, ordered by insertion
    async fn encoded_videos_for(&self, video_ids: &[i64]) -> StoreResult<Vec<EncodedVideo>>;

    /// Subtitles of all given videos in one read, ordered by insertion
    async fn subtitles_for(&self, video_ids: &[i64]) -> StoreResult<Vec<Subtitle>>;

    /// Course links of all given videos in one read, ordered by insertion
    async fn courses_for(&self, video_ids: &[i64]) -> StoreResult<Vec<CourseVideo>>;

    async fn find_subtitle(&self, video_id: i64, language: &str) -> StoreResult<Option<Subtitle>>;

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>>;

    async fn health_check(&self) -> StoreResult<bool>;
}

/// Writes belonging to one aggregate request
#[async_trait]
pub trait StoreTransaction: Send {
    /// Look up a video and hold it against concurrent writers until commit
    async fn lock_video(&mut self, edx_video_id: &str) -> StoreResult<Option<Video>>;

    async fn insert_video(&mut self, edx_video_id: &str, fields: &VideoFields)
    -> StoreResult<Video>;

    async fn update_video(&mut self, video_id: i64, fields: &VideoFields) -> StoreResult<()>;

    /// Delete a video together with every row it owns
    async fn delete_video(&mut self, video_id: i64) -> StoreResult<()>;

    /// Profiles whose name is in `names`; unknown names are simply absent
    async fn find_profiles(&mut self, names: &[String]) -> StoreResult<Vec<Profile>>;

    async fn insert_profile(&mut self, profile_name: &str, label: &str) -> StoreResult<Profile>;

    async fn encoded_videos(&mut self, video_id: i64) -> StoreResult<Vec<EncodedVideo>>;

    async fn insert_encoded_video(&mut self, video_id: i64, spec: &VariantSpec)
    -> StoreResult<()>;

    async fn update_encoded_video(&mut self, row_id: i64, spec: &VariantSpec) -> StoreResult<()>;

    async fn delete_encoded_videos(&mut self, row_ids: &[i64]) -> StoreResult<()>;

    async fn subtitles(&mut self, video_id: i64) -> StoreResult<Vec<Subtitle>>;

    async fn insert_subtitle(&mut self, video_id: i64, spec: &SubtitleSpec) -> StoreResult<()>;

    async fn update_subtitle(&mut self, row_id: i64, spec: &SubtitleSpec) -> StoreResult<()>;

    async fn delete_subtitles(&mut self, row_ids: &[i64]) -> StoreResult<()>;

    async fn courses(&mut self, video_id: i64) -> StoreResult<Vec<CourseVideo>>;

    async fn insert_course(&mut self, video_id: i64, course_id: &str) -> StoreResult<()>;

    async fn delete_courses(&mut self, row_ids: &[i64]) -> StoreResult<()>;

    /// Link every video in `video_ids` to `course_id` in one write, skipping
    /// existing links. Returns the number of links created.
    async fn link_videos_to_course(&mut self, video_ids: &[i64], course_id: &str)
    -> StoreResult<u64>;

    /// Videos linked to `course_id`
    async fn videos_for_course(&mut self, course_id: &str) -> StoreResult<Vec<Video>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
