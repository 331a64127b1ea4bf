//! In-memory store for tests and local development
//!
//! A transaction takes the store lock for its whole lifetime and works on a
//! private copy of the tables; commit swaps the copy in, so writers are fully
//! serialized and an uncommitted transaction leaves no trace.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{StoreTransaction, VideoStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    CourseVideo, EncodedVideo, Profile, Subtitle, SubtitleSpec, VariantSpec, Video, VideoFields,
    VideoFilter, YOUTUBE_PROFILE,
};
use crate::query::sort_videos;

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,
    videos: BTreeMap<i64, Video>,
    profiles: BTreeMap<i64, Profile>,
    encoded_videos: BTreeMap<i64, EncodedVideo>,
    subtitles: BTreeMap<i64, Subtitle>,
    course_videos: BTreeMap<i64, CourseVideo>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn video_by_edx_id(&self, edx_video_id: &str) -> Option<&Video> {
        self.videos.values().find(|v| v.edx_video_id == edx_video_id)
    }

    fn matches(&self, video: &Video, filter: &VideoFilter) -> bool {
        if let Some(course_id) = &filter.course_id {
            let linked = self
                .course_videos
                .values()
                .any(|c| c.video_id == video.id && &c.course_id == course_id);
            if !linked {
                return false;
            }
        }
        if let Some(youtube_id) = &filter.youtube_id {
            let hosted = self.encoded_videos.values().any(|e| {
                e.video_id == video.id && e.profile_name == YOUTUBE_PROFILE && &e.url == youtube_id
            });
            if !hosted {
                return false;
            }
        }
        if let Some(ids) = &filter.edx_video_ids {
            if !ids.contains(&video.edx_video_id) {
                return false;
            }
        }
        true
    }

    fn profile(&self, profile_id: i64) -> StoreResult<&Profile> {
        self.profiles
            .get(&profile_id)
            .ok_or_else(|| StoreError::MissingRow(format!("profile {}", profile_id)))
    }
}

/// Store keeping every table in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with the given profile names
    pub async fn with_profiles(names: &[&str]) -> StoreResult<Self> {
        let store = Self::new();
        let mut tx = store.begin().await?;
        for name in names {
            tx.insert_profile(name, name).await?;
        }
        tx.commit().await?;
        Ok(store)
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn find_video(&self, edx_video_id: &str) -> StoreResult<Option<Video>> {
        let tables = self.tables.lock().await;
        Ok(tables.video_by_edx_id(edx_video_id).cloned())
    }

    async fn list_videos(&self, filter: &VideoFilter) -> StoreResult<Vec<Video>> {
        let tables = self.tables.lock().await;
        let mut videos: Vec<Video> = tables
            .videos
            .values()
            .filter(|video| tables.matches(video, filter))
            .cloned()
            .collect();
        if let Some(sort) = filter.sort {
            sort_videos(&mut videos, sort);
        }
        Ok(videos)
    }

    async fn encoded_videos_for(&self, video_ids: &[i64]) -> StoreResult<Vec<EncodedVideo>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .encoded_videos
            .values()
            .filter(|e| video_ids.contains(&e.video_id))
            .cloned()
            .collect())
    }

    async fn subtitles_for(&self, video_ids: &[i64]) -> StoreResult<Vec<Subtitle>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .subtitles
            .values()
            .filter(|s| video_ids.contains(&s.video_id))
            .cloned()
            .collect())
    }

    async fn courses_for(&self, video_ids: &[i64]) -> StoreResult<Vec<CourseVideo>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .course_videos
            .values()
            .filter(|c| video_ids.contains(&c.video_id))
            .cloned()
            .collect())
    }

    async fn find_subtitle(&self, video_id: i64, language: &str) -> StoreResult<Option<Subtitle>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .subtitles
            .values()
            .find(|s| s.video_id == video_id && s.language == language)
            .cloned())
    }

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        let tables = self.tables.lock().await;
        Ok(tables.profiles.values().cloned().collect())
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(true)
    }
}

/// Transaction over a private copy of the tables
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_video(&mut self, edx_video_id: &str) -> StoreResult<Option<Video>> {
        Ok(self.working.video_by_edx_id(edx_video_id).cloned())
    }

    async fn insert_video(
        &mut self,
        edx_video_id: &str,
        fields: &VideoFields,
    ) -> StoreResult<Video> {
        if self.working.video_by_edx_id(edx_video_id).is_some() {
            return Err(StoreError::UniqueViolation(
                "videos_edx_video_id_key".to_string(),
            ));
        }
        let video = Video {
            id: self.working.allocate_id(),
            edx_video_id: edx_video_id.to_string(),
            client_video_id: fields.client_video_id.clone(),
            duration: fields.duration,
            status: fields.status.clone(),
            created_at: Utc::now(),
        };
        self.working.videos.insert(video.id, video.clone());
        Ok(video)
    }

    async fn update_video(&mut self, video_id: i64, fields: &VideoFields) -> StoreResult<()> {
        let video = self
            .working
            .videos
            .get_mut(&video_id)
            .ok_or_else(|| StoreError::MissingRow(format!("video {}", video_id)))?;
        video.client_video_id = fields.client_video_id.clone();
        video.duration = fields.duration;
        video.status = fields.status.clone();
        Ok(())
    }

    async fn delete_video(&mut self, video_id: i64) -> StoreResult<()> {
        let tables = &mut self.working;
        tables.videos.remove(&video_id);
        tables.encoded_videos.retain(|_, e| e.video_id != video_id);
        tables.subtitles.retain(|_, s| s.video_id != video_id);
        tables.course_videos.retain(|_, c| c.video_id != video_id);
        Ok(())
    }

    async fn find_profiles(&mut self, names: &[String]) -> StoreResult<Vec<Profile>> {
        Ok(self
            .working
            .profiles
            .values()
            .filter(|p| names.contains(&p.profile_name))
            .cloned()
            .collect())
    }

    async fn insert_profile(&mut self, profile_name: &str, label: &str) -> StoreResult<Profile> {
        if self
            .working
            .profiles
            .values()
            .any(|p| p.profile_name == profile_name)
        {
            return Err(StoreError::UniqueViolation(
                "profiles_profile_name_key".to_string(),
            ));
        }
        let profile = Profile {
            id: self.working.allocate_id(),
            profile_name: profile_name.to_string(),
            label: label.to_string(),
        };
        self.working.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn encoded_videos(&mut self, video_id: i64) -> StoreResult<Vec<EncodedVideo>> {
        Ok(self
            .working
            .encoded_videos
            .values()
            .filter(|e| e.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn insert_encoded_video(
        &mut self,
        video_id: i64,
        spec: &VariantSpec,
    ) -> StoreResult<()> {
        if self
            .working
            .encoded_videos
            .values()
            .any(|e| e.video_id == video_id && e.profile_id == spec.profile_id)
        {
            return Err(StoreError::UniqueViolation(
                "encoded_videos_video_profile_key".to_string(),
            ));
        }
        let profile_name = self.working.profile(spec.profile_id)?.profile_name.clone();
        let now = Utc::now();
        let row = EncodedVideo {
            id: self.working.allocate_id(),
            video_id,
            profile_id: spec.profile_id,
            profile_name,
            url: spec.url.clone(),
            file_size: spec.file_size,
            bitrate: spec.bitrate,
            metadata: spec.metadata.clone(),
            created_at: now,
            modified_at: now,
        };
        self.working.encoded_videos.insert(row.id, row);
        Ok(())
    }

    async fn update_encoded_video(&mut self, row_id: i64, spec: &VariantSpec) -> StoreResult<()> {
        let row = self
            .working
            .encoded_videos
            .get_mut(&row_id)
            .ok_or_else(|| StoreError::MissingRow(format!("encoded video {}", row_id)))?;
        row.url = spec.url.clone();
        row.file_size = spec.file_size;
        row.bitrate = spec.bitrate;
        row.metadata = spec.metadata.clone();
        row.modified_at = Utc::now();
        Ok(())
    }

    async fn delete_encoded_videos(&mut self, row_ids: &[i64]) -> StoreResult<()> {
        for row_id in row_ids {
            self.working.encoded_videos.remove(row_id);
        }
        Ok(())
    }

    async fn subtitles(&mut self, video_id: i64) -> StoreResult<Vec<Subtitle>> {
        Ok(self
            .working
            .subtitles
            .values()
            .filter(|s| s.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn insert_subtitle(&mut self, video_id: i64, spec: &SubtitleSpec) -> StoreResult<()> {
        if self
            .working
            .subtitles
            .values()
            .any(|s| s.video_id == video_id && s.language == spec.language)
        {
            return Err(StoreError::UniqueViolation(
                "subtitles_video_language_key".to_string(),
            ));
        }
        let now = Utc::now();
        let row = Subtitle {
            id: self.working.allocate_id(),
            video_id,
            fmt: spec.fmt,
            language: spec.language.clone(),
            content: spec.content.clone(),
            created_at: now,
            modified_at: now,
        };
        self.working.subtitles.insert(row.id, row);
        Ok(())
    }

    async fn update_subtitle(&mut self, row_id: i64, spec: &SubtitleSpec) -> StoreResult<()> {
        let row = self
            .working
            .subtitles
            .get_mut(&row_id)
            .ok_or_else(|| StoreError::MissingRow(format!("subtitle {}", row_id)))?;
        row.fmt = spec.fmt;
        row.content = spec.content.clone();
        row.modified_at = Utc::now();
        Ok(())
    }

    async fn delete_subtitles(&mut self, row_ids: &[i64]) -> StoreResult<()> {
        for row_id in row_ids {
            self.working.subtitles.remove(row_id);
        }
        Ok(())
    }

    async fn courses(&mut self, video_id: i64) -> StoreResult<Vec<CourseVideo>> {
        Ok(self
            .working
            .course_videos
            .values()
            .filter(|c| c.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn insert_course(&mut self, video_id: i64, course_id: &str) -> StoreResult<()> {
        if self
            .working
            .course_videos
            .values()
            .any(|c| c.video_id == video_id && c.course_id == course_id)
        {
            return Err(StoreError::UniqueViolation(
                "course_videos_course_video_key".to_string(),
            ));
        }
        let row = CourseVideo {
            id: self.working.allocate_id(),
            video_id,
            course_id: course_id.to_string(),
        };
        self.working.course_videos.insert(row.id, row);
        Ok(())
    }

    async fn delete_courses(&mut self, row_ids: &[i64]) -> StoreResult<()> {
        for row_id in row_ids {
            self.working.course_videos.remove(row_id);
        }
        Ok(())
    }

    async fn link_videos_to_course(
        &mut self,
        video_ids: &[i64],
        course_id: &str,
    ) -> StoreResult<u64> {
        let mut linked = 0;
        for &video_id in video_ids {
            let exists = self
                .working
                .course_videos
                .values()
                .any(|c| c.video_id == video_id && c.course_id == course_id);
            if !exists {
                let row = CourseVideo {
                    id: self.working.allocate_id(),
                    video_id,
                    course_id: course_id.to_string(),
                };
                self.working.course_videos.insert(row.id, row);
                linked += 1;
            }
        }
        Ok(linked)
    }

    async fn videos_for_course(&mut self, course_id: &str) -> StoreResult<Vec<Video>> {
        let filter = VideoFilter::course(course_id);
        let tables = &self.working;
        Ok(tables
            .videos
            .values()
            .filter(|video| tables.matches(video, &filter))
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
