//! Read side of the catalog
//!
//! Aggregates are assembled from four reads regardless of how many videos are
//! requested: the video rows, then each child table in one batch.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{CatalogError, CatalogResult};
use crate::models::{
    CourseVideoInfo, EncodedVideoView, Profile, ProfileUrl, SortDirection, Subtitle,
    SubtitleContent, SubtitleView, Video, VideoAggregate, VideoFilter, VideoSort, VideoSortField,
    video_url,
};
use crate::store::VideoStore;
use crate::validation::is_valid_id;
use crate::xml;

/// Order `videos` by `sort`, breaking ties on `edx_video_id`.
/// A descending sort reverses the tie-break as well. Text compares byte-wise,
/// matching the `COLLATE "C"` ordering of the PostgreSQL store.
pub fn sort_videos(videos: &mut [Video], sort: VideoSort) {
    videos.sort_by(|a, b| {
        let primary = match sort.field {
            VideoSortField::Created => a.created_at.cmp(&b.created_at),
            VideoSortField::EdxVideoId => Ordering::Equal,
            VideoSortField::ClientVideoId => a.client_video_id.cmp(&b.client_video_id),
            VideoSortField::Duration => a.duration.total_cmp(&b.duration),
        };
        let ordering = primary.then_with(|| a.edx_video_id.cmp(&b.edx_video_id));
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Read-only access to video aggregates
#[derive(Clone)]
pub struct VideoQueries {
    store: Arc<dyn VideoStore>,
}

impl VideoQueries {
    pub fn new(store: Arc<dyn VideoStore>) -> Self {
        Self { store }
    }

    async fn video(&self, edx_video_id: &str) -> CatalogResult<Video> {
        if !is_valid_id(edx_video_id) {
            return Err(CatalogError::VideoNotFound(edx_video_id.to_string()));
        }
        self.store
            .find_video(edx_video_id)
            .await?
            .ok_or_else(|| CatalogError::VideoNotFound(edx_video_id.to_string()))
    }

    /// One video with its variants, subtitles and courses
    pub async fn get(&self, edx_video_id: &str) -> CatalogResult<VideoAggregate> {
        let video = self.video(edx_video_id).await?;
        let mut aggregates = self.assemble(vec![video]).await?;
        aggregates
            .pop()
            .ok_or_else(|| CatalogError::VideoNotFound(edx_video_id.to_string()))
    }

    pub async fn list(&self, filter: &VideoFilter) -> CatalogResult<Vec<VideoAggregate>> {
        let videos = self.store.list_videos(filter).await?;
        self.assemble(videos).await
    }

    /// Aggregates for the given ids; unknown ids are skipped
    pub async fn videos_for_ids(
        &self,
        edx_video_ids: &[String],
        sort: Option<VideoSort>,
    ) -> CatalogResult<Vec<VideoAggregate>> {
        let filter = VideoFilter {
            edx_video_ids: Some(edx_video_ids.to_vec()),
            sort,
            ..VideoFilter::default()
        };
        self.list(&filter).await
    }

    pub async fn videos_for_course(
        &self,
        course_id: &str,
        sort: Option<VideoSort>,
    ) -> CatalogResult<Vec<VideoAggregate>> {
        let filter = VideoFilter {
            sort,
            ..VideoFilter::course(course_id)
        };
        self.list(&filter).await
    }

    /// Url of each requested profile for one video, `None` where the video
    /// has no variant for that profile or does not exist
    pub async fn urls_for_profiles(
        &self,
        edx_video_id: &str,
        profiles: &[String],
    ) -> CatalogResult<BTreeMap<String, Option<String>>> {
        let mut urls: BTreeMap<String, Option<String>> =
            profiles.iter().map(|p| (p.clone(), None)).collect();
        let video = match self.video(edx_video_id).await {
            Ok(video) => video,
            Err(CatalogError::VideoNotFound(_)) => return Ok(urls),
            Err(e) => return Err(e),
        };
        let variants = self.store.encoded_videos_for(&[video.id]).await?;

        for variant in variants {
            if let Some(slot) = urls.get_mut(&variant.profile_name) {
                *slot = Some(variant.url);
            }
        }
        Ok(urls)
    }

    /// The video and its variants as an `edx_video` XML element
    pub async fn export_xml(&self, edx_video_id: &str) -> CatalogResult<String> {
        let video = self.video(edx_video_id).await?;
        let variants = self.store.encoded_videos_for(&[video.id]).await?;
        xml::write_video(&video, &variants).map_err(|e| CatalogError::Export(e.to_string()))
    }

    pub async fn url_for_profile(
        &self,
        edx_video_id: &str,
        profile: &str,
    ) -> CatalogResult<Option<String>> {
        let mut urls = self
            .urls_for_profiles(edx_video_id, &[profile.to_string()])
            .await?;
        Ok(urls.remove(profile).flatten())
    }

    /// Duration and per-profile urls of every video in `course_id` that has
    /// at least one variant in `profiles`, keyed by edx video id
    pub async fn video_info_for_course_and_profiles(
        &self,
        course_id: &str,
        profiles: &[String],
    ) -> CatalogResult<BTreeMap<String, CourseVideoInfo>> {
        let videos = self.store.list_videos(&VideoFilter::course(course_id)).await?;
        let ids: Vec<i64> = videos.iter().map(|v| v.id).collect();
        let variants = if ids.is_empty() {
            Vec::new()
        } else {
            self.store.encoded_videos_for(&ids).await?
        };
        let by_id: HashMap<i64, &Video> = videos.iter().map(|v| (v.id, v)).collect();

        let mut info: BTreeMap<String, CourseVideoInfo> = BTreeMap::new();
        for variant in variants {
            if !profiles.contains(&variant.profile_name) {
                continue;
            }
            let Some(video) = by_id.get(&variant.video_id) else {
                continue;
            };
            info.entry(video.edx_video_id.clone())
                .or_insert_with(|| CourseVideoInfo {
                    duration: video.duration,
                    profiles: BTreeMap::new(),
                })
                .profiles
                .insert(
                    variant.profile_name,
                    ProfileUrl {
                        url: variant.url,
                        file_size: variant.file_size,
                    },
                );
        }
        Ok(info)
    }

    async fn find_subtitle(&self, edx_video_id: &str, language: &str) -> CatalogResult<Subtitle> {
        let not_found = || CatalogError::SubtitleNotFound {
            edx_video_id: edx_video_id.to_string(),
            language: language.to_string(),
        };
        let video = match self.video(edx_video_id).await {
            Ok(video) => video,
            Err(CatalogError::VideoNotFound(_)) => return Err(not_found()),
            Err(e) => return Err(e),
        };
        self.store
            .find_subtitle(video.id, language)
            .await?
            .ok_or_else(not_found)
    }

    pub async fn subtitle(&self, edx_video_id: &str, language: &str) -> CatalogResult<SubtitleView> {
        let subtitle = self.find_subtitle(edx_video_id, language).await?;
        Ok(SubtitleView::new(edx_video_id, &subtitle))
    }

    /// Raw content of one track with the MIME type it is served as
    pub async fn subtitle_content(
        &self,
        edx_video_id: &str,
        language: &str,
    ) -> CatalogResult<SubtitleContent> {
        let subtitle = self.find_subtitle(edx_video_id, language).await?;
        Ok(SubtitleContent {
            content_type: subtitle.fmt.content_type(),
            content: subtitle.content,
        })
    }

    pub async fn list_profiles(&self) -> CatalogResult<Vec<Profile>> {
        Ok(self.store.list_profiles().await?)
    }

    async fn assemble(&self, videos: Vec<Video>) -> CatalogResult<Vec<VideoAggregate>> {
        if videos.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = videos.iter().map(|v| v.id).collect();

        let mut variants: HashMap<i64, Vec<EncodedVideoView>> = HashMap::new();
        for row in self.store.encoded_videos_for(&ids).await? {
            variants
                .entry(row.video_id)
                .or_default()
                .push(EncodedVideoView::from(&row));
        }
        let mut subtitles: HashMap<i64, Vec<Subtitle>> = HashMap::new();
        for row in self.store.subtitles_for(&ids).await? {
            subtitles.entry(row.video_id).or_default().push(row);
        }
        let mut courses: HashMap<i64, Vec<String>> = HashMap::new();
        for row in self.store.courses_for(&ids).await? {
            courses.entry(row.video_id).or_default().push(row.course_id);
        }

        Ok(videos
            .into_iter()
            .map(|video| VideoAggregate {
                url: video_url(&video.edx_video_id),
                encoded_videos: variants.remove(&video.id).unwrap_or_default(),
                subtitles: subtitles
                    .remove(&video.id)
                    .unwrap_or_default()
                    .iter()
                    .map(|row| SubtitleView::new(&video.edx_video_id, row))
                    .collect(),
                courses: courses.remove(&video.id).unwrap_or_default(),
                edx_video_id: video.edx_video_id,
                client_video_id: video.client_video_id,
                duration: video.duration,
                status: video.status,
                created: video.created_at,
            })
            .collect())
    }
}
