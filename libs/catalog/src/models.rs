//! Catalog models: stored rows, write payloads and read views

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile name used for YouTube-hosted variants
pub const YOUTUBE_PROFILE: &str = "youtube";

/// Subtitle content formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    /// SubRip plain timed text
    Srt,
    /// Structured JSON timed text
    Sjson,
}

impl SubtitleFormat {
    pub const ALL: [SubtitleFormat; 2] = [SubtitleFormat::Srt, SubtitleFormat::Sjson];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Sjson => "sjson",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|fmt| fmt.as_str() == value)
    }

    /// MIME type the content responder serves this format with
    pub fn content_type(&self) -> &'static str {
        match self {
            SubtitleFormat::Sjson => "application/json",
            SubtitleFormat::Srt => "text/plain",
        }
    }
}

impl fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding profile reference row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    #[serde(skip)]
    pub id: i64,
    pub profile_name: String,
    pub label: String,
}

/// Video row
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: i64,
    pub edx_video_id: String,
    pub client_video_id: String,
    pub duration: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Encoded variant row, joined with its profile name
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVideo {
    pub id: i64,
    pub video_id: i64,
    pub profile_id: i64,
    pub profile_name: String,
    pub url: String,
    pub file_size: i64,
    pub bitrate: i64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Subtitle track row
#[derive(Debug, Clone, PartialEq)]
pub struct Subtitle {
    pub id: i64,
    pub video_id: i64,
    pub fmt: SubtitleFormat,
    pub language: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Course association row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseVideo {
    pub id: i64,
    pub video_id: i64,
    pub course_id: String,
}

/// Incoming create/update body for a video aggregate.
///
/// Every field is optional at the wire level so that missing fields can be
/// reported in the structured error map instead of failing deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoPayload {
    pub edx_video_id: Option<String>,
    #[serde(alias = "title")]
    pub client_video_id: Option<String>,
    pub duration: Option<f64>,
    pub status: Option<String>,
    pub courses: Option<Vec<String>>,
    pub encoded_videos: Option<Vec<EncodedVideoPayload>>,
    pub subtitles: Option<Vec<SubtitlePayload>>,
}

/// Incoming encoded variant descriptor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncodedVideoPayload {
    pub profile: Option<String>,
    pub url: Option<String>,
    pub file_size: Option<i64>,
    pub bitrate: Option<i64>,
    pub metadata: Option<Value>,
}

/// Incoming subtitle track descriptor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubtitlePayload {
    pub language: Option<String>,
    pub fmt: Option<String>,
    pub content: Option<String>,
}

/// Incoming profile creation body
#[derive(Debug, Clone, Deserialize)]
pub struct ProfilePayload {
    pub profile_name: String,
    pub label: Option<String>,
}

/// How an update treats fields absent from the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Every scalar is required and an absent collection means "empty"
    Full,
    /// Absent scalars keep their values and absent collections are untouched
    Partial,
}

/// Validated scalar fields of a video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFields {
    pub client_video_id: String,
    pub duration: f64,
    pub status: String,
}

/// Validated encoded variant, with its profile resolved
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSpec {
    pub profile_id: i64,
    pub profile_name: String,
    pub url: String,
    pub file_size: i64,
    pub bitrate: i64,
    pub metadata: Value,
}

impl VariantSpec {
    /// True when writing these values over `row` would change nothing
    pub fn matches(&self, row: &EncodedVideo) -> bool {
        self.url == row.url
            && self.file_size == row.file_size
            && self.bitrate == row.bitrate
            && self.metadata == row.metadata
    }
}

/// Validated subtitle track
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleSpec {
    pub language: String,
    pub fmt: SubtitleFormat,
    pub content: String,
}

impl SubtitleSpec {
    pub fn matches(&self, row: &Subtitle) -> bool {
        self.fmt == row.fmt && self.content == row.content
    }
}

/// Fields a video listing can be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSortField {
    Created,
    EdxVideoId,
    ClientVideoId,
    Duration,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSort {
    pub field: VideoSortField,
    pub direction: SortDirection,
}

/// Filter for video listings. Every set criterion must match.
#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    /// Exact course id match
    pub course_id: Option<String>,
    /// Videos with a `youtube` variant whose url is this id
    pub youtube_id: Option<String>,
    /// Restrict to these edx video ids
    pub edx_video_ids: Option<Vec<String>>,
    /// Defaults to insertion order
    pub sort: Option<VideoSort>,
}

impl VideoFilter {
    pub fn course(course_id: impl Into<String>) -> Self {
        Self {
            course_id: Some(course_id.into()),
            ..Self::default()
        }
    }
}

/// A video with its nested children, as returned to readers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoAggregate {
    pub url: String,
    pub edx_video_id: String,
    pub client_video_id: String,
    pub duration: f64,
    pub status: String,
    pub created: DateTime<Utc>,
    pub encoded_videos: Vec<EncodedVideoView>,
    pub subtitles: Vec<SubtitleView>,
    pub courses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedVideoView {
    pub profile: String,
    pub url: String,
    pub file_size: i64,
    pub bitrate: i64,
    pub metadata: Value,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl From<&EncodedVideo> for EncodedVideoView {
    fn from(row: &EncodedVideo) -> Self {
        Self {
            profile: row.profile_name.clone(),
            url: row.url.clone(),
            file_size: row.file_size,
            bitrate: row.bitrate,
            metadata: row.metadata.clone(),
            created: row.created_at,
            modified: row.modified_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleView {
    pub fmt: SubtitleFormat,
    pub language: String,
    pub content_url: String,
    pub url: String,
}

impl SubtitleView {
    pub fn new(edx_video_id: &str, row: &Subtitle) -> Self {
        Self {
            fmt: row.fmt,
            language: row.language.clone(),
            content_url: subtitle_content_url(edx_video_id, &row.language),
            url: subtitle_url(edx_video_id, &row.language),
        }
    }
}

/// Raw subtitle payload handed to the content responder
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleContent {
    pub content_type: &'static str,
    pub content: String,
}

/// Per-video summary returned by the course/profile lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseVideoInfo {
    pub duration: f64,
    pub profiles: std::collections::BTreeMap<String, ProfileUrl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileUrl {
    pub url: String,
    pub file_size: i64,
}

pub fn video_url(edx_video_id: &str) -> String {
    format!("/videos/{}", edx_video_id)
}

pub fn subtitle_url(edx_video_id: &str, language: &str) -> String {
    format!("/videos/{}/subtitles/{}", edx_video_id, language)
}

pub fn subtitle_content_url(edx_video_id: &str, language: &str) -> String {
    format!("/videos/{}/subtitles/{}/content", edx_video_id, language)
}
