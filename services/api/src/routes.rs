//! API service routes

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
    routing::post,
};
use catalog::{
    ProfilePayload, SortDirection, SubtitlePayload, VideoFilter, VideoPayload, VideoSort,
    VideoSortField, WriteMode,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/videos", get(list_videos).post(create_video))
        .route(
            "/videos/:edx_video_id",
            get(get_video)
                .put(replace_video)
                .patch(patch_video)
                .delete(delete_video),
        )
        .route("/videos/:edx_video_id/urls", get(profile_urls))
        .route(
            "/videos/:edx_video_id/xml",
            get(export_video_xml).post(import_video_xml),
        )
        .route(
            "/videos/:edx_video_id/subtitles/:language",
            get(get_subtitle).put(put_subtitle),
        )
        .route(
            "/videos/:edx_video_id/subtitles/:language/content",
            get(get_subtitle_content),
        )
        .route("/courses/*course_id", get(course_videos))
        .route("/course-videos/copy", post(copy_course_videos))
        .route("/course-videos/profiles", get(course_profile_info))
        .route("/profiles", get(list_profiles).post(create_profile))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Optional ordering shared by listing endpoints
#[derive(Debug, Default, Deserialize)]
pub struct SortQuery {
    pub sort: Option<VideoSortField>,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortQuery {
    fn to_sort(&self) -> Option<VideoSort> {
        self.sort.map(|field| VideoSort {
            field,
            direction: self.direction,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VideoListQuery {
    pub course: Option<String>,
    pub youtube: Option<String>,
    /// Comma separated edx video ids
    pub ids: Option<String>,
    #[serde(flatten)]
    pub order: SortQuery,
}

#[derive(Debug, Deserialize)]
pub struct ProfilesQuery {
    /// Comma separated profile names
    pub profiles: String,
}

#[derive(Debug, Deserialize)]
pub struct CourseProfilesQuery {
    pub course_id: String,
    pub profiles: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub course_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CopyCourseRequest {
    pub source_course_id: String,
    pub destination_course_id: String,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = match state.store.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            error!("Health check failed: {}", e);
            false
        }
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "unavailable" },
            "service": "val-api"
        })),
    )
}

/// List videos, optionally filtered by course, YouTube id or explicit ids
pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<VideoListQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = VideoFilter {
        course_id: query.course.clone(),
        youtube_id: query.youtube.clone(),
        edx_video_ids: query.ids.as_deref().map(split_list),
        sort: query.order.to_sort(),
    };
    let videos = state.queries().list(&filter).await?;
    Ok(Json(videos))
}

/// Create a video aggregate
pub async fn create_video(
    State(state): State<AppState>,
    payload: Result<Json<VideoPayload>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(payload) = payload?;
    let video = state.videos.create(payload).await?;
    Ok((StatusCode::CREATED, Json(video)))
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(edx_video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let video = state.queries().get(&edx_video_id).await?;
    Ok(Json(video))
}

/// Replace a video: every field required, absent child lists emptied
pub async fn replace_video(
    State(state): State<AppState>,
    Path(edx_video_id): Path<String>,
    payload: Result<Json<VideoPayload>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(payload) = payload?;
    let video = state
        .videos
        .update(&edx_video_id, payload, WriteMode::Full)
        .await?;
    Ok(Json(video))
}

/// Update only the fields and child lists present in the body
pub async fn patch_video(
    State(state): State<AppState>,
    Path(edx_video_id): Path<String>,
    payload: Result<Json<VideoPayload>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(payload) = payload?;
    let video = state
        .videos
        .update(&edx_video_id, payload, WriteMode::Partial)
        .await?;
    Ok(Json(video))
}

pub async fn delete_video(
    State(state): State<AppState>,
    Path(edx_video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.videos.delete(&edx_video_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Url per requested profile, null where the video has none
pub async fn profile_urls(
    State(state): State<AppState>,
    Path(edx_video_id): Path<String>,
    Query(query): Query<ProfilesQuery>,
) -> ApiResult<impl IntoResponse> {
    let urls = state
        .queries()
        .urls_for_profiles(&edx_video_id, &split_list(&query.profiles))
        .await?;
    Ok(Json(urls))
}

/// Exported `edx_video` element, without course links
pub async fn export_video_xml(
    State(state): State<AppState>,
    Path(edx_video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let xml = state.queries().export_xml(&edx_video_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/xml")], xml))
}

/// Merge an exported element into the catalog and link it to `course_id`
pub async fn import_video_xml(
    State(state): State<AppState>,
    Path(edx_video_id): Path<String>,
    Query(query): Query<ImportQuery>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let video = state
        .videos
        .import_xml(&body, &edx_video_id, &query.course_id)
        .await?;
    Ok(Json(video))
}

pub async fn get_subtitle(
    State(state): State<AppState>,
    Path((edx_video_id, language)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let subtitle = state.queries().subtitle(&edx_video_id, &language).await?;
    Ok(Json(subtitle))
}

/// Create or replace the track for one language
pub async fn put_subtitle(
    State(state): State<AppState>,
    Path((edx_video_id, language)): Path<(String, String)>,
    payload: Result<Json<SubtitlePayload>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(payload) = payload?;
    let subtitle = state
        .videos
        .update_subtitle(&edx_video_id, &language, payload)
        .await?;
    Ok(Json(subtitle))
}

/// Raw subtitle payload, served with the format's content type
pub async fn get_subtitle_content(
    State(state): State<AppState>,
    Path((edx_video_id, language)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let content = state
        .queries()
        .subtitle_content(&edx_video_id, &language)
        .await?;
    Ok(([(header::CONTENT_TYPE, content.content_type)], content.content))
}

/// Videos linked to one course, exact match on the course id
pub async fn course_videos(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    Query(order): Query<SortQuery>,
) -> ApiResult<impl IntoResponse> {
    let videos = state
        .queries()
        .videos_for_course(&course_id, order.to_sort())
        .await?;
    Ok(Json(videos))
}

pub async fn course_profile_info(
    State(state): State<AppState>,
    Query(query): Query<CourseProfilesQuery>,
) -> ApiResult<impl IntoResponse> {
    let info = state
        .queries()
        .video_info_for_course_and_profiles(&query.course_id, &split_list(&query.profiles))
        .await?;
    Ok(Json(info))
}

/// Link every video of one course to another
pub async fn copy_course_videos(
    State(state): State<AppState>,
    payload: Result<Json<CopyCourseRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let copied = state
        .videos
        .copy_course_videos(&request.source_course_id, &request.destination_course_id)
        .await?;
    Ok(Json(json!({ "copied": copied })))
}

pub async fn list_profiles(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let profiles = state.queries().list_profiles().await?;
    Ok(Json(profiles))
}

pub async fn create_profile(
    State(state): State<AppState>,
    payload: Result<Json<ProfilePayload>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(payload) = payload?;
    let profile = state.videos.create_profile(payload).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_split_on_commas() {
        assert_eq!(split_list("mobile, desktop,,"), vec!["mobile", "desktop"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn sort_needs_a_field() {
        assert_eq!(SortQuery::default().to_sort(), None);
        let query = SortQuery {
            sort: Some(VideoSortField::Duration),
            direction: SortDirection::Desc,
        };
        assert_eq!(
            query.to_sort(),
            Some(VideoSort {
                field: VideoSortField::Duration,
                direction: SortDirection::Desc,
            })
        );
    }
}
