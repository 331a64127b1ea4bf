//! Write side of the catalog
//!
//! Every write runs in one store transaction. The whole request is validated
//! before the first write is issued, and any failure drops the transaction,
//! so a rejected request leaves no trace.
//!
//! Requests are declarative, so a transaction that loses a serialization
//! conflict is simply run again from the start, up to the configured number
//! of attempts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{
    CatalogError, CatalogResult, FieldError, NON_FIELD_ERRORS, StoreError, ValidationErrors,
};
use crate::models::{
    EncodedVideoPayload, Profile, ProfilePayload, SubtitlePayload, SubtitleSpec, SubtitleView,
    VariantSpec, Video, VideoAggregate, VideoFields, VideoPayload, WriteMode,
};
use crate::profiles::ProfileRegistry;
use crate::query::VideoQueries;
use crate::reconcile::{
    apply_courses, apply_subtitles, apply_variants, requested_profile_names, upsert_subtitle,
    validate_subtitle, validate_subtitles, validate_variants,
};
use crate::store::{StoreTransaction, VideoStore};
use crate::validation::{
    PROFILE_LABEL_MAX_LEN, check_max_len, is_valid_id, validate_courses, validate_edx_video_id,
    validate_profile_name, validate_video_fields,
};
use crate::xml;

/// Attempts per write before a serialization conflict is reported
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 10;

const RETRY_BACKOFF: Duration = Duration::from_millis(5);

const VIDEO_ID_CONSTRAINT: &str = "videos_edx_video_id_key";
const PROFILE_NAME_CONSTRAINT: &str = "profiles_profile_name_key";

fn video_exists() -> FieldError {
    FieldError::AlreadyExists {
        model: "Video",
        field: "Edx video id",
    }
}

fn profile_exists() -> FieldError {
    FieldError::AlreadyExists {
        model: "Profile",
        field: "Profile name",
    }
}

/// Validated child collections of one write. `None` leaves a collection
/// untouched.
#[derive(Debug, Default)]
struct Children {
    courses: Option<Vec<String>>,
    variants: Option<Vec<VariantSpec>>,
    subtitles: Option<Vec<SubtitleSpec>>,
}

impl Children {
    async fn apply(self, tx: &mut dyn StoreTransaction, video_id: i64) -> CatalogResult<()> {
        if let Some(courses) = self.courses {
            apply_courses(tx, video_id, courses).await?;
        }
        if let Some(variants) = self.variants {
            apply_variants(tx, video_id, variants).await?;
        }
        if let Some(subtitles) = self.subtitles {
            apply_subtitles(tx, video_id, subtitles).await?;
        }
        Ok(())
    }
}

/// Validate the child collections a payload carries.
///
/// In [`WriteMode::Full`] an absent collection means "no children"; in
/// [`WriteMode::Partial`] it means "leave as is".
async fn validate_children(
    tx: &mut dyn StoreTransaction,
    payload: &VideoPayload,
    mode: WriteMode,
    errors: &mut ValidationErrors,
) -> CatalogResult<Children> {
    let full = mode == WriteMode::Full;

    let courses = if payload.courses.is_some() || full {
        let requested = payload.courses.clone().unwrap_or_default();
        Some(validate_courses(&requested, errors))
    } else {
        None
    };

    let variants = if payload.encoded_videos.is_some() || full {
        let items: &[EncodedVideoPayload] = payload.encoded_videos.as_deref().unwrap_or_default();
        let registry = ProfileRegistry::load(tx, &requested_profile_names(items)).await?;
        match validate_variants(items, &registry) {
            Ok(specs) => Some(specs),
            Err(report) => {
                errors.merge(report);
                None
            }
        }
    } else {
        None
    };

    let subtitles = if payload.subtitles.is_some() || full {
        let items: &[SubtitlePayload] = payload.subtitles.as_deref().unwrap_or_default();
        match validate_subtitles(items) {
            Ok(specs) => Some(specs),
            Err(report) => {
                errors.merge(report);
                None
            }
        }
    } else {
        None
    };

    Ok(Children {
        courses,
        variants,
        subtitles,
    })
}

/// Run `attempt` until it succeeds, fails for a reason other than a
/// serialization conflict, or `max_attempts` runs are used up
async fn retrying<T, F, Fut>(action: &str, max_attempts: u32, mut attempt: F) -> CatalogResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CatalogResult<T>>,
{
    let mut run = 1;
    loop {
        match attempt().await {
            Err(e) if e.is_retryable() && run < max_attempts => {
                debug!(
                    "Retrying {} after conflict (attempt {}/{}): {}",
                    action, run, max_attempts, e
                );
                tokio::time::sleep(RETRY_BACKOFF * run).await;
                run += 1;
            }
            Err(e) if e.is_retryable() => {
                warn!("Giving up on {} after {} attempts: {}", action, run, e);
                return Err(e);
            }
            result => return result,
        }
    }
}

/// Create, update and delete video aggregates
#[derive(Clone)]
pub struct VideoService {
    store: Arc<dyn VideoStore>,
    queries: VideoQueries,
    write_attempts: u32,
}

impl VideoService {
    pub fn new(store: Arc<dyn VideoStore>) -> Self {
        let queries = VideoQueries::new(store.clone());
        Self {
            store,
            queries,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
        }
    }

    /// Bound the runs of one write that keeps losing serialization conflicts
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    pub fn queries(&self) -> &VideoQueries {
        &self.queries
    }

    /// Create a video together with its courses, variants and subtitles
    pub async fn create(&self, payload: VideoPayload) -> CatalogResult<VideoAggregate> {
        let payload = &payload;
        let video = retrying("create", self.write_attempts, move || self.try_create(payload)).await?;

        info!(
            "Video created with id [{}] and status [{}]",
            video.edx_video_id, video.status
        );
        self.queries.get(&video.edx_video_id).await
    }

    async fn try_create(&self, payload: &VideoPayload) -> CatalogResult<Video> {
        let mut errors = ValidationErrors::new();
        let mut tx = self.store.begin().await?;

        let edx_video_id = match validate_edx_video_id(payload.edx_video_id.as_deref()) {
            Ok(id) => {
                if tx.lock_video(&id).await?.is_some() {
                    errors.add("edx_video_id", video_exists());
                }
                Some(id)
            }
            Err(e) => {
                errors.add("edx_video_id", e);
                None
            }
        };
        let fields = validate_video_fields(payload, None, WriteMode::Full, &mut errors);
        let children = validate_children(tx.as_mut(), payload, WriteMode::Full, &mut errors).await?;

        let (edx_video_id, fields) = match (edx_video_id, fields) {
            (Some(id), Some(fields)) if errors.is_empty() => (id, fields),
            _ => return Err(reject("create", payload.edx_video_id.as_deref(), errors)),
        };

        let video = match tx.insert_video(&edx_video_id, &fields).await {
            Ok(video) => video,
            Err(StoreError::UniqueViolation(constraint)) if constraint == VIDEO_ID_CONSTRAINT => {
                let errors = ValidationErrors::single("edx_video_id", video_exists());
                return Err(reject("create", Some(&edx_video_id), errors));
            }
            Err(e) => return Err(e.into()),
        };
        children.apply(tx.as_mut(), video.id).await?;
        tx.commit().await?;
        Ok(video)
    }

    /// Update an existing video.
    ///
    /// The id comes from the lookup path; an `edx_video_id` in the body is
    /// ignored.
    pub async fn update(
        &self,
        edx_video_id: &str,
        payload: VideoPayload,
        mode: WriteMode,
    ) -> CatalogResult<VideoAggregate> {
        let payload = &payload;
        let (video, previous_status) = retrying("update", self.write_attempts, move || {
            self.try_update(edx_video_id, payload, mode)
        })
        .await?;

        if video.status != previous_status {
            info!(
                "Video [{}] status changed from [{}] to [{}]",
                video.edx_video_id, previous_status, video.status
            );
        } else {
            debug!("Video [{}] updated", video.edx_video_id);
        }
        self.queries.get(&video.edx_video_id).await
    }

    /// Returns the written video and its status before the update
    async fn try_update(
        &self,
        edx_video_id: &str,
        payload: &VideoPayload,
        mode: WriteMode,
    ) -> CatalogResult<(Video, String)> {
        let mut tx = self.store.begin().await?;
        let video = lock_existing(tx.as_mut(), edx_video_id).await?;
        let current = VideoFields {
            client_video_id: video.client_video_id.clone(),
            duration: video.duration,
            status: video.status.clone(),
        };

        let mut errors = ValidationErrors::new();
        let fields = validate_video_fields(payload, Some(&current), mode, &mut errors);
        let children = validate_children(tx.as_mut(), payload, mode, &mut errors).await?;

        let fields = match fields {
            Some(fields) if errors.is_empty() => fields,
            _ => return Err(reject("update", Some(edx_video_id), errors)),
        };

        if fields != current {
            tx.update_video(video.id, &fields).await?;
        }
        children.apply(tx.as_mut(), video.id).await?;
        tx.commit().await?;

        let updated = Video {
            client_video_id: fields.client_video_id,
            duration: fields.duration,
            status: fields.status,
            ..video
        };
        Ok((updated, current.status))
    }

    /// Delete a video and everything it owns; profiles are untouched
    pub async fn delete(&self, edx_video_id: &str) -> CatalogResult<()> {
        retrying("delete", self.write_attempts, move || async move {
            let mut tx = self.store.begin().await?;
            let video = lock_existing(tx.as_mut(), edx_video_id).await?;
            tx.delete_video(video.id).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!("Video [{}] deleted", edx_video_id);
        Ok(())
    }

    /// Create or replace the track for one language, leaving other tracks
    /// alone. The language comes from the lookup path.
    pub async fn update_subtitle(
        &self,
        edx_video_id: &str,
        language: &str,
        payload: SubtitlePayload,
    ) -> CatalogResult<SubtitleView> {
        let payload = SubtitlePayload {
            language: Some(language.to_string()),
            ..payload
        };
        let spec = &validate_subtitle(&payload)
            .map_err(|errors| reject("subtitle update", Some(edx_video_id), errors))?;

        retrying("subtitle update", self.write_attempts, move || async move {
            let mut tx = self.store.begin().await?;
            let video = lock_existing(tx.as_mut(), edx_video_id).await?;
            upsert_subtitle(tx.as_mut(), video.id, spec).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;

        debug!(
            "Subtitle [{}] stored for video [{}]",
            spec.language, edx_video_id
        );
        self.queries.subtitle(edx_video_id, &spec.language).await
    }

    /// Register a new encoding profile
    pub async fn create_profile(&self, payload: ProfilePayload) -> CatalogResult<Profile> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_profile_name(&payload.profile_name) {
            errors.add("profile_name", e);
        }
        let label = payload
            .label
            .clone()
            .unwrap_or_else(|| payload.profile_name.clone());
        if let Err(e) = check_max_len(&label, PROFILE_LABEL_MAX_LEN) {
            errors.add("label", e);
        }
        if !errors.is_empty() {
            return Err(reject("profile create", Some(&payload.profile_name), errors));
        }

        let (payload, label) = (&payload, &label);
        let profile = retrying("profile create", self.write_attempts, move || async move {
            let mut tx = self.store.begin().await?;
            let profile = match tx.insert_profile(&payload.profile_name, label).await {
                Ok(profile) => profile,
                Err(StoreError::UniqueViolation(constraint))
                    if constraint == PROFILE_NAME_CONSTRAINT =>
                {
                    let errors = ValidationErrors::single("profile_name", profile_exists());
                    return Err(reject("profile create", Some(&payload.profile_name), errors));
                }
                Err(e) => return Err(e.into()),
            };
            tx.commit().await?;
            Ok(profile)
        })
        .await?;

        info!("Profile [{}] created", profile.profile_name);
        Ok(profile)
    }

    /// Link every video of `source_course_id` to `destination_course_id`.
    ///
    /// Videos already linked to the destination are skipped. Returns the
    /// number of new links.
    pub async fn copy_course_videos(
        &self,
        source_course_id: &str,
        destination_course_id: &str,
    ) -> CatalogResult<u64> {
        let mut errors = ValidationErrors::new();
        let courses = validate_courses(
            &[
                source_course_id.to_string(),
                destination_course_id.to_string(),
            ],
            &mut errors,
        );
        if !errors.is_empty() {
            return Err(reject("course copy", None, errors));
        }
        if courses.len() < 2 {
            return Ok(0);
        }

        let copied = retrying("course copy", self.write_attempts, move || async move {
            let mut tx = self.store.begin().await?;
            let video_ids: Vec<i64> = tx
                .videos_for_course(source_course_id)
                .await?
                .iter()
                .map(|video| video.id)
                .collect();
            let copied = if video_ids.is_empty() {
                0
            } else {
                tx.link_videos_to_course(&video_ids, destination_course_id)
                    .await?
            };
            tx.commit().await?;
            Ok(copied)
        })
        .await?;

        info!(
            "Copied {} videos from course [{}] to [{}]",
            copied, source_course_id, destination_course_id
        );
        Ok(copied)
    }

    /// Import an exported `edx_video` element into `course_id`.
    ///
    /// A missing video is created from the element. An existing one keeps its
    /// fields and only gains variants for profiles it has none for; profiles
    /// unknown here are created. The video is linked to `course_id` in every
    /// case. Everything happens in one transaction.
    pub async fn import_xml(
        &self,
        xml: &str,
        edx_video_id: &str,
        course_id: &str,
    ) -> CatalogResult<VideoAggregate> {
        let element = xml::read_video(xml).map_err(|e| {
            reject(
                "xml import",
                Some(edx_video_id),
                ValidationErrors::single(NON_FIELD_ERRORS, e),
            )
        })?;

        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_edx_video_id(Some(edx_video_id)) {
            errors.add("edx_video_id", e);
        }
        validate_courses(&[course_id.to_string()], &mut errors);
        if !errors.is_empty() {
            return Err(reject("xml import", Some(edx_video_id), errors));
        }

        let element = element.as_ref();
        retrying("xml import", self.write_attempts, move || {
            self.try_import_xml(element, edx_video_id, course_id)
        })
        .await?;

        self.queries.get(edx_video_id).await
    }

    async fn try_import_xml(
        &self,
        element: Option<&VideoPayload>,
        edx_video_id: &str,
        course_id: &str,
    ) -> CatalogResult<()> {
        let mut tx = self.store.begin().await?;
        let existing = tx.lock_video(edx_video_id).await?;
        let created = existing.is_none();

        let video = match (existing, element) {
            (Some(video), Some(_)) => {
                info!(
                    "Video [{}] present in course [{}] not imported because it already exists",
                    edx_video_id, course_id
                );
                video
            }
            (Some(video), None) => video,
            (None, Some(element)) => {
                let mut errors = ValidationErrors::new();
                let fields = validate_video_fields(element, None, WriteMode::Full, &mut errors);
                let fields = match fields {
                    Some(fields) if errors.is_empty() => fields,
                    _ => return Err(reject("xml import", Some(edx_video_id), errors)),
                };
                match tx.insert_video(edx_video_id, &fields).await {
                    Ok(video) => video,
                    Err(StoreError::UniqueViolation(constraint))
                        if constraint == VIDEO_ID_CONSTRAINT =>
                    {
                        return Err(raced(format!("video {}", edx_video_id)));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            (None, None) => return Err(CatalogError::VideoNotFound(edx_video_id.to_string())),
        };

        if let Some(items) = element.and_then(|e| e.encoded_videos.as_deref()) {
            let specs = resolve_imported_variants(tx.as_mut(), items, edx_video_id).await?;
            let present: Vec<i64> = tx
                .encoded_videos(video.id)
                .await?
                .iter()
                .map(|row| row.profile_id)
                .collect();

            let mut added = 0;
            for spec in specs.iter().filter(|s| !present.contains(&s.profile_id)) {
                tx.insert_encoded_video(video.id, spec).await?;
                added += 1;
            }
            debug!(
                "Imported {} of {} encoded videos for video [{}]",
                added,
                specs.len(),
                edx_video_id
            );
        }

        tx.link_videos_to_course(&[video.id], course_id).await?;
        tx.commit().await?;

        if created {
            info!(
                "Video created with id [{}] and status [{}] from course [{}]",
                video.edx_video_id, video.status, course_id
            );
        }
        Ok(())
    }
}

/// Validate imported variants, creating the profiles they name that do not
/// exist yet. Only the first variant per profile is kept.
async fn resolve_imported_variants(
    tx: &mut dyn StoreTransaction,
    items: &[EncodedVideoPayload],
    edx_video_id: &str,
) -> CatalogResult<Vec<VariantSpec>> {
    let mut seen = Vec::new();
    let items: Vec<EncodedVideoPayload> = items
        .iter()
        .filter(|item| match item.profile.as_deref() {
            Some(name) if seen.contains(&name) => false,
            Some(name) => {
                seen.push(name);
                true
            }
            None => true,
        })
        .cloned()
        .collect();

    let names = requested_profile_names(&items);
    let mut profiles = tx.find_profiles(&names).await?;
    let mut errors = ValidationErrors::new();

    for name in &names {
        if profiles.iter().any(|p| &p.profile_name == name) {
            continue;
        }
        if let Err(e) = validate_profile_name(name) {
            errors.add_non_field(e);
            continue;
        }
        let profile = match tx.insert_profile(name, name).await {
            Ok(profile) => profile,
            Err(StoreError::UniqueViolation(constraint)) if constraint == PROFILE_NAME_CONSTRAINT => {
                return Err(raced(format!("profile {}", name)));
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            "New profile [{}] was created for video [{}]",
            profile.profile_name, edx_video_id
        );
        profiles.push(profile);
    }

    let registry = ProfileRegistry::from_profiles(profiles);
    match validate_variants(&items, &registry) {
        Ok(specs) if errors.is_empty() => Ok(specs),
        Ok(_) => Err(reject("xml import", Some(edx_video_id), errors)),
        Err(report) => {
            errors.merge(report);
            Err(reject("xml import", Some(edx_video_id), errors))
        }
    }
}

async fn lock_existing(tx: &mut dyn StoreTransaction, edx_video_id: &str) -> CatalogResult<Video> {
    if !is_valid_id(edx_video_id) {
        return Err(CatalogError::VideoNotFound(edx_video_id.to_string()));
    }
    tx.lock_video(edx_video_id)
        .await?
        .ok_or_else(|| CatalogError::VideoNotFound(edx_video_id.to_string()))
}

/// A concurrent writer created the same row first; running the write again
/// sees it
fn raced(row: String) -> CatalogError {
    StoreError::SerializationFailure(format!("{} created concurrently", row)).into()
}

fn reject(action: &str, edx_video_id: Option<&str>, errors: ValidationErrors) -> CatalogError {
    warn!(
        "Rejected {} for [{}]: {}",
        action,
        edx_video_id.unwrap_or("-"),
        errors
    );
    CatalogError::Validation(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> CatalogError {
        StoreError::SerializationFailure("could not serialize access".to_string()).into()
    }

    #[tokio::test]
    async fn conflicts_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let runs = &counter;
        let result = retrying("test", 5, move || async move {
            if runs.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_the_attempt_limit() {
        let counter = AtomicU32::new(0);
        let runs = &counter;
        let result: CatalogResult<()> = retrying("test", 3, move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let counter = AtomicU32::new(0);
        let runs = &counter;
        let result: CatalogResult<()> = retrying("test", 3, move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Err(CatalogError::VideoNotFound("fish".to_string()))
        })
        .await;
        assert!(matches!(result, Err(CatalogError::VideoNotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
