//! PostgreSQL store
//!
//! Schema lives in `libs/common/migrations`. Every write transaction runs at
//! `SERIALIZABLE` and locks the video row it reconciles. Any sqlx error raised
//! here goes through [`StoreError::from_sqlx`], so a lost serialization
//! conflict surfaces as [`StoreError::SerializationFailure`].

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::error;

use super::{StoreTransaction, VideoStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    CourseVideo, EncodedVideo, Profile, SortDirection, Subtitle, SubtitleFormat, SubtitleSpec,
    VariantSpec, Video, VideoFields, VideoFilter, VideoSortField, YOUTUBE_PROFILE,
};

const VIDEO_COLUMNS: &str = "v.id, v.edx_video_id, v.client_video_id, v.duration, v.status, v.created_at";

const ENCODED_VIDEO_SELECT: &str = r#"
    SELECT e.id, e.video_id, e.profile_id, p.profile_name, e.url, e.file_size, e.bitrate,
           e.metadata, e.created_at, e.modified_at
    FROM encoded_videos e
    JOIN profiles p ON p.id = e.profile_id
"#;

const SUBTITLE_COLUMNS: &str = "id, video_id, fmt, language, content, created_at, modified_at";

fn video_from_row(row: &PgRow) -> Video {
    Video {
        id: row.get("id"),
        edx_video_id: row.get("edx_video_id"),
        client_video_id: row.get("client_video_id"),
        duration: row.get("duration"),
        status: row.get("status"),
        created_at: row.get("created_at"),
    }
}

fn encoded_video_from_row(row: &PgRow) -> EncodedVideo {
    EncodedVideo {
        id: row.get("id"),
        video_id: row.get("video_id"),
        profile_id: row.get("profile_id"),
        profile_name: row.get("profile_name"),
        url: row.get("url"),
        file_size: row.get("file_size"),
        bitrate: row.get("bitrate"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
    }
}

fn subtitle_from_row(row: &PgRow) -> StoreResult<Subtitle> {
    let fmt: String = row.get("fmt");
    let fmt = SubtitleFormat::parse(&fmt)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown subtitle format {}", fmt)))?;
    Ok(Subtitle {
        id: row.get("id"),
        video_id: row.get("video_id"),
        fmt,
        language: row.get("language"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
    })
}

fn course_from_row(row: &PgRow) -> CourseVideo {
    CourseVideo {
        id: row.get("id"),
        video_id: row.get("video_id"),
        course_id: row.get("course_id"),
    }
}

fn profile_from_row(row: &PgRow) -> Profile {
    Profile {
        id: row.get("id"),
        profile_name: row.get("profile_name"),
        label: row.get("label"),
    }
}

/// Text columns compare byte-wise so the order does not depend on the
/// database collation
fn sort_column(field: VideoSortField) -> &'static str {
    match field {
        VideoSortField::Created => "v.created_at",
        VideoSortField::EdxVideoId => r#"v.edx_video_id COLLATE "C""#,
        VideoSortField::ClientVideoId => r#"v.client_video_id COLLATE "C""#,
        VideoSortField::Duration => "v.duration",
    }
}

/// Build the listing query for `filter`
fn video_listing<'a>(filter: &'a VideoFilter) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM videos v WHERE TRUE", VIDEO_COLUMNS));

    if let Some(course_id) = &filter.course_id {
        builder
            .push(" AND EXISTS (SELECT 1 FROM course_videos c WHERE c.video_id = v.id AND c.course_id = ")
            .push_bind(course_id)
            .push(")");
    }
    if let Some(youtube_id) = &filter.youtube_id {
        builder
            .push(
                " AND EXISTS (SELECT 1 FROM encoded_videos e JOIN profiles p ON p.id = e.profile_id \
                 WHERE e.video_id = v.id AND p.profile_name = ",
            )
            .push_bind(YOUTUBE_PROFILE)
            .push(" AND e.url = ")
            .push_bind(youtube_id)
            .push(")");
    }
    if let Some(ids) = &filter.edx_video_ids {
        builder.push(" AND v.edx_video_id = ANY(").push_bind(ids).push(")");
    }

    match filter.sort {
        Some(sort) => {
            let direction = match sort.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            builder.push(format!(
                r#" ORDER BY {col} {dir}, v.edx_video_id COLLATE "C" {dir}"#,
                col = sort_column(sort.field),
                dir = direction
            ));
        }
        None => {
            builder.push(" ORDER BY v.id");
        }
    }
    builder
}

/// Store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await?;
        sqlx::Executor::execute(&mut *tx, "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE").await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn find_video(&self, edx_video_id: &str) -> StoreResult<Option<Video>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM videos v WHERE v.edx_video_id = $1",
            VIDEO_COLUMNS
        ))
        .bind(edx_video_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(video_from_row))
    }

    async fn list_videos(&self, filter: &VideoFilter) -> StoreResult<Vec<Video>> {
        let rows = video_listing(filter).build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(video_from_row).collect())
    }

    async fn encoded_videos_for(&self, video_ids: &[i64]) -> StoreResult<Vec<EncodedVideo>> {
        let rows = sqlx::query(&format!(
            "{} WHERE e.video_id = ANY($1) ORDER BY e.id",
            ENCODED_VIDEO_SELECT
        ))
        .bind(video_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(encoded_video_from_row).collect())
    }

    async fn subtitles_for(&self, video_ids: &[i64]) -> StoreResult<Vec<Subtitle>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subtitles WHERE video_id = ANY($1) ORDER BY id",
            SUBTITLE_COLUMNS
        ))
        .bind(video_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(subtitle_from_row).collect()
    }

    async fn courses_for(&self, video_ids: &[i64]) -> StoreResult<Vec<CourseVideo>> {
        let rows = sqlx::query(
            "SELECT id, video_id, course_id FROM course_videos WHERE video_id = ANY($1) ORDER BY id",
        )
        .bind(video_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(course_from_row).collect())
    }

    async fn find_subtitle(&self, video_id: i64, language: &str) -> StoreResult<Option<Subtitle>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subtitles WHERE video_id = $1 AND language = $2",
            SUBTITLE_COLUMNS
        ))
        .bind(video_id)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(subtitle_from_row).transpose()
    }

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        let rows = sqlx::query("SELECT id, profile_name, label FROM profiles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(profile_from_row).collect())
    }

    async fn health_check(&self) -> StoreResult<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                error!("Store health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Serializable PostgreSQL transaction
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_video(&mut self, edx_video_id: &str) -> StoreResult<Option<Video>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM videos v WHERE v.edx_video_id = $1 FOR UPDATE",
            VIDEO_COLUMNS
        ))
        .bind(edx_video_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.as_ref().map(video_from_row))
    }

    async fn insert_video(
        &mut self,
        edx_video_id: &str,
        fields: &VideoFields,
    ) -> StoreResult<Video> {
        let row = sqlx::query(
            r#"
            INSERT INTO videos AS v (edx_video_id, client_video_id, duration, status)
            VALUES ($1, $2, $3, $4)
            RETURNING v.id, v.edx_video_id, v.client_video_id, v.duration, v.status, v.created_at
            "#,
        )
        .bind(edx_video_id)
        .bind(&fields.client_video_id)
        .bind(fields.duration)
        .bind(&fields.status)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(video_from_row(&row))
    }

    async fn update_video(&mut self, video_id: i64, fields: &VideoFields) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE videos SET client_video_id = $2, duration = $3, status = $4 WHERE id = $1",
        )
        .bind(video_id)
        .bind(&fields.client_video_id)
        .bind(fields.duration)
        .bind(&fields.status)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow(format!("video {}", video_id)));
        }
        Ok(())
    }

    async fn delete_video(&mut self, video_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(video_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_profiles(&mut self, names: &[String]) -> StoreResult<Vec<Profile>> {
        let rows = sqlx::query(
            "SELECT id, profile_name, label FROM profiles WHERE profile_name = ANY($1) ORDER BY id",
        )
        .bind(names)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.iter().map(profile_from_row).collect())
    }

    async fn insert_profile(&mut self, profile_name: &str, label: &str) -> StoreResult<Profile> {
        let row = sqlx::query(
            "INSERT INTO profiles (profile_name, label) VALUES ($1, $2) RETURNING id, profile_name, label",
        )
        .bind(profile_name)
        .bind(label)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(profile_from_row(&row))
    }

    async fn encoded_videos(&mut self, video_id: i64) -> StoreResult<Vec<EncodedVideo>> {
        let rows = sqlx::query(&format!(
            "{} WHERE e.video_id = $1 ORDER BY e.id",
            ENCODED_VIDEO_SELECT
        ))
        .bind(video_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.iter().map(encoded_video_from_row).collect())
    }

    async fn insert_encoded_video(
        &mut self,
        video_id: i64,
        spec: &VariantSpec,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO encoded_videos (video_id, profile_id, url, file_size, bitrate, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(video_id)
        .bind(spec.profile_id)
        .bind(&spec.url)
        .bind(spec.file_size)
        .bind(spec.bitrate)
        .bind(&spec.metadata)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_encoded_video(&mut self, row_id: i64, spec: &VariantSpec) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE encoded_videos
            SET url = $2, file_size = $3, bitrate = $4, metadata = $5, modified_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(row_id)
        .bind(&spec.url)
        .bind(spec.file_size)
        .bind(spec.bitrate)
        .bind(&spec.metadata)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_encoded_videos(&mut self, row_ids: &[i64]) -> StoreResult<()> {
        sqlx::query("DELETE FROM encoded_videos WHERE id = ANY($1)")
            .bind(row_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn subtitles(&mut self, video_id: i64) -> StoreResult<Vec<Subtitle>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subtitles WHERE video_id = $1 ORDER BY id",
            SUBTITLE_COLUMNS
        ))
        .bind(video_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(subtitle_from_row).collect()
    }

    async fn insert_subtitle(&mut self, video_id: i64, spec: &SubtitleSpec) -> StoreResult<()> {
        sqlx::query("INSERT INTO subtitles (video_id, fmt, language, content) VALUES ($1, $2, $3, $4)")
            .bind(video_id)
            .bind(spec.fmt.as_str())
            .bind(&spec.language)
            .bind(&spec.content)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_subtitle(&mut self, row_id: i64, spec: &SubtitleSpec) -> StoreResult<()> {
        sqlx::query(
            "UPDATE subtitles SET fmt = $2, content = $3, modified_at = NOW() WHERE id = $1",
        )
        .bind(row_id)
        .bind(spec.fmt.as_str())
        .bind(&spec.content)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_subtitles(&mut self, row_ids: &[i64]) -> StoreResult<()> {
        sqlx::query("DELETE FROM subtitles WHERE id = ANY($1)")
            .bind(row_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn courses(&mut self, video_id: i64) -> StoreResult<Vec<CourseVideo>> {
        let rows = sqlx::query(
            "SELECT id, video_id, course_id FROM course_videos WHERE video_id = $1 ORDER BY id",
        )
        .bind(video_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.iter().map(course_from_row).collect())
    }

    async fn insert_course(&mut self, video_id: i64, course_id: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO course_videos (course_id, video_id) VALUES ($1, $2)")
            .bind(course_id)
            .bind(video_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_courses(&mut self, row_ids: &[i64]) -> StoreResult<()> {
        sqlx::query("DELETE FROM course_videos WHERE id = ANY($1)")
            .bind(row_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn link_videos_to_course(
        &mut self,
        video_ids: &[i64],
        course_id: &str,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO course_videos (course_id, video_id)
            SELECT $1, UNNEST($2::BIGINT[])
            ON CONFLICT ON CONSTRAINT course_videos_course_video_key DO NOTHING
            "#,
        )
        .bind(course_id)
        .bind(video_ids)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn videos_for_course(&mut self, course_id: &str) -> StoreResult<Vec<Video>> {
        let filter = VideoFilter::course(course_id);
        let rows = video_listing(&filter).build().fetch_all(&mut *self.tx).await?;
        Ok(rows.iter().map(video_from_row).collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
