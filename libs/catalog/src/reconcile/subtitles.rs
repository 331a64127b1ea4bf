//! Subtitle reconciliation, keyed by language

use std::collections::HashSet;
use std::io;

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{Formatter, Serializer};
use tracing::debug;

use super::plan;
use crate::error::{FieldError, StoreResult, ValidationErrors};
use crate::models::{SubtitleFormat, SubtitlePayload, SubtitleSpec};
use crate::store::StoreTransaction;
use crate::validation::{LANGUAGE_MAX_LEN, required_text};

const FIELD: &str = "subtitles";

fn validate_format(value: Option<&str>) -> Result<SubtitleFormat, FieldError> {
    let value = value.ok_or(FieldError::Required)?;
    SubtitleFormat::parse(value).ok_or_else(|| FieldError::InvalidChoice(value.to_string()))
}

/// Writes JSON with `", "` and `": "` separators and every non-ASCII
/// character escaped, the layout stored sjson tracks have always used
struct SjsonFormatter;

impl Formatter for SjsonFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Parse sjson content and write it back in the stored layout, keeping key
/// order
fn normalize_sjson(raw: &str) -> Result<String, FieldError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| FieldError::InvalidJson(e.to_string()))?;
    let mut out = Vec::with_capacity(raw.len());
    let mut serializer = Serializer::with_formatter(&mut out, SjsonFormatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| FieldError::InvalidJson(e.to_string()))?;
    String::from_utf8(out).map_err(|e| FieldError::InvalidJson(e.to_string()))
}

/// Validate one subtitle track.
///
/// `sjson` content must parse as JSON and is stored re-serialized by
/// [`normalize_sjson`]; `srt` content is stored as given.
pub fn validate_subtitle(item: &SubtitlePayload) -> Result<SubtitleSpec, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let language = required_text(item.language.as_deref(), LANGUAGE_MAX_LEN)
        .map_err(|e| errors.add("language", e))
        .ok();
    let fmt = validate_format(item.fmt.as_deref())
        .map_err(|e| errors.add("fmt", e))
        .ok();

    let raw = item.content.clone().unwrap_or_default();
    let content = match fmt {
        Some(SubtitleFormat::Sjson) => normalize_sjson(&raw)
            .map_err(|e| errors.add("content", e))
            .ok(),
        _ => Some(raw),
    };

    match (language, fmt, content) {
        (Some(language), Some(fmt), Some(content)) => Ok(SubtitleSpec {
            language,
            fmt,
            content,
        }),
        _ => Err(errors),
    }
}

/// Validate every requested subtitle; see [`validate_subtitle`]
pub fn validate_subtitles(items: &[SubtitlePayload]) -> Result<Vec<SubtitleSpec>, ValidationErrors> {
    let mut specs = Vec::with_capacity(items.len());
    let mut item_errors = Vec::with_capacity(items.len());

    for item in items {
        match validate_subtitle(item) {
            Ok(spec) => {
                specs.push(spec);
                item_errors.push(ValidationErrors::new());
            }
            Err(errors) => item_errors.push(errors),
        }
    }

    let mut errors = ValidationErrors::new();
    errors.add_items(FIELD, item_errors);

    let mut seen = HashSet::new();
    let duplicated = items
        .iter()
        .filter_map(|item| item.language.as_deref())
        .any(|language| !seen.insert(language));
    if duplicated {
        errors.add_non_field(FieldError::DuplicateLanguages);
    }

    errors.into_result().map(|_| specs)
}

/// Make the video's subtitles equal `specs`
pub async fn apply_subtitles(
    tx: &mut dyn StoreTransaction,
    video_id: i64,
    specs: Vec<SubtitleSpec>,
) -> StoreResult<()> {
    let persisted = tx.subtitles(video_id).await?;
    let plan = plan(
        persisted,
        specs,
        |row| row.language.clone(),
        |spec| spec.language.clone(),
        |spec, row| spec.matches(row),
    );

    debug!(
        "Reconciling subtitles for video [{}]: {} inserted, {} updated, {} deleted, {} unchanged",
        video_id,
        plan.inserts.len(),
        plan.updates.len(),
        plan.deletes.len(),
        plan.unchanged
    );
    if plan.is_noop() {
        return Ok(());
    }

    if !plan.deletes.is_empty() {
        let ids: Vec<i64> = plan.deletes.iter().map(|row| row.id).collect();
        tx.delete_subtitles(&ids).await?;
    }
    for (row, spec) in &plan.updates {
        tx.update_subtitle(row.id, spec).await?;
    }
    for spec in &plan.inserts {
        tx.insert_subtitle(video_id, spec).await?;
    }
    Ok(())
}

/// Insert or replace the single track for `spec.language`, leaving the
/// video's other tracks alone
pub async fn upsert_subtitle(
    tx: &mut dyn StoreTransaction,
    video_id: i64,
    spec: &SubtitleSpec,
) -> StoreResult<()> {
    let existing = tx
        .subtitles(video_id)
        .await?
        .into_iter()
        .find(|row| row.language == spec.language);

    match existing {
        Some(row) if spec.matches(&row) => Ok(()),
        Some(row) => tx.update_subtitle(row.id, spec).await,
        None => tx.insert_subtitle(video_id, spec).await,
    }
}
