//! Encoded variant reconciliation, keyed by profile

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::debug;

use super::plan;
use crate::error::{FieldError, StoreResult, ValidationErrors};
use crate::models::{EncodedVideoPayload, VariantSpec};
use crate::profiles::ProfileRegistry;
use crate::store::StoreTransaction;
use crate::validation::{URL_MAX_LEN, non_negative, required_text};

const FIELD: &str = "encoded_videos";

/// Profile names mentioned by a request, for a single registry lookup
pub fn requested_profile_names(items: &[EncodedVideoPayload]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in items.iter().filter_map(|item| item.profile.as_deref()) {
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn validate_metadata(value: Option<&Value>) -> Result<Value, FieldError> {
    match value {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
        Some(_) => Err(FieldError::ExpectedObject),
    }
}

fn validate_item(
    item: &EncodedVideoPayload,
    registry: &ProfileRegistry,
) -> Result<VariantSpec, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let profile = match item.profile.as_deref() {
        None => Err(FieldError::Required),
        Some("") => Err(FieldError::Blank),
        Some(name) => registry.lookup(name),
    };
    let profile = profile.map_err(|e| errors.add("profile", e)).ok();
    let url = required_text(item.url.as_deref(), URL_MAX_LEN)
        .map_err(|e| errors.add("url", e))
        .ok();
    let file_size = non_negative(item.file_size)
        .map_err(|e| errors.add("file_size", e))
        .ok();
    let bitrate = non_negative(item.bitrate)
        .map_err(|e| errors.add("bitrate", e))
        .ok();
    let metadata = validate_metadata(item.metadata.as_ref())
        .map_err(|e| errors.add("metadata", e))
        .ok();

    match (profile, url, file_size, bitrate, metadata) {
        (Some(profile), Some(url), Some(file_size), Some(bitrate), Some(metadata)) => {
            Ok(VariantSpec {
                profile_id: profile.id,
                profile_name: profile.profile_name.clone(),
                url,
                file_size,
                bitrate,
                metadata,
            })
        }
        _ => Err(errors),
    }
}

/// Validate every requested variant.
///
/// All items are checked even after the first failure. Per-item errors land
/// under `encoded_videos` by position; a profile requested twice is reported
/// once under `non_field_errors`.
pub fn validate_variants(
    items: &[EncodedVideoPayload],
    registry: &ProfileRegistry,
) -> Result<Vec<VariantSpec>, ValidationErrors> {
    let mut specs = Vec::with_capacity(items.len());
    let mut item_errors = Vec::with_capacity(items.len());

    for item in items {
        match validate_item(item, registry) {
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
        .filter_map(|item| item.profile.as_deref())
        .any(|name| !seen.insert(name));
    if duplicated {
        errors.add_non_field(FieldError::DuplicateProfiles);
    }

    errors.into_result().map(|_| specs)
}

/// Make the video's variants equal `specs`
pub async fn apply_variants(
    tx: &mut dyn StoreTransaction,
    video_id: i64,
    specs: Vec<VariantSpec>,
) -> StoreResult<()> {
    let persisted = tx.encoded_videos(video_id).await?;
    let plan = plan(
        persisted,
        specs,
        |row| row.profile_id,
        |spec| spec.profile_id,
        |spec, row| spec.matches(row),
    );

    debug!(
        "Reconciling encoded videos for video [{}]: {} inserted, {} updated, {} deleted, {} unchanged",
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
        tx.delete_encoded_videos(&ids).await?;
    }
    for (row, spec) in &plan.updates {
        tx.update_encoded_video(row.id, spec).await?;
    }
    for spec in &plan.inserts {
        tx.insert_encoded_video(video_id, spec).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NON_FIELD_ERRORS;
    use crate::models::Profile;
    use serde_json::json;

    fn registry() -> ProfileRegistry {
        ProfileRegistry::from_profiles(["mobile", "desktop"].iter().enumerate().map(
            |(i, name)| Profile {
                id: i as i64 + 1,
                profile_name: name.to_string(),
                label: name.to_string(),
            },
        ))
    }

    fn item(profile: &str, url: &str) -> EncodedVideoPayload {
        EncodedVideoPayload {
            profile: Some(profile.to_string()),
            url: Some(url.to_string()),
            file_size: Some(4545),
            bitrate: Some(6767),
            metadata: None,
        }
    }

    #[test]
    fn profile_names_are_collected_once() {
        let items = vec![
            item("mobile", "a"),
            item("desktop", "b"),
            item("mobile", "c"),
        ];
        assert_eq!(requested_profile_names(&items), vec!["mobile", "desktop"]);
    }

    #[test]
    fn valid_items_resolve_profiles() {
        let specs = validate_variants(&[item("desktop", "http://d")], &registry()).unwrap();
        assert_eq!(specs[0].profile_id, 2);
        assert_eq!(specs[0].metadata, json!({}));
    }

    #[test]
    fn unknown_profile_is_reported_at_its_position() {
        let errors = validate_variants(
            &[item("mobile", "http://m"), item("bird", "http://b")],
            &registry(),
        )
        .unwrap_err();

        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!({
                "encoded_videos": [
                    {},
                    {"profile": ["Object with profile_name=bird does not exist."]}
                ]
            })
        );
    }

    #[test]
    fn every_bad_field_is_reported() {
        let bad = EncodedVideoPayload {
            profile: None,
            url: None,
            file_size: Some(-1),
            bitrate: None,
            metadata: Some(json!([1, 2])),
        };
        let errors = validate_variants(&[bad], &registry()).unwrap_err();
        let item = &errors.items("encoded_videos")[0];

        assert_eq!(item.messages("profile"), &[FieldError::Required]);
        assert_eq!(item.messages("url"), &[FieldError::Required]);
        assert_eq!(item.messages("file_size"), &[FieldError::BelowMinimum { min: 0 }]);
        assert_eq!(item.messages("bitrate"), &[FieldError::Required]);
        assert_eq!(item.messages("metadata"), &[FieldError::ExpectedObject]);
    }

    #[test]
    fn duplicate_profiles_are_rejected() {
        let errors = validate_variants(
            &[item("mobile", "http://1"), item("mobile", "http://2")],
            &registry(),
        )
        .unwrap_err();
        assert_eq!(
            errors.messages(NON_FIELD_ERRORS),
            &[FieldError::DuplicateProfiles]
        );
        assert!(errors.items("encoded_videos").is_empty());
    }
}
