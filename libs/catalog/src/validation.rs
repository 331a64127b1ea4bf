//! Input validation for video aggregates
//!
//! Scalar checks only; child lists are validated by the reconcilers because
//! they need the profile registry.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{FieldError, ValidationErrors};
use crate::models::{VideoFields, VideoPayload, WriteMode};

pub const EDX_VIDEO_ID_MAX_LEN: usize = 100;
pub const CLIENT_VIDEO_ID_MAX_LEN: usize = 255;
pub const STATUS_MAX_LEN: usize = 255;
pub const COURSE_ID_MAX_LEN: usize = 255;
pub const PROFILE_NAME_MAX_LEN: usize = 50;
pub const PROFILE_LABEL_MAX_LEN: usize = 255;
pub const URL_MAX_LEN: usize = 200;
pub const LANGUAGE_MAX_LEN: usize = 8;

fn id_regex() -> &'static Regex {
    static ID_REGEX: OnceLock<Regex> = OnceLock::new();
    ID_REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Failed to compile id regex"))
}

/// Shape check for identifiers used in lookup paths: ASCII letters, digits,
/// `-` and `_`, at most 100 characters.
pub fn is_valid_id(value: &str) -> bool {
    value.len() <= EDX_VIDEO_ID_MAX_LEN && id_regex().is_match(value)
}

/// Validate an `edx_video_id`
pub fn validate_edx_video_id(value: Option<&str>) -> Result<String, FieldError> {
    let value = value.ok_or(FieldError::Required)?;
    if value.is_empty() {
        return Err(FieldError::Blank);
    }
    if value.chars().count() > EDX_VIDEO_ID_MAX_LEN {
        return Err(FieldError::TooLong {
            max: EDX_VIDEO_ID_MAX_LEN,
        });
    }
    if !is_valid_id(value) {
        return Err(FieldError::InvalidCharacters {
            field: "edx_video_id",
        });
    }
    Ok(value.to_string())
}

/// Validate a profile name
pub fn validate_profile_name(value: &str) -> Result<(), FieldError> {
    if value.is_empty() {
        return Err(FieldError::Blank);
    }
    if value.chars().count() > PROFILE_NAME_MAX_LEN {
        return Err(FieldError::TooLong {
            max: PROFILE_NAME_MAX_LEN,
        });
    }
    if !id_regex().is_match(value) {
        return Err(FieldError::InvalidCharacters {
            field: "profile_name",
        });
    }
    Ok(())
}

/// Enforce a maximum length on a free-form string
pub fn check_max_len(value: &str, max: usize) -> Result<(), FieldError> {
    if value.chars().count() > max {
        return Err(FieldError::TooLong { max });
    }
    Ok(())
}

/// Required, non-blank, bounded string
pub fn required_text(value: Option<&str>, max: usize) -> Result<String, FieldError> {
    let value = value.ok_or(FieldError::Required)?;
    if value.trim().is_empty() {
        return Err(FieldError::Blank);
    }
    check_max_len(value, max)?;
    Ok(value.to_string())
}

/// Required, non-negative integer
pub fn non_negative(value: Option<i64>) -> Result<i64, FieldError> {
    let value = value.ok_or(FieldError::Required)?;
    if value < 0 {
        return Err(FieldError::BelowMinimum { min: 0 });
    }
    Ok(value)
}

fn validate_duration(value: f64) -> Result<f64, FieldError> {
    if !value.is_finite() {
        return Err(FieldError::NotFinite);
    }
    if value < 0.0 {
        return Err(FieldError::BelowMinimum { min: 0 });
    }
    Ok(value)
}

/// Resolve the scalar fields of a write against the current values.
///
/// `current` is `None` for creates. In [`WriteMode::Partial`] absent fields
/// fall back to `current`; in [`WriteMode::Full`] `duration` and `status` are
/// required and an absent `client_video_id` resets to empty.
pub fn validate_video_fields(
    payload: &VideoPayload,
    current: Option<&VideoFields>,
    mode: WriteMode,
    errors: &mut ValidationErrors,
) -> Option<VideoFields> {
    let fallback = match mode {
        WriteMode::Partial => current,
        WriteMode::Full => None,
    };

    let client_video_id = match (&payload.client_video_id, fallback) {
        (Some(value), _) => check_max_len(value, CLIENT_VIDEO_ID_MAX_LEN).map(|_| value.clone()),
        (None, Some(current)) => Ok(current.client_video_id.clone()),
        (None, None) => Ok(String::new()),
    };

    let duration = match (payload.duration, fallback) {
        (Some(value), _) => validate_duration(value),
        (None, Some(current)) => Ok(current.duration),
        (None, None) => Err(FieldError::Required),
    };

    let status = match (&payload.status, fallback) {
        (Some(value), _) => required_text(Some(value), STATUS_MAX_LEN),
        (None, Some(current)) => Ok(current.status.clone()),
        (None, None) => Err(FieldError::Required),
    };

    let mut fields_ok = true;
    let mut record = |field: &str, error: FieldError| {
        fields_ok = false;
        errors.add(field, error);
    };

    let client_video_id = client_video_id.map_err(|e| record("client_video_id", e)).ok();
    let duration = duration.map_err(|e| record("duration", e)).ok();
    let status = status.map_err(|e| record("status", e)).ok();

    match (client_video_id, duration, status) {
        (Some(client_video_id), Some(duration), Some(status)) if fields_ok => Some(VideoFields {
            client_video_id,
            duration,
            status,
        }),
        _ => None,
    }
}

/// Validate a requested course list; duplicates collapse to the first entry
pub fn validate_courses(courses: &[String], errors: &mut ValidationErrors) -> Vec<String> {
    let mut seen = Vec::with_capacity(courses.len());
    for course_id in courses {
        if course_id.trim().is_empty() {
            errors.add("courses", FieldError::Blank);
            continue;
        }
        if let Err(e) = check_max_len(course_id, COURSE_ID_MAX_LEN) {
            errors.add("courses", e);
            continue;
        }
        if !seen.contains(course_id) {
            seen.push(course_id.clone());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(duration: Option<f64>, status: Option<&str>) -> VideoPayload {
        VideoPayload {
            duration,
            status: status.map(str::to_string),
            ..VideoPayload::default()
        }
    }

    fn current() -> VideoFields {
        VideoFields {
            client_video_id: "Shallow Swordfish".to_string(),
            duration: 122.0,
            status: "test".to_string(),
        }
    }

    #[test]
    fn valid_ids() {
        assert!(is_valid_id("super-soaker"));
        assert!(is_valid_id("fish_2"));
        assert!(!is_valid_id("not an id"));
        assert!(!is_valid_id("ü-video"));
        assert!(!is_valid_id("animals/fish"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id(&"a".repeat(101)));
    }

    #[test]
    fn edx_video_id_errors() {
        assert_eq!(validate_edx_video_id(None), Err(FieldError::Required));
        assert_eq!(validate_edx_video_id(Some("")), Err(FieldError::Blank));
        assert_eq!(
            validate_edx_video_id(Some("***")).unwrap_err().to_string(),
            "edx_video_id has invalid characters"
        );
        assert_eq!(validate_edx_video_id(Some("fish")).unwrap(), "fish");
    }

    #[test]
    fn profile_names() {
        assert!(validate_profile_name("mobile").is_ok());
        assert_eq!(
            validate_profile_name("lo fi").unwrap_err().to_string(),
            "profile_name has invalid characters"
        );
        assert_eq!(
            validate_profile_name(&"p".repeat(51)),
            Err(FieldError::TooLong { max: 50 })
        );
    }

    #[test]
    fn full_mode_requires_duration_and_status() {
        let mut errors = ValidationErrors::new();
        let fields =
            validate_video_fields(&payload(None, None), Some(&current()), WriteMode::Full, &mut errors);

        assert!(fields.is_none());
        assert_eq!(errors.messages("duration"), &[FieldError::Required]);
        assert_eq!(errors.messages("status"), &[FieldError::Required]);
    }

    #[test]
    fn full_mode_resets_client_video_id() {
        let mut errors = ValidationErrors::new();
        let fields = validate_video_fields(
            &payload(Some(10.0), Some("done")),
            Some(&current()),
            WriteMode::Full,
            &mut errors,
        )
        .unwrap();

        assert!(errors.is_empty());
        assert_eq!(fields.client_video_id, "");
        assert_eq!(fields.duration, 10.0);
    }

    #[test]
    fn partial_mode_keeps_unspecified_fields() {
        let mut errors = ValidationErrors::new();
        let fields = validate_video_fields(
            &payload(Some(99.5), None),
            Some(&current()),
            WriteMode::Partial,
            &mut errors,
        )
        .unwrap();

        assert_eq!(fields.duration, 99.5);
        assert_eq!(fields.status, "test");
        assert_eq!(fields.client_video_id, "Shallow Swordfish");
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut errors = ValidationErrors::new();
        let fields =
            validate_video_fields(&payload(Some(-1.0), Some("x")), None, WriteMode::Full, &mut errors);

        assert!(fields.is_none());
        assert_eq!(
            errors.messages("duration"),
            &[FieldError::BelowMinimum { min: 0 }]
        );
    }

    #[test]
    fn courses_are_deduplicated_in_order() {
        let mut errors = ValidationErrors::new();
        let courses = validate_courses(
            &[
                "animals/fish".to_string(),
                "animals/birds".to_string(),
                "animals/fish".to_string(),
            ],
            &mut errors,
        );

        assert!(errors.is_empty());
        assert_eq!(courses, vec!["animals/fish", "animals/birds"]);
    }

    #[test]
    fn blank_course_is_reported() {
        let mut errors = ValidationErrors::new();
        validate_courses(&[" ".to_string()], &mut errors);
        assert_eq!(errors.messages("courses"), &[FieldError::Blank]);
    }
}
