//! Error types for the catalog
//!
//! Validation failures are collected into a [`ValidationErrors`] report: a map
//! from field name to either a list of messages or, for nested child lists, one
//! nested report per list position. It serializes to the shape clients expect:
//!
//! ```json
//! {"encoded_videos": [{}, {"profile": ["Object with profile_name=bird does not exist."]}]}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use thiserror::Error;

/// Key under which cross-item errors are reported
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// A single validation failure on one field
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("This field is required.")]
    Required,

    #[error("This field may not be blank.")]
    Blank,

    #[error("{field} has invalid characters")]
    InvalidCharacters { field: &'static str },

    #[error("Ensure this field has no more than {max} characters.")]
    TooLong { max: usize },

    #[error("Ensure this value is greater than or equal to {min}.")]
    BelowMinimum { min: i64 },

    #[error("A valid number is required.")]
    NotFinite,

    #[error("{model} with this {field} already exists.")]
    AlreadyExists {
        model: &'static str,
        field: &'static str,
    },

    #[error("Object with profile_name={0} does not exist.")]
    ProfileNotFound(String),

    #[error("\"{0}\" is not a valid choice.")]
    InvalidChoice(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Expected a dictionary of items.")]
    ExpectedObject,

    #[error("Invalid data: duplicate profiles")]
    DuplicateProfiles,

    #[error("Invalid data: duplicate languages")]
    DuplicateLanguages,

    #[error("Invalid XML: {0}")]
    InvalidXml(String),
}

/// Errors reported for one field
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorEntry {
    /// Messages attached directly to the field
    Messages(Vec<FieldError>),
    /// One report per position of a child list; clean positions are empty
    Items(Vec<ValidationErrors>),
}

/// Structured validation report for one write request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, ErrorEntry>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report containing a single field error
    pub fn single(field: impl Into<String>, error: FieldError) -> Self {
        let mut errors = Self::new();
        errors.add(field, error);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append a message to `field`
    pub fn add(&mut self, field: impl Into<String>, error: FieldError) {
        let field = field.into();
        // A list field that already carries item errors keeps its cross-item
        // messages in the report-wide bucket instead.
        if matches!(self.fields.get(&field), Some(ErrorEntry::Items(_))) {
            self.add_non_field(error);
            return;
        }
        if let ErrorEntry::Messages(messages) = self
            .fields
            .entry(field)
            .or_insert_with(|| ErrorEntry::Messages(Vec::new()))
        {
            messages.push(error);
        }
    }

    pub fn add_non_field(&mut self, error: FieldError) {
        self.add(NON_FIELD_ERRORS, error);
    }

    /// Attach per-position reports to a child list field.
    ///
    /// Nothing is recorded when every item is clean.
    pub fn add_items(&mut self, field: impl Into<String>, items: Vec<ValidationErrors>) {
        if items.iter().all(ValidationErrors::is_empty) {
            return;
        }
        self.fields.insert(field.into(), ErrorEntry::Items(items));
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, entry) in other.fields {
            match entry {
                ErrorEntry::Messages(messages) => {
                    for message in messages {
                        self.add(field.clone(), message);
                    }
                }
                ErrorEntry::Items(items) => self.add_items(field, items),
            }
        }
    }

    /// Messages attached directly to `field`
    pub fn messages(&self, field: &str) -> &[FieldError] {
        match self.fields.get(field) {
            Some(ErrorEntry::Messages(messages)) => messages,
            _ => &[],
        }
    }

    /// Per-position reports of a child list field
    pub fn items(&self, field: &str) -> &[ValidationErrors] {
        match self.fields.get(field) {
            Some(ErrorEntry::Items(items)) => items,
            _ => &[],
        }
    }

    /// `Ok(())` when empty, the report itself otherwise
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Serialize for ValidationErrors {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, entry) in &self.fields {
            map.serialize_entry(field, entry)?;
        }
        map.end()
    }
}

impl Serialize for ErrorEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ErrorEntry::Messages(messages) => {
                let mut seq = serializer.serialize_seq(Some(messages.len()))?;
                for message in messages {
                    seq.serialize_element(&message.to_string())?;
                }
                seq.end()
            }
            ErrorEntry::Items(items) => items.serialize(serializer),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("invalid data"),
        }
    }
}

/// Failures raised by a store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A row the transaction depends on disappeared
    #[error("row not found: {0}")]
    MissingRow(String),

    /// The transaction lost a conflict with a concurrent writer and was
    /// rolled back; running it again from the start may succeed
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A stored value could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// SQLSTATE codes after which a transaction can simply be run again
const RETRYABLE_STATES: [&str; 2] = ["40001", "40P01"];

impl StoreError {
    /// Maps unique violations to [`StoreError::UniqueViolation`] and
    /// serialization failures or deadlocks to
    /// [`StoreError::SerializationFailure`]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                let constraint = db.constraint().unwrap_or("unknown").to_string();
                return StoreError::UniqueViolation(constraint);
            }
            if db
                .code()
                .is_some_and(|code| RETRYABLE_STATES.contains(&&*code))
            {
                return StoreError::SerializationFailure(db.message().to_string());
            }
        }
        StoreError::Database(err)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::SerializationFailure(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Top level catalog error
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The request was rejected; nothing was written
    #[error("invalid data: {0}")]
    Validation(ValidationErrors),

    #[error("Video not found for edx_video_id: {0}")]
    VideoNotFound(String),

    #[error("Subtitle not found for edx_video_id: {edx_video_id}, language: {language}")]
    SubtitleNotFound {
        edx_video_id: String,
        language: String,
    },

    #[error("XML export failed: {0}")]
    Export(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CatalogError {
    /// True when the failed write can be run again unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Store(e) if e.is_retryable())
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_errors_serialize_with_empty_positions() {
        let mut item = ValidationErrors::new();
        item.add("profile", FieldError::ProfileNotFound("bird".to_string()));

        let mut errors = ValidationErrors::new();
        errors.add_items("encoded_videos", vec![ValidationErrors::new(), item]);

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
    fn clean_items_are_not_recorded() {
        let mut errors = ValidationErrors::new();
        errors.add_items("subtitles", vec![ValidationErrors::new(); 3]);
        assert!(errors.is_empty());
    }

    #[test]
    fn non_field_errors_use_dedicated_key() {
        let mut errors = ValidationErrors::new();
        errors.add_non_field(FieldError::DuplicateProfiles);
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!({"non_field_errors": ["Invalid data: duplicate profiles"]})
        );
    }

    #[test]
    fn merge_keeps_messages_from_both_reports() {
        let mut first = ValidationErrors::single(
            "edx_video_id",
            FieldError::InvalidCharacters {
                field: "edx_video_id",
            },
        );
        let mut second = ValidationErrors::single("duration", FieldError::Required);
        second.add_non_field(FieldError::DuplicateLanguages);
        first.merge(second);

        assert_eq!(first.messages("duration"), &[FieldError::Required]);
        assert_eq!(
            first.messages(NON_FIELD_ERRORS),
            &[FieldError::DuplicateLanguages]
        );
        assert_eq!(
            first.messages("edx_video_id")[0].to_string(),
            "edx_video_id has invalid characters"
        );
    }

    #[test]
    fn only_serialization_failures_are_retryable() {
        let conflict = CatalogError::Store(StoreError::SerializationFailure(
            "could not serialize access due to concurrent update".to_string(),
        ));
        assert!(conflict.is_retryable());

        let duplicate = CatalogError::Store(StoreError::UniqueViolation(
            "videos_edx_video_id_key".to_string(),
        ));
        assert!(!duplicate.is_retryable());
        assert!(!CatalogError::VideoNotFound("fish".to_string()).is_retryable());
    }

    #[test]
    fn already_exists_message() {
        let error = FieldError::AlreadyExists {
            model: "Video",
            field: "Edx video id",
        };
        assert_eq!(error.to_string(), "Video with this Edx video id already exists.");
    }
}
