//! Profile registry
//!
//! Profiles are reference data: variants point at them by name and never own
//! them. A write request resolves every profile name it mentions in one batch
//! read before validation, so an unknown name surfaces as a field error.

use std::collections::HashMap;

use crate::error::{FieldError, StoreResult};
use crate::models::Profile;
use crate::store::StoreTransaction;

/// Profiles resolved for one request
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    by_name: HashMap<String, Profile>,
}

impl ProfileRegistry {
    /// Resolve `names` inside the request's transaction
    pub async fn load(tx: &mut dyn StoreTransaction, names: &[String]) -> StoreResult<Self> {
        if names.is_empty() {
            return Ok(Self::default());
        }
        let profiles = tx.find_profiles(names).await?;
        Ok(Self::from_profiles(profiles))
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            by_name: profiles
                .into_iter()
                .map(|p| (p.profile_name.clone(), p))
                .collect(),
        }
    }

    /// Exact, case-sensitive lookup
    pub fn lookup(&self, name: &str) -> Result<&Profile, FieldError> {
        self.by_name
            .get(name)
            .ok_or_else(|| FieldError::ProfileNotFound(name.to_string()))
    }
}
