//! Category-policy-driven sanitization (§4.3: "sanitizer parameterized by
//! `profile.access_level`, ... sanitizer is total").
//!
//! Disclosure is monotone in access level by construction: a field gated
//! at threshold `T` is visible whenever the requester's level is `>= T`,
//! so raising the requester's level can only add fields, never remove
//! them (`sanitize(r, L1) ⊑ sanitize(r, L2)` whenever `L1 <= L2`).

use aether_core::AccessLevel;
use std::collections::HashMap;

use crate::backend::InformationRecord;

/// Strips fields a requester's access level doesn't clear. Implementors
/// may compose with category-specific logic beyond field visibility (the
/// "optional per-backend override hook" kernels may supply); the default
/// [`FieldVisibilitySanitizer`] covers the common case described in §4.3's
/// examples (precise geolocation, asset IDs).
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, record: InformationRecord, level: AccessLevel) -> InformationRecord;
}

/// Redacts named fields below a per-field minimum access level. A field
/// with no configured threshold is always visible.
pub struct FieldVisibilitySanitizer {
    thresholds: HashMap<String, AccessLevel>,
}

impl FieldVisibilitySanitizer {
    pub fn new() -> Self {
        Self {
            thresholds: HashMap::new(),
        }
    }

    pub fn gate(mut self, field: impl Into<String>, min_level: AccessLevel) -> Self {
        self.thresholds.insert(field.into(), min_level);
        self
    }

    /// §4.3 worked example: "threat records lose precise geolocation below
    /// SENSITIVE".
    pub fn threat_data_default() -> Self {
        Self::new().gate("precise_geolocation", AccessLevel::Sensitive)
    }

    /// §4.3 worked example: "mission records lose asset IDs below
    /// CRITICAL".
    pub fn mission_plan_default() -> Self {
        Self::new().gate("asset_ids", AccessLevel::Critical)
    }
}

impl Default for FieldVisibilitySanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer for FieldVisibilitySanitizer {
    fn sanitize(&self, mut record: InformationRecord, level: AccessLevel) -> InformationRecord {
        record.fields.retain(|key, _| {
            self.thresholds
                .get(key)
                .map(|min_level| level >= *min_level)
                .unwrap_or(true)
        });
        record
    }
}
