//! Credential resolution for a Business.
//!
//! Absent credentials disable remote sync for the Business's whole subtree.
//! Callers treat `None` as "not yet syncable", never as an error.

use crate::models::{Business, Credentials};

/// Returns the Business's credentials, or `None` when they are missing or
/// any of the three fields is blank.
pub fn resolve_credentials(business: &Business) -> Option<Credentials> {
    business
        .credentials
        .as_ref()
        .filter(|c| {
            !c.platform_id.trim().is_empty()
                && !c.api_key.trim().is_empty()
                && !c.business_remote_id.trim().is_empty()
        })
        .cloned()
}
