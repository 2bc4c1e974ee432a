//! Application records.
//!
//! Applications own builds. The registry here is deliberately minimal: a
//! flat record referenced by id, enough for builds to validate ownership
//! and derive hostnames and image names.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::{AppId, Error, Result};

/// An application hosted on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    /// Slug name, unique per deployment.
    pub name: String,
    /// Hostname the app serves on, e.g. "myapp.hippo.test".
    pub hostname: String,
    pub created_at: DateTime<Utc>,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").expect("valid pattern"))
}

/// Validate an application slug: lowercase alphanumeric plus hyphen,
/// starting with an alphanumeric, at most 63 characters (DNS label).
pub fn validate_name(name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "invalid app name {:?}: must match [a-z0-9][a-z0-9-]*, max 63 chars",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_slugs() {
        for name in ["myapp", "my-app", "a", "app2", "0day"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_invalid_slugs() {
        for name in ["", "My-App", "-app", "app_1", "app.web", &"a".repeat(64)] {
            assert!(validate_name(name).is_err(), "{name:?} should be invalid");
        }
    }
}
