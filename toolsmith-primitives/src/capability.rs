//! Names under which runtime-created capabilities are registered.
//!
//! A capability name doubles as the stem of its on-disk source artifact and as
//! the key of the namespace the unit is loaded into, so it is restricted to a
//! plain ASCII identifier.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted capability name.
pub const MAX_NAME_LEN: usize = 64;

/// Validated capability name.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityName(String);

impl CapabilityName {
    /// Creates a capability name after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapabilityName`] if the name is empty, longer
    /// than [`MAX_NAME_LEN`], or not an ASCII identifier.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CapabilityName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CapabilityName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for CapabilityName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CapabilityName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CapabilityName> for String {
    fn from(value: CapabilityName) -> Self {
        value.0
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reject = |reason: String| Error::InvalidCapabilityName {
        name: name.to_owned(),
        reason,
    };

    let Some(first) = name.chars().next() else {
        return Err(reject("name cannot be empty".into()));
    };

    if name.len() > MAX_NAME_LEN {
        return Err(reject(format!("name length must be <= {MAX_NAME_LEN}")));
    }

    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(reject("name must start with an ASCII letter or underscore".into()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(reject(
            "name may only contain ASCII letters, digits, and underscores".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_identifiers() {
        for name in ["echo", "get_top_docker_images", "_private", "v2_search"] {
            let parsed = CapabilityName::new(name).expect("valid name");
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn rejects_path_like_names() {
        for name in ["../escape", "a/b", "with-dash", "has space", "9lives", ""] {
            let err = CapabilityName::new(name).expect_err("should be rejected");
            assert!(matches!(err, Error::InvalidCapabilityName { .. }));
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let name = "a".repeat(MAX_NAME_LEN + 1);
        assert!(CapabilityName::new(name).is_err());
        assert!(CapabilityName::new("a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn try_from_string_validates() {
        assert!(CapabilityName::try_from("bad-name".to_owned()).is_err());
        let name: CapabilityName = "echo".parse().expect("parse");
        assert_eq!(String::from(name), "echo");
    }
}
