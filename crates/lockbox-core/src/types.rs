//! Strong type definitions for Lockbox.
//!
//! User and file names are newtypes so an owner can never be passed where a
//! grantee or a file name is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Maximum length of a user or file name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidName(format!("{kind} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::InvalidName(format!(
            "{kind} exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if name.contains('/') || name.chars().any(char::is_control) {
        return Err(CoreError::InvalidName(format!(
            "{kind} contains a path separator or control character: {name:?}"
        )));
    }
    Ok(())
}

/// A user identifier (the subject of an identity).
///
/// Unique per server; assigned once at registration.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a user id, rejecting empty or path-like names.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("user id", &name)?;
        Ok(Self(name))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A file name, unique per owner.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName(String);

impl FileName {
    /// Create a file name, rejecting empty or path-like names.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("file name", &name)?;
        Ok(Self(name))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileName({})", self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileName {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<FileName> for String {
    fn from(name: FileName) -> Self {
        name.0
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
