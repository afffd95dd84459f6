//! Object path values and their grammar.

use std::fmt;
use std::ops::Deref;

use crate::error::{Error, ErrorKind};

/// A validated, owned D-Bus object path, e.g. `/org/freedesktop/DBus`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPathBuf(String);

impl ObjectPathBuf {
    /// Validate and construct an object path from an owned `String`.
    pub fn new(path: String) -> Result<Self, Error> {
        validate(&path)?;
        Ok(Self(path))
    }

    /// Borrow this object path as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ObjectPathBuf {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ObjectPathBuf {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        Self::new(value.to_owned())
    }
}

impl TryFrom<String> for ObjectPathBuf {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        Self::new(value)
    }
}

/// Validate the object path grammar: absolute, `/` or one or more
/// `/segment` components where a segment matches `[A-Za-z0-9_]+`.
pub fn validate(path: &str) -> Result<(), Error> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(ErrorKind::InvalidPath(format!(
            "path `{path}` must be absolute"
        ))
        .into());
    }

    if path == "/" {
        return Ok(());
    }

    if path.ends_with('/') {
        return Err(ErrorKind::InvalidPath(format!(
            "path `{path}` must not end with `/`"
        ))
        .into());
    }

    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(ErrorKind::InvalidPath(format!(
                "path `{path}` contains an empty segment"
            ))
            .into());
        }

        if !segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(ErrorKind::InvalidPath(format!(
                "path `{path}` contains an invalid segment `{segment}`"
            ))
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_root() {
        assert!(validate("/").is_ok());
    }

    #[test]
    fn accepts_nested() {
        assert!(validate("/org/freedesktop/DBus").is_ok());
    }

    #[test]
    fn rejects_relative() {
        assert!(validate("org/freedesktop").is_err());
    }

    #[test]
    fn rejects_trailing_slash() {
        assert!(validate("/org/").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(validate("/org//freedesktop").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(validate("/org/free-desktop").is_err());
    }
}
