use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// A normalized, tagged repository reference such as `docker.io/library/busybox:latest`.
///
/// No normalization happens here: callers are expected to supply the fully-qualified name they
/// want recorded in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoTag {
    name: String,
    tag: String,
}

impl RepoTag {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for RepoTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for RepoTag {
    type Err = Error;

    /// Splits `NAME:TAG` at the last colon that follows the last slash, so registry ports
    /// (`localhost:5000/app:v1`) stay part of the name.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidReference(s.to_owned());
        if s.contains('@') {
            return Err(invalid());
        }
        let name_start = s.rfind('/').map_or(0, |i| i + 1);
        let colon = s[name_start..].rfind(':').ok_or_else(invalid)? + name_start;
        let (name, tag) = (&s[..colon], &s[colon + 1..]);
        if name.is_empty() || tag.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(name, tag))
    }
}
