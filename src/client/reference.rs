//! # Image References
//!
//! Parsing of OCI image references (`registry/repo[:tag][@digest]`).

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[a-z0-9][a-z0-9._\-/:]*?)(?::(?P<tag>[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127}))?(?:@(?P<digest>[A-Za-z][A-Za-z0-9]*(?:[\-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}))?$",
    )
    .expect("Failed to compile image reference regex")
});

/// Parsed OCI image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry and repository, e.g. `ghcr.io/example/repo`
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid image reference")]
pub struct ReferenceError(pub String);

impl ImageReference {
    /// Parse a reference. A colon inside the registry host (`host:5000/repo`)
    /// is a port, not a tag.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let reference = reference.trim();
        let caps = REFERENCE_RE
            .captures(reference)
            .ok_or_else(|| ReferenceError(reference.to_string()))?;
        let name = caps
            .name("name")
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ReferenceError(reference.to_string()))?;
        if name.ends_with('/') || name.contains("//") {
            return Err(ReferenceError(reference.to_string()));
        }
        Ok(Self {
            name,
            tag: caps.name("tag").map(|m| m.as_str().to_string()),
            digest: caps.name("digest").map(|m| m.as_str().to_string()),
        })
    }

    /// Whether a specific tag or digest was given
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.tag.is_some() || self.digest.is_some()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
