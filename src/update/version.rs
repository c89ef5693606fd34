//! Version comparison for release candidates.
//!
//! Feeds commonly publish short versions like `2.0` or `v1.10`, which strict
//! semver rejects. [`ReleaseVersion`] accepts one to three numeric components
//! (missing ones are zero) plus the usual pre-release and build suffixes, and
//! orders them by [`semver::Version`] precedence, never lexically.

use crate::error::{Error, Result};
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed release version, keeping the string it was parsed from.
#[derive(Debug, Clone)]
pub struct ReleaseVersion {
    raw: String,
    version: Version,
}

impl ReleaseVersion {
    /// Parse a release version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidVersion`] if the string is not a version.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let unprefixed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        // Split off `-pre` / `+build` before padding the numeric core.
        let suffix_at = unprefixed.find(['-', '+']).unwrap_or(unprefixed.len());
        let (core, suffix) = unprefixed.split_at(suffix_at);

        let components: Vec<&str> = core.split('.').collect();
        if components.is_empty()
            || components.len() > 3
            || components
                .iter()
                .any(|c| c.is_empty() || !c.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(Error::InvalidVersion(input.to_string()));
        }

        let mut padded = components.join(".");
        for _ in components.len()..3 {
            padded.push_str(".0");
        }
        padded.push_str(suffix);

        let version =
            Version::parse(&padded).map_err(|e| Error::InvalidVersion(format!("{input}: {e}")))?;

        Ok(Self {
            raw: trimmed.to_string(),
            version,
        })
    }

    /// The normalised semver form.
    #[must_use]
    pub fn semver(&self) -> &Version {
        &self.version
    }

    /// The version exactly as published.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Whether `candidate` is strictly newer than `current`.
///
/// Equal versions are not newer. Build metadata is ignored, as in semver
/// precedence.
#[must_use]
pub fn is_newer(candidate: &ReleaseVersion, current: &ReleaseVersion) -> bool {
    candidate.cmp(current) == Ordering::Greater
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version.cmp_precedence(&other.version)
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ReleaseVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Version> for ReleaseVersion {
    fn from(version: Version) -> Self {
        Self {
            raw: version.to_string(),
            version,
        }
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
