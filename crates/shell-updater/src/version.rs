//! Version parsing and ordering.
//!
//! Versions follow `MAJOR.MINOR.PATCH[-STAGE[.N]]`. The pre-release part is
//! reduced to a stage label (everything before the first dot) and an
//! optional trailing ordinal, e.g. `1.3.0-beta.2` has stage `beta` and
//! stage version `2`.
//!
//! Ordering:
//! - major, minor and patch compare numerically
//! - a release (empty stage) is greater than any pre-release of the same triple
//! - pre-releases compare by stage label, then by stage version

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Stage version used when no numeric ordinal is present.
pub const NO_STAGE_VERSION: i64 = -1;

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)\.(\d+)(-([a-z0-9.-]+))?").expect("version regex is valid")
    })
}

/// A parsed application version.
///
/// Invariant: an empty `stage` always carries `stage_version == -1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub stage: String,
    pub stage_version: i64,
}

impl Version {
    /// Create a release version (no stage).
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            stage: String::new(),
            stage_version: NO_STAGE_VERSION,
        }
    }

    /// Create a pre-release version.
    ///
    /// An empty stage yields a release regardless of `stage_version`.
    pub fn with_stage(major: u64, minor: u64, patch: u64, stage: &str, stage_version: i64) -> Self {
        if stage.is_empty() {
            return Self::new(major, minor, patch);
        }
        Self {
            major,
            minor,
            patch,
            stage: stage.to_string(),
            stage_version: stage_version.max(NO_STAGE_VERSION),
        }
    }

    /// Parse a version string.
    ///
    /// Trailing text after the matched version (build metadata, for
    /// instance) is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidVersion`] if the major, minor or
    /// patch component is missing or not numeric, or if a dash is
    /// followed by an empty stage label.
    pub fn parse(s: &str) -> Result<Self, UpdateError> {
        let invalid = || UpdateError::InvalidVersion(s.to_string());

        let caps = version_regex().captures(s.trim()).ok_or_else(invalid)?;
        let number = |i: usize| -> Result<u64, UpdateError> {
            caps.get(i)
                .ok_or_else(invalid)?
                .as_str()
                .parse::<u64>()
                .map_err(|_| invalid())
        };

        let major = number(1)?;
        let minor = number(2)?;
        let patch = number(3)?;

        let Some(pre) = caps.get(5) else {
            return Ok(Self::new(major, minor, patch));
        };

        let parts: Vec<&str> = pre.as_str().split('.').collect();
        let stage = parts[0];
        if stage.is_empty() {
            return Err(invalid());
        }

        let stage_version = if parts.len() > 1 {
            parts[parts.len() - 1]
                .parse::<u64>()
                .ok()
                .and_then(|n| i64::try_from(n).ok())
                .unwrap_or(NO_STAGE_VERSION)
        } else {
            NO_STAGE_VERSION
        };

        Ok(Self::with_stage(major, minor, patch, stage, stage_version))
    }

    /// Whether this is a full release.
    pub fn is_release(&self) -> bool {
        self.stage.is_empty()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (self.is_release(), other.is_release()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self
                    .stage
                    .cmp(&other.stage)
                    .then(self.stage_version.cmp(&other.stage_version)),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.stage.is_empty() {
            write!(f, "-{}", self.stage)?;
            if self.stage_version != NO_STAGE_VERSION {
                write!(f, ".{}", self.stage_version)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = UpdateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// Strict ordering predicate: `a` sorts before `b`.
pub fn is_lower_version(a: &Version, b: &Version) -> bool {
    a < b
}

/// Parse both strings and compare them.
pub fn is_lower(a: &str, b: &str) -> Result<bool, UpdateError> {
    Ok(is_lower_version(&Version::parse(a)?, &Version::parse(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release() {
        assert_eq!(Version::parse("1.2.3").unwrap(), Version::new(1, 2, 3));
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v.stage, "");
        assert_eq!(v.stage_version, -1);
    }

    #[test]
    fn test_parse_stage() {
        let v = Version::parse("1.2.3-beta.4").unwrap();
        assert_eq!(v, Version::with_stage(1, 2, 3, "beta", 4));

        let v = Version::parse("2.0.0-rc").unwrap();
        assert_eq!(v.stage, "rc");
        assert_eq!(v.stage_version, -1);

        let v = Version::parse("2.0.0-alpha.x").unwrap();
        assert_eq!(v.stage, "alpha");
        assert_eq!(v.stage_version, -1);
    }

    #[test]
    fn test_negative_ordinal_is_not_a_stage_version() {
        let v = Version::parse("1.0.0-beta.-1").unwrap();
        assert_eq!(v, Version::parse("1.0.0-beta").unwrap());
        assert_eq!(v.to_string(), "1.0.0-beta");

        let v = Version::parse("1.0.0-beta.-7").unwrap();
        assert_eq!(v.stage_version, NO_STAGE_VERSION);
        assert_eq!(Version::with_stage(1, 0, 0, "beta", -7).stage_version, NO_STAGE_VERSION);
    }

    #[test]
    fn test_parse_ignores_trailing_metadata() {
        let v = Version::parse("3.1.4+build.7").unwrap();
        assert_eq!(v, Version::new(3, 1, 4));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Version::parse("bad").is_err());
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("1.x.3").is_err());
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.0.0-.4").is_err());
        assert!(Version::parse("99999999999999999999.0.0").is_err());
    }

    #[test]
    fn test_prerelease_lower_than_release() {
        assert!(is_lower("1.0.0-beta.1", "1.0.0").unwrap());
        assert!(!is_lower("1.0.0", "1.0.0-beta.1").unwrap());
    }

    #[test]
    fn test_numeric_components() {
        assert!(is_lower("1.9.0", "1.10.0").unwrap());
        assert!(is_lower("1.0.9", "1.0.10").unwrap());
        assert!(is_lower("0.99.99", "1.0.0").unwrap());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(is_lower("1.0.0-alpha.9", "1.0.0-beta.1").unwrap());
        assert!(is_lower("1.0.0-beta.2", "1.0.0-beta.10").unwrap());
        assert!(is_lower("1.0.0-beta", "1.0.0-beta.0").unwrap());
    }

    #[test]
    fn test_irreflexive() {
        let v = Version::parse("1.0.0-beta.3").unwrap();
        assert!(!is_lower_version(&v, &v));
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["1.2.3", "1.3.0-beta.1", "0.0.1-rc"] {
            assert_eq!(Version::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let v: Version = serde_json::from_str("\"1.3.0-beta.1\"").unwrap();
        assert_eq!(v, Version::with_stage(1, 3, 0, "beta", 1));
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.3.0-beta.1\"");
        assert!(serde_json::from_str::<Version>("\"nope\"").is_err());
    }

    #[test]
    fn test_with_stage_empty_keeps_invariant() {
        let v = Version::with_stage(1, 0, 0, "", 5);
        assert_eq!(v.stage_version, NO_STAGE_VERSION);
    }
}
