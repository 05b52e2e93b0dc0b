use std::fmt;
use std::str::FromStr;
use semver::{Version, VersionReq};
use thiserror::Error;

/// Error type for version parsing
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
    #[error("Version parse error: {0}")]
    ParseError(String),
}

/// Represents a version requirement range using semver constraints.
#[derive(Debug, Clone)]
pub struct VersionRange {
    /// The original constraint string (e.g., "^1.2.3", ">=2.0")
    constraint: String,
    /// The parsed semver requirement
    req: VersionReq,
}

impl VersionRange {
    /// Creates a new version range from a constraint string.
    pub fn from_constraint(constraint: &str) -> Result<Self, VersionError> {
        let req = VersionReq::parse(constraint)
            .map_err(|e| VersionError::ParseError(format!("Invalid version constraint '{}': {}", constraint, e)))?;
        Ok(Self {
            constraint: constraint.to_string(),
            req,
        })
    }

    /// Checks if a specific `semver::Version` satisfies this range.
    pub fn includes(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    /// Checks a raw version string; unparsable versions never match.
    pub fn includes_str(&self, version: &str) -> bool {
        match Version::parse(version) {
            Ok(v) => self.includes(&v),
            Err(e) => {
                log::warn!("Could not parse version '{}' against constraint '{}': {}", version, self.constraint, e);
                false
            }
        }
    }

    /// Returns the original constraint string.
    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }
}

/// Implement Display to show the original constraint string.
impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

/// Allow parsing directly from a string slice.
impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::from_constraint(s)
    }
}

/// Wildcard segment accepted in expected versions ("1.x.x").
pub const VERSION_WILDCARD: &str = "x";

fn is_semver_constraint(expected: &str) -> bool {
    expected.starts_with(['^', '~', '>', '<', '='])
        || expected.contains(',')
        || expected.contains('*')
}

/// Check whether `actual` satisfies `expected`.
///
/// `expected` is either a plain dotted version, compared segment by segment
/// with `x` matching any segment, or a semver requirement such as `^1.2`.
pub fn is_version_compatible(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }
    if is_semver_constraint(expected) {
        return match VersionRange::from_constraint(expected) {
            Ok(range) => range.includes_str(actual),
            Err(e) => {
                log::warn!("{}", e);
                false
            }
        };
    }

    let actual_parts: Vec<&str> = actual.split('.').collect();
    let expected_parts: Vec<&str> = expected.split('.').collect();
    if actual_parts.len() != expected_parts.len() {
        return false;
    }
    actual_parts
        .iter()
        .zip(expected_parts.iter())
        .all(|(a, e)| *e == VERSION_WILDCARD || a == e)
}
