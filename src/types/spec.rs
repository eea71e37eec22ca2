//! Package specifier parsing.
//!
//! Supports:
//! - Latest: `zlib` or `zlib@latest`
//! - Exact: `zlib@1.3.1`
//! - Semver requirement: `zlib@^1.3`, `zlib@>=1.2, <2.0`

use anyhow::{Result, bail};

use crate::catalog::VersionConstraint;
use crate::types::{PackageName, Version};

/// Parsed package specifier with a version constraint.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub name: PackageName,
    pub constraint: VersionConstraint,
}

impl PackageSpec {
    /// Parse a package specifier like `zlib`, `zlib@1.3.1`, or `zlib@^1.3`.
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some((name, version)) = spec.split_once('@') {
            if name.is_empty() {
                bail!("Invalid package specifier: missing package name");
            }
            if version.is_empty() {
                bail!("Invalid package specifier: missing version after @");
            }

            Ok(Self {
                name: PackageName::new(name),
                constraint: VersionConstraint::parse(version),
            })
        } else {
            Ok(Self {
                name: PackageName::new(spec),
                constraint: VersionConstraint::Any,
            })
        }
    }

    /// Check if this specifier pins an exact version.
    pub fn is_pinned(&self) -> bool {
        matches!(self.constraint, VersionConstraint::Exact(_))
    }

    /// The pinned version, when present.
    pub fn pinned_version(&self) -> Option<&Version> {
        match &self.constraint {
            VersionConstraint::Exact(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.constraint {
            VersionConstraint::Any => write!(f, "{}", self.name),
            constraint => write!(f, "{}@{constraint}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let spec = PackageSpec::parse("zlib").unwrap();
        assert_eq!(spec.name, "zlib");
        assert!(matches!(spec.constraint, VersionConstraint::Any));
    }

    #[test]
    fn test_parse_versioned() {
        let spec = PackageSpec::parse("zlib@1.3.1").unwrap();
        assert_eq!(spec.name, "zlib");
        assert_eq!(spec.pinned_version(), Some(&Version::new("1.3.1")));
    }

    #[test]
    fn test_parse_latest() {
        let spec = PackageSpec::parse("zlib@latest").unwrap();
        assert!(matches!(spec.constraint, VersionConstraint::Any));
        assert!(!spec.is_pinned());
    }

    #[test]
    fn test_parse_requirement() {
        let spec = PackageSpec::parse("zlib@^1.3").unwrap();
        assert!(matches!(spec.constraint, VersionConstraint::Req(_)));
        assert!(spec.constraint.matches(&Version::new("1.3.1")));
        assert!(!spec.constraint.matches(&Version::new("2.0.0")));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(PackageSpec::parse("@1.0").is_err());
        assert!(PackageSpec::parse("zlib@").is_err());
    }
}
