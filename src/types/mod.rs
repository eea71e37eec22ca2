//! Core newtypes shared across the crate.

mod hash;
mod spec;

pub use hash::Blake3Hash;
pub use spec::PackageSpec;

use std::borrow::Borrow;

/// A normalized package name.
///
/// Package names are automatically lowercased to ensure consistent lookups
/// and comparisons. This prevents issues with case-sensitive package names
/// like `Zlib` vs `zlib`.
///
/// # Example
///
/// ```
/// use pkgsmith::types::PackageName;
///
/// let name = PackageName::new("Zlib");
/// assert_eq!(name.as_str(), "zlib");
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name, automatically normalizing to lowercase.
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    /// Get the normalized package name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Environment-variable form: uppercased, `-` and `.` mapped to `_`.
    ///
    /// Used for `DEP_<NAME>` variables in build step environments.
    pub fn env_key(&self) -> String {
        self.0.to_uppercase().replace(['-', '.'], "_")
    }
}

impl AsRef<std::path::Path> for PackageName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// A package version string.
///
/// Versions are stored as strings to support arbitrary version formats
/// (e.g., `1.2.3`, `2024.01.01`, `nightly`). Comparison and ordering use
/// semantic version parsing where applicable, falling back to numeric
/// segment comparison.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Version(String);

impl Version {
    /// Create a new version from a string.
    pub fn new(version: &str) -> Self {
        Self(version.to_string())
    }

    /// Get the version as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as a strict semantic version, if possible.
    pub fn as_semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.0).ok()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Version {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Compare two versions. Returns true if `latest` is newer than `current`.
///
/// Prefers strict semver comparison; falls back to numeric segment
/// comparison (e.g. `1.2.10 > 1.2.9`) for non-semver version strings.
pub fn is_newer(current: &Version, latest: &Version) -> bool {
    if let (Some(c), Some(l)) = (current.as_semver(), latest.as_semver()) {
        return l > c;
    }

    let parse =
        |v: &str| -> Vec<u32> { v.split('.').filter_map(|s| s.parse::<u32>().ok()).collect() };

    let c_parts = parse(current.as_str());
    let l_parts = parse(latest.as_str());

    for i in 0..std::cmp::max(c_parts.len(), l_parts.len()) {
        let cv = c_parts.get(i).unwrap_or(&0);
        let lv = l_parts.get(i).unwrap_or(&0);
        if lv > cv {
            return true;
        }
        if cv > lv {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_normalization() {
        let name = PackageName::new("OpenSSL");
        assert_eq!(name.as_str(), "openssl");
        assert_eq!(name, "OPENSSL");
    }

    #[test]
    fn test_env_key() {
        assert_eq!(PackageName::new("pkg-config").env_key(), "PKG_CONFIG");
        assert_eq!(PackageName::new("libgit2").env_key(), "LIBGIT2");
    }

    #[test]
    fn test_is_newer_semver() {
        assert!(is_newer(&Version::new("1.2.9"), &Version::new("1.2.10")));
        assert!(!is_newer(&Version::new("1.2.10"), &Version::new("1.2.9")));
        assert!(!is_newer(&Version::new("1.2.3"), &Version::new("1.2.3")));
    }

    #[test]
    fn test_is_newer_fallback() {
        // Two-segment versions are not valid semver; numeric fallback applies.
        assert!(is_newer(&Version::new("1.2"), &Version::new("1.3")));
        assert!(is_newer(&Version::new("2024.01"), &Version::new("2024.02")));
    }
}
