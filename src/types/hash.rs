use serde::{Deserialize, Deserializer, Serialize};

/// A validated BLAKE3 digest (64 hex characters).
///
/// This newtype ensures that all checksums in the system are validated at
/// construction or deserialization time, preventing invalid hex strings
/// from propagating through the codebase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Blake3Hash(String);

impl Blake3Hash {
    /// Create a new digest, validating the input.
    ///
    /// Accepts strings with or without a "blake3:" prefix. Returns an error
    /// if the digest is not exactly 64 hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, String> {
        let s = s.into();
        let hex = s.strip_prefix("blake3:").unwrap_or(&s);

        if hex.len() != 64 {
            return Err(format!(
                "Invalid BLAKE3 digest: expected 64 hex characters, got {} in '{s}'",
                hex.len(),
            ));
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "Invalid BLAKE3 digest: contains non-hex characters in '{s}'"
            ));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Digest of an in-memory byte slice.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Streaming digest of a file on disk.
    pub fn of_file(path: &std::path::Path) -> std::io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut file = std::fs::File::open(path)?;
        std::io::copy(&mut file, &mut hasher)?;
        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// Get the digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Blake3Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Blake3Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
