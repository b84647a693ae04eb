//! Content fingerprints used as cache keys.
//!
//! A fingerprint depends only on the uploaded bytes (and, for edits, the
//! normalised prompt), never on who uploaded them.

use std::fmt;

use sha2::{Digest, Sha256};

/// Lower-case hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Digest of the prompt after trimming and lower-casing.
    pub fn of_prompt(prompt: &str) -> Self {
        Self::of_bytes(normalize_prompt(prompt).as_bytes())
    }

    /// Digest over the concatenated hex of both parts, so either part
    /// changing changes the result.
    pub fn combine(image: &Fingerprint, prompt: &Fingerprint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(image.0.as_bytes());
        hasher.update(prompt.0.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize_prompt(prompt: &str) -> String {
    prompt.trim().to_lowercase()
}

/// Cache key for an edit: image digest, prompt digest and their combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditKey {
    pub image: Fingerprint,
    pub prompt: Fingerprint,
    pub combined: Fingerprint,
}

impl EditKey {
    pub fn new(image_bytes: &[u8], prompt: &str) -> Self {
        let image = Fingerprint::of_bytes(image_bytes);
        let prompt = Fingerprint::of_prompt(prompt);
        let combined = Fingerprint::combine(&image, &prompt);
        Self {
            image,
            prompt,
            combined,
        }
    }
}
