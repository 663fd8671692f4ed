//! Attempt key normalization.

/// Identity an [`AttemptRecord`](super::AttemptRecord) is tracked under.
///
/// Keys are trimmed and lowercased, so `" B@X.com"` and `"b@x.com"` share
/// one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptKey(String);

impl AttemptKey {
    /// Normalize a raw key.
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    /// Normalize a raw key, returning `None` if nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = Self::new(raw);
        if key.0.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// The normalized key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AttemptKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl std::fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        assert_eq!(AttemptKey::new("  A@X.com "), AttemptKey::new("a@x.com"));
        assert_eq!(AttemptKey::new("B@X.COM").as_str(), "b@x.com");
    }

    #[test]
    fn test_blank_key_rejected() {
        assert!(AttemptKey::parse("").is_none());
        assert!(AttemptKey::parse("   \t").is_none());
        assert_eq!(AttemptKey::parse(" lead-42 ").unwrap().to_string(), "lead-42");
    }
}
