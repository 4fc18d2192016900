use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Canonical Bible passage identifier, `"<Book> <Chapter>[:<Verse>]"`.
///
/// Equality is plain string equality: `"Genesis 1:1-3"` and `"Genesis 1:1"`
/// are different keys. Nothing is validated against a real canon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerseRef(String);

impl VerseRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build a reference from matcher output; no verse yields a chapter-level reference
    pub fn from_parts(book: &str, chapter: &str, verse: Option<&str>) -> Self {
        match verse {
            Some(verse) => Self(format!("{} {}:{}", book, chapter, verse)),
            None => Self(format!("{} {}", book, chapter)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Carries an explicit verse number
    pub fn has_verse(&self) -> bool {
        self.0.contains(':')
    }

    /// Spans several verses or chapters
    pub fn is_range(&self) -> bool {
        self.0.contains('-')
    }

    /// One explicit verse, not a range
    pub fn is_single_verse(&self) -> bool {
        self.has_verse() && !self.is_range()
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.contains(needle)
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VerseRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for VerseRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for VerseRef {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for VerseRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts() {
        assert_eq!(VerseRef::from_parts("Genesis", "1", Some("1")).as_str(), "Genesis 1:1");
        assert_eq!(VerseRef::from_parts("Psalm", "104", None).as_str(), "Psalm 104");
    }

    #[test]
    fn test_shape_helpers() {
        let single = VerseRef::from("Genesis 1:3");
        let range = VerseRef::from("Genesis 1:1-5");
        let chapter = VerseRef::from("Genesis 1");

        assert!(single.is_single_verse());
        assert!(range.has_verse() && range.is_range());
        assert!(!range.is_single_verse());
        assert!(!chapter.has_verse());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&VerseRef::from("John 1:1")).unwrap();
        assert_eq!(json, "\"John 1:1\"");
    }
}
