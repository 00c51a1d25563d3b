//! Content kinds and the platforms that serve them

use std::fmt;
use std::str::FromStr;

/// Remote platform a content kind is harvested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Signed Q&A/article platform with offset pagination
    Qa,
    /// Cookie-authenticated paid community with time-cursor pagination
    Community,
}

/// The three content kinds a subscription can follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentKind {
    /// Answers posted by an author
    Post,
    /// Long-form articles; the list only carries excerpts
    Article,
    /// Short notes from a paid group
    Note,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Article => "article",
            Self::Note => "note",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "post" => Some(Self::Post),
            "article" => Some(Self::Article),
            "note" => Some(Self::Note),
            _ => None,
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            Self::Post | Self::Article => Platform::Qa,
            Self::Note => Platform::Community,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(s)
            .ok_or_else(|| format!("unknown content kind '{}' (expected post, article or note)", s))
    }
}
