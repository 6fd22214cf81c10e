use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub lang: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Ongoing,
    Complete,
    #[default]
    Unknown,
}

impl SeriesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Complete => "complete",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SeriesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "ongoing" => Self::Ongoing,
            "complete" | "completed" => Self::Complete,
            _ => Self::Unknown,
        })
    }
}

/// One hit from a search or catalog listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub slug: String,
    pub name: String,
    pub url: Option<String>,
    pub cover_url: Option<String>,
}

/// What a source needs to find a series again: at least the slug, plus a URL
/// for sources that address series by URL.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesLocator {
    pub slug: String,
    pub url: Option<String>,
    pub name: Option<String>,
}

impl SeriesLocator {
    pub fn slug(slug: impl Into<String>) -> Self {
        Self { slug: slug.into(), ..Default::default() }
    }
}

impl From<&SearchResult> for SeriesLocator {
    fn from(r: &SearchResult) -> Self {
        Self { slug: r.slug.clone(), url: r.url.clone(), name: Some(r.name.clone()) }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChapterLocator {
    pub slug: String,
    pub url: Option<String>,
}

/// Chapter entry of a normalized series record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterEntry {
    pub slug: String,
    pub url: Option<String>,
    pub title: String,
    pub date: Option<String>,
}

/// Canonical shape every source normalizes its series page into.
/// `chapters` is oldest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub slug: String,
    pub url: Option<String>,
    pub name: String,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub status: SeriesStatus,
    pub synopsis: Option<String>,
    pub chapters: Vec<ChapterEntry>,
    pub cover_url: Option<String>,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub slug: Option<String>,
    pub image: Option<String>,
}

impl PageDescriptor {
    /// Stable identifier persisted in the chapter's page list.
    pub fn identifier(&self) -> Option<&str> {
        self.slug.as_deref().or(self.image.as_deref()).filter(|s| !s.is_empty())
    }

    /// Rebuild a descriptor from a stored identifier.
    pub fn from_identifier(id: &str) -> Self {
        if id.starts_with("http://") || id.starts_with("https://") {
            Self { slug: None, image: Some(id.to_string()) }
        } else {
            Self { slug: Some(id.to_string()), image: None }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterDetail {
    pub pages: Vec<PageDescriptor>,
}

#[derive(Debug, Clone)]
pub struct PageImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}
