use crate::dao::{ChapterInsert, SeriesInsert};
use crate::error::StorageError;
use crate::types::{ChapterEntry, SeriesRecord};

const PAGE_SEPARATOR: char = ',';
const ESCAPE: char = '%';

pub fn series_insert_from_record(record: &SeriesRecord) -> Result<SeriesInsert, StorageError> {
    Ok(SeriesInsert {
        slug: record.slug.clone(),
        source_id: record.source_id.clone(),
        url: record.url.clone(),
        name: record.name.clone(),
        authors: serde_json::to_string(&record.authors)?,
        genres: serde_json::to_string(&record.genres)?,
        synopsis: record.synopsis.clone().filter(|s| !s.trim().is_empty()),
        status: record.status.as_str().to_string(),
        cover_url: record.cover_url.clone(),
    })
}

pub fn chapter_insert_from_entry(series_id: i64, entry: &ChapterEntry) -> ChapterInsert {
    ChapterInsert {
        slug: entry.slug.clone(),
        series_id,
        url: entry.url.clone(),
        title: entry.title.clone(),
        date: entry.date.clone(),
    }
}

/// Decode a JSON string-array column. NULL-ish or empty text decodes to an empty list.
pub fn decode_list(raw: &str) -> Result<Vec<String>, StorageError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

/// Serialize page identifiers into the `pages` column. `%` and `,` inside an
/// identifier are percent-escaped so the list splits back unchanged.
pub fn join_pages<S: AsRef<str>>(ids: &[S]) -> String {
    ids.iter()
        .map(|id| id.as_ref().replace(ESCAPE, "%25").replace(PAGE_SEPARATOR, "%2C"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_pages(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(PAGE_SEPARATOR).map(unescape_page).collect()
}

fn unescape_page(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find(ESCAPE) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("%25") {
            out.push(ESCAPE);
            rest = &tail[3..];
        } else if tail.starts_with("%2C") {
            out.push(PAGE_SEPARATOR);
            rest = &tail[3..];
        } else {
            out.push(ESCAPE);
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
