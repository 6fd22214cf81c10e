use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Executor, FromRow, Row};

use crate::error::StorageError;

type Result<T> = core::result::Result<T, StorageError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesInsert {
    pub slug: String,
    pub source_id: String,
    pub url: Option<String>,
    pub name: String,
    pub authors: String, // JSON array string
    pub genres: String,  // JSON array string
    pub synopsis: Option<String>,
    pub status: String,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterInsert {
    pub slug: String,
    pub series_id: i64,
    pub url: Option<String>,
    pub title: String,
    pub date: Option<String>, // ISO date when the source format is known
}

#[derive(Debug, Clone)]
pub struct SeriesRow {
    pub id: i64,
    pub slug: String,
    pub source_id: String,
    pub url: Option<String>,
    pub name: String,
    pub authors: String,
    pub genres: String,
    pub synopsis: Option<String>,
    pub status: String,
    pub cover_url: Option<String>,
    pub last_read: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for SeriesRow {
    fn from_row(row: &'r SqliteRow) -> core::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            source_id: row.try_get("source_id")?,
            url: row.try_get("url")?,
            name: row.try_get("name")?,
            authors: row.try_get("authors")?,
            genres: row.try_get("genres")?,
            synopsis: row.try_get("synopsis")?,
            status: row.try_get("status")?,
            cover_url: row.try_get("cover_url")?,
            last_read: row.try_get("last_read")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChapterRow {
    pub id: i64,
    pub slug: String,
    pub series_id: i64,
    pub url: Option<String>,
    pub title: String,
    pub pages: Option<String>,
    pub date: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for ChapterRow {
    fn from_row(row: &'r SqliteRow) -> core::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            series_id: row.try_get("series_id")?,
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            pages: row.try_get("pages")?,
            date: row.try_get("date")?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub series: i64,
    pub chapters: i64,
    pub chapters_with_pages: i64,
}

const SERIES_COLUMNS: &str =
    "id, slug, source_id, url, name, authors, genres, synopsis, status, cover_url, last_read";
const CHAPTER_COLUMNS: &str = "id, slug, series_id, url, title, pages, date";

// Every function takes an executor so callers can run it on the pool or inside a transaction.

pub async fn insert_series<'e, E>(exec: E, s: &SeriesInsert) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "INSERT INTO series(slug, source_id, url, name, authors, genres, synopsis, status, cover_url)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&s.slug)
    .bind(&s.source_id)
    .bind(&s.url)
    .bind(&s.name)
    .bind(&s.authors)
    .bind(&s.genres)
    .bind(&s.synopsis)
    .bind(&s.status)
    .bind(&s.cover_url)
    .execute(exec)
    .await
    .map_err(|e| StorageError::from_insert(e, || format!("series {:?} of source {:?}", s.slug, s.source_id)))?;
    Ok(res.last_insert_rowid())
}

pub async fn insert_chapter<'e, E>(exec: E, c: &ChapterInsert) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query("INSERT INTO chapters(slug, series_id, url, title, date) VALUES(?, ?, ?, ?, ?)")
        .bind(&c.slug)
        .bind(c.series_id)
        .bind(&c.url)
        .bind(&c.title)
        .bind(&c.date)
        .execute(exec)
        .await
        .map_err(|e| StorageError::from_insert(e, || format!("chapter {:?} of series {}", c.slug, c.series_id)))?;
    Ok(res.last_insert_rowid())
}

/// Refresh the metadata of an existing series. Identity columns and `last_read` are left alone.
pub async fn update_series_meta<'e, E>(exec: E, id: i64, s: &SeriesInsert) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "UPDATE series SET url = COALESCE(?, url), name = ?, authors = ?, genres = ?,
           synopsis = ?, status = ?, cover_url = COALESCE(?, cover_url)
         WHERE id = ?",
    )
    .bind(&s.url)
    .bind(&s.name)
    .bind(&s.authors)
    .bind(&s.genres)
    .bind(&s.synopsis)
    .bind(&s.status)
    .bind(&s.cover_url)
    .bind(id)
    .execute(exec)
    .await?;
    Ok(res.rows_affected())
}

/// Re-sync of a known chapter: `pages` is never touched here.
pub async fn update_chapter_meta<'e, E>(exec: E, id: i64, c: &ChapterInsert) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query("UPDATE chapters SET title = ?, date = COALESCE(?, date), url = COALESCE(?, url) WHERE id = ?")
        .bind(&c.title)
        .bind(&c.date)
        .bind(&c.url)
        .bind(id)
        .execute(exec)
        .await?;
    Ok(res.rows_affected())
}

/// Store the page list only if none is stored yet. Returns the number of rows changed.
pub async fn set_chapter_pages<'e, E>(exec: E, id: i64, pages: &str) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query("UPDATE chapters SET pages = ? WHERE id = ? AND pages IS NULL")
        .bind(pages)
        .bind(id)
        .execute(exec)
        .await?;
    Ok(res.rows_affected())
}

pub async fn set_last_read<'e, E>(exec: E, id: i64, at: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query("UPDATE series SET last_read = ? WHERE id = ?")
        .bind(at)
        .bind(id)
        .execute(exec)
        .await?;
    Ok(res.rows_affected())
}

pub async fn find_series_id<'e, E>(exec: E, source_id: &str, slug: &str) -> Result<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM series WHERE source_id = ? AND slug = ? LIMIT 1")
        .bind(source_id)
        .bind(slug)
        .fetch_optional(exec)
        .await?;
    Ok(id)
}

pub async fn get_series<'e, E>(exec: E, id: i64) -> Result<Option<SeriesRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, SeriesRow>(&format!("SELECT {SERIES_COLUMNS} FROM series WHERE id = ?"))
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(row)
}

/// Library listing: most recently read first, never-read series last, then by name.
pub async fn list_series<'e, E>(exec: E) -> Result<Vec<SeriesRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, SeriesRow>(&format!(
        "SELECT {SERIES_COLUMNS} FROM series ORDER BY last_read DESC NULLS LAST, name COLLATE NOCASE, id"
    ))
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

/// Chapters of a series in insertion order, which is oldest-first.
pub async fn list_chapters<'e, E>(exec: E, series_id: i64) -> Result<Vec<ChapterRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, ChapterRow>(&format!(
        "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE series_id = ? ORDER BY id"
    ))
    .bind(series_id)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

pub async fn get_chapter<'e, E>(exec: E, id: i64) -> Result<Option<ChapterRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, ChapterRow>(&format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = ?"))
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(row)
}

// Chapters go with the series through ON DELETE CASCADE
pub async fn delete_series<'e, E>(exec: E, id: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query("DELETE FROM series WHERE id = ?").bind(id).execute(exec).await?;
    Ok(res.rows_affected())
}

pub async fn stats<'e, E>(exec: E) -> Result<CatalogStats>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (series, chapters, chapters_with_pages) = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT (SELECT COUNT(*) FROM series),
                (SELECT COUNT(*) FROM chapters),
                (SELECT COUNT(*) FROM chapters WHERE pages IS NOT NULL)",
    )
    .fetch_one(exec)
    .await?;
    Ok(CatalogStats { series, chapters, chapters_with_pages })
}
