use std::collections::HashMap;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::chapter::Chapter;
use crate::dao::{self, SeriesRow};
use crate::error::{Error, Result};
use crate::mapping;
use crate::sources::Source;
use crate::storage::{cover_key, series_dir, ResourceStore};
use crate::types::{SeriesLocator, SeriesRecord, SeriesStatus};

/// A followed series and its chapters, oldest-first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub id: i64,
    pub slug: String,
    pub source_id: String,
    pub url: Option<String>,
    pub name: String,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub synopsis: Option<String>,
    pub status: SeriesStatus,
    pub cover_url: Option<String>,
    pub last_read: Option<i64>,
    pub chapters: Vec<Chapter>,
}

impl Series {
    fn from_row(row: SeriesRow, chapters: Vec<Chapter>) -> Result<Self> {
        Ok(Self {
            id: row.id,
            authors: mapping::decode_list(&row.authors)?,
            genres: mapping::decode_list(&row.genres)?,
            status: row.status.parse().unwrap_or_default(),
            slug: row.slug,
            source_id: row.source_id,
            url: row.url,
            name: row.name,
            synopsis: row.synopsis,
            cover_url: row.cover_url,
            last_read: row.last_read,
            chapters,
        })
    }

    /// Persist a freshly fetched series with all its chapters, then try to cache its cover.
    ///
    /// The rows and the resource directory are created together or not at all.
    /// A cover that cannot be fetched is logged and left for [`Series::refresh_cover`].
    pub async fn create(
        pool: &SqlitePool,
        cache: &dyn ResourceStore,
        record: &SeriesRecord,
        source: &dyn Source,
    ) -> Result<Self> {
        let dir = series_dir(&record.source_id, &record.slug)?;
        let insert = mapping::series_insert_from_record(record)?;

        let mut tx = pool.begin().await?;
        let id = dao::insert_series(&mut *tx, &insert).await?;
        for entry in &record.chapters {
            dao::insert_chapter(&mut *tx, &mapping::chapter_insert_from_entry(id, entry)).await?;
        }
        cache.create_dir(&dir).await?;
        if let Err(e) = tx.commit().await {
            if let Ok(Some(retired)) = cache.retire_dir(&dir).await {
                let _ = cache.purge(&retired).await;
            }
            return Err(e.into());
        }
        info!(series = id, source = %record.source_id, slug = %record.slug, chapters = record.chapters.len(), "series added");

        let series = Self::load(pool, id).await?;
        if let Err(e) = series.refresh_cover(cache, source).await {
            warn!(series = id, error = %e, "cover not cached");
        }
        Ok(series)
    }

    pub async fn load(pool: &SqlitePool, id: i64) -> Result<Self> {
        let row = dao::get_series(pool, id).await?.ok_or(Error::SeriesNotFound(id))?;
        let chapters = dao::list_chapters(pool, id).await?.into_iter().map(Chapter::from).collect();
        Self::from_row(row, chapters)
    }

    pub async fn find(pool: &SqlitePool, source_id: &str, slug: &str) -> Result<Option<Self>> {
        match dao::find_series_id(pool, source_id, slug).await? {
            Some(id) => Ok(Some(Self::load(pool, id).await?)),
            None => Ok(None),
        }
    }

    pub fn locator(&self) -> SeriesLocator {
        SeriesLocator { slug: self.slug.clone(), url: self.url.clone(), name: Some(self.name.clone()) }
    }

    pub fn chapter(&self, id: i64) -> Result<&Chapter> {
        self.chapters.iter().find(|c| c.id == id).ok_or(Error::ChapterNotFound(id))
    }

    pub fn chapter_mut(&mut self, id: i64) -> Result<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.id == id).ok_or(Error::ChapterNotFound(id))
    }

    /// Cache the cover if it is not cached yet. Returns whether anything was downloaded.
    pub async fn refresh_cover(&self, cache: &dyn ResourceStore, source: &dyn Source) -> Result<bool> {
        let Some(url) = self.cover_url.as_deref() else { return Ok(false) };
        let key = cover_key(&self.source_id, &self.slug)?;
        if cache.exists(&key).await? {
            return Ok(false);
        }
        let bytes = source.fetch_cover_image(url).await?;
        cache.write(&key, &bytes).await?;
        debug!(series = self.id, "cover cached");
        Ok(true)
    }

    /// Re-sync against the source: refresh metadata, add unseen chapters and
    /// retitle known ones. Stored page lists are left alone. Returns how many
    /// chapters were added.
    pub async fn update(&mut self, pool: &SqlitePool, source: &dyn Source) -> Result<usize> {
        let record = source.fetch_series_detail(&self.locator()).await?;
        let insert = mapping::series_insert_from_record(&record)?;

        let mut tx = pool.begin().await?;
        dao::update_series_meta(&mut *tx, self.id, &insert).await?;
        let known: HashMap<String, i64> =
            dao::list_chapters(&mut *tx, self.id).await?.into_iter().map(|c| (c.slug, c.id)).collect();
        let mut added = 0;
        for entry in &record.chapters {
            let chapter = mapping::chapter_insert_from_entry(self.id, entry);
            match known.get(&entry.slug) {
                Some(&chapter_id) => {
                    dao::update_chapter_meta(&mut *tx, chapter_id, &chapter).await?;
                }
                None => {
                    dao::insert_chapter(&mut *tx, &chapter).await?;
                    added += 1;
                }
            }
        }
        tx.commit().await?;
        info!(series = self.id, added, "series updated");

        *self = Self::load(pool, self.id).await?;
        Ok(added)
    }

    pub async fn mark_read(&mut self, pool: &SqlitePool) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        if dao::set_last_read(pool, self.id, now).await? == 0 {
            return Err(Error::SeriesNotFound(self.id));
        }
        self.last_read = Some(now);
        Ok(())
    }

    /// Remove the series, its chapters and its cached files.
    ///
    /// The row deletion only commits once the resource directory has been moved
    /// out of the way, and the directory is put back if the commit fails. A
    /// directory that cannot be put back right away stays in the trash and is
    /// restored the next time the library is opened.
    pub async fn delete(self, pool: &SqlitePool, cache: &dyn ResourceStore) -> Result<()> {
        let dir = series_dir(&self.source_id, &self.slug)?;

        let mut tx = pool.begin().await?;
        if dao::delete_series(&mut *tx, self.id).await? == 0 {
            return Err(Error::SeriesNotFound(self.id));
        }
        let retired = cache.retire_dir(&dir).await?;
        if let Err(e) = tx.commit().await {
            if let Some(retired) = &retired {
                if let Err(restore) = cache.restore_dir(retired, &dir).await {
                    warn!(series = self.id, error = %restore, "series directory left in the trash until next open");
                }
            }
            return Err(e.into());
        }
        info!(series = self.id, slug = %self.slug, "series deleted");

        if let Some(retired) = retired {
            if let Err(e) = cache.purge(&retired).await {
                warn!(series = self.id, path = %retired.display(), error = %e, "retired directory left behind");
            }
        }
        Ok(())
    }
}
