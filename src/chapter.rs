use std::path::PathBuf;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::dao::{self, ChapterRow};
use crate::error::{Error, Result, SourceError};
use crate::mapping;
use crate::series::Series;
use crate::sources::Source;
use crate::storage::{page_filename, page_key, ResourceStore};
use crate::types::{ChapterLocator, PageDescriptor, SeriesLocator};

/// A chapter row. `pages` stays `None` until the chapter is first read and
/// never changes once set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chapter {
    pub id: i64,
    pub series_id: i64,
    pub slug: String,
    pub url: Option<String>,
    pub title: String,
    pub date: Option<String>,
    pub pages: Option<Vec<String>>,
}

impl From<ChapterRow> for Chapter {
    fn from(row: ChapterRow) -> Self {
        Self {
            id: row.id,
            series_id: row.series_id,
            slug: row.slug,
            url: row.url,
            title: row.title,
            date: row.date,
            pages: row.pages.as_deref().map(mapping::split_pages),
        }
    }
}

impl Chapter {
    pub fn locator(&self) -> ChapterLocator {
        ChapterLocator { slug: self.slug.clone(), url: self.url.clone() }
    }

    pub fn page_count(&self) -> Option<usize> {
        self.pages.as_ref().map(Vec::len)
    }

    /// Fetch and persist the page list unless it is already known.
    pub async fn materialize_pages(
        &mut self,
        pool: &SqlitePool,
        source: &dyn Source,
        series: &SeriesLocator,
    ) -> Result<&[String]> {
        if self.pages.is_some() {
            return Ok(self.pages.as_deref().unwrap_or_default());
        }

        let detail = source.fetch_chapter_detail(series, &self.locator()).await?;
        let ids = detail
            .pages
            .iter()
            .map(|p| p.identifier().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SourceError::format("page without slug or image"))?;
        if ids.is_empty() {
            return Err(SourceError::format(format!("chapter {:?} lists no pages", self.slug)).into());
        }

        let changed = dao::set_chapter_pages(pool, self.id, &mapping::join_pages(&ids)).await?;
        if changed == 1 {
            info!(chapter = self.id, pages = ids.len(), "page list stored");
            self.pages = Some(ids);
        } else {
            // Someone stored a list first; that one wins
            let row = dao::get_chapter(pool, self.id).await?.ok_or(Error::ChapterNotFound(self.id))?;
            self.pages = Some(row.pages.as_deref().map(mapping::split_pages).unwrap_or(ids));
        }
        Ok(self.pages.as_deref().unwrap_or_default())
    }

    /// Local path of page `index`, downloading it on first access.
    pub async fn get_page(
        &self,
        cache: &dyn ResourceStore,
        source: &dyn Source,
        series: &Series,
        index: usize,
    ) -> Result<PathBuf> {
        let unavailable = || Error::PageUnavailable { chapter: self.id, index };
        let id = self.pages.as_ref().and_then(|p| p.get(index)).ok_or_else(unavailable)?;
        let key = page_key(&series.source_id, &series.slug, &self.slug, &page_filename(id)?)?;

        if cache.exists(&key).await? {
            debug!(chapter = self.id, index, "page cache hit");
            return Ok(cache.resolve(&key));
        }

        let image = source
            .fetch_page_image(&series.locator(), &self.locator(), &PageDescriptor::from_identifier(id))
            .await?;
        let path = cache.write(&key, &image.bytes).await?;
        debug!(chapter = self.id, index, filename = %image.filename, "page downloaded");
        Ok(path)
    }
}
