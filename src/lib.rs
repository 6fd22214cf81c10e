pub mod chapter;
pub mod config;
pub mod dao;
pub mod db;
pub mod error;
pub mod fetch;
pub mod mapping;
pub mod series;
pub mod sources;
pub mod storage;
pub mod types;

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::chapter::Chapter;
    pub use crate::config::Config;
    pub use crate::dao::CatalogStats;
    pub use crate::error::{Error, SourceError, StorageError};
    pub use crate::series::Series;
    pub use crate::sources::{Source, SourceRegistry};
    pub use crate::storage::{DiskCache, ResourceStore, SweepReport};
    pub use crate::types::*;
    pub use crate::{LibraryEntry, Tankobon, UpdateReport};
}

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Config;
use crate::dao::CatalogStats;
use crate::db::Database;
use crate::error::{Error, Result, StorageError};
use crate::series::Series;
use crate::sources::{Source, SourceRegistry};
use crate::storage::{series_dir, DiskCache, ResourceStore, SweepReport};
use crate::types::{SearchResult, SeriesLocator, SeriesStatus, SourceInfo};

/// One line of the library listing.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryEntry {
    pub id: i64,
    pub slug: String,
    pub source_id: String,
    pub source_name: Option<String>,
    pub name: String,
    pub status: SeriesStatus,
    pub last_read: Option<i64>,
}

/// Outcome of [`Tankobon::update_library`]. Failures are per series.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub updated: Vec<(i64, usize)>,
    pub failed: Vec<(i64, Error)>,
}

impl UpdateReport {
    pub fn new_chapters(&self) -> usize {
        self.updated.iter().map(|(_, n)| n).sum()
    }
}

/// Async library entry point. Owns the catalog, the resource cache and the source registry.
pub struct Tankobon {
    config: Config,
    db: Database,
    cache: Arc<dyn ResourceStore>,
    sources: SourceRegistry,
}

impl Tankobon {
    /// Open the library described by `config` with the shipped sources and a disk cache under the data dir.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let data_dir = config.data_dir()?;
        let sources = SourceRegistry::from_config(&config)?;
        Self::open_with(config, Arc::new(DiskCache::new(data_dir)), sources).await
    }

    /// Open with an explicit resource store and source registry.
    pub async fn open_with(
        config: Config,
        cache: Arc<dyn ResourceStore>,
        sources: SourceRegistry,
    ) -> anyhow::Result<Self> {
        let data_dir = config.data_dir()?;
        let db = Database::connect(config.database_url.as_deref(), &data_dir).await?;
        db.run_migrations().await?;

        let lib = Self { config, db, cache, sources };
        if let Err(e) = lib.recover_retired().await {
            warn!(error = %e, "could not settle retired resources");
        }
        Ok(lib)
    }

    /// Settle directories left in the trash by interrupted deletions: those whose
    /// series is still catalogued go back, the rest are purged.
    async fn recover_retired(&self) -> Result<SweepReport> {
        let mut live = HashSet::new();
        for row in dao::list_series(self.pool()).await? {
            match series_dir(&row.source_id, &row.slug) {
                Ok(dir) => {
                    live.insert(dir);
                }
                Err(e) => warn!(series = row.id, error = %e, "series has no resource directory key"),
            }
        }
        let report = self.cache.sweep(&live).await?;
        if report != SweepReport::default() {
            info!(restored = report.restored, purged = report.purged, "settled retired resources");
        }
        Ok(report)
    }

    pub fn config(&self) -> &Config { &self.config }
    pub fn database(&self) -> &Database { &self.db }
    pub fn cache(&self) -> &dyn ResourceStore { self.cache.as_ref() }

    fn pool(&self) -> &SqlitePool { self.db.pool() }

    pub fn sources(&self) -> Vec<SourceInfo> { self.sources.list() }

    pub fn source(&self, id: &str) -> Result<Arc<dyn Source>> {
        self.sources.get(id).ok_or_else(|| Error::UnknownSource(id.to_string()))
    }

    pub async fn search(&self, source_id: &str, term: &str) -> Result<Vec<SearchResult>> {
        Ok(self.source(source_id)?.search(term).await?)
    }

    pub async fn browse(&self, source_id: &str, page: u32) -> Result<Vec<SearchResult>> {
        Ok(self.source(source_id)?.list_catalog(page).await?)
    }

    pub async fn browse_all(&self, source_id: &str) -> Result<Vec<SearchResult>> {
        Ok(self.source(source_id)?.list_all().await?)
    }

    /// Fetch a series from its source and add it to the library. Nothing is stored if the fetch fails.
    pub async fn add_series(&self, source_id: &str, locator: &SeriesLocator) -> Result<Series> {
        let source = self.source(source_id)?;
        let mut record = source.fetch_series_detail(locator).await?;
        record.source_id = source.info().id.clone();
        Series::create(self.pool(), self.cache.as_ref(), &record, source.as_ref()).await
    }

    pub async fn series(&self, id: i64) -> Result<Series> {
        Series::load(self.pool(), id).await
    }

    /// Library listing, most recently read first. `filter` matches series or source names, ignoring case.
    pub async fn library(&self, filter: Option<&str>) -> Result<Vec<LibraryEntry>> {
        let needle = filter.map(str::trim).filter(|f| !f.is_empty()).map(str::to_lowercase);
        let rows = dao::list_series(self.pool()).await?;
        Ok(rows
            .into_iter()
            .map(|row| LibraryEntry {
                source_name: self.sources.get(&row.source_id).map(|s| s.info().name.clone()),
                status: row.status.parse().unwrap_or_default(),
                id: row.id,
                slug: row.slug,
                source_id: row.source_id,
                name: row.name,
                last_read: row.last_read,
            })
            .filter(|entry| match &needle {
                None => true,
                Some(needle) => {
                    entry.name.to_lowercase().contains(needle)
                        || entry.source_id.to_lowercase().contains(needle)
                        || entry.source_name.as_deref().is_some_and(|n| n.to_lowercase().contains(needle))
                }
            })
            .collect())
    }

    /// Re-sync one series. Returns the number of new chapters.
    pub async fn update_series(&self, id: i64) -> Result<usize> {
        let mut series = self.series(id).await?;
        let source = self.source(&series.source_id)?;
        series.update(self.pool(), source.as_ref()).await
    }

    /// Re-sync every series, at most `concurrency` at a time.
    pub async fn update_library(&self, concurrency: usize) -> Result<UpdateReport> {
        let ids: Vec<i64> = dao::list_series(self.pool()).await?.into_iter().map(|r| r.id).collect();
        let results: Vec<(i64, Result<usize>)> = stream::iter(ids)
            .map(|id| async move { (id, self.update_series(id).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = UpdateReport::default();
        for (id, result) in results {
            match result {
                Ok(added) => report.updated.push((id, added)),
                Err(e) => {
                    warn!(series = id, error = %e, "update failed");
                    report.failed.push((id, e));
                }
            }
        }
        report.updated.sort_unstable();
        info!(updated = report.updated.len(), failed = report.failed.len(), new = report.new_chapters(), "library updated");
        Ok(report)
    }

    /// Local path of a page, fetching the page list and the image as needed. Marks the series read.
    pub async fn read_page(&self, series_id: i64, chapter_id: i64, index: usize) -> Result<PathBuf> {
        let mut series = self.series(series_id).await?;
        let source = self.source(&series.source_id)?;
        let path = self.page_path(&mut series, source.as_ref(), chapter_id, index).await?;
        series.mark_read(self.pool()).await?;
        Ok(path)
    }

    async fn page_path(&self, series: &mut Series, source: &dyn Source, chapter_id: i64, index: usize) -> Result<PathBuf> {
        let locator = series.locator();
        series.chapter_mut(chapter_id)?.materialize_pages(self.pool(), source, &locator).await?;
        let series = &*series;
        series.chapter(chapter_id)?.get_page(self.cache.as_ref(), source, series, index).await
    }

    pub async fn refresh_cover(&self, series_id: i64) -> Result<bool> {
        let series = self.series(series_id).await?;
        let source = self.source(&series.source_id)?;
        series.refresh_cover(self.cache.as_ref(), source.as_ref()).await
    }

    pub async fn delete_series(&self, id: i64) -> Result<()> {
        self.series(id).await?.delete(self.pool(), self.cache.as_ref()).await
    }

    /// Write every page of a chapter into a CBZ archive. Returns the number of pages written.
    pub async fn export_chapter_cbz(&self, series_id: i64, chapter_id: i64, output: &Path) -> Result<usize> {
        let mut series = self.series(series_id).await?;
        let source = self.source(&series.source_id)?;
        let locator = series.locator();
        let count = series
            .chapter_mut(chapter_id)?
            .materialize_pages(self.pool(), source.as_ref(), &locator)
            .await?
            .len();

        let mut pages = Vec::with_capacity(count);
        for index in 0..count {
            let path = self.page_path(&mut series, source.as_ref(), chapter_id, index).await?;
            let bytes = tokio::fs::read(&path).await.map_err(|e| StorageError::io(&path, e))?;
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("jpg").to_string();
            pages.push((format!("{:03}.{ext}", index + 1), bytes));
        }

        let file = std::fs::File::create(output).map_err(|e| StorageError::io(output, e))?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, bytes) in &pages {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes).map_err(|e| StorageError::io(output, e))?;
        }
        zip.finish()?;
        info!(series = series_id, chapter = chapter_id, pages = pages.len(), output = %output.display(), "chapter exported");
        Ok(pages.len())
    }

    pub async fn stats(&self) -> Result<CatalogStats> {
        Ok(dao::stats(self.pool()).await?)
    }
}
