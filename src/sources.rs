use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{ElementRef, Selector};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::SourceError;
use crate::fetch::Fetcher;
use crate::types::{
    ChapterDetail, ChapterLocator, PageDescriptor, PageImage, SearchResult, SeriesLocator, SeriesRecord, SourceInfo,
};

mod foolslide;
mod webtoon;

pub use foolslide::{FoolSlide, FoolSlideConfig};
pub use webtoon::Webtoon;

/// Upper bound on catalog pages walked by [`Source::list_all`].
pub const MAX_CATALOG_PAGES: u32 = 200;

/// Uniform scraping contract implemented by every remote site.
///
/// Every method reports remote trouble (transport, status, unexpected body,
/// missing markup) as a [`SourceError`] and never panics on what the site sends.
#[async_trait]
pub trait Source: Send + Sync {
    fn info(&self) -> &SourceInfo;

    async fn search(&self, term: &str) -> Result<Vec<SearchResult>, SourceError>;

    /// One page of the site's catalog, starting at 1.
    async fn list_catalog(&self, page: u32) -> Result<Vec<SearchResult>, SourceError>;

    /// Walk the catalog until a page is empty or brings nothing new.
    async fn list_all(&self) -> Result<Vec<SearchResult>, SourceError> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for page in 1..=MAX_CATALOG_PAGES {
            let before = all.len();
            for result in self.list_catalog(page).await? {
                if seen.insert(result.slug.clone()) {
                    all.push(result);
                }
            }
            if all.len() == before {
                return Ok(all);
            }
        }
        warn!(source = %self.info().id, pages = MAX_CATALOG_PAGES, "catalog walk stopped at page cap");
        Ok(all)
    }

    async fn fetch_series_detail(&self, initial: &SeriesLocator) -> Result<SeriesRecord, SourceError>;

    async fn fetch_chapter_detail(
        &self,
        series: &SeriesLocator,
        chapter: &ChapterLocator,
    ) -> Result<ChapterDetail, SourceError>;

    async fn fetch_page_image(
        &self,
        series: &SeriesLocator,
        chapter: &ChapterLocator,
        page: &PageDescriptor,
    ) -> Result<PageImage, SourceError>;

    async fn fetch_cover_image(&self, cover_url: &str) -> Result<Vec<u8>, SourceError>;
}

/// The set of adapters available to the library, keyed by source id.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self { Self::default() }

    /// Build every shipped adapter that the configuration does not disable.
    /// Each adapter gets its own HTTP session.
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let mut registry = Self::new();
        for site in [FoolSlideConfig::jaiminisbox(), FoolSlideConfig::kireicake()] {
            if config.source_enabled(&site.id) {
                let fetcher = Fetcher::new(config.fetch.clone())?;
                registry.register(Arc::new(FoolSlide::new(site, fetcher)));
            }
        }
        if config.source_enabled(webtoon::ID) {
            registry.register(Arc::new(Webtoon::new(Fetcher::new(config.fetch.clone())?)));
        }
        debug!(sources = registry.sources.len(), "source registry ready");
        Ok(registry)
    }

    /// Add `source`, replacing any adapter registered under the same id.
    pub fn register(&mut self, source: Arc<dyn Source>) {
        let id = source.info().id.clone();
        self.sources.retain(|s| s.info().id != id);
        self.sources.push(source);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Source>> {
        self.sources.iter().find(|s| s.info().id == id).cloned()
    }

    pub fn list(&self) -> Vec<SourceInfo> {
        self.sources.iter().map(|s| s.info().clone()).collect()
    }

    pub fn is_empty(&self) -> bool { self.sources.is_empty() }
}

// Markup helpers shared by the adapters

pub(crate) fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|_| SourceError::format(format!("invalid selector {css:?}")))
}

/// All descendant text, trimmed.
pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text of the element's direct text children only, trimmed.
pub(crate) fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|n| n.value().as_text())
        .map(|t| &**t)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Text node right after `el`, if any.
pub(crate) fn next_text(el: ElementRef<'_>) -> Option<String> {
    el.next_sibling().and_then(|n| n.value().as_text().map(|t| t.to_string()))
}

/// Reformat a site date to `YYYY-MM-DD`. Unparseable text is kept as is; blank text is dropped.
pub(crate) fn normalize_date(raw: &str, format: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(raw, format) {
        Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
        Err(_) => Some(raw.to_string()),
    }
}

/// Last path segment of an image URL, query and fragment stripped.
pub(crate) fn image_filename(url: &str) -> Result<String, SourceError> {
    crate::storage::page_filename(url).map_err(|_| SourceError::format(format!("no filename in image url {url:?}")))
}
