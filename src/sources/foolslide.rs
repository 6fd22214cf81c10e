//! FoOlSlide readers. Every site of the family shares markup and endpoints;
//! only identity and base URL differ.

use async_trait::async_trait;
use base64::Engine as _;
use scraper::Html;
use serde::Deserialize;

use super::{image_filename, next_text, normalize_date, selector, text_of, Source};
use crate::error::SourceError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::types::{
    ChapterDetail, ChapterEntry, ChapterLocator, PageDescriptor, PageImage, SearchResult, SeriesLocator, SeriesRecord,
    SeriesStatus, SourceInfo,
};

const ADULT_NOTICE: &str = "ALERT: This series contains mature contents and is meant to be viewed by an adult audience.";
const DATE_FORMAT: &str = "%Y.%m.%d";
const PAGES_PREFIX: &str = "var pages = ";

#[derive(Debug, Clone)]
pub struct FoolSlideConfig {
    pub id: String,
    pub name: String,
    pub lang: String,
    pub base_url: String,
}

impl FoolSlideConfig {
    pub fn jaiminisbox() -> Self {
        Self {
            id: "jaiminisbox".into(),
            name: "Jaimini's Box".into(),
            lang: "en".into(),
            base_url: "https://jaiminisbox.com/reader".into(),
        }
    }

    pub fn kireicake() -> Self {
        Self {
            id: "kireicake:jaiminisbox".into(),
            name: "Kirei Cake".into(),
            lang: "en".into(),
            base_url: "https://reader.kireicake.com".into(),
        }
    }

    fn search_url(&self) -> String { format!("{}/search", self.base_url) }
    fn directory_url(&self, page: u32) -> String { format!("{}/directory/{page}", self.base_url) }
    fn series_url(&self, slug: &str) -> String { format!("{}/series/{slug}", self.base_url) }

    fn chapter_url(&self, series_slug: &str, chapter_slug: &str) -> String {
        format!("{}/read/{series_slug}/{}/{chapter_slug}/page/1", self.base_url, self.lang)
    }

    /// Reader path of a chapter link, absolute or site-relative, minus everything up to the chapter slug.
    fn chapter_slug<'a>(&self, series_slug: &str, href: &'a str) -> Option<&'a str> {
        let marker = format!("/read/{series_slug}/{}/", self.lang);
        let slug = match href.strip_prefix(&self.base_url) {
            Some(path) => path.strip_prefix(&marker)?,
            None if href.starts_with(&marker) => &href[marker.len()..],
            None => return None,
        };
        Some(slug.trim_end_matches('/')).filter(|s| !s.is_empty())
    }
}

pub struct FoolSlide {
    info: SourceInfo,
    config: FoolSlideConfig,
    fetcher: Fetcher,
}

impl FoolSlide {
    pub fn new(config: FoolSlideConfig, fetcher: Fetcher) -> Self {
        let info = SourceInfo { id: config.id.clone(), name: config.name.clone(), lang: config.lang.clone() };
        Self { info, config, fetcher }
    }

    async fn html(&self, req: FetchRequest) -> Result<String, SourceError> {
        self.fetcher.fetch(req).await?.into_html()
    }
}

#[async_trait]
impl Source for FoolSlide {
    fn info(&self) -> &SourceInfo { &self.info }

    async fn search(&self, term: &str) -> Result<Vec<SearchResult>, SourceError> {
        let html = self.html(FetchRequest::post(self.config.search_url()).form("search", term)).await?;
        parse_search(&html)
    }

    async fn list_catalog(&self, page: u32) -> Result<Vec<SearchResult>, SourceError> {
        let html = self.html(FetchRequest::get(self.config.directory_url(page.max(1)))).await?;
        parse_listing(&html)
    }

    async fn fetch_series_detail(&self, initial: &SeriesLocator) -> Result<SeriesRecord, SourceError> {
        let url = self.config.series_url(&initial.slug);
        let mut html = self.html(FetchRequest::get(&url)).await?;
        let adult = has_adult_alert(&html)?;
        if adult {
            html = self.html(FetchRequest::post(&url).form("adult", "true")).await?;
        }

        let mut record = parse_series_page(&html, &self.config, &initial.slug)?;
        if adult {
            record.synopsis = Some(match record.synopsis {
                Some(s) => format!("{ADULT_NOTICE}\n\n{s}"),
                None => ADULT_NOTICE.to_string(),
            });
        }
        Ok(record)
    }

    async fn fetch_chapter_detail(
        &self,
        series: &SeriesLocator,
        chapter: &ChapterLocator,
    ) -> Result<ChapterDetail, SourceError> {
        let url = self.config.chapter_url(&series.slug, &chapter.slug);
        let html = self.html(FetchRequest::post(url).form("adult", "true")).await?;
        Ok(ChapterDetail { pages: parse_pages_script(&html)? })
    }

    async fn fetch_page_image(
        &self,
        _series: &SeriesLocator,
        _chapter: &ChapterLocator,
        page: &PageDescriptor,
    ) -> Result<PageImage, SourceError> {
        // Slugs are not enough to forge image URLs on these readers
        let url = page.image.as_deref().ok_or_else(|| SourceError::format("page has no image url"))?;
        let bytes = self.fetcher.get(url).await?.into_image()?;
        Ok(PageImage { filename: image_filename(url)?, bytes })
    }

    async fn fetch_cover_image(&self, cover_url: &str) -> Result<Vec<u8>, SourceError> {
        self.fetcher.get(cover_url).await?.into_image()
    }
}

fn has_adult_alert(html: &str) -> Result<bool, SourceError> {
    Ok(Html::parse_document(html).select(&selector("div.alert")?).next().is_some())
}

pub(crate) fn parse_series_page(html: &str, config: &FoolSlideConfig, slug: &str) -> Result<SeriesRecord, SourceError> {
    let doc = Html::parse_document(html);

    let name = doc
        .select(&selector("h1.title")?)
        .next()
        .map(text_of)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SourceError::format("series page without h1.title"))?;
    let cover_url = doc
        .select(&selector("div.thumbnail img")?)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string);

    let mut authors = Vec::new();
    let mut synopsis = None;
    for label in doc.select(&selector("div.info b")?) {
        let value = next_text(label).map(|v| v.trim_start_matches(':').trim().to_string()).unwrap_or_default();
        match text_of(label).as_str() {
            "Author" | "Artist" if !value.is_empty() => {
                if !authors.contains(&value) {
                    authors.push(value);
                }
            }
            "Description" | "Synopsis" if !value.is_empty() => synopsis = Some(value),
            _ => {}
        }
    }

    let title_sel = selector("div.title a")?;
    let date_sel = selector("div.meta_r a")?;
    let mut chapters = Vec::new();
    for element in doc.select(&selector("div.list div.element")?) {
        let Some(a) = element.select(&title_sel).next() else { continue };
        let Some(href) = a.value().attr("href") else { continue };
        let Some(chapter_slug) = config.chapter_slug(slug, href) else { continue };
        let date = element
            .select(&date_sel)
            .last()
            .and_then(next_text)
            .and_then(|t| normalize_date(t.trim_start_matches([',', ' ']), DATE_FORMAT));
        chapters.push(ChapterEntry {
            slug: chapter_slug.to_string(),
            url: None,
            title: text_of(a),
            date,
        });
    }
    // Listed newest-first on the page
    chapters.reverse();

    Ok(SeriesRecord {
        slug: slug.to_string(),
        url: None,
        name,
        authors,
        genres: Vec::new(),
        status: SeriesStatus::Unknown,
        synopsis,
        chapters,
        cover_url,
        source_id: config.id.clone(),
    })
}

/// `href` of a series link looks like `<base>/series/<slug>/`.
fn slug_from_series_href(href: &str) -> Option<String> {
    href.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string)
}

pub(crate) fn parse_listing(html: &str) -> Result<Vec<SearchResult>, SourceError> {
    let doc = Html::parse_document(html);
    let mut results = Vec::new();
    for a in doc.select(&selector("div.series div.group div.title a")?) {
        let Some(href) = a.value().attr("href") else { continue };
        let Some(slug) = slug_from_series_href(href) else { continue };
        let name = a.value().attr("title").map(str::to_string).unwrap_or_else(|| text_of(a));
        results.push(SearchResult { slug, name, url: None, cover_url: None });
    }
    Ok(results)
}

pub(crate) fn parse_search(html: &str) -> Result<Vec<SearchResult>, SourceError> {
    let doc = Html::parse_document(html);
    let first_div = selector("div")?;
    let link = selector("a")?;
    let mut results = Vec::new();
    for group in doc.select(&selector("div.list div.group")?) {
        let Some(a) = group.select(&first_div).next().and_then(|d| d.select(&link).next()) else { continue };
        let Some(slug) = a.value().attr("href").and_then(slug_from_series_href) else { continue };
        let name = a.value().attr("title").map(str::to_string).unwrap_or_else(|| text_of(a));
        results.push(SearchResult { slug, name, url: None, cover_url: None });
    }
    Ok(results)
}

#[derive(Deserialize)]
struct ManifestPage {
    url: String,
}

/// Find the inline `var pages = ...` manifest and decode it. The manifest is
/// either a JSON literal or `JSON.parse(atob("<base64>"))`.
pub(crate) fn parse_pages_script(html: &str) -> Result<Vec<PageDescriptor>, SourceError> {
    let doc = Html::parse_document(html);
    let line = doc
        .select(&selector("script")?)
        .flat_map(|script| script.text().flat_map(str::lines).map(str::trim).map(str::to_string).collect::<Vec<_>>())
        .find(|l| l.starts_with(PAGES_PREFIX))
        .ok_or_else(|| SourceError::format("no page manifest in chapter page"))?;

    let json = if line.contains("JSON.parse") {
        let encoded = line
            .split_once("atob(\"")
            .and_then(|(_, rest)| rest.split_once("\")"))
            .map(|(b64, _)| b64)
            .ok_or_else(|| SourceError::format("encoded page manifest without atob payload"))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SourceError::format(format!("page manifest is not base64: {e}")))?
    } else {
        line[PAGES_PREFIX.len()..].trim_end_matches(';').trim().as_bytes().to_vec()
    };

    let pages: Vec<ManifestPage> =
        serde_json::from_slice(&json).map_err(|e| SourceError::format(format!("page manifest is not valid: {e}")))?;
    Ok(pages.into_iter().map(|p| PageDescriptor { slug: None, image: Some(p.url) }).collect())
}
