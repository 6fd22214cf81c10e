use async_trait::async_trait;
use reqwest::header::{REFERER, USER_AGENT};
use scraper::{ElementRef, Html};

use super::{image_filename, normalize_date, own_text, selector, text_of, Source};
use crate::error::SourceError;
use crate::fetch::{FetchRequest, Fetcher, USER_AGENT_MOBILE};
use crate::types::{
    ChapterDetail, ChapterEntry, ChapterLocator, PageDescriptor, PageImage, SearchResult, SeriesLocator, SeriesRecord,
    SeriesStatus, SourceInfo,
};

pub(crate) const ID: &str = "webtoon";
const DESKTOP_URL: &str = "https://www.webtoons.com";
const MOBILE_URL: &str = "https://m.webtoons.com";
const DATE_FORMAT: &str = "%b %d, %Y";
const COVER_QUALITY: &str = "?type=q90";

/// WEBTOON. Series and chapters are addressed by site-relative URL; the
/// chapter list only comes complete from the mobile site.
pub struct Webtoon {
    info: SourceInfo,
    base_url: String,
    mobile_url: String,
    fetcher: Fetcher,
}

impl Webtoon {
    pub fn new(fetcher: Fetcher) -> Self {
        Self::with_base_urls(DESKTOP_URL, MOBILE_URL, fetcher)
    }

    pub fn with_base_urls(base_url: impl Into<String>, mobile_url: impl Into<String>, fetcher: Fetcher) -> Self {
        Self {
            info: SourceInfo { id: ID.into(), name: "WEBTOON".into(), lang: "en".into() },
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mobile_url: mobile_url.into().trim_end_matches('/').to_string(),
            fetcher,
        }
    }

    fn desktop(&self, path: &str) -> String { join(&self.base_url, path) }
    fn mobile(&self, path: &str) -> String { join(&self.mobile_url, path) }

    async fn html(&self, req: FetchRequest) -> Result<String, SourceError> {
        self.fetcher.fetch(req).await?.into_html()
    }

    async fn image(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let req = FetchRequest::get(url).header(REFERER, &self.base_url);
        self.fetcher.fetch(req).await?.into_image()
    }
}

#[async_trait]
impl Source for Webtoon {
    fn info(&self) -> &SourceInfo { &self.info }

    async fn search(&self, term: &str) -> Result<Vec<SearchResult>, SourceError> {
        let req = FetchRequest::get(self.desktop("/search")).query("keyword", term);
        parse_cards(&self.html(req).await?)
    }

    async fn list_catalog(&self, page: u32) -> Result<Vec<SearchResult>, SourceError> {
        let req = FetchRequest::get(self.desktop("/en/canvas/list"))
            .query("genreTab", "ALL")
            .query("sortOrder", "READ_COUNT")
            .query("page", page.max(1).to_string());
        parse_cards(&self.html(req).await?)
    }

    async fn fetch_series_detail(&self, initial: &SeriesLocator) -> Result<SeriesRecord, SourceError> {
        let path = initial
            .url
            .as_deref()
            .map(path_and_query)
            .ok_or_else(|| SourceError::format("webtoon series are addressed by url"))?;

        let html = self.html(FetchRequest::get(self.desktop(&path))).await?;
        let mut record = parse_series_page(&html, &path, initial)?;

        let req = FetchRequest::get(self.mobile(&path)).header(USER_AGENT, USER_AGENT_MOBILE);
        record.chapters = parse_episode_list(&self.html(req).await?)?;
        Ok(record)
    }

    async fn fetch_chapter_detail(
        &self,
        _series: &SeriesLocator,
        chapter: &ChapterLocator,
    ) -> Result<ChapterDetail, SourceError> {
        let path = chapter.url.as_deref().ok_or_else(|| SourceError::format("webtoon chapters are addressed by url"))?;
        let html = self.html(FetchRequest::get(self.desktop(path))).await?;
        Ok(ChapterDetail { pages: parse_image_list(&html)? })
    }

    async fn fetch_page_image(
        &self,
        _series: &SeriesLocator,
        _chapter: &ChapterLocator,
        page: &PageDescriptor,
    ) -> Result<PageImage, SourceError> {
        let url = page.image.as_deref().ok_or_else(|| SourceError::format("page has no image url"))?;
        let bytes = self.image(url).await?;
        Ok(PageImage { filename: image_filename(url)?, bytes })
    }

    async fn fetch_cover_image(&self, cover_url: &str) -> Result<Vec<u8>, SourceError> {
        self.image(cover_url).await
    }
}

fn join(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Reduce an absolute link to its site-relative `path?query` form.
pub(crate) fn path_and_query(link: &str) -> String {
    match url::Url::parse(link) {
        Ok(u) => match u.query() {
            Some(q) => format!("{}?{q}", u.path()),
            None => u.path().to_string(),
        },
        Err(_) => link.to_string(),
    }
}

/// Cover URL from a `background: ... url(<cover>?<params>) ...` style attribute.
fn cover_from_style(style: &str) -> Option<String> {
    let start = style.find("url(")? + 4;
    let end = start + style[start..].find(')')?;
    let raw = style[start..end].trim().trim_matches(['\'', '"']);
    let bare = raw.split('?').next().filter(|s| !s.is_empty())?;
    Some(format!("{bare}{COVER_QUALITY}"))
}

pub(crate) fn parse_series_page(html: &str, path: &str, initial: &SeriesLocator) -> Result<SeriesRecord, SourceError> {
    let doc = Html::parse_document(html);
    let detail = doc
        .select(&selector("div.detail_body")?)
        .next()
        .ok_or_else(|| SourceError::format("series page without div.detail_body"))?;

    let name = doc
        .select(&selector("div.info .subj")?)
        .next()
        .map(text_of)
        .filter(|n| !n.is_empty())
        .or_else(|| initial.name.clone())
        .ok_or_else(|| SourceError::format("series page without a title"))?;

    let genres = doc.select(&selector("div.info .genre")?).map(own_text).filter(|g| !g.is_empty()).collect();
    let mut authors: Vec<String> = Vec::new();
    for author in doc.select(&selector("div.info .author")?).map(own_text).filter(|a| !a.is_empty()) {
        if !authors.contains(&author) {
            authors.push(author);
        }
    }

    let (cover_url, status) = if path.contains("challenge") {
        let cover = doc
            .select(&selector("div.detail_header img")?)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);
        (cover, SeriesStatus::Unknown)
    } else {
        let cover = detail.value().attr("style").and_then(cover_from_style);
        let status = match detail.select(&selector("p.day_info")?).next().map(own_text) {
            Some(s) if s.eq_ignore_ascii_case("completed") => SeriesStatus::Complete,
            Some(_) => SeriesStatus::Ongoing,
            None => SeriesStatus::Unknown,
        };
        (cover, status)
    };

    let synopsis = detail.select(&selector("p.summary")?).next().map(text_of).filter(|s| !s.is_empty());

    Ok(SeriesRecord {
        slug: initial.slug.clone(),
        url: Some(path.to_string()),
        name,
        authors,
        genres,
        status,
        synopsis,
        chapters: Vec::new(),
        cover_url,
        source_id: ID.to_string(),
    })
}

/// Mobile episode list, returned oldest-first.
pub(crate) fn parse_episode_list(html: &str) -> Result<Vec<ChapterEntry>, SourceError> {
    let doc = Html::parse_document(html);
    let list = doc
        .select(&selector("ul#_episodeList")?)
        .next()
        .ok_or_else(|| SourceError::format("mobile page without ul#_episodeList"))?;

    let link = selector("a")?;
    let date_sel = selector("p.date")?;
    let title_sel = selector("p.sub_title span.ellipsis")?;
    let mut chapters = Vec::new();
    let items = list
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "li" && el.value().attr("data-episode-no").is_some());
    for li in items {
        let Some(href) = li.select(&link).next().and_then(|a| a.value().attr("href")) else { continue };
        let url = path_and_query(href);
        let path = url.split('?').next().unwrap_or_default();
        let mut segments = path.rsplit('/');
        segments.next();
        let slug = match segments.next().filter(|s| !s.is_empty()) {
            Some(s) => s.to_string(),
            None => match li.value().attr("data-episode-no") {
                Some(no) => no.to_string(),
                None => continue,
            },
        };
        chapters.push(ChapterEntry {
            slug,
            url: Some(url),
            title: li.select(&title_sel).next().map(text_of).unwrap_or_default(),
            date: li.select(&date_sel).next().and_then(|d| normalize_date(&text_of(d), DATE_FORMAT)),
        });
    }
    chapters.reverse();
    Ok(chapters)
}

pub(crate) fn parse_image_list(html: &str) -> Result<Vec<PageDescriptor>, SourceError> {
    let doc = Html::parse_document(html);
    Ok(doc
        .select(&selector("div#_imageList img")?)
        .filter_map(|img| img.value().attr("data-url"))
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(|u| PageDescriptor { slug: None, image: Some(u.to_string()) })
        .collect())
}

pub(crate) fn parse_cards(html: &str) -> Result<Vec<SearchResult>, SourceError> {
    let doc = Html::parse_document(html);
    let subj = selector("p.subj")?;
    let img = selector("img")?;
    let mut results = Vec::new();
    for card in doc.select(&selector("a.card_item, a.challenge_item")?) {
        let Some(href) = card.value().attr("href") else { continue };
        let Some(slug) = href.rsplit('=').next().filter(|s| !s.is_empty() && *s != href) else { continue };
        results.push(SearchResult {
            slug: slug.to_string(),
            name: card.select(&subj).next().map(text_of).unwrap_or_default(),
            url: Some(path_and_query(href)),
            cover_url: card.select(&img).next().and_then(|i| i.value().attr("src")).map(str::to_string),
        });
    }
    Ok(results)
}
