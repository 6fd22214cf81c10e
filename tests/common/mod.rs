#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tankobon::prelude::*;

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub fn record(slug: &str, name: &str, chapters: &[(&str, &str)]) -> SeriesRecord {
    SeriesRecord {
        slug: slug.into(),
        url: None,
        name: name.into(),
        authors: vec!["Author".into()],
        genres: vec!["Action".into()],
        status: SeriesStatus::Ongoing,
        synopsis: Some("A test series.".into()),
        chapters: chapters
            .iter()
            .map(|(slug, date)| ChapterEntry { slug: slug.to_string(), url: None, title: format!("Chapter {slug}"), date: Some(date.to_string()) })
            .collect(),
        cover_url: Some("http://x/cover.jpg".into()),
        source_id: FakeSource::ID.into(),
    }
}

/// In-memory source. Counts every call and can be switched offline.
pub struct FakeSource {
    info: SourceInfo,
    pub record: Mutex<SeriesRecord>,
    pub pages: Mutex<HashMap<String, Vec<PageDescriptor>>>,
    pub offline: AtomicBool,
    pub cover_broken: AtomicBool,
    pub detail_calls: AtomicUsize,
    pub chapter_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub cover_calls: AtomicUsize,
}

impl FakeSource {
    pub const ID: &'static str = "fake";

    pub fn new(record: SeriesRecord) -> Self {
        Self {
            info: SourceInfo { id: Self::ID.into(), name: "Fake Source".into(), lang: "en".into() },
            record: Mutex::new(record),
            pages: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            cover_broken: AtomicBool::new(false),
            detail_calls: AtomicUsize::new(0),
            chapter_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            cover_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_pages(self, chapter: &str, images: &[&str]) -> Self {
        let pages = images.iter().map(|i| PageDescriptor { slug: None, image: Some(i.to_string()) }).collect();
        self.pages.lock().unwrap().insert(chapter.to_string(), pages);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<(), SourceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError::Status { url: format!("fake://{what}"), status: 503 });
        }
        Ok(())
    }
}

#[async_trait]
impl Source for FakeSource {
    fn info(&self) -> &SourceInfo { &self.info }

    async fn search(&self, term: &str) -> Result<Vec<SearchResult>, SourceError> {
        self.check("search")?;
        let r = self.record.lock().unwrap();
        Ok(if r.name.to_lowercase().contains(&term.to_lowercase()) {
            vec![SearchResult { slug: r.slug.clone(), name: r.name.clone(), url: r.url.clone(), cover_url: r.cover_url.clone() }]
        } else {
            vec![]
        })
    }

    async fn list_catalog(&self, page: u32) -> Result<Vec<SearchResult>, SourceError> {
        self.check("catalog")?;
        if page > 1 { return Ok(vec![]); }
        let r = self.record.lock().unwrap();
        Ok(vec![SearchResult { slug: r.slug.clone(), name: r.name.clone(), url: None, cover_url: None }])
    }

    async fn fetch_series_detail(&self, initial: &SeriesLocator) -> Result<SeriesRecord, SourceError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.check("series")?;
        let r = self.record.lock().unwrap();
        if r.slug != initial.slug {
            return Err(SourceError::NotFound { url: format!("fake://series/{}", initial.slug) });
        }
        Ok(r.clone())
    }

    async fn fetch_chapter_detail(&self, _series: &SeriesLocator, chapter: &ChapterLocator) -> Result<ChapterDetail, SourceError> {
        self.chapter_calls.fetch_add(1, Ordering::SeqCst);
        self.check("chapter")?;
        let pages = self.pages.lock().unwrap().get(&chapter.slug).cloned().unwrap_or_default();
        Ok(ChapterDetail { pages })
    }

    async fn fetch_page_image(
        &self,
        _series: &SeriesLocator,
        _chapter: &ChapterLocator,
        page: &PageDescriptor,
    ) -> Result<PageImage, SourceError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.check("page")?;
        let url = page.image.clone().unwrap_or_default();
        let mut bytes = PNG.to_vec();
        bytes.extend_from_slice(url.as_bytes());
        Ok(PageImage { filename: url.rsplit('/').next().unwrap_or_default().to_string(), bytes })
    }

    async fn fetch_cover_image(&self, _cover_url: &str) -> Result<Vec<u8>, SourceError> {
        self.cover_calls.fetch_add(1, Ordering::SeqCst);
        self.check("cover")?;
        if self.cover_broken.load(Ordering::SeqCst) {
            return Err(SourceError::NotFound { url: "fake://cover".into() });
        }
        Ok(PNG.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    CreateDir,
    Write,
    Retire,
    Restore,
    Purge,
}

/// Disk cache that fails the chosen operation on demand.
pub struct FaultyStore {
    inner: DiskCache,
    fault: Mutex<Option<Fault>>,
}

impl FaultyStore {
    pub fn new(root: &Path) -> Self {
        Self { inner: DiskCache::new(root), fault: Mutex::new(None) }
    }

    pub fn fail(&self, fault: Option<Fault>) {
        *self.fault.lock().unwrap() = fault;
    }

    fn trip(&self, op: Fault, path: &Path) -> Result<(), StorageError> {
        if *self.fault.lock().unwrap() == Some(op) {
            return Err(StorageError::Io { path: path.to_path_buf(), source: std::io::Error::other(format!("injected {op:?}")) });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for FaultyStore {
    fn resolve(&self, key: &Path) -> PathBuf { self.inner.resolve(key) }

    async fn read(&self, key: &Path) -> Result<Option<Vec<u8>>, StorageError> { self.inner.read(key).await }

    async fn exists(&self, key: &Path) -> Result<bool, StorageError> { self.inner.exists(key).await }

    async fn write(&self, key: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        self.trip(Fault::Write, key)?;
        self.inner.write(key, bytes).await
    }

    async fn create_dir(&self, key: &Path) -> Result<(), StorageError> {
        self.trip(Fault::CreateDir, key)?;
        self.inner.create_dir(key).await
    }

    async fn retire_dir(&self, key: &Path) -> Result<Option<PathBuf>, StorageError> {
        self.trip(Fault::Retire, key)?;
        self.inner.retire_dir(key).await
    }

    async fn restore_dir(&self, retired: &Path, key: &Path) -> Result<(), StorageError> {
        self.trip(Fault::Restore, key)?;
        self.inner.restore_dir(retired, key).await
    }

    async fn purge(&self, retired: &Path) -> Result<(), StorageError> {
        self.trip(Fault::Purge, retired)?;
        self.inner.purge(retired).await
    }

    async fn sweep(&self, live: &HashSet<PathBuf>) -> Result<SweepReport, StorageError> { self.inner.sweep(live).await }
}

/// Config rooted in a temp dir with an on-disk database.
pub fn config(dir: &Path) -> Config {
    Config {
        data_dir: Some(dir.to_path_buf()),
        database_url: Some(format!("sqlite://{}?mode=rwc", dir.join("catalog.db").display())),
        ..Config::default()
    }
}

pub async fn open_with(dir: &Path, source: Arc<FakeSource>, store: Arc<dyn ResourceStore>) -> Tankobon {
    let mut registry = SourceRegistry::new();
    registry.register(source);
    Tankobon::open_with(config(dir), store, registry).await.unwrap()
}

pub async fn open(dir: &Path, source: Arc<FakeSource>) -> Tankobon {
    open_with(dir, source, Arc::new(DiskCache::new(dir))).await
}

// --- Local HTTP responder ---

#[derive(Debug, Clone)]
pub struct Route {
    pub method: &'static str,
    pub path: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Route {
    pub fn get(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self { method: "GET", path: path.into(), status: 200, body: body.into() }
    }

    pub fn post(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self { method: "POST", path: path.into(), status: 200, body: body.into() }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path with query string.
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

pub struct Server {
    pub base: String,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Server {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Serve `routes` on an ephemeral local port until the test ends. Routes match
/// on method and path (query ignored); anything else gets a 404.
pub async fn serve(routes: Vec<Route>) -> Server {
    serve_with(|_| routes).await
}

/// Like [`serve`], for bodies that link back to the server. `build` gets the base URL.
pub async fn serve_with(build: impl FnOnce(&str) -> Vec<Route>) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let routes = Arc::new(build(&base));

    let log = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let routes = routes.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let Some(req) = read_request(&mut stream).await else { return };
                let path = req.target.split('?').next().unwrap_or_default().to_string();
                let route = routes.iter().find(|r| r.method == req.method && r.path == path);
                log.lock().unwrap().push(req);

                let (status, body) = match route {
                    Some(r) => (r.status, r.body.clone()),
                    None => (404, b"<html><body>not found</body></html>".to_vec()),
                };
                let head = format!("HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len());
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Server { base, requests }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 { return None; }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let len: usize = headers.get("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
    let mut body = buf[header_end..].to_vec();
    while body.len() < len {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 { break; }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(Recorded { method, target, headers, body: String::from_utf8_lossy(&body).to_string() })
}
