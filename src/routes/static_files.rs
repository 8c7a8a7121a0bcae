//! SPA entry document and the static asset prefix.

use crate::config::Config;
use crate::response::Envelope;
use crate::routes::{missing, not_found};
use axum::{
    body::Bytes,
    extract::{OriginalUri, Request, State},
    handler::HandlerWithoutStateExt,
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};

/// In-memory copy of the index document. Clones share the cached bytes.
#[derive(Clone, Debug)]
pub struct IndexCache {
    path: Arc<PathBuf>,
    content: Arc<RwLock<Option<Bytes>>>,
}

impl IndexCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        IndexCache {
            path: Arc::new(path.into()),
            content: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file and replace the cached copy.
    pub async fn reload(&self) -> std::io::Result<Bytes> {
        let bytes = Bytes::from(tokio::fs::read(self.path.as_path()).await?);
        *self.content.write().unwrap_or_else(PoisonError::into_inner) = Some(bytes.clone());
        Ok(bytes)
    }

    /// Cached bytes, reading the file when nothing is cached yet.
    pub async fn get(&self) -> std::io::Result<Bytes> {
        let cached = self.content.read().unwrap_or_else(PoisonError::into_inner).clone();
        match cached {
            Some(bytes) => Ok(bytes),
            None => self.reload().await,
        }
    }

    /// Re-read the file every `every`. The task ends once every clone of the cache is dropped.
    pub fn spawn_refresher(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let path = Arc::clone(&self.path);
        let content: Weak<RwLock<Option<Bytes>>> = Arc::downgrade(&self.content);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(content) = content.upgrade() else { break };
                match tokio::fs::read(path.as_path()).await {
                    Ok(raw) => {
                        *content.write().unwrap_or_else(PoisonError::into_inner) = Some(Bytes::from(raw));
                    }
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "index refresh failed"),
                }
            }
        })
    }

    /// `text/html` with `Cache-Control: no-cache`, or 404 when the file is unreadable.
    pub async fn respond(&self) -> Response {
        match self.get().await {
            Ok(bytes) => (
                [(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))],
                Envelope::html(200, bytes),
            )
                .into_response(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "index unavailable");
                not_found()
            }
        }
    }
}

/// Files under `dir` served at the URL `prefix`.
#[derive(Clone, Debug)]
pub struct StaticFiles {
    prefix: String,
    dir: PathBuf,
    max_age: u64,
    entry: Option<Arc<str>>,
}

impl StaticFiles {
    pub fn new(prefix: impl Into<String>, dir: impl Into<PathBuf>, max_age_secs: u64) -> Self {
        StaticFiles {
            prefix: prefix.into(),
            dir: dir.into(),
            max_age: max_age_secs,
            entry: None,
        }
    }

    /// URL path of the SPA entry document, always answered with `no-cache`.
    pub fn with_entry(mut self, url: impl Into<String>) -> Self {
        self.entry = Some(Arc::from(url.into()));
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let files = StaticFiles::new(
            config.static_dir.clone(),
            config.server.static_dir.clone(),
            u64::try_from(config.server.cache_timeout_secs).unwrap_or(0),
        );
        match files.url_for(Path::new(&config.index_path())) {
            Some(url) => files.with_entry(url),
            None => files,
        }
    }

    /// URL under which `file` is served, if it lies inside the asset directory.
    pub fn url_for(&self, file: &Path) -> Option<String> {
        let rel = file.strip_prefix(&self.dir).ok()?;
        let segments: Vec<_> = rel.iter().map(|s| s.to_string_lossy()).collect();
        if segments.is_empty() {
            return None;
        }
        Some(format!("{}/{}", self.prefix.trim_end_matches('/'), segments.join("/")))
    }

    /// No prefix: assets take over every path nothing else matched.
    pub fn is_root(&self) -> bool {
        self.prefix.trim_end_matches('/').is_empty()
    }

    pub fn cache_control(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("max-age={}", self.max_age))
            .unwrap_or_else(|_| HeaderValue::from_static("no-cache"))
    }

    /// Missing files answer 404 `not found`; only successful responses carry `max-age`.
    pub fn router(&self) -> Router {
        let serve = ServeDir::new(&self.dir).not_found_service(missing.into_service());
        let router = if self.is_root() {
            Router::new().fallback_service(serve)
        } else {
            Router::new().nest_service(self.prefix.trim_end_matches('/'), serve)
        };
        let value = self.cache_control();
        let router = router.layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            move |res: &Response| res.status().is_success().then(|| value.clone()),
        ));
        match &self.entry {
            Some(url) => router.layer(middleware::from_fn_with_state(Arc::clone(url), entry_uncached)),
            None => router,
        }
    }
}

/// The entry document and its directory URL (which `ServeDir` answers with it) skip `max-age`.
async fn entry_uncached(State(url): State<Arc<str>>, req: Request, next: Next) -> Response {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map_or(req.uri().path(), |uri| uri.0.path());
    let dir = url.strip_suffix("index.html");
    let is_entry = path == &*url || dir.is_some_and(|d| path == d);
    let mut res = next.run(req).await;
    if is_entry {
        res.headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    res
}
