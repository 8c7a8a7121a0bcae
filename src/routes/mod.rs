//! Request pipeline: paths registered with a method table, run behind the middleware chain,
//! materialised into an axum router.

pub mod common;
pub mod static_files;

use crate::middleware::{Middleware, MiddlewareChain, ReqData};
use crate::response::Envelope;
use axum::{
    extract::{FromRequestParts, RawPathParams, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

pub use common::common_routes;
pub use static_files::{IndexCache, StaticFiles};

/// Request-context key holding the entry kind (`view`, `controller` or `handler`).
pub const KIND_KEY: &str = "kind";

pub type Handler = Arc<dyn Fn(Request, ReqData) -> BoxFuture<'static, Response> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    View,
    Controller,
    Handler,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::View => "view",
            EntryKind::Controller => "controller",
            EntryKind::Handler => "handler",
        }
    }
}

/// One slot of a method table.
#[derive(Clone)]
pub struct Entry {
    kind: EntryKind,
    call: Handler,
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        self.kind
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("kind", &self.kind).finish()
    }
}

fn wrap<F, Fut, R>(kind: EntryKind, f: F) -> Entry
where
    F: Fn(Request, ReqData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    let call: Handler = Arc::new(move |req: Request, data: ReqData| -> BoxFuture<'static, Response> {
        let fut = f(req, data);
        Box::pin(async move { fut.await.into_response() })
    });
    Entry { kind, call }
}

/// Read-only entry, normally bound to GET.
pub fn view<F, Fut, R>(f: F) -> Entry
where
    F: Fn(Request, ReqData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    wrap(EntryKind::View, f)
}

/// State-changing entry, normally bound to PUT, POST, PATCH or DELETE.
pub fn controller<F, Fut, R>(f: F) -> Entry
where
    F: Fn(Request, ReqData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    wrap(EntryKind::Controller, f)
}

/// Catch-all entry receiving every method.
pub fn handler<F, Fut, R>(f: F) -> Entry
where
    F: Fn(Request, ReqData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    wrap(EntryKind::Handler, f)
}

/// Per-method entries for one path. A catch-all takes precedence over every method.
#[derive(Clone, Debug, Default)]
pub struct Methods {
    handler: Option<Entry>,
    get: Option<Entry>,
    put: Option<Entry>,
    post: Option<Entry>,
    patch: Option<Entry>,
    delete: Option<Entry>,
}

impl Methods {
    pub fn new() -> Self {
        Methods::default()
    }

    pub fn any(mut self, entry: Entry) -> Self {
        self.handler = Some(entry);
        self
    }

    pub fn get(mut self, entry: Entry) -> Self {
        self.get = Some(entry);
        self
    }

    pub fn put(mut self, entry: Entry) -> Self {
        self.put = Some(entry);
        self
    }

    pub fn post(mut self, entry: Entry) -> Self {
        self.post = Some(entry);
        self
    }

    pub fn patch(mut self, entry: Entry) -> Self {
        self.patch = Some(entry);
        self
    }

    pub fn delete(mut self, entry: Entry) -> Self {
        self.delete = Some(entry);
        self
    }

    /// Entry for `method`, compared case-insensitively.
    pub fn select(&self, method: &str) -> Option<&Entry> {
        if self.handler.is_some() {
            return self.handler.as_ref();
        }
        match method.to_ascii_uppercase().as_str() {
            "GET" => self.get.as_ref(),
            "PUT" => self.put.as_ref(),
            "POST" => self.post.as_ref(),
            "PATCH" => self.patch.as_ref(),
            "DELETE" => self.delete.as_ref(),
            _ => None,
        }
    }
}

pub(crate) fn bad_request() -> Response {
    Envelope::text(400, "bad request").into_response()
}

pub(crate) fn not_found() -> Response {
    Envelope::text(404, "not found").into_response()
}

pub(crate) async fn missing() -> Response {
    not_found()
}

/// Pick the entry, run the chain, then the entry. A denial replaces the handler's response.
pub async fn dispatch(methods: &Methods, chain: &MiddlewareChain, req: Request) -> Response {
    let Some(entry) = methods.select(req.method().as_str()) else {
        tracing::debug!(method = %req.method(), path = %req.uri().path(), "no entry for method");
        return bad_request();
    };
    let (mut parts, body) = req.into_parts();
    let mut data = ReqData::new();
    data.insert(KIND_KEY.to_string(), entry.kind.as_str().to_string());
    if let Ok(params) = RawPathParams::from_request_parts(&mut parts, &()).await {
        for (name, value) in params.iter() {
            data.insert(name.to_string(), value.to_string());
        }
    }
    if let Some(denial) = chain.run(&parts, &mut data).await {
        tracing::debug!(path = %parts.uri.path(), "request denied by middleware");
        return denial.into_response();
    }
    (entry.call)(Request::from_parts(parts, body), data).await
}

/// Registered paths plus the chain guarding them.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    chain: MiddlewareChain,
    routes: Vec<(String, Methods)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    pub fn add_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.chain.push(middleware);
    }

    /// Path syntax is axum's; `:name` segments are copied into the request context.
    pub fn register(&mut self, path: impl Into<String>, methods: Methods) {
        self.routes.push((path.into(), methods));
    }

    pub fn register_methods<I, P>(&mut self, table: I)
    where
        I: IntoIterator<Item = (P, Methods)>,
        P: Into<String>,
    {
        for (path, methods) in table {
            self.register(path, methods);
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(p, _)| p.as_str())
    }

    /// Router over every registration. Unknown paths answer 404 `not found`.
    pub fn router(&self) -> Router {
        self.routes().fallback(missing)
    }

    /// As [`router`](Self::router) but without a fallback, for merging.
    pub fn routes(&self) -> Router {
        let mut router = Router::new();
        for (path, methods) in &self.routes {
            let methods = Arc::new(methods.clone());
            let chain = self.chain.clone();
            router = router.route(
                path,
                any(move |req: Request| {
                    let methods = methods.clone();
                    let chain = chain.clone();
                    async move { dispatch(&methods, &chain, req).await }
                }),
            );
        }
        router
    }
}
