//! The webapp: config, optional database gateway, request pipeline and static assets.

use crate::config::Config;
use crate::error::{AppError, ConfigError};
use crate::gateway::{ensure_database_exists, Gateway};
use crate::middleware::Middleware;
use crate::migration::Migrator;
use crate::model::Definition;
use crate::routes::{common_routes, missing, IndexCache, Methods, Pipeline, StaticFiles};
use crate::server::Server;
use axum::{routing::get, Router};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Webapp {
    config: Config,
    gateway: Option<Gateway>,
    pipeline: Pipeline,
    index: IndexCache,
}

impl Webapp {
    /// Validated app with no database. Models cannot be registered.
    pub fn new(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let index = IndexCache::new(config.index_path());
        Ok(Webapp {
            config,
            gateway: None,
            pipeline: Pipeline::new(),
            index,
        })
    }

    /// Validate, wait `WaitSecs`, then create the database if needed and open the pool.
    pub async fn init(config: Config) -> Result<Self, AppError> {
        let mut app = Webapp::new(config)?;
        if app.config.wait_secs > 0 {
            info!(secs = app.config.wait_secs, "waiting before database init");
            tokio::time::sleep(Duration::from_secs(app.config.wait_secs.unsigned_abs())).await;
        }
        if app.config.has_database() {
            ensure_database_exists(&app.config.database).await?;
            app.gateway = Some(Gateway::connect(&app.config.database).await?);
        } else {
            warn!("no database address configured; models are unavailable");
        }
        Ok(app)
    }

    pub fn with_gateway(mut self, gateway: Gateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> Option<&Gateway> {
        self.gateway.as_ref()
    }

    fn require_gateway(&self) -> Result<&Gateway, AppError> {
        self.gateway
            .as_ref()
            .ok_or_else(|| ConfigError::Validation("no database configured".into()).into())
    }

    pub fn add_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.pipeline.add_middleware(middleware);
    }

    pub fn register(&mut self, path: impl Into<String>, methods: Methods) {
        self.pipeline.register(path, methods);
    }

    pub fn register_methods<I, P>(&mut self, table: I)
    where
        I: IntoIterator<Item = (P, Methods)>,
        P: Into<String>,
    {
        self.pipeline.register_methods(table);
    }

    /// Mount GET /health, /ready and /version behind the middleware chain.
    pub fn register_common_routes(&mut self) {
        self.pipeline.register_methods(common_routes(self.gateway.clone()));
    }

    /// Migrate `def`, then run its initializer.
    pub async fn register_model(&self, def: &Definition) -> Result<(), AppError> {
        let gateway = self.require_gateway()?;
        let issued = Migrator::new(gateway).migrate(def).await?;
        info!(table = %def.table_name, statements = issued.len(), "model migrated");
        def.run_init(gateway).await.map_err(|source| AppError::ModelInit {
            table: def.table_name.clone(),
            source: Box::new(source),
        })
    }

    /// Register each model in order. The first failure stops registration.
    pub async fn register_models(&self, defs: &[Definition]) -> Result<(), AppError> {
        for def in defs {
            self.register_model(def).await?;
        }
        Ok(())
    }

    /// Pipeline routes, the index at `/` unless a route claims it, and the asset prefix.
    pub fn router(&self) -> Router {
        let mut router = self.pipeline.routes();
        if !self.pipeline.paths().any(|p| p == "/") {
            let index = self.index.clone();
            router = router.route(
                "/",
                get(move || {
                    let index = index.clone();
                    async move { index.respond().await }
                }),
            );
        }
        if self.config.server.static_dir.is_empty() {
            return router.fallback(missing);
        }
        let assets = StaticFiles::from_config(&self.config);
        if assets.is_root() {
            router.merge(assets.router())
        } else {
            router.merge(assets.router()).fallback(missing)
        }
    }

    /// Bind and serve until `signal` resolves, then drain for up to `grace` and close the pool.
    pub async fn serve<F>(self, signal: F, grace: Duration) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        let server = Server::bind(&self.config.server).await?;
        let handle = server.handle();

        if let Err(e) = self.index.reload().await {
            warn!(path = %self.index.path().display(), error = %e, "index not loaded");
        }
        let refresher = u64::try_from(self.config.server.static_cache_refresh_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(|secs| self.index.spawn_refresher(Duration::from_secs(secs)));

        let serving = server.serve(self.router());
        tokio::pin!(serving);
        let result = tokio::select! {
            res = &mut serving => res,
            () = signal => {
                info!(grace = ?grace, "shutdown signal received");
                let (drained, served) = tokio::join!(handle.shutdown(grace), &mut serving);
                drained.and(served)
            }
        };

        if let Some(task) = refresher {
            task.abort();
        }
        if let Some(gateway) = &self.gateway {
            gateway.close().await;
        }
        result.map_err(AppError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::model::{Field, FieldType};
    use crate::routes::view;
    use crate::middleware::ReqData;
    use crate::response::Envelope;
    use axum::{body::Body, extract::Request, http::StatusCode};
    use tower::ServiceExt;

    fn config(static_dir: &std::path::Path) -> Config {
        Config {
            static_dir: "/static".into(),
            server: ServerConfig {
                port: "127.0.0.1:0".into(),
                static_dir: static_dir.display().to_string(),
                cache_timeout_secs: 60,
                ..ServerConfig::default()
            },
            ..Config::default()
        }
    }

    async fn call(router: Router, path: &str) -> (StatusCode, String) {
        let res = router.oneshot(Request::get(path).body(Body::empty()).unwrap()).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = Config {
            server: ServerConfig {
                port: ":80".into(),
                tls_enabled: true,
                ..ServerConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(Webapp::new(cfg), Err(AppError::Config(ConfigError::TlsIncomplete))));
    }

    #[tokio::test]
    async fn index_assets_routes_and_not_found() {
        let dir = std::env::temp_dir().join(format!("webapp-sdk-app-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<html>spa</html>").unwrap();
        std::fs::write(dir.join("app.css"), "body{}").unwrap();

        let mut app = Webapp::new(config(&dir)).unwrap();
        app.register(
            "/api/hello",
            Methods::new().get(view(|_req: Request, _data: ReqData| async { Envelope::text(200, "hi") })),
        );
        app.register_common_routes();
        let router = app.router();

        assert_eq!(call(router.clone(), "/").await, (StatusCode::OK, "<html>spa</html>".into()));
        assert_eq!(call(router.clone(), "/static/app.css").await, (StatusCode::OK, "body{}".into()));
        assert_eq!(call(router.clone(), "/api/hello").await, (StatusCode::OK, "hi".into()));
        assert_eq!(call(router.clone(), "/health").await.0, StatusCode::OK);
        assert_eq!(call(router.clone(), "/nope").await, (StatusCode::NOT_FOUND, "not found".into()));
        assert_eq!(call(router, "/static/nope.css").await.0, StatusCode::NOT_FOUND);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn entry_under_asset_prefix_stays_uncached() {
        let dir = std::env::temp_dir().join(format!("webapp-sdk-app-entry-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<html>spa</html>").unwrap();
        std::fs::write(dir.join("app.css"), "body{}").unwrap();
        let router = Webapp::new(config(&dir)).unwrap().router();

        let cache_control = |path: &'static str| {
            let router = router.clone();
            async move {
                let res = router.oneshot(Request::get(path).body(Body::empty()).unwrap()).await.unwrap();
                assert_eq!(res.status(), StatusCode::OK, "{path}");
                res.headers()[axum::http::header::CACHE_CONTROL].to_str().unwrap().to_string()
            }
        };
        assert_eq!(cache_control("/").await, "no-cache");
        assert_eq!(cache_control("/static/index.html").await, "no-cache");
        assert_eq!(cache_control("/static/app.css").await, "max-age=60");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn models_need_a_database() {
        let app = Webapp::new(config(std::path::Path::new("web"))).unwrap();
        let def = Definition::new("users", vec![Field::new("name", FieldType::Varchar).length(64)]);
        assert!(matches!(app.register_model(&def).await, Err(AppError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn init_waits_before_touching_the_database() {
        let dir = std::path::Path::new("web");
        let cfg = Config {
            wait_secs: 3,
            ..config(dir)
        };
        let started = tokio::time::Instant::now();
        let app = Webapp::init(cfg).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(app.gateway().is_none());
    }

    #[tokio::test]
    async fn serve_stops_on_signal() {
        let app = Webapp::new(config(std::path::Path::new("web"))).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(app.serve(
            async {
                let _ = rx.await;
            },
            Duration::from_secs(1),
        ));
        tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }
}
