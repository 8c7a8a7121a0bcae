//! Query gateway over a MySQL pool: templated statements bound to a model definition,
//! rows streamed into caller accumulators, every call under a cancellation scope.

use crate::config::DatabaseConfig;
use crate::error::{AppError, DbError};
use crate::model::{validate_identifier, Definition};
use crate::sql::{bind_params, render, SqlParam};
use crate::store::TrackerState;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions, MySqlQueryResult, MySqlRow};
use sqlx::{Connection, Executor, FromRow, Row};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tokio::time::Instant;

const TABLE_EXISTS_SQL: &str =
    "SELECT 1 FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ? LIMIT 1";

/// Receives result rows one at a time. `()` discards them.
pub trait Accumulator: Send {
    fn append(&mut self, row: &MySqlRow) -> Result<(), sqlx::Error>;
}

impl Accumulator for () {
    fn append(&mut self, _row: &MySqlRow) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

/// First column of a `SELECT COUNT(..)` row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Count(pub i64);

impl Accumulator for Count {
    fn append(&mut self, row: &MySqlRow) -> Result<(), sqlx::Error> {
        self.0 = row.try_get(0)?;
        Ok(())
    }
}

impl<T> Accumulator for Vec<T>
where
    T: for<'r> FromRow<'r, MySqlRow> + Send,
{
    fn append(&mut self, row: &MySqlRow) -> Result<(), sqlx::Error> {
        self.push(T::from_row(row)?);
        Ok(())
    }
}

/// Adapts a closure into an accumulator.
pub struct Each<F>(pub F);

impl<F> Accumulator for Each<F>
where
    F: FnMut(&MySqlRow) -> Result<(), sqlx::Error> + Send,
{
    fn append(&mut self, row: &MySqlRow) -> Result<(), sqlx::Error> {
        (self.0)(row)
    }
}

/// Cancellation scope for database calls. Cancelled when the gateway closes or its deadline passes.
#[derive(Clone, Debug)]
pub struct Scope {
    cancel: watch::Receiver<bool>,
    deadline: Option<(Instant, Duration)>,
}

impl Scope {
    /// A scope that is never cancelled.
    pub fn detached() -> Self {
        let (_tx, cancel) = watch::channel(false);
        Scope { cancel, deadline: None }
    }

    /// Child scope expiring after `budget`, or at the parent's deadline if that is sooner.
    pub fn with_timeout(&self, budget: Duration) -> Self {
        let at = Instant::now() + budget;
        let deadline = match self.deadline {
            Some((parent, parent_budget)) if parent <= at => Some((parent, parent_budget)),
            _ => Some((at, budget)),
        };
        Scope {
            cancel: self.cancel.clone(),
            deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the scope is cancelled. Never resolves for a detached scope.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` to completion unless the scope is cancelled or expires first.
    /// Dropping the losing future releases its rows and connection.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        if self.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        let expired = async {
            match self.deadline {
                Some((at, budget)) => {
                    tokio::time::sleep_until(at).await;
                    budget
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DbError::Cancelled),
            budget = expired => Err(DbError::Timeout(budget)),
            res = fut => res,
        }
    }
}

async fn fetch_into(
    pool: &MySqlPool,
    sql: &str,
    persistent: bool,
    acc: &mut dyn Accumulator,
    params: &[SqlParam],
) -> Result<u64, DbError> {
    tracing::debug!(sql = %sql, params = params.len(), "query");
    let query = bind_params(sqlx::query(sql).persistent(persistent), params);
    let mut rows = query.fetch(pool);
    let mut n = 0u64;
    while let Some(row) = rows.try_next().await? {
        acc.append(&row)?;
        n += 1;
    }
    Ok(n)
}

/// A template compiled once on the server and reused for every call.
#[derive(Clone, Debug)]
pub struct Statement {
    sql: Arc<str>,
    pool: MySqlPool,
    cancel: watch::Receiver<bool>,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Run under a fresh scope; returns the number of rows appended.
    pub async fn call(&self, acc: &mut dyn Accumulator, params: &[SqlParam]) -> Result<u64, DbError> {
        let scope = Scope {
            cancel: self.cancel.clone(),
            deadline: None,
        };
        self.call_in(&scope, acc, params).await
    }

    pub async fn call_in(
        &self,
        scope: &Scope,
        acc: &mut dyn Accumulator,
        params: &[SqlParam],
    ) -> Result<u64, DbError> {
        scope.run(fetch_into(&self.pool, &self.sql, true, acc, params)).await
    }
}

/// Same contract as [`Statement`] without server-side statement caching.
#[derive(Clone, Debug)]
pub struct Query {
    sql: Arc<str>,
    pool: MySqlPool,
    cancel: watch::Receiver<bool>,
}

impl Query {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub async fn call(&self, acc: &mut dyn Accumulator, params: &[SqlParam]) -> Result<u64, DbError> {
        let scope = Scope {
            cancel: self.cancel.clone(),
            deadline: None,
        };
        self.call_in(&scope, acc, params).await
    }

    pub async fn call_in(
        &self,
        scope: &Scope,
        acc: &mut dyn Accumulator,
        params: &[SqlParam],
    ) -> Result<u64, DbError> {
        scope.run(fetch_into(&self.pool, &self.sql, false, acc, params)).await
    }
}

/// Fire-and-return statement. The result carries affected rows and last insert id.
#[derive(Clone, Debug)]
pub struct Command {
    sql: Arc<str>,
    pool: MySqlPool,
    cancel: watch::Receiver<bool>,
}

impl Command {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub async fn call(&self, params: &[SqlParam]) -> Result<MySqlQueryResult, DbError> {
        let scope = Scope {
            cancel: self.cancel.clone(),
            deadline: None,
        };
        self.call_in(&scope, params).await
    }

    pub async fn call_in(&self, scope: &Scope, params: &[SqlParam]) -> Result<MySqlQueryResult, DbError> {
        scope
            .run(async {
                tracing::debug!(sql = %self.sql, params = params.len(), "command");
                let query = bind_params(sqlx::query(&self.sql), params);
                Ok::<_, DbError>(query.execute(&self.pool).await?)
            })
            .await
    }
}

/// Owns the pool and the tracker state. Cloning shares both.
#[derive(Clone, Debug)]
pub struct Gateway {
    pool: MySqlPool,
    shutdown: Arc<watch::Sender<bool>>,
    pub(crate) tracker: Arc<OnceCell<TrackerState>>,
}

impl Gateway {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let options = connect_options(config, true)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;
        tracing::info!(address = %config.address, database = %config.database_name, "database pool opened");
        Ok(Gateway::from_pool(pool))
    }

    pub async fn connect_url(url: &str) -> Result<Self, DbError> {
        Ok(Gateway::from_pool(MySqlPool::connect(url).await?))
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        let (shutdown, _) = watch::channel(false);
        Gateway {
            pool,
            shutdown: Arc::new(shutdown),
            tracker: Arc::new(OnceCell::new()),
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Root scope for a request; cancelled when the gateway closes.
    pub fn scope(&self) -> Scope {
        Scope {
            cancel: self.shutdown.subscribe(),
            deadline: None,
        }
    }

    /// Compile `template` against `def`. Bad SQL fails here rather than at call time.
    pub async fn prepare_stmt(&self, template: &str, def: &Definition) -> Result<Statement, DbError> {
        let sql = render(template, def);
        tracing::debug!(sql = %sql, table = %def.table_name, "prepare");
        (&self.pool).prepare(sql.as_str()).await?;
        Ok(Statement {
            sql: sql.into(),
            pool: self.pool.clone(),
            cancel: self.shutdown.subscribe(),
        })
    }

    pub fn make_query(&self, template: &str, def: &Definition) -> Query {
        Query {
            sql: render(template, def).into(),
            pool: self.pool.clone(),
            cancel: self.shutdown.subscribe(),
        }
    }

    pub fn make_cmd(&self, template: &str, def: &Definition) -> Command {
        Command {
            sql: render(template, def).into(),
            pool: self.pool.clone(),
            cancel: self.shutdown.subscribe(),
        }
    }

    /// Exact-name lookup in the connected schema.
    pub async fn table_exists(&self, name: &str) -> Result<bool, DbError> {
        let found: Option<MySqlRow> = sqlx::query(TABLE_EXISTS_SQL)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    pub async fn ping(&self) -> Result<(), DbError> {
        self.scope()
            .with_timeout(Duration::from_secs(2))
            .run(async {
                sqlx::query("SELECT 1").execute(&self.pool).await?;
                Ok::<_, DbError>(())
            })
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Cancel every outstanding scope, then close the pool and the statements cached on it.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        self.pool.close().await;
        tracing::info!("database pool closed");
    }
}

/// Connect options for `config`. `with_database` selects the default schema.
pub fn connect_options(config: &DatabaseConfig, with_database: bool) -> Result<MySqlConnectOptions, DbError> {
    let mut options = MySqlConnectOptions::new().username(&config.username);
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    options = match config.protocol.to_ascii_lowercase().as_str() {
        "unix" => options.socket(&config.address),
        "" | "tcp" => {
            let (host, port) = match config.address.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port.parse::<u16>().map_err(|_| {
                        sqlx::Error::Configuration(format!("invalid port in address '{}'", config.address).into())
                    })?;
                    (host, port)
                }
                None => (config.address.as_str(), 3306),
            };
            options.host(host).port(port)
        }
        other => {
            return Err(DbError::Sqlx(sqlx::Error::Configuration(
                format!("unsupported protocol '{}'", other).into(),
            )))
        }
    };
    if with_database && !config.database_name.is_empty() {
        options = options.database(&config.database_name);
    }
    Ok(options)
}

/// Connect without a default schema and create `DatabaseName` if it is missing.
pub async fn ensure_database_exists(config: &DatabaseConfig) -> Result<(), AppError> {
    validate_identifier(&config.database_name)?;
    let options = connect_options(config, false)?;
    let mut conn = MySqlConnection::connect_with(&options).await?;
    let ddl = format!("CREATE DATABASE IF NOT EXISTS {}", config.database_name);
    tracing::debug!(sql = %ddl, "bootstrap");
    sqlx::query(&ddl).execute(&mut conn).await?;
    conn.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_config(protocol: &str, address: &str) -> DatabaseConfig {
        DatabaseConfig {
            protocol: protocol.into(),
            address: address.into(),
            database_name: "app".into(),
            username: "root".into(),
            password: "secret".into(),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn tcp_address_splits_host_and_port() {
        let opts = connect_options(&db_config("tcp", "db.local:3307"), true).unwrap();
        assert_eq!(opts.get_host(), "db.local");
        assert_eq!(opts.get_port(), 3307);
        assert_eq!(opts.get_database(), Some("app"));
        assert_eq!(opts.get_username(), "root");
    }

    #[test]
    fn missing_port_defaults() {
        let opts = connect_options(&db_config("", "localhost"), false).unwrap();
        assert_eq!(opts.get_port(), 3306);
        assert_eq!(opts.get_database(), None);
    }

    #[test]
    fn unix_protocol_uses_socket() {
        let opts = connect_options(&db_config("unix", "/run/mysqld/mysqld.sock"), true).unwrap();
        assert_eq!(
            opts.get_socket().map(|p| p.as_path()),
            Some(std::path::Path::new("/run/mysqld/mysqld.sock"))
        );
    }

    #[test]
    fn bad_port_and_protocol_rejected() {
        assert!(connect_options(&db_config("tcp", "host:notaport"), true).is_err());
        assert!(connect_options(&db_config("udp", "host:1"), true).is_err());
    }

    #[test]
    fn table_lookup_matches_name_exactly() {
        assert!(!TABLE_EXISTS_SQL.contains("LIKE"));
        assert!(TABLE_EXISTS_SQL.contains("table_name = ?"));
        assert!(TABLE_EXISTS_SQL.contains("table_schema = DATABASE()"));
    }

    #[tokio::test]
    async fn cancelled_scope_short_circuits() {
        let (tx, cancel) = watch::channel(false);
        let scope = Scope { cancel, deadline: None };
        tx.send_replace(true);
        let res: Result<(), DbError> = scope.run(async { Ok(()) }).await;
        assert!(matches!(res, Err(DbError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let (tx, cancel) = watch::channel(false);
        let scope = Scope { cancel, deadline: None };
        let pending = scope.run(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let trigger = async {
            tokio::task::yield_now().await;
            tx.send_replace(true);
        };
        let (res, ()) = tokio::join!(pending, trigger);
        assert!(matches!(res, Err(DbError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_as_timeout() {
        let scope = Scope::detached().with_timeout(Duration::from_millis(50));
        let res = scope
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(DbError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn child_keeps_tighter_deadline() {
        let parent = Scope::detached().with_timeout(Duration::from_secs(1));
        let looser = parent.with_timeout(Duration::from_secs(5));
        assert_eq!(looser.deadline(), parent.deadline());
        let tighter = parent.with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn detached_scope_completes() {
        let res = Scope::detached().run(async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
