//! Webapp SDK: single-page app server with MySQL-backed models, tracked migrations,
//! cookie sessions and a middleware-guarded request pipeline.

pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod migration;
pub mod model;
pub mod response;
pub mod routes;
pub mod server;
pub mod session;
pub mod sql;
pub mod store;

pub use app::Webapp;
pub use config::{load_config, Config, ConfigFormat, DatabaseConfig, ServerConfig};
pub use error::{AppError, ConfigError, DbError, MigrationError, SchemaError, ServerError};
pub use gateway::{ensure_database_exists, Accumulator, Command, Count, Each, Gateway, Query, Scope, Statement};
pub use middleware::{Middleware, MiddlewareChain, ReqData};
pub use migration::{Migrator, SchemaStore, TRACKER_TABLE};
pub use model::{Definition, Field, FieldType, OnChange};
pub use response::{DataResponse, Envelope};
pub use routes::{common_routes, controller, handler, view, Entry, EntryKind, Methods, Pipeline};
pub use server::{Server, ShutdownHandle};
pub use session::SessionManager;
pub use sql::SqlParam;
