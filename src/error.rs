//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid file type \"{0}\"")]
    UnsupportedFormat(String),
    #[error("config read: {0}")]
    Io(#[from] std::io::Error),
    #[error("config decode: {0}")]
    Decode(String),
    #[error("TLSEnabled, but CertFile or KeyFile not given")]
    TlsIncomplete,
    #[error("validation: {0}")]
    Validation(String),
}

/// Failures while rendering a field or definition to DDL, or decoding a stored one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unrecognized field type ({0})")]
    UnknownType(u32),
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("field '{0}' is reserved for the identity column")]
    ReservedName(String),
    #[error("field {field}: {kind} requires a length")]
    MissingLength { field: String, kind: &'static str },
    #[error("field {0}: on-delete/on-update behavior requires a reference")]
    BehaviorWithoutReference(String),
    #[error("field {0}: reference type without a referenced table")]
    MissingReference(String),
    #[error("duplicate field '{field}' in {table}")]
    DuplicateField { table: String, field: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("query cancelled")]
    Cancelled,
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("tracker encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Schema reconciliation failure. Always fatal at startup.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("migration of {table} failed on `{statement}`: {source}")]
    Statement {
        table: String,
        statement: String,
        #[source]
        source: DbError,
    },
    #[error("tracker for {table}: {source}")]
    Tracker {
        table: String,
        #[source]
        source: DbError,
    },
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("server io: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls: {0}")]
    Tls(String),
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("init of model {table}: {source}")]
    ModelInit {
        table: String,
        #[source]
        source: Box<AppError>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Db(DbError::Sqlx(e))
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Db(DbError::Sqlx(sqlx::Error::RowNotFound)) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Db(DbError::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, "database_timeout"),
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
