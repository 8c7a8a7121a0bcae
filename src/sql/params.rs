//! Positional parameters and their binding onto sqlx MySQL queries.

use serde_json::Value;
use sqlx::mysql::{MySql, MySqlArguments};
use sqlx::query::Query;

/// A value bound to one `?` placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlParam {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlParam::Int(i)
                } else if let Some(u) = n.as_u64() {
                    SqlParam::UInt(u)
                } else {
                    SqlParam::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => SqlParam::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlParam::Text(v.to_string()),
        }
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Int(v.into())
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<u64> for SqlParam {
    fn from(v: u64) -> Self {
        SqlParam::UInt(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(v: Vec<u8>) -> Self {
        SqlParam::Bytes(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlParam::Null, Into::into)
    }
}

/// Bind every parameter in order.
pub fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [SqlParam],
) -> Query<'q, MySql, MySqlArguments> {
    for p in params {
        query = match p {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(n) => query.bind(*n),
            SqlParam::UInt(n) => query.bind(*n),
            SqlParam::Float(n) => query.bind(*n),
            SqlParam::Text(s) => query.bind(s.as_str()),
            SqlParam::Bytes(b) => query.bind(b.as_slice()),
        };
    }
    query
}
