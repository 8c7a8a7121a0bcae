//! Process-local sessions: key -> (token, expiry), carried in a `session` cookie as `"<key> : <token>"`.

use crate::middleware::{Middleware, ReqData};
use crate::response::{DataResponse, Envelope};
use crate::routes::{controller, Entry};
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use rand::rngs::OsRng;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

pub const SESSION_COOKIE: &str = "session";
pub const COOKIE_SEPARATOR: &str = " : ";
pub const TOKEN_LEN: usize = 16;
/// Request-context key set to the session key once the middleware admits a request.
pub const SESSION_KEY: &str = "session_key";

#[derive(Clone, Debug)]
struct SessionEntry {
    token: String,
    expiry: Instant,
}

type Table = Arc<RwLock<HashMap<String, SessionEntry>>>;

fn random_token() -> String {
    (0..TOKEN_LEN).map(|_| char::from(OsRng.gen_range(b'A'..=b'Z'))).collect()
}

/// Split a cookie value into `(key, token)`. Surrounding double quotes are ignored.
pub fn parse_session_cookie(value: &str) -> Option<(&str, &str)> {
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    let (key, token) = value.split_once(COOKIE_SEPARATOR)?;
    let plain = |s: &str| !s.is_empty() && !s.contains(char::is_whitespace);
    (plain(key) && plain(token)).then_some((key, token))
}

fn session_cookie_value(parts: &Parts) -> Option<String> {
    CookieJar::from_headers(&parts.headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
}

fn should_login() -> Envelope {
    Envelope::Json(DataResponse::new(json!({ "shouldLogin": true })).with_code(401))
}

/// Keyed credential table. Cloning shares the table.
#[derive(Clone, Debug)]
pub struct SessionManager {
    sessions: Table,
    duration: Duration,
    excluded: Arc<[String]>,
}

impl SessionManager {
    /// `excluded` path prefixes bypass the middleware.
    pub fn new<I, S>(duration: Duration, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            duration,
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn insert(&self, key: &str, duration: Duration) -> (String, Instant) {
        let token = random_token();
        let expiry = Instant::now() + duration;
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                SessionEntry {
                    token: token.clone(),
                    expiry,
                },
            );
        (token, expiry)
    }

    /// New token for `key`, valid for the manager's duration. Replaces any prior session.
    pub fn login(&self, key: &str) -> String {
        let (token, expiry) = self.insert(key, self.duration);
        self.sweep_at(key, expiry);
        token
    }

    /// As [`login`](Self::login) with its own duration.
    pub fn login_limited(&self, key: &str, duration: Duration) -> String {
        let (token, expiry) = self.insert(key, duration);
        self.sweep_at(key, expiry);
        token
    }

    /// Drop `key` once its entry expires. Outside a runtime, expired entries are
    /// reclaimed by the next lookup instead.
    fn sweep_at(&self, key: &str, expiry: Instant) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let sessions = Arc::clone(&self.sessions);
        let key = key.to_string();
        runtime.spawn(async move {
            let mut until = expiry;
            loop {
                tokio::time::sleep_until(until).await;
                let mut table = sessions.write().unwrap_or_else(PoisonError::into_inner);
                match table.get(&key).map(|e| e.expiry) {
                    Some(at) if at <= Instant::now() => {
                        table.remove(&key);
                        tracing::debug!(key = %key, "session expired");
                        break;
                    }
                    // re-login extended the session
                    Some(at) => until = at,
                    None => break,
                }
            }
        });
    }

    pub fn logout(&self, key: &str) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn live(&self, key: &str) -> Option<SessionEntry> {
        let now = Instant::now();
        let entry = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()?;
        if entry.expiry > now {
            return Some(entry);
        }
        let mut table = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if table.get(key).is_some_and(|e| e.expiry <= now) {
            table.remove(key);
        }
        None
    }

    pub fn validate(&self, key: &str, token: &str) -> bool {
        self.live(key).is_some_and(|e| e.token == token)
    }

    pub fn is_logged_in(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// Whether the request's cookie names a logged-in key. The token is not checked.
    pub fn check_request(&self, parts: &Parts) -> bool {
        session_cookie_value(parts)
            .as_deref()
            .and_then(parse_session_cookie)
            .is_some_and(|(key, _)| self.is_logged_in(key))
    }

    /// `session` cookie for `key`: `Secure`, `HttpOnly`, `Max-Age` = session duration.
    /// The value is double-quoted so its spaces survive on the wire unencoded.
    pub fn cookie(&self, key: &str, token: &str) -> Cookie<'static> {
        let max_age = time::Duration::seconds(i64::try_from(self.duration.as_secs()).unwrap_or(i64::MAX));
        Cookie::build((SESSION_COOKIE, format!("\"{key}{COOKIE_SEPARATOR}{token}\"")))
            .path("/")
            .secure(true)
            .http_only(true)
            .max_age(max_age)
            .build()
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excluded.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Controller answering `{"loginSuccess": bool}`. `validator` returns the principal key on success.
    pub fn login_controller<V, Fut>(&self, validator: V) -> Entry
    where
        V: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        let manager = self.clone();
        controller(move |req: Request, _data: ReqData| {
            let manager = manager.clone();
            let validate = validator(req);
            async move {
                match validate.await {
                    Some(key) => {
                        let token = manager.login_limited(&key, manager.duration);
                        tracing::info!(key = %key, "login succeeded");
                        Envelope::Json(
                            DataResponse::new(json!({ "loginSuccess": true })).with_cookie(manager.cookie(&key, &token)),
                        )
                    }
                    None => {
                        tracing::info!("login failed");
                        Envelope::json(json!({ "loginSuccess": false }))
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Middleware for SessionManager {
    async fn admit(&self, parts: &Parts, data: &mut ReqData) -> Option<Envelope> {
        if self.is_excluded(parts.uri.path()) {
            return None;
        }
        let Some(value) = session_cookie_value(parts) else {
            return Some(should_login());
        };
        match parse_session_cookie(&value) {
            Some((key, token)) if self.validate(key, token) => {
                data.insert(SESSION_KEY.to_string(), key.to_string());
                None
            }
            _ => Some(should_login()),
        }
    }
}
