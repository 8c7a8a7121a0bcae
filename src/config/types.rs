//! Config records. Keys are PascalCase in every format (`Index`, `Server.TLSEnabled`, ..).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// SPA entry document. Empty means `<Server.StaticDir>/index.html`.
    pub index: String,
    /// URL prefix assets are served under, e.g. `/static`.
    pub static_dir: String,
    /// Delay before touching the database.
    pub wait_secs: i64,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
}

impl Config {
    pub fn index_path(&self) -> String {
        if self.index.is_empty() {
            format!("{}/index.html", self.server.static_dir.trim_end_matches('/'))
        } else {
            self.index.clone()
        }
    }

    pub fn has_database(&self) -> bool {
        !self.database.address.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServerConfig {
    /// `:8080`, `8080` or `host:port`.
    pub port: String,
    /// Directory on disk holding the static assets.
    pub static_dir: String,
    #[serde(rename = "TLSEnabled")]
    pub tls_enabled: bool,
    pub cert_file: String,
    pub key_file: String,
    pub cache_timeout_secs: i64,
    /// Index refresh period; 0 disables the refresher.
    pub static_cache_refresh_secs: i64,
}

impl ServerConfig {
    /// Socket address to bind. A bare port binds every interface.
    pub fn listen_addr(&self) -> String {
        let port = self.port.trim();
        if let Some(p) = port.strip_prefix(':') {
            format!("0.0.0.0:{p}")
        } else if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            format!("0.0.0.0:{port}")
        } else {
            port.to_string()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatabaseConfig {
    /// `tcp` (default) or `unix`.
    pub protocol: String,
    /// `host[:port]` for tcp, a socket path for unix.
    pub address: String,
    pub database_name: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            protocol: "tcp".into(),
            address: String::new(),
            database_name: String::new(),
            username: String::new(),
            password: String::new(),
            max_connections: 10,
        }
    }
}
