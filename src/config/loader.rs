//! Load a [`Config`] from a JSON, XML or YAML file chosen by extension.

use crate::config::Config;
use crate::error::ConfigError;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Xml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_extension(ext: &str) -> Result<Self, ConfigError> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Ok(ConfigFormat::Json),
            "xml" => Ok(ConfigFormat::Xml),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        ConfigFormat::from_extension(ext)
    }

    pub fn decode(self, text: &str) -> Result<Config, ConfigError> {
        match self {
            ConfigFormat::Json => serde_json::from_str(text).map_err(|e| ConfigError::Decode(e.to_string())),
            ConfigFormat::Xml => quick_xml::de::from_str(text).map_err(|e| ConfigError::Decode(e.to_string())),
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| ConfigError::Decode(e.to_string())),
        }
    }
}

/// Read and decode `path`. Call [`Config::validate`] before use.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    let config = format.decode(&text)?;
    tracing::info!(path = %path.display(), format = ?format, "config loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "Index": "web/index.html",
        "StaticDir": "/static",
        "WaitSecs": 2,
        "Server": {"Port": ":8080", "StaticDir": "web", "TLSEnabled": false, "CacheTimeoutSecs": 3600},
        "Database": {"Address": "db:3306", "DatabaseName": "app", "Username": "web", "Password": "pw"}
    }"#;

    #[test]
    fn decodes_json() {
        let cfg = ConfigFormat::Json.decode(JSON).unwrap();
        assert_eq!(cfg.index, "web/index.html");
        assert_eq!(cfg.wait_secs, 2);
        assert_eq!(cfg.server.port, ":8080");
        assert_eq!(cfg.server.cache_timeout_secs, 3600);
        assert_eq!(cfg.database.database_name, "app");
        assert_eq!(cfg.database.protocol, "tcp");
        assert_eq!(cfg.database.max_connections, 10);
    }

    #[test]
    fn decodes_yaml() {
        let yaml = "StaticDir: /assets\nServer:\n  Port: \"9000\"\n  TLSEnabled: true\n  CertFile: c.pem\n  KeyFile: k.pem\n";
        let cfg = ConfigFormat::Yaml.decode(yaml).unwrap();
        assert_eq!(cfg.static_dir, "/assets");
        assert!(cfg.server.tls_enabled);
        assert_eq!(cfg.server.key_file, "k.pem");
        assert_eq!(cfg.server.listen_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn decodes_xml() {
        let xml = "<Config><Index>i.html</Index><WaitSecs>1</WaitSecs>\
                   <Server><Port>127.0.0.1:7000</Port><StaticCacheRefreshSecs>30</StaticCacheRefreshSecs></Server>\
                   <Database><Protocol>unix</Protocol><Address>/tmp/mysql.sock</Address></Database></Config>";
        let cfg = ConfigFormat::Xml.decode(xml).unwrap();
        assert_eq!(cfg.index, "i.html");
        assert_eq!(cfg.server.static_cache_refresh_secs, 30);
        assert_eq!(cfg.server.listen_addr(), "127.0.0.1:7000");
        assert_eq!(cfg.database.protocol, "unix");
    }

    #[test]
    fn extension_selects_format() {
        assert_eq!(ConfigFormat::from_path(Path::new("a/b.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("c.JSON")).unwrap(), ConfigFormat::Json);
        assert!(matches!(
            ConfigFormat::from_path(Path::new("conf.toml")),
            Err(ConfigError::UnsupportedFormat(ext)) if ext == "toml"
        ));
        assert!(ConfigFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join(format!("webapp-sdk-{}.json", std::process::id()));
        std::fs::write(&path, JSON).unwrap();
        let cfg = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.static_dir, "/static");
        assert!(matches!(load_config(&path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        assert!(matches!(ConfigFormat::Json.decode("{"), Err(ConfigError::Decode(_))));
    }
}
