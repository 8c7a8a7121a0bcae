//! Startup checks. Any failure here is fatal.

use crate::config::{Config, ServerConfig};
use crate::error::ConfigError;

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls_enabled && (self.cert_file.is_empty() || self.key_file.is_empty()) {
            return Err(ConfigError::TlsIncomplete);
        }
        if self.port.trim().is_empty() {
            return Err(ConfigError::Validation("Server.Port is required".into()));
        }
        if self.cache_timeout_secs < 0 {
            return Err(ConfigError::Validation("Server.CacheTimeoutSecs must not be negative".into()));
        }
        if self.static_cache_refresh_secs < 0 {
            return Err(ConfigError::Validation(
                "Server.StaticCacheRefreshSecs must not be negative".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Checks everything needed to serve, including the server section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_secs < 0 {
            return Err(ConfigError::Validation("WaitSecs must not be negative".into()));
        }
        if !self.static_dir.is_empty() && !self.static_dir.starts_with('/') {
            return Err(ConfigError::Validation("StaticDir must start with '/'".into()));
        }
        self.server.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerConfig {
        ServerConfig {
            port: ":8080".into(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn tls_without_cert_is_rejected() {
        let cfg = ServerConfig {
            tls_enabled: true,
            key_file: "key.pem".into(),
            ..server()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::TlsIncomplete)));
        let cfg = ServerConfig {
            tls_enabled: true,
            cert_file: "cert.pem".into(),
            ..server()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::TlsIncomplete)));
    }

    #[test]
    fn tls_with_both_files_passes() {
        let cfg = ServerConfig {
            tls_enabled: true,
            cert_file: "cert.pem".into(),
            key_file: "key.pem".into(),
            ..server()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_port_is_rejected() {
        assert!(matches!(ServerConfig::default().validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn negative_values_are_rejected() {
        let cfg = Config {
            wait_secs: -1,
            server: server(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            server: ServerConfig {
                cache_timeout_secs: -5,
                ..server()
            },
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn static_prefix_must_be_absolute() {
        let cfg = Config {
            static_dir: "static".into(),
            server: server(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            static_dir: "/static".into(),
            server: server(),
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
