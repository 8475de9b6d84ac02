use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
};
use url::Url;

use crate::{config::Format, error::ProxyError};

use super::{AcmeConfig, LogLevel};

/// The core configuration options available
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Addresses terminating TLS (default: ["0.0.0.0:443"])
    #[serde(default = "Config::default_tls_listen")]
    pub tls_listen: Vec<SocketAddr>,

    /// Plain HTTP addresses, also answering http-01 challenges (default: ["0.0.0.0:80"])
    #[serde(default = "Config::default_http_listen")]
    pub http_listen: Vec<SocketAddr>,

    /// The backend every request is forwarded to (default: "http://127.0.0.1:8080")
    #[serde(default = "Config::default_upstream")]
    pub upstream: String,

    /// The log level to use (default: "info")
    #[serde(default)]
    pub log_level: Option<LogLevel>,

    #[serde(default)]
    pub acme: AcmeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tls_listen: Config::default_tls_listen(),
            http_listen: Config::default_http_listen(),
            upstream: Config::default_upstream(),
            log_level: Some(LogLevel::default()),
            acme: AcmeConfig::default(),
        }
    }
}

impl Config {
    fn any_address(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    pub fn default_tls_listen() -> Vec<SocketAddr> {
        vec![Config::any_address(443)]
    }

    pub fn default_http_listen() -> Vec<SocketAddr> {
        vec![Config::any_address(80)]
    }

    pub fn default_upstream() -> String {
        "http://127.0.0.1:8080".to_string()
    }
}

impl Config {
    /// Check the settings that serde can't
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.tls_listen.is_empty() && self.http_listen.is_empty() {
            return Err(ProxyError::ConfigError {
                field: "tls_listen".to_string(),
                message: "At least one listen address is required".to_string(),
            });
        }

        if !self.acme.enable_tls_alpn && !self.acme.enable_http01 {
            return Err(ProxyError::ConfigError {
                field: "acme".to_string(),
                message: "At least one of tls-alpn-01 and http-01 must be enabled".to_string(),
            });
        }

        if self.acme.enable_http01 && !self.acme.enable_tls_alpn && self.http_listen.is_empty() {
            return Err(ProxyError::ConfigError {
                field: "http_listen".to_string(),
                message: "http-01 validation needs a plain HTTP listener".to_string(),
            });
        }

        self.upstream_url()?;
        Ok(())
    }

    /// The parsed upstream URL
    pub fn upstream_url(&self) -> Result<Url, ProxyError> {
        let url = Url::parse(&self.upstream).map_err(|e| ProxyError::ConfigError {
            field: "upstream".to_string(),
            message: e.to_string(),
        })?;

        if url.scheme() != "http" || url.host_str().is_none() {
            return Err(ProxyError::ConfigError {
                field: "upstream".to_string(),
                message: "Expected an absolute http:// URL".to_string(),
            });
        }

        Ok(url)
    }

    /// Writes the configuration to a file in the specified format
    pub fn write_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        format: Box<dyn Format<'_> + '_>,
    ) -> Result<(), ProxyError> {
        let config_str = format.to_format_string(self)?;
        std::fs::write(path, config_str).map_err(ProxyError::IOError)?;
        Ok(())
    }
}
