use std::net::SocketAddr;
use std::time::Duration;

use acmeproxy::acme::LETS_ENCRYPT_PRODUCTION_URL;
use acmeproxy::config::{Config, Format, LogLevel, toml::Toml};
use acmeproxy::domain::KeyType;
use acmeproxy::error::ProxyError;
use tempfile::TempDir;

#[test]
pub fn parse_empty_root_config() {
    let config = Toml::new("").parse().expect("Failed to parse empty TOML config");

    assert_eq!(config.tls_listen, vec!["0.0.0.0:443".parse::<SocketAddr>().unwrap()]);
    assert_eq!(config.http_listen, vec!["0.0.0.0:80".parse::<SocketAddr>().unwrap()]);
    assert_eq!(config.upstream, "http://127.0.0.1:8080");
    assert!(config.log_level.is_none());
    assert_eq!(config.acme.directory_url, LETS_ENCRYPT_PRODUCTION_URL);
    assert_eq!(config.acme.key_type, KeyType::Ecdsa);
    assert_eq!(config.acme.subdomains, vec!["www."]);
    assert!(config.acme.enable_tls_alpn && config.acme.enable_http01);
}

#[test]
pub fn parse_full_root_config() {
    let input = r#"
    tls_listen = ["127.0.0.1:8443", "[::1]:8443"]
    http_listen = ["127.0.0.1:8080"]
    upstream = "http://localhost:3000"
    log_level = "debug"

    [acme]
    directory_url = "https://acme-staging-v02.api.letsencrypt.org/directory"
    email = "ops@example.com"
    cache_dir = "/var/lib/acmeproxy"
    key_type = "rsa"
    subdomains = []
    enable_http01 = false
    issue_timeout = 60
    renew_before_days = 10
    allowed_domains = ["example.com", "*.example.org"]
    "#;

    let config = Toml::new(input).parse().expect("Failed to parse TOML config");

    assert_eq!(config.tls_listen.len(), 2);
    assert_eq!(config.log_level, Some(LogLevel::Debug));
    assert_eq!(config.acme.email.as_deref(), Some("ops@example.com"));
    assert_eq!(config.acme.key_type, KeyType::Rsa);
    assert!(config.acme.subdomains.is_empty());
    assert_eq!(config.acme.allowed_domains.len(), 2);

    let options = config.acme.manager_options();
    assert_eq!(options.key_type, KeyType::Rsa);
    assert!(options.enable_tls_alpn);
    assert!(!options.enable_http01);
    assert_eq!(options.issue_timeout, Duration::from_secs(60));
    assert_eq!(options.renew_before, Duration::from_secs(10 * 24 * 60 * 60));
}

#[test]
pub fn reject_config_without_challenges() {
    let input = r#"
    [acme]
    enable_tls_alpn = false
    enable_http01 = false
    "#;

    let err = Toml::new(input).parse().unwrap_err();
    assert!(matches!(err, ProxyError::ConfigError { ref field, .. } if field == "acme"));
}

#[test]
pub fn reject_non_http_upstream() {
    let err = Toml::new(r#"upstream = "ftp://files.example.com""#)
        .parse()
        .unwrap_err();
    assert!(matches!(err, ProxyError::ConfigError { ref field, .. } if field == "upstream"));

    let err = Toml::new(r#"upstream = "not a url""#).parse().unwrap_err();
    assert!(matches!(err, ProxyError::ConfigError { .. }));
}

#[test]
pub fn reject_malformed_listen_address() {
    let err = Toml::new(r#"tls_listen = ["localhost"]"#).parse().unwrap_err();
    assert!(matches!(err, ProxyError::ParseError { .. }));
}

#[test]
pub fn write_and_read_back_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("acmeproxy.toml");

    let config = Config::default();
    config.write_to_file(&path, Box::new(Toml::default())).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    let parsed = Toml::new(&written).parse().unwrap();
    assert_eq!(parsed, config);
}
