use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{acme::LETS_ENCRYPT_PRODUCTION_URL, domain::KeyType, tls::ManagerOptions};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Certificate issuance settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AcmeConfig {
    /// The ACME directory to request certificates from (default: Let's Encrypt production)
    #[serde(default = "AcmeConfig::default_directory_url")]
    pub directory_url: String,

    /// Contact email registered with the ACME account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Where certificates, keys and lock files are stored (default: "./certificates")
    #[serde(default = "AcmeConfig::default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Private key algorithm for new certificates (default: "ecdsa")
    #[serde(default)]
    pub key_type: KeyType,

    /// Prefixes added to every certificate's main domain (default: ["www."])
    #[serde(default = "AcmeConfig::default_subdomains")]
    pub subdomains: Vec<String>,

    #[serde(default = "AcmeConfig::enabled")]
    pub enable_tls_alpn: bool,

    #[serde(default = "AcmeConfig::enabled")]
    pub enable_http01: bool,

    /// Seconds one issuance may take (default: 300)
    #[serde(default = "AcmeConfig::default_issue_timeout")]
    pub issue_timeout: u64,

    /// Days before expiry at which certificates are renewed (default: 30)
    #[serde(default = "AcmeConfig::default_renew_before_days")]
    pub renew_before_days: u64,

    /// Seconds between scans for certificates due for renewal (default: 3600)
    #[serde(default = "AcmeConfig::default_renew_check_interval")]
    pub renew_check_interval: u64,

    /// Domains allowed to receive certificates; empty allows every domain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        AcmeConfig {
            directory_url: AcmeConfig::default_directory_url(),
            email: None,
            cache_dir: AcmeConfig::default_cache_dir(),
            key_type: KeyType::default(),
            subdomains: AcmeConfig::default_subdomains(),
            enable_tls_alpn: true,
            enable_http01: true,
            issue_timeout: AcmeConfig::default_issue_timeout(),
            renew_before_days: AcmeConfig::default_renew_before_days(),
            renew_check_interval: AcmeConfig::default_renew_check_interval(),
            allowed_domains: Vec::new(),
        }
    }
}

impl AcmeConfig {
    pub fn default_directory_url() -> String {
        LETS_ENCRYPT_PRODUCTION_URL.to_string()
    }

    pub fn default_cache_dir() -> PathBuf {
        PathBuf::from("./certificates")
    }

    pub fn default_subdomains() -> Vec<String> {
        vec!["www.".to_string()]
    }

    fn enabled() -> bool {
        true
    }

    pub fn default_issue_timeout() -> u64 {
        300
    }

    pub fn default_renew_before_days() -> u64 {
        30
    }

    pub fn default_renew_check_interval() -> u64 {
        3600
    }

    pub fn renew_check_interval(&self) -> Duration {
        Duration::from_secs(self.renew_check_interval.max(1))
    }

    /// Settings for the certificate manager
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            key_type: self.key_type,
            subdomains: self.subdomains.clone(),
            enable_tls_alpn: self.enable_tls_alpn,
            enable_http01: self.enable_http01,
            issue_timeout: Duration::from_secs(self.issue_timeout),
            renew_before: Duration::from_secs(self.renew_before_days.saturating_mul(SECONDS_PER_DAY)),
            ..ManagerOptions::default()
        }
    }
}
