// TLS termination and the ACME certificate lifecycle

pub mod acceptor;
pub mod cert_state;
pub mod certificate;
pub mod checker;
pub mod manager;
pub mod tokens;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use cert_state::CertState;
pub use certificate::IssuedCert;
pub use checker::{AllowAll, AllowList, DomainChecker};
pub use manager::{CertificateManager, ClientHelloInfo, ManagerOptions};
pub use tokens::TokenStore;

/// Install the aws-lc-rs crypto provider as the process default, if none is installed yet
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Human readable summary stored next to a cached certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertMetadata {
    pub domains: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl From<&IssuedCert> for CertMetadata {
    fn from(cert: &IssuedCert) -> Self {
        CertMetadata {
            domains: cert.domains.iter().map(ToString::to_string).collect(),
            not_before: cert.not_before,
            not_after: cert.not_after,
            stored_at: Utc::now(),
        }
    }
}
