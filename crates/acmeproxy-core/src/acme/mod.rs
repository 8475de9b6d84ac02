// The ACME operations the certificate manager depends on

pub mod client;

use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;
use rustls::{pki_types::CertificateDer, sign::CertifiedKey};

use crate::{domain::DomainName, error::CertError};

pub use client::InstantAcmeClient;

pub const LETS_ENCRYPT_PRODUCTION_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_STAGING_URL: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// ALPN protocol negotiated by tls-alpn-01 validation handshakes
pub const ACME_TLS_ALPN_NAME: &[u8] = b"acme-tls/1";

/// Path prefix of http-01 validation requests
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    /// Deactivated, expired or revoked
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    TlsAlpn01,
    Http01,
    Dns01,
    Other(String),
}

impl Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeType::TlsAlpn01 => write!(f, "tls-alpn-01"),
            ChallengeType::Http01 => write!(f, "http-01"),
            ChallengeType::Dns01 => write!(f, "dns-01"),
            ChallengeType::Other(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Challenge {
    pub kind: ChallengeType,
    pub uri: String,
    pub token: String,
    /// The authorization this challenge belongs to
    pub authorization_uri: String,
}

#[derive(Debug, Clone)]
pub struct Authorization {
    pub uri: String,
    pub domain: DomainName,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

/// A downloaded certificate chain, leaf first
#[derive(Debug, Clone)]
pub struct OrderedChain {
    pub chain: Vec<CertificateDer<'static>>,
    pub url: String,
}

/// RFC 8555 shaped client used by the certificate manager.
///
/// Implementations only need to be safe to call concurrently for different domains.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Start (or resume) the authorization of `domain`
    async fn authorize(&self, domain: &DomainName) -> Result<Authorization, CertError>;

    /// Tell the CA the challenge response is in place
    async fn accept(&self, challenge: &Challenge) -> Result<Challenge, CertError>;

    /// Wait until the authorization reaches a terminal status
    async fn wait_authorization(&self, uri: &str) -> Result<Authorization, CertError>;

    /// Submit an order for `domains` with the given CSR and download the chain
    async fn create_order_cert(
        &self,
        csr_der: &[u8],
        domains: &[DomainName],
        bundle: bool,
    ) -> Result<OrderedChain, CertError>;

    async fn revoke_authorization(&self, uri: &str) -> Result<(), CertError>;

    /// Self-signed certificate proving control of `domain` for a tls-alpn-01 challenge
    async fn tls_alpn_challenge_cert(
        &self,
        challenge: &Challenge,
        domain: &DomainName,
    ) -> Result<Arc<CertifiedKey>, CertError>;

    /// Body to serve for an http-01 challenge
    async fn http01_challenge_response(&self, challenge: &Challenge) -> Result<String, CertError>;
}
