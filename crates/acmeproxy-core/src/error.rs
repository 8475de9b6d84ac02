use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Error in `{field}`: {message}")]
    ConfigError { field: String, message: String },

    #[error("Failed to parse `{field}`: {message}")]
    ParseError { field: String, message: String },

    #[error("Invalid socket address `{address}`: {message}")]
    InvalidRawSocketAddress { address: String, message: String },

    #[error("Failed to bind to `{address}`: {source}")]
    FailedToBind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    FailedToAcceptConnection(std::io::Error),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Timed out waiting for connections to close")]
    TimeoutWaitingForConnections,

    #[error("The logical listener has been closed")]
    ListenerClosed,

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertError),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("{0}")]
    GenericError(String),
}

/// Errors produced by the certificate lifecycle.
///
/// Cloneable because one finished issuance hands the same result to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertError {
    #[error("no certificate has been issued for this identity yet")]
    NotIssuedYet,

    #[error("waiting for the certificate was cancelled")]
    Cancelled,

    #[error("certificate issuance timed out")]
    Timeout,

    #[error("client hello carries no server name")]
    NoServerName,

    #[error("domain `{0}` was not authorized")]
    DomainNotAuthorized(String),

    #[error("domain `{0}` is not allowed to receive a certificate")]
    DomainNotAllowed(String),

    #[error("no compatible challenge offered for `{0}`")]
    NoCompatibleChallenge(String),

    #[error("authorization for `{0}` is invalid")]
    AuthorizationInvalid(String),

    #[error("issuance is locked for `{0}`")]
    IssuanceLocked(String),

    #[error("no pending tls-alpn-01 challenge for `{0}`")]
    NoChallengeCertificate(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("failed to generate key: {0}")]
    KeyGeneration(String),

    #[error("acme: {0}")]
    Acme(String),

    #[error("cache: {0}")]
    Cache(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache key `{key}`: {message}")]
    InvalidKey { key: String, message: String },

    #[error("Cache IO error for `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<CacheError> for CertError {
    fn from(err: CacheError) -> Self {
        CertError::Cache(err.to_string())
    }
}

/// Report a broken caller contract: fatal in debug builds, logged in release builds
pub(crate) fn developer_fatal(message: &str) {
    if cfg!(debug_assertions) {
        panic!("{message}");
    }
    log::error!("{message}");
}
