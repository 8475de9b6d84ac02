pub mod acme;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod listener;
pub mod server;
pub mod tls;

pub use error::{CacheError, CertError, ProxyError};
