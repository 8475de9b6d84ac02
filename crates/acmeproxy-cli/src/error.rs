use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum CliError {
    #[error("Failed to read the configuration file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A configuration file already exists at `{0}`")]
    AlreadyExists(PathBuf),

    #[error("{0}")]
    Proxy(#[from] acmeproxy::error::ProxyError),

    #[error("{0}")]
    Certificate(#[from] acmeproxy::error::CertError),
}
