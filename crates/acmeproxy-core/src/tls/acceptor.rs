// TLS handshake driven by the certificate manager

use std::sync::Arc;

use log::{debug, trace};
use rustls::{
    ServerConfig,
    server::{Acceptor, ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
};
use tokio::net::TcpStream;
use tokio_rustls::{LazyConfigAcceptor, server::TlsStream};

use crate::{
    acme::ACME_TLS_ALPN_NAME,
    error::{CertError, ProxyError},
    listener::registry::{ConnContext, ConnKey, ConnectionRegistry},
};

use super::manager::{CertificateManager, ClientHelloInfo};

/// Resolver that always presents one certificate.
///
/// The certificate is picked before the handshake continues, because rustls resolvers can't
/// wait on an issuance.
#[derive(Debug)]
pub struct FixedCertResolver(pub Arc<CertifiedKey>);

impl ResolvesServerCert for FixedCertResolver {
    fn resolve(&self, _: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

/// Build the per-connection server config for `cert`
pub fn build_server_config(cert: Arc<CertifiedKey>, challenge: bool) -> Arc<ServerConfig> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(FixedCertResolver(cert)));

    config.alpn_protocols = if challenge {
        vec![ACME_TLS_ALPN_NAME.to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    };

    Arc::new(config)
}

/// Outcome of a server side handshake
pub enum Handshake {
    /// A regular connection, ready for the HTTP server
    Established(TlsStream<TcpStream>),
    /// A tls-alpn-01 validation handshake, answered and finished
    Challenge,
}

/// Read the ClientHello, resolve a certificate through `manager` and complete the handshake.
///
/// The connection context is looked up in `registry` by `key`, so the certificate callback sees
/// the same context as every other piece of work tied to the connection.
pub async fn accept_tls(
    stream: TcpStream,
    key: ConnKey,
    registry: &ConnectionRegistry,
    manager: &CertificateManager,
) -> Result<Handshake, ProxyError> {
    let acceptor = LazyConfigAcceptor::new(Acceptor::default(), stream);
    tokio::pin!(acceptor);
    let start = acceptor.as_mut().await?;

    let hello = ClientHelloInfo::from_client_hello(&start.client_hello());
    let context: ConnContext = registry
        .get(&key)
        .ok_or(ProxyError::Certificate(CertError::Cancelled))?;
    trace!(
        "[conn {}] client hello for {:?} (alpn: {:?})",
        context.id(),
        hello.server_name,
        hello.alpn
    );

    let challenge = hello.is_tls_alpn_challenge();
    let cert = manager.get_certificate(&hello, &context).await?;
    let config = build_server_config(cert, challenge);

    let stream = start.into_stream(config).await?;
    if challenge {
        debug!(
            "[conn {}] answered tls-alpn-01 validation for {:?}",
            context.id(),
            hello.server_name
        );
        return Ok(Handshake::Challenge);
    }

    Ok(Handshake::Established(stream))
}
