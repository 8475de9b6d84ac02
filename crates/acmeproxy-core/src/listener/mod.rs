// Physical accept loops feeding one logical listener

pub mod registry;
pub mod stream;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use log::{debug, error, trace, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ProxyError,
    tls::{
        CertificateManager,
        acceptor::{Handshake, accept_tls},
    },
};

pub use registry::{ConnContext, ConnKey, ConnectionRegistry, Registration};
pub use stream::ProxyStream;

/// Connections waiting for the HTTP server before accept loops apply backpressure
const LOGICAL_BACKLOG: usize = 1024;

/// Extra time a handshake may take on top of a certificate issuance
const HANDSHAKE_SLACK: Duration = Duration::from_secs(10);

/// Receiving end of the logical listener, consumed by the HTTP server
pub struct LogicalListener {
    receiver: mpsc::Receiver<ProxyStream>,
}

impl LogicalListener {
    /// Next handled connection from any physical listener; `None` once every loop has stopped
    pub async fn accept(&mut self) -> Option<ProxyStream> {
        self.receiver.recv().await
    }
}

/// Runs accept loops for plain and TLS listeners and publishes their connections to one
/// [`LogicalListener`].
#[derive(Clone)]
pub struct ConnectionRegistrar {
    registry: Arc<ConnectionRegistry>,
    sender: mpsc::Sender<ProxyStream>,
    shutdown: CancellationToken,
}

impl ConnectionRegistrar {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        shutdown: CancellationToken,
    ) -> (Self, LogicalListener) {
        let (sender, receiver) = mpsc::channel(LOGICAL_BACKLOG);
        (
            Self {
                registry,
                sender,
                shutdown,
            },
            LogicalListener { receiver },
        )
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Bind every address and return the listeners, failing on the first address that can't bind
    pub async fn bind_all(addresses: &[SocketAddr]) -> Result<Vec<TcpListener>, ProxyError> {
        let mut listeners = Vec::with_capacity(addresses.len());
        for address in addresses {
            let listener =
                TcpListener::bind(address)
                    .await
                    .map_err(|source| ProxyError::FailedToBind {
                        address: address.to_string(),
                        source,
                    })?;
            debug!("Listening on {address}");
            listeners.push(listener);
        }
        Ok(listeners)
    }

    /// Accept plain TCP connections and publish them as they are
    pub fn serve_plain(&self, listener: TcpListener) -> JoinHandle<()> {
        let registrar = self.clone();
        tokio::spawn(async move {
            registrar
                .accept_loop(listener, |registrar, stream, key| async move {
                    let registration = registrar.registry.register(key);
                    registrar
                        .publish(ProxyStream::plain(stream, registration))
                        .await;
                })
                .await
        })
    }

    /// Accept TCP connections and terminate TLS on each, resolving certificates via `manager`
    pub fn serve_tls(&self, listener: TcpListener, manager: CertificateManager) -> JoinHandle<()> {
        let registrar = self.clone();
        tokio::spawn(async move {
            registrar
                .accept_loop(listener, move |registrar, stream, key| {
                    let manager = manager.clone();
                    async move {
                        // The handshake may wait on an issuance; never block the accept loop on it
                        tokio::spawn(registrar.handshake(stream, key, manager));
                    }
                })
                .await
        })
    }

    async fn accept_loop<F, Fut>(&self, listener: TcpListener, handle: F)
    where
        F: Fn(ConnectionRegistrar, TcpStream, ConnKey) -> Fut,
        Fut: Future<Output = ()>,
    {
        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(err) => {
                error!("Failed to read listener address: {err}");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Stopping accept loop on {local}");
                    return;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let key = ConnKey::new(remote, stream.local_addr().unwrap_or(local));
                        trace!("Accepted connection from {remote} on {local}");
                        handle(self.clone(), stream, key).await;
                    }
                    Err(err) => {
                        warn!("{}", ProxyError::FailedToAcceptConnection(err));
                    }
                },
            }
        }
    }

    async fn handshake(self, stream: TcpStream, key: ConnKey, manager: CertificateManager) {
        let registration = self.registry.register(key);
        let id = registration.context().id();
        let cancel = registration.context().cancellation().clone();
        let limit = manager.options().issue_timeout + HANDSHAKE_SLACK;

        let handshake = accept_tls(stream, key, &self.registry, &manager);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("[conn {id}] cancelled during handshake");
                return;
            }
            outcome = tokio::time::timeout(limit, handshake) => outcome,
        };

        match outcome {
            Ok(Ok(Handshake::Established(tls))) => {
                trace!("[conn {id}] handshake complete");
                self.publish(ProxyStream::tls(tls, registration)).await;
            }
            Ok(Ok(Handshake::Challenge)) => {}
            Ok(Err(err)) => debug!("[conn {id}] TLS handshake failed: {err}"),
            Err(_) => debug!("[conn {id}] TLS handshake timed out"),
        }
    }

    async fn publish(&self, stream: ProxyStream) {
        let id = stream.context().id();
        if self.sender.send(stream).await.is_err() {
            debug!("[conn {id}] logical listener closed, dropping connection");
        }
    }
}
