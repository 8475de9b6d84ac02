pub mod service;

use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ProxyError;
use crate::listener::{ConnectionRegistrar, ConnectionRegistry, ProxyStream};
use crate::tls::CertificateManager;

pub use service::{ProxyBody, ProxyService, Upstream};

const SHUTDOWN_WAIT_PERIOD: u64 = 15; // seconds

pub struct Server {
    /// The configuration for the server
    config: Config,

    /// Resolves and issues certificates for the TLS listeners
    manager: CertificateManager,

    /// Every live connection, keyed by its address pair
    registry: Arc<ConnectionRegistry>,

    /// Cancelled to stop the accept loops, the renewal task and the server loop
    shutdown: CancellationToken,

    /// Whether to shut down on Ctrl+C (default: true)
    graceful_shutdown: bool,
}

impl Server {
    pub fn new(config: Config, manager: CertificateManager) -> Self {
        debug!("Creating a new proxy server instance");

        Server {
            config,
            manager,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: CancellationToken::new(),
            graceful_shutdown: true,
        }
    }

    pub fn set_graceful_shutdown(&mut self, graceful: bool) {
        debug!("Setting graceful shutdown to {graceful}");
        self.graceful_shutdown = graceful;
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Watch for a shutdown signal (like Ctrl+C) and cancel the shutdown token
    fn watch_for_shutdown(&self) {
        if !self.graceful_shutdown {
            debug!("Graceful shutdown is disabled, skipping signal watcher");
            return;
        }

        debug!("Setting up Ctrl+C signal handler for graceful shutdown");

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        error!("Failed to listen for Ctrl+C: {err}");
                        return;
                    }
                    debug!("Received shutdown signal, shutting down the server...");
                    shutdown.cancel();
                }
            }
        });
    }

    /// Bind every listener, start certificate renewal and serve until shutdown
    pub async fn run(&self) -> Result<(), ProxyError> {
        debug!("Starting proxy server...");

        let upstream = Upstream::from_url(&self.config.upstream_url()?)?;
        let service = ProxyService::new(self.manager.clone(), upstream);

        let tls_listeners = ConnectionRegistrar::bind_all(&self.config.tls_listen).await?;
        let http_listeners = ConnectionRegistrar::bind_all(&self.config.http_listen).await?;

        self.watch_for_shutdown();

        let (registrar, mut listener) =
            ConnectionRegistrar::new(self.registry.clone(), self.shutdown.clone());
        for tcp in tls_listeners {
            registrar.serve_tls(tcp, self.manager.clone());
        }
        for tcp in http_listeners {
            registrar.serve_plain(tcp);
        }
        drop(registrar);

        self.manager
            .start_auto_renew(self.config.acme.renew_check_interval(), self.shutdown.clone());

        info!(
            "Proxying {:?} (tls) and {:?} (http) to {}",
            self.config.tls_listen, self.config.http_listen, self.config.upstream
        );

        // Graceful shutdown handling for the Hyper server
        let graceful = GracefulShutdown::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Shutdown signal received, exiting server loop");
                    break;
                }

                stream = listener.accept() => match stream {
                    Some(stream) => self.handle_connection(stream, &service, &graceful),
                    None => {
                        error!("{}", ProxyError::ListenerClosed);
                        self.shutdown.cancel();
                        break;
                    }
                },
            }
        }

        // Connections still queued in the logical listener never reached the HTTP server
        drop(listener);

        tokio::select! {
            _ = graceful.shutdown() => {
                debug!("Closed all connections gracefully");
                Ok(())
            }
            _ = tokio::time::sleep(Duration::from_secs(SHUTDOWN_WAIT_PERIOD)) => {
                error!("Timed out wait for all connections to close");
                Err(ProxyError::TimeoutWaitingForConnections)
            }
        }
    }

    fn handle_connection(
        &self,
        stream: ProxyStream,
        service: &ProxyService,
        graceful: &GracefulShutdown,
    ) {
        let ctx = stream.context().clone();
        debug!(
            "[conn {}] serving {} connection from {}",
            ctx.id(),
            if stream.is_tls() { "tls" } else { "plain" },
            ctx.remote_addr()
        );

        let service = service.for_connection(ctx.remote_addr(), stream.is_tls());
        let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        let connection = graceful.watch(connection);

        tokio::spawn(async move {
            tokio::select! {
                result = connection => {
                    if let Err(err) = result {
                        debug!("[conn {}] failed to serve connection: {err:?}", ctx.id());
                    }
                }
                _ = ctx.cancellation().cancelled() => {
                    debug!("[conn {}] closed by the registry", ctx.id());
                }
            }
        });
    }
}
