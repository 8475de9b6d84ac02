mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use acmeproxy::cache::MemoryCache;
use acmeproxy::listener::{ConnKey, ConnectionRegistrar, ConnectionRegistry};
use acmeproxy::tls::CertificateManager;
use rustls::pki_types::ServerName;
use support::FakeAcme;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

fn key(remote: &str, local: &str) -> ConnKey {
    ConnKey::new(
        remote.parse::<SocketAddr>().unwrap(),
        local.parse::<SocketAddr>().unwrap(),
    )
}

#[test]
fn test_registration_drop_unregisters() {
    let registry = Arc::new(ConnectionRegistry::new());
    let key = key("10.0.0.1:50000", "10.0.0.2:443");

    let registration = registry.register(key);
    let context = registry.get(&key).expect("registered");
    assert_eq!(context.id(), registration.context().id());
    assert_eq!(registry.len(), 1);
    assert!(!context.is_closed());

    drop(registration);
    assert!(registry.is_empty());
    assert!(registry.get(&key).is_none());
    assert!(context.is_closed());
}

#[test]
fn test_reused_key_replaces_stale_connection() {
    let registry = Arc::new(ConnectionRegistry::new());
    let key = key("10.0.0.1:50000", "10.0.0.2:443");

    let stale = registry.register(key);
    let fresh = registry.register(key);
    assert!(stale.context().is_closed());
    assert_ne!(stale.context().id(), fresh.context().id());

    // Dropping the stale registration must not remove the fresh entry
    drop(stale);
    assert_eq!(registry.get(&key).map(|ctx| ctx.id()), Some(fresh.context().id()));
    assert!(!fresh.context().is_closed());
}

#[tokio::test]
async fn test_plain_connections_reach_the_logical_listener() {
    let registry = Arc::new(ConnectionRegistry::new());
    let shutdown = CancellationToken::new();
    let (registrar, mut listener) = ConnectionRegistrar::new(registry.clone(), shutdown.clone());

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = tcp.local_addr().unwrap();
    let accept_loop = registrar.serve_plain(tcp);

    let mut client = TcpStream::connect(address).await.unwrap();
    let mut stream = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .expect("published connection");

    assert!(!stream.is_tls());
    assert_eq!(stream.context().remote_addr(), client.local_addr().unwrap());
    assert_eq!(registry.len(), 1);

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    let ctx = stream.context().clone();
    drop(stream);
    assert!(registry.is_empty());
    assert!(ctx.is_closed());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), accept_loop)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_tls_handshake_issues_certificate() {
    let acme = Arc::new(FakeAcme::new());
    let manager = CertificateManager::builder(acme.clone(), Arc::new(MemoryCache::new())).build();

    let registry = Arc::new(ConnectionRegistry::new());
    let shutdown = CancellationToken::new();
    let (registrar, mut listener) = ConnectionRegistrar::new(registry.clone(), shutdown.clone());

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = tcp.local_addr().unwrap();
    registrar.serve_tls(tcp, manager.clone());

    let mut roots = rustls::RootCertStore::empty();
    roots.add(acme.ca_der()).unwrap();
    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let connector = TlsConnector::from(Arc::new(config));

    let client = tokio::spawn(async move {
        let tcp = TcpStream::connect(address).await.unwrap();
        let name = ServerName::try_from("www.tls.example.com").unwrap();
        let mut tls = connector.connect(name, tcp).await.expect("handshake");
        tls.write_all(b"hello").await.unwrap();
        tls.flush().await.unwrap();
        tls
    });

    let mut stream = tokio::time::timeout(Duration::from_secs(10), listener.accept())
        .await
        .unwrap()
        .expect("published connection");
    assert!(stream.is_tls());
    assert_eq!(stream.server_name(), Some("www.tls.example.com"));

    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    let tls = client.await.unwrap();
    assert_eq!(tls.get_ref().1.alpn_protocol(), Some(&b"http/1.1"[..]));
    assert_eq!(acme.orders(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_tls_handshake_without_sni_is_dropped() {
    let manager = CertificateManager::builder(Arc::new(FakeAcme::new()), Arc::new(MemoryCache::new()))
        .build();

    let registry = Arc::new(ConnectionRegistry::new());
    let shutdown = CancellationToken::new();
    let (registrar, mut listener) = ConnectionRegistrar::new(registry.clone(), shutdown.clone());

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = tcp.local_addr().unwrap();
    registrar.serve_tls(tcp, manager);

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect(address).await.unwrap();
    let ip = ServerName::IpAddress(address.ip().into());
    assert!(connector.connect(ip, tcp).await.is_err());

    assert!(
        tokio::time::timeout(Duration::from_millis(200), listener.accept())
            .await
            .is_err()
    );

    for _ in 0..50 {
        if registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(registry.is_empty());
    shutdown.cancel();
}
