mod support;

use acmeproxy::cache::{Cache, DirCache};
use acmeproxy::domain::{DomainName, KeyType};
use acmeproxy::error::CertError;
use acmeproxy::tls::certificate::{
    build_csr, generate_key, load_key, parse_chain_pem, validate_chain, validate_pem,
};
use chrono::Utc;
use support::FakeAcme;
use tempfile::TempDir;

fn names(raw: &[&str]) -> Vec<DomainName> {
    raw.iter().map(|name| DomainName::new(name)).collect()
}

#[test]
fn test_validate_chain_accepts_issued_certificate() {
    let ca = FakeAcme::new();
    let key = generate_key(KeyType::Ecdsa).unwrap();
    let domains = names(&["example.com", "www.example.com"]);
    let csr = build_csr(&key, &domains[0], &domains).unwrap();

    let cert = validate_chain(ca.sign(&csr), &key.serialize_pem(), &domains, Utc::now()).unwrap();
    assert_eq!(cert.domains, domains);
    assert_eq!(cert.chain.len(), 2);
    assert!(cert.verify_hostname(&DomainName::new("WWW.example.com")));
    assert!(!cert.verify_hostname(&DomainName::new("api.example.com")));
    assert!(cert.is_valid_at(Utc::now()));
}

#[test]
fn test_validate_chain_rejects_foreign_key() {
    let ca = FakeAcme::new();
    let key = generate_key(KeyType::Ecdsa).unwrap();
    let other = generate_key(KeyType::Ecdsa).unwrap();
    let domains = names(&["example.com"]);
    let csr = build_csr(&key, &domains[0], &domains).unwrap();

    let err = validate_chain(ca.sign(&csr), &other.serialize_pem(), &domains, Utc::now())
        .unwrap_err();
    assert!(matches!(err, CertError::InvalidCertificate(_)));
}

#[test]
fn test_validate_chain_rejects_uncovered_name() {
    let ca = FakeAcme::new();
    let key = generate_key(KeyType::Ecdsa).unwrap();
    let csr = build_csr(&key, &"example.com".into(), &names(&["example.com"])).unwrap();

    let err = validate_chain(
        ca.sign(&csr),
        &key.serialize_pem(),
        &names(&["example.com", "www.example.com"]),
        Utc::now(),
    )
    .unwrap_err();
    assert!(matches!(err, CertError::InvalidCertificate(_)));
}

#[test]
fn test_validate_chain_rejects_expired_leaf() {
    let ca = FakeAcme::new();
    let key = generate_key(KeyType::Ecdsa).unwrap();
    let domains = names(&["example.com"]);
    let csr = build_csr(&key, &domains[0], &domains).unwrap();

    let err = validate_chain(ca.sign_expired(&csr), &key.serialize_pem(), &domains, Utc::now())
        .unwrap_err();
    assert!(matches!(err, CertError::InvalidCertificate(_)));
}

#[test]
fn test_validate_chain_rejects_empty_chain() {
    let key = generate_key(KeyType::Ecdsa).unwrap();
    let err = validate_chain(Vec::new(), &key.serialize_pem(), &[], Utc::now()).unwrap_err();
    assert!(matches!(err, CertError::InvalidCertificate(_)));
}

#[test]
fn test_load_key_checks_algorithm() {
    let key = generate_key(KeyType::Ecdsa).unwrap();
    let pem = key.serialize_pem();
    assert!(load_key(pem.as_bytes(), KeyType::Ecdsa).is_some());
    assert!(load_key(pem.as_bytes(), KeyType::Rsa).is_none());
    assert!(load_key(b"not a key", KeyType::Ecdsa).is_none());
}

#[tokio::test]
async fn test_certificate_survives_the_cache() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path());
    let ca = FakeAcme::new();

    let key = generate_key(KeyType::Ecdsa).unwrap();
    let domains = names(&["example.com"]);
    let csr = build_csr(&key, &domains[0], &domains).unwrap();
    let cert = validate_chain(ca.sign(&csr), &key.serialize_pem(), &domains, Utc::now()).unwrap();

    cache.put("example.com.ecdsa.cer", cert.chain_pem().as_bytes()).await.unwrap();
    cache.put("example.com.ecdsa.key", cert.key_pem.as_bytes()).await.unwrap();

    let chain_pem = cache.get("example.com.ecdsa.cer").await.unwrap().unwrap();
    let key_pem = cache.get("example.com.ecdsa.key").await.unwrap().unwrap();
    assert_eq!(parse_chain_pem(&chain_pem).unwrap(), cert.chain);

    let loaded = validate_pem(&chain_pem, &key_pem, &domains, Utc::now()).unwrap();
    assert_eq!(loaded.leaf(), cert.leaf());
    assert_eq!(loaded.not_after, cert.not_after);
}
