// Validated certificates, private keys and CSRs

use std::{io::Cursor, sync::Arc};

use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::{
    crypto::aws_lc_rs::sign::any_supported_type,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    sign::CertifiedKey,
};
use x509_parser::{extensions::GeneralName, prelude::X509Certificate};

use crate::{
    domain::{DomainName, KeyType},
    error::CertError,
};

/// A certificate chain and its private key that passed validation.
///
/// Only constructed through [`validate_chain`] and [`validate_pem`], so holding one means
/// the key matched the leaf and the leaf covered the required names at validation time.
#[derive(Debug)]
pub struct IssuedCert {
    pub certified_key: Arc<CertifiedKey>,
    pub chain: Vec<CertificateDer<'static>>,
    pub key_pem: String,
    /// DNS names the leaf is valid for, normalized
    pub domains: Vec<DomainName>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl IssuedCert {
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    pub fn verify_hostname(&self, domain: &DomainName) -> bool {
        self.domains
            .iter()
            .any(|name| hostname_matches(name.as_str(), domain.as_str()))
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.not_after
    }

    /// Usable for `domain` right now
    pub fn serves(&self, domain: &DomainName, now: DateTime<Utc>) -> bool {
        self.is_valid_at(now) && self.verify_hostname(domain)
    }

    pub fn needs_renewal(&self, now: DateTime<Utc>, renew_before: chrono::Duration) -> bool {
        self.not_after - renew_before <= now
    }

    pub fn chain_pem(&self) -> String {
        let blocks: Vec<pem::Pem> = self
            .chain
            .iter()
            .map(|der| pem::Pem::new("CERTIFICATE", der.as_ref().to_vec()))
            .collect();
        pem::encode_many(&blocks)
    }
}

/// Matches `host` against a certificate name, allowing a single leading `*` label
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    if pattern == host {
        return true;
    }

    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => false,
    }
}

fn invalid(message: impl Into<String>) -> CertError {
    CertError::InvalidCertificate(message.into())
}

fn timestamp(ts: i64) -> Result<DateTime<Utc>, CertError> {
    DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| invalid("validity out of range"))
}

fn leaf_names(leaf: &X509Certificate<'_>) -> Result<Vec<DomainName>, CertError> {
    let mut names = Vec::new();

    let san = leaf
        .subject_alternative_name()
        .map_err(|e| invalid(format!("bad subjectAltName: {e}")))?;
    if let Some(san) = san {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                names.push(DomainName::new(dns));
            }
        }
    }

    if names.is_empty() {
        for cn in leaf.subject().iter_common_name() {
            if let Ok(cn) = cn.as_str() {
                names.push(DomainName::new(cn));
            }
        }
    }

    Ok(names)
}

/// Validate a DER chain against its PEM encoded private key.
///
/// The key must match the leaf, `now` must fall within `[NotBefore, NotAfter)` and the leaf must
/// verify for every name in `required`.
pub fn validate_chain(
    chain: Vec<CertificateDer<'static>>,
    key_pem: &str,
    required: &[DomainName],
    now: DateTime<Utc>,
) -> Result<IssuedCert, CertError> {
    let leaf_der = chain.first().ok_or_else(|| invalid("empty chain"))?;
    let (_, leaf) = x509_parser::parse_x509_certificate(leaf_der.as_ref())
        .map_err(|e| invalid(format!("failed to parse leaf: {e}")))?;

    let key_pair = KeyPair::from_pem(key_pem).map_err(|e| invalid(format!("bad key: {e}")))?;
    if key_pair.public_key_raw() != leaf.public_key().subject_public_key.data.as_ref() {
        return Err(invalid("private key does not match the leaf certificate"));
    }

    let not_before = timestamp(leaf.validity().not_before.timestamp())?;
    let not_after = timestamp(leaf.validity().not_after.timestamp())?;
    if now < not_before || now >= not_after {
        return Err(invalid(format!(
            "not valid at {now} (valid from {not_before} until {not_after})"
        )));
    }

    let domains = leaf_names(&leaf)?;
    for domain in required {
        if !domains.iter().any(|name| hostname_matches(name.as_str(), domain.as_str())) {
            return Err(invalid(format!("leaf does not cover {domain}")));
        }
    }

    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let signing_key =
        any_supported_type(&key_der).map_err(|e| invalid(format!("unsupported key: {e}")))?;

    Ok(IssuedCert {
        certified_key: Arc::new(CertifiedKey::new(chain.clone(), signing_key)),
        chain,
        key_pem: key_pem.to_string(),
        domains,
        not_before,
        not_after,
    })
}

/// Validate a PEM chain and key, as stored in the cache
pub fn validate_pem(
    chain_pem: &[u8],
    key_pem: &[u8],
    required: &[DomainName],
    now: DateTime<Utc>,
) -> Result<IssuedCert, CertError> {
    let chain = parse_chain_pem(chain_pem)?;
    let key_pem = std::str::from_utf8(key_pem).map_err(|_| invalid("key is not valid UTF-8"))?;
    validate_chain(chain, key_pem, required, now)
}

pub fn parse_chain_pem(chain_pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let mut reader = Cursor::new(chain_pem);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(format!("failed to parse certificate chain: {e}")))
}

pub fn generate_key(key_type: KeyType) -> Result<KeyPair, CertError> {
    let alg = match key_type {
        KeyType::Ecdsa => &rcgen::PKCS_ECDSA_P256_SHA256,
        KeyType::Rsa => &rcgen::PKCS_RSA_SHA256,
    };
    KeyPair::generate_for(alg).map_err(|e| CertError::KeyGeneration(e.to_string()))
}

/// Load a cached key, rejecting one whose algorithm differs from `key_type`
pub fn load_key(key_pem: &[u8], key_type: KeyType) -> Option<KeyPair> {
    let key_pem = std::str::from_utf8(key_pem).ok()?;
    let key_pair = KeyPair::from_pem(key_pem).ok()?;

    let expected = match key_type {
        KeyType::Ecdsa => &rcgen::PKCS_ECDSA_P256_SHA256,
        KeyType::Rsa => &rcgen::PKCS_RSA_SHA256,
    };
    if key_pair.algorithm() != expected {
        return None;
    }

    Some(key_pair)
}

/// Build a DER encoded CSR naming `main_domain` as CN and `domains` as SANs
pub fn build_csr(
    key_pair: &KeyPair,
    main_domain: &DomainName,
    domains: &[DomainName],
) -> Result<Vec<u8>, CertError> {
    let names = domains.iter().map(|d| d.to_string()).collect::<Vec<_>>();
    let mut params =
        CertificateParams::new(names).map_err(|e| CertError::Acme(format!("bad CSR names: {e}")))?;

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, main_domain.as_str());
    params.distinguished_name = distinguished_name;

    let csr = params
        .serialize_request(key_pair)
        .map_err(|e| CertError::Acme(format!("failed to build CSR: {e}")))?;

    Ok(csr.der().as_ref().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_matches() {
        assert!(hostname_matches("example.com", "example.com"));
        assert!(hostname_matches("*.example.com", "www.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
        assert!(!hostname_matches("*.example.com", "a.b.example.com"));
        assert!(!hostname_matches("example.com", "www.example.com"));
    }
}
