// Short-lived challenge material served while an authorization is in flight

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use log::trace;
use rustls::sign::CertifiedKey;

use crate::domain::DomainName;

/// Holds tls-alpn-01 validation certificates and http-01 responses.
///
/// Entries are registered right before a challenge is accepted and removed by the returned
/// [`ChallengeGuard`] once the authorization attempt for that domain is over.
#[derive(Debug, Default)]
pub struct TokenStore {
    tls_alpn: DashMap<DomainName, Arc<CertifiedKey>>,
    http01: DashMap<(DomainName, String), Bytes>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_tls_alpn(&self, domain: DomainName, cert: Arc<CertifiedKey>) -> ChallengeGuard<'_> {
        trace!("Registering tls-alpn-01 certificate for {domain}");
        self.tls_alpn.insert(domain.clone(), cert.clone());
        ChallengeGuard {
            store: self,
            entry: Some(GuardedEntry::TlsAlpn { domain, cert }),
        }
    }

    pub fn tls_alpn_cert(&self, domain: &DomainName) -> Option<Arc<CertifiedKey>> {
        self.tls_alpn.get(domain).map(|cert| cert.clone())
    }

    pub fn put_http01(
        &self,
        domain: DomainName,
        token: String,
        response: Bytes,
    ) -> ChallengeGuard<'_> {
        trace!("Registering http-01 response for {domain} token {token}");
        self.http01.insert((domain.clone(), token.clone()), response);
        ChallengeGuard {
            store: self,
            entry: Some(GuardedEntry::Http01 { domain, token }),
        }
    }

    pub fn http01_response(&self, domain: &DomainName, token: &str) -> Option<Bytes> {
        self.http01
            .get(&(domain.clone(), token.to_string()))
            .map(|response| response.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.tls_alpn.is_empty() && self.http01.is_empty()
    }
}

enum GuardedEntry {
    TlsAlpn {
        domain: DomainName,
        cert: Arc<CertifiedKey>,
    },
    Http01 {
        domain: DomainName,
        token: String,
    },
}

/// Removes its challenge entry from the [`TokenStore`] when dropped
#[must_use = "the challenge entry is removed as soon as the guard is dropped"]
pub struct ChallengeGuard<'a> {
    store: &'a TokenStore,
    entry: Option<GuardedEntry>,
}

impl Drop for ChallengeGuard<'_> {
    fn drop(&mut self) {
        match self.entry.take() {
            Some(GuardedEntry::TlsAlpn { domain, cert }) => {
                // A newer attempt for the same domain may have replaced the entry
                self.store
                    .tls_alpn
                    .remove_if(&domain, |_, current| Arc::ptr_eq(current, &cert));
                trace!("Removed tls-alpn-01 certificate for {domain}");
            }
            Some(GuardedEntry::Http01 { domain, token }) => {
                self.store.http01.remove(&(domain.clone(), token));
                trace!("Removed http-01 response for {domain}");
            }
            None => {}
        }
    }
}
