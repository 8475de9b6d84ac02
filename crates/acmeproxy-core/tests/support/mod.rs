#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acmeproxy::acme::{
    AcmeClient, Authorization, AuthorizationStatus, Challenge, ChallengeType, OrderedChain,
    client::challenge_response_cert,
};
use acmeproxy::domain::DomainName;
use acmeproxy::error::CertError;
use acmeproxy::tls::TokenStore;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams, IsCa,
    KeyPair,
};
use rustls::pki_types::{CertificateDer, CertificateSigningRequestDer};

const AUTHZ_PREFIX: &str = "https://ca.test/authz/";

/// In-process CA that signs every CSR it receives
pub struct FakeAcme {
    ca_cert: Certificate,
    ca_key: KeyPair,
    orders: AtomicUsize,
    order_delay: Duration,
    failing: Mutex<HashSet<String>>,
    /// Challenge types whose accept call errors out
    rejected_challenges: Mutex<HashSet<ChallengeType>>,
    /// Status `authorize` reports per domain instead of pending
    preset: Mutex<HashMap<String, AuthorizationStatus>>,
    fail_orders: AtomicBool,
    /// Days from today the next leaf expires in, `None` for the rcgen default
    expires_in_days: Mutex<Option<i64>>,
    tokens: Option<Arc<TokenStore>>,
    accepted: Mutex<Vec<(String, ChallengeType, bool)>>,
    revoked: Mutex<Vec<String>>,
}

impl FakeAcme {
    pub fn new() -> Self {
        let ca_key = KeyPair::generate().expect("CA key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = params.self_signed(&ca_key).expect("CA certificate");

        FakeAcme {
            ca_cert,
            ca_key,
            orders: AtomicUsize::new(0),
            order_delay: Duration::ZERO,
            failing: Mutex::new(HashSet::new()),
            rejected_challenges: Mutex::new(HashSet::new()),
            preset: Mutex::new(HashMap::new()),
            fail_orders: AtomicBool::new(false),
            expires_in_days: Mutex::new(None),
            tokens: None,
            accepted: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
        }
    }

    pub fn with_order_delay(mut self, delay: Duration) -> Self {
        self.order_delay = delay;
        self
    }

    /// Only validate challenges whose response is published in `tokens`
    pub fn with_tokens(mut self, tokens: Arc<TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Make accepting `kind` challenges fail. The CA still records the attempt, as if the
    /// request reached it before the connection broke.
    pub fn reject_challenge(&self, kind: ChallengeType) {
        self.rejected_challenges.lock().unwrap().insert(kind);
    }

    /// Report `status` for `domain` straight from `authorize`
    pub fn preset_status(&self, domain: &str, status: AuthorizationStatus) {
        self.preset.lock().unwrap().insert(domain.to_string(), status);
    }

    /// Every validation of `domain` ends as invalid
    pub fn fail_domain(&self, domain: &str) {
        self.failing.lock().unwrap().insert(domain.to_string());
    }

    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn expire_in_days(&self, days: Option<i64>) {
        *self.expires_in_days.lock().unwrap() = days;
    }

    /// The CA certificate, for clients that need to trust issued leaves
    pub fn ca_der(&self) -> CertificateDer<'static> {
        self.ca_cert.der().clone()
    }

    pub fn orders(&self) -> usize {
        self.orders.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<(String, ChallengeType, bool)> {
        self.accepted.lock().unwrap().clone()
    }

    /// Challenge types accepted for `domain`, in order
    pub fn accepted_for(&self, domain: &str) -> Vec<ChallengeType> {
        let uri = format!("{AUTHZ_PREFIX}{domain}");
        self.accepted()
            .into_iter()
            .filter(|(authz, _, _)| *authz == uri)
            .map(|(_, kind, _)| kind)
            .collect()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    /// Sign `csr_der` the way an order would, without counting it
    pub fn sign(&self, csr_der: &[u8]) -> Vec<CertificateDer<'static>> {
        let csr = CertificateSigningRequestDer::from(csr_der.to_vec());
        let mut request = CertificateSigningRequestParams::from_der(&csr).expect("valid CSR");

        if let Some(days) = *self.expires_in_days.lock().unwrap() {
            let (from_y, from_m, from_d) = ymd(-2);
            let (to_y, to_m, to_d) = ymd(days);
            request.params.not_before = rcgen::date_time_ymd(from_y, from_m, from_d);
            request.params.not_after = rcgen::date_time_ymd(to_y, to_m, to_d);
        }

        let leaf = request
            .signed_by(&self.ca_cert, &self.ca_key)
            .expect("signed leaf");
        vec![leaf.der().clone(), self.ca_cert.der().clone()]
    }

    /// Sign a leaf that expired long ago
    pub fn sign_expired(&self, csr_der: &[u8]) -> Vec<CertificateDer<'static>> {
        let csr = CertificateSigningRequestDer::from(csr_der.to_vec());
        let mut request = CertificateSigningRequestParams::from_der(&csr).expect("valid CSR");
        request.params.not_before = rcgen::date_time_ymd(2019, 1, 1);
        request.params.not_after = rcgen::date_time_ymd(2020, 1, 1);

        let leaf = request
            .signed_by(&self.ca_cert, &self.ca_key)
            .expect("signed leaf");
        vec![leaf.der().clone(), self.ca_cert.der().clone()]
    }

    fn domain_of(uri: &str) -> String {
        uri.strip_prefix(AUTHZ_PREFIX).unwrap_or(uri).to_string()
    }

    fn is_published(&self, domain: &DomainName, challenge: &Challenge) -> bool {
        let Some(tokens) = &self.tokens else {
            return true;
        };

        match challenge.kind {
            ChallengeType::TlsAlpn01 => tokens.tls_alpn_cert(domain).is_some(),
            ChallengeType::Http01 => tokens.http01_response(domain, &challenge.token).is_some(),
            _ => false,
        }
    }
}

fn ymd(days_from_today: i64) -> (i32, u8, u8) {
    let date = (Utc::now() + chrono::Duration::days(days_from_today)).date_naive();
    (date.year(), date.month() as u8, date.day() as u8)
}

fn challenge(domain: &DomainName, kind: ChallengeType) -> Challenge {
    Challenge {
        uri: format!("https://ca.test/chall/{domain}/{kind}"),
        token: format!("token-{}-{kind}", domain.as_str().replace('.', "-")),
        authorization_uri: format!("{AUTHZ_PREFIX}{domain}"),
        kind,
    }
}

#[async_trait]
impl AcmeClient for FakeAcme {
    async fn authorize(&self, domain: &DomainName) -> Result<Authorization, CertError> {
        let status = self
            .preset
            .lock()
            .unwrap()
            .get(domain.as_str())
            .cloned()
            .unwrap_or(AuthorizationStatus::Pending);

        Ok(Authorization {
            uri: format!("{AUTHZ_PREFIX}{domain}"),
            domain: domain.clone(),
            status,
            challenges: vec![
                challenge(domain, ChallengeType::Dns01),
                challenge(domain, ChallengeType::Http01),
                challenge(domain, ChallengeType::TlsAlpn01),
            ],
        })
    }

    async fn accept(&self, challenge: &Challenge) -> Result<Challenge, CertError> {
        let domain = DomainName::new(&Self::domain_of(&challenge.authorization_uri));
        let published = self.is_published(&domain, challenge);
        self.accepted.lock().unwrap().push((
            challenge.authorization_uri.clone(),
            challenge.kind.clone(),
            published,
        ));

        if self.rejected_challenges.lock().unwrap().contains(&challenge.kind) {
            return Err(CertError::Acme(format!("{} challenge rejected", challenge.kind)));
        }
        Ok(challenge.clone())
    }

    async fn wait_authorization(&self, uri: &str) -> Result<Authorization, CertError> {
        let domain = Self::domain_of(uri);
        let failing = self.failing.lock().unwrap().contains(&domain);
        let published = self
            .accepted
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(authz, _, _)| authz == uri)
            .is_some_and(|(_, _, published)| *published);

        let status = if !failing && published {
            AuthorizationStatus::Valid
        } else {
            AuthorizationStatus::Invalid
        };

        Ok(Authorization {
            uri: uri.to_string(),
            domain: DomainName::new(&domain),
            status,
            challenges: Vec::new(),
        })
    }

    async fn create_order_cert(
        &self,
        csr_der: &[u8],
        _domains: &[DomainName],
        _bundle: bool,
    ) -> Result<OrderedChain, CertError> {
        if !self.order_delay.is_zero() {
            tokio::time::sleep(self.order_delay).await;
        }

        let order = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(CertError::Acme("order rejected".to_string()));
        }

        Ok(OrderedChain {
            chain: self.sign(csr_der),
            url: format!("https://ca.test/cert/{order}"),
        })
    }

    async fn revoke_authorization(&self, uri: &str) -> Result<(), CertError> {
        self.revoked.lock().unwrap().push(uri.to_string());
        Ok(())
    }

    async fn tls_alpn_challenge_cert(
        &self,
        _challenge: &Challenge,
        domain: &DomainName,
    ) -> Result<Arc<rustls::sign::CertifiedKey>, CertError> {
        challenge_response_cert(domain, &[7u8; 32])
    }

    async fn http01_challenge_response(&self, challenge: &Challenge) -> Result<String, CertError> {
        Ok(format!("{}.thumbprint", challenge.token))
    }
}
