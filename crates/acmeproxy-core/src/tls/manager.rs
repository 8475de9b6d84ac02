// Certificate lifecycle: cache lookup, authorization, ordering, validation and renewal

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use log::{debug, error, info, trace, warn};
use rcgen::KeyPair;
use rustls::{server::ClientHello, sign::CertifiedKey};
use tokio::{
    sync::Semaphore,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    acme::{
        ACME_CHALLENGE_PREFIX, ACME_TLS_ALPN_NAME, AcmeClient, Authorization, AuthorizationStatus,
        Challenge, ChallengeType,
    },
    cache::Cache,
    domain::{CertDescription, DomainName, KeyType},
    error::{CertError, developer_fatal},
    listener::registry::ConnContext,
};

use super::{
    cert_state::{CertResult, CertState},
    certificate::{IssuedCert, build_csr, generate_key, load_key, validate_chain, validate_pem},
    checker::{AllowAll, DomainChecker},
    tokens::{ChallengeGuard, TokenStore},
};

/// Extra time a waiter gives an issuance beyond the issuance timeout itself
const WAIT_SLACK: Duration = Duration::from_secs(5);

/// Bound on re-reading an authorization after every challenge failed
const RECHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Concurrent background revocation batches
const REVOKE_CONCURRENCY: usize = 8;

/// The parts of a TLS ClientHello the certificate manager looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    pub server_name: Option<String>,
    pub alpn: Vec<Vec<u8>>,
}

impl ClientHelloInfo {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: Some(server_name.into()),
            alpn: Vec::new(),
        }
    }

    pub fn with_alpn(mut self, protocols: &[&[u8]]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_vec()).collect();
        self
    }

    pub fn from_client_hello(hello: &ClientHello<'_>) -> Self {
        Self {
            server_name: hello.server_name().map(str::to_string),
            alpn: hello
                .alpn()
                .map(|protocols| protocols.map(<[u8]>::to_vec).collect())
                .unwrap_or_default(),
        }
    }

    /// A tls-alpn-01 validation offers `acme-tls/1` and nothing else
    pub fn is_tls_alpn_challenge(&self) -> bool {
        self.alpn.len() == 1 && self.alpn[0] == ACME_TLS_ALPN_NAME
    }
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub key_type: KeyType,
    /// Prefixes added to the main domain on every certificate, e.g. `www.`
    pub subdomains: Vec<String>,
    pub enable_tls_alpn: bool,
    pub enable_http01: bool,
    /// Upper bound for one issuance, and for how long its error is replayed to new callers
    pub issue_timeout: Duration,
    /// Certificates expiring within this window are renewed in the background
    pub renew_before: Duration,
    pub revoke_timeout: Duration,
    /// Keep the intermediates returned by the CA in the served chain
    pub bundle: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            key_type: KeyType::default(),
            subdomains: vec!["www.".to_string()],
            enable_tls_alpn: true,
            enable_http01: true,
            issue_timeout: Duration::from_secs(300),
            renew_before: Duration::from_secs(30 * 24 * 60 * 60),
            revoke_timeout: Duration::from_secs(60),
            bundle: true,
        }
    }
}

pub struct CertificateManagerBuilder {
    acme: Arc<dyn AcmeClient>,
    cache: Arc<dyn Cache>,
    checker: Arc<dyn DomainChecker>,
    tokens: Arc<TokenStore>,
    options: ManagerOptions,
}

impl CertificateManagerBuilder {
    pub fn options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.options.key_type = key_type;
        self
    }

    pub fn subdomains<S: Into<String>>(mut self, subdomains: impl IntoIterator<Item = S>) -> Self {
        self.options.subdomains = subdomains.into_iter().map(Into::into).collect();
        self
    }

    pub fn tls_alpn(mut self, enabled: bool) -> Self {
        self.options.enable_tls_alpn = enabled;
        self
    }

    pub fn http01(mut self, enabled: bool) -> Self {
        self.options.enable_http01 = enabled;
        self
    }

    pub fn issue_timeout(mut self, timeout: Duration) -> Self {
        self.options.issue_timeout = timeout;
        self
    }

    pub fn renew_before(mut self, window: Duration) -> Self {
        self.options.renew_before = window;
        self
    }

    pub fn checker(mut self, checker: Arc<dyn DomainChecker>) -> Self {
        self.checker = checker;
        self
    }

    /// Share a token store, e.g. with a separate HTTP front
    pub fn tokens(mut self, tokens: Arc<TokenStore>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn build(self) -> CertificateManager {
        super::install_crypto_provider();

        if !self.options.enable_tls_alpn && !self.options.enable_http01 {
            warn!("Both tls-alpn-01 and http-01 are disabled, no certificate can be issued");
        }

        CertificateManager {
            inner: Arc::new(Inner {
                acme: self.acme,
                cache: self.cache,
                checker: self.checker,
                tokens: self.tokens,
                options: self.options,
                states: DashMap::new(),
                failed: DashMap::new(),
                revoke_limit: Arc::new(Semaphore::new(REVOKE_CONCURRENCY)),
                auto_renew_started: AtomicBool::new(false),
            }),
        }
    }
}

struct Inner {
    acme: Arc<dyn AcmeClient>,
    cache: Arc<dyn Cache>,
    checker: Arc<dyn DomainChecker>,
    tokens: Arc<TokenStore>,
    options: ManagerOptions,
    /// One slot per certificate identity, never removed
    states: DashMap<CertDescription, Arc<CertState>>,
    /// Names that could not be put on a certificate, and when that was last found out
    failed: DashMap<DomainName, (Instant, CertError)>,
    revoke_limit: Arc<Semaphore>,
    auto_renew_started: AtomicBool,
}

/// Resolves certificates for TLS handshakes, issuing them through ACME on first use.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct CertificateManager {
    inner: Arc<Inner>,
}

/// Calls `finish_issue` exactly once, even if the issuing task is aborted or panics
struct IssueGuard {
    state: Option<Arc<CertState>>,
}

impl IssueGuard {
    fn finish(mut self, result: CertResult) {
        if let Some(state) = self.state.take() {
            state.finish_issue(result);
        }
    }
}

impl Drop for IssueGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.finish_issue(Err(CertError::Acme("issuance aborted".to_string())));
        }
    }
}

impl CertificateManager {
    pub fn builder(acme: Arc<dyn AcmeClient>, cache: Arc<dyn Cache>) -> CertificateManagerBuilder {
        CertificateManagerBuilder {
            acme,
            cache,
            checker: Arc::new(AllowAll),
            tokens: Arc::new(TokenStore::new()),
            options: ManagerOptions::default(),
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.inner.tokens
    }

    /// The certificate identity that serves `domain`
    pub fn description_for(&self, domain: &DomainName) -> CertDescription {
        CertDescription::from_domain(
            domain,
            self.inner.options.key_type,
            &self.inner.options.subdomains,
        )
    }

    /// The issuance slot of `desc`, created on first use
    pub fn state_for(&self, desc: &CertDescription) -> Arc<CertState> {
        if let Some(state) = self.inner.states.get(desc) {
            return state.clone();
        }
        self.inner
            .states
            .entry(desc.clone())
            .or_insert_with(|| Arc::new(CertState::new()))
            .clone()
    }

    /// TLS handshake entry point: resolve the certificate to present for `hello`
    pub async fn get_certificate(
        &self,
        hello: &ClientHelloInfo,
        ctx: &ConnContext,
    ) -> Result<Arc<CertifiedKey>, CertError> {
        let server_name = hello.server_name.as_deref().ok_or(CertError::NoServerName)?;
        let domain = DomainName::new(server_name);
        if domain.is_empty() {
            return Err(CertError::NoServerName);
        }

        if hello.is_tls_alpn_challenge() {
            trace!("[conn {}] tls-alpn-01 validation for {domain}", ctx.id());
            return self
                .inner
                .tokens
                .tls_alpn_cert(&domain)
                .ok_or_else(|| CertError::NoChallengeCertificate(domain.to_string()));
        }

        let cert = self.certificate_for(&domain, ctx).await?;
        Ok(cert.certified_key.clone())
    }

    /// Return a valid certificate for `domain`, joining or starting an issuance if needed
    pub async fn certificate_for(&self, domain: &DomainName, ctx: &ConnContext) -> CertResult {
        let desc = self.description_for(domain);
        let state = self.state_for(&desc);
        let now = Utc::now();

        if let Ok(cert) = state.cert() {
            if cert.serves(domain, now) {
                if cert.needs_renewal(now, self.renew_before()) && self.spawn_renewal(&desc, &state)
                {
                    info!("Certificate for {desc} expires at {}, renewing", cert.not_after);
                }
                return Ok(cert);
            }
        }

        if let Some(err) = self.recent_failure(domain) {
            debug!("[conn {}] {domain} failed recently: {err}", ctx.id());
            return Err(err);
        }

        if !state.is_issuing() {
            if let Some(err) = state.recent_error(self.inner.options.issue_timeout) {
                debug!("[conn {}] recent issuance for {desc} failed: {err}", ctx.id());
                return Err(err);
            }
        }

        if state.start_issue() {
            info!("[conn {}] starting certificate issuance for {desc}", ctx.id());
            self.spawn_issue(domain.clone(), desc.clone(), state.clone(), false);
        } else {
            debug!("[conn {}] joining in-flight issuance for {desc}", ctx.id());
        }

        let wait = self.inner.options.issue_timeout + WAIT_SLACK;
        match tokio::time::timeout(wait, state.wait_finish_issue(ctx.cancellation())).await {
            Ok(Ok(cert)) if cert.verify_hostname(domain) => Ok(cert),
            Ok(Ok(_)) => Err(CertError::DomainNotAuthorized(domain.to_string())),
            Ok(Err(err)) => {
                debug!("[conn {}] no certificate for {domain}: {err}", ctx.id());
                Err(err)
            }
            Err(_) => Err(CertError::Timeout),
        }
    }

    /// Response body for an http-01 validation request, `None` if nothing is pending
    pub fn http01_response(&self, host: &str, path: &str) -> Option<Bytes> {
        let token = path.strip_prefix(ACME_CHALLENGE_PREFIX)?;
        if token.is_empty() || token.contains('/') {
            return None;
        }

        let host = host
            .parse::<hyper::http::uri::Authority>()
            .map(|authority| authority.host().to_string())
            .unwrap_or_else(|_| host.to_string());

        self.inner
            .tokens
            .http01_response(&DomainName::new(&host), token)
    }

    /// Start renewing every known certificate that is inside its renewal window
    pub fn renew_due(&self) -> usize {
        let now = Utc::now();
        let due: Vec<(CertDescription, Arc<CertState>)> = self
            .inner
            .states
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .cert()
                    .is_ok_and(|cert| cert.needs_renewal(now, self.renew_before()))
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        due.iter()
            .filter(|(desc, state)| self.spawn_renewal(desc, state))
            .count()
    }

    /// Periodically renew certificates until `shutdown` is cancelled. May only be started once.
    pub fn start_auto_renew(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.inner.auto_renew_started.swap(true, Ordering::SeqCst) {
            developer_fatal("automatic certificate renewal was started twice");
            return None;
        }

        let manager = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Stopping automatic certificate renewal");
                        return;
                    }
                    _ = ticker.tick() => {
                        let started = manager.renew_due();
                        if started > 0 {
                            info!("Started renewal of {started} certificate(s)");
                        }
                    }
                }
            }
        }))
    }

    fn renew_before(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.inner.options.renew_before).unwrap_or(chrono::Duration::MAX)
    }

    /// A failure for `domain` found out within the last issuance timeout
    fn recent_failure(&self, domain: &DomainName) -> Option<CertError> {
        let window = self.inner.options.issue_timeout;
        let entry = self.inner.failed.get(domain)?;
        let (at, err) = entry.value();
        if at.elapsed() < window {
            return Some(err.clone());
        }
        drop(entry);

        self.inner
            .failed
            .remove_if(domain, |_, (at, _)| at.elapsed() >= window);
        None
    }

    fn record_failure(&self, domain: &DomainName, err: CertError) {
        self.inner
            .failed
            .insert(domain.clone(), (Instant::now(), err));
    }

    fn spawn_renewal(&self, desc: &CertDescription, state: &Arc<CertState>) -> bool {
        if !state.start_issue() {
            return false;
        }
        self.spawn_issue(desc.main_domain.clone(), desc.clone(), state.clone(), true);
        true
    }

    /// Run one issuance detached from the caller, so a disconnecting client can't abort it
    fn spawn_issue(
        &self,
        domain: DomainName,
        desc: CertDescription,
        state: Arc<CertState>,
        renewing: bool,
    ) {
        let manager = self.clone();
        let timeout = self.inner.options.issue_timeout;

        tokio::spawn(async move {
            let guard = IssueGuard {
                state: Some(state.clone()),
            };
            // A failed attempt never replaces a certificate that is still valid
            let previous = state.cert().ok();

            let result = match tokio::time::timeout(timeout, manager.issue(&domain, &desc, renewing))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("Issuance for {desc} timed out after {timeout:?}");
                    Err(CertError::Timeout)
                }
            };

            let result = match (result, previous) {
                (Err(err), Some(previous)) if previous.is_valid_at(Utc::now()) => {
                    warn!("Issuance for {desc} failed, keeping the current certificate: {err}");
                    if !previous.verify_hostname(&domain) {
                        manager.record_failure(&domain, err);
                    }
                    Ok(previous)
                }
                (Err(err), _) => {
                    error!("Failed to obtain a certificate for {desc}: {err}");
                    Err(err)
                }
                (ok, _) => ok,
            };

            guard.finish(result);
        });
    }

    async fn issue(
        &self,
        domain: &DomainName,
        desc: &CertDescription,
        renewing: bool,
    ) -> CertResult {
        if let Some(cached) = self.load_cached(desc, domain).await {
            if !(renewing && cached.needs_renewal(Utc::now(), self.renew_before())) {
                info!("Using cached certificate for {desc}, valid until {}", cached.not_after);
                return Ok(Arc::new(cached));
            }
        }

        if self.inner.cache.get(&desc.lock_name()).await?.is_some() {
            warn!("Issuance for {desc} is locked by `{}`", desc.lock_name());
            return Err(CertError::IssuanceLocked(desc.main_domain.to_string()));
        }

        let mut allowed = Vec::new();
        for name in desc.domain_names(&self.inner.options.subdomains) {
            if self.inner.checker.is_allowed(&name).await {
                allowed.push(name);
            } else {
                debug!("Skipping {name}, not allowed by the domain checker");
            }
        }
        if !allowed.contains(domain) {
            return Err(CertError::DomainNotAllowed(domain.to_string()));
        }

        let results = join_all(allowed.iter().map(|name| self.authorize_domain(name))).await;
        let mut authorized = Vec::new();
        for (name, result) in allowed.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    self.inner.failed.remove(&name);
                    authorized.push(name);
                }
                Err(err) => {
                    warn!("Authorization of {name} failed: {err}");
                    let failure = CertError::DomainNotAuthorized(name.to_string());
                    self.record_failure(&name, failure);
                }
            }
        }
        if !authorized.contains(domain) {
            return Err(CertError::DomainNotAuthorized(domain.to_string()));
        }

        let key_pair = self.load_or_generate_key(desc).await?;
        let common_name = if authorized.contains(&desc.main_domain) {
            &desc.main_domain
        } else {
            domain
        };
        let csr = build_csr(&key_pair, common_name, &authorized)?;

        let ordered = self
            .inner
            .acme
            .create_order_cert(&csr, &authorized, self.inner.options.bundle)
            .await?;
        let cert = validate_chain(ordered.chain, &key_pair.serialize_pem(), &authorized, Utc::now())?;
        info!(
            "Issued certificate for {desc} covering {authorized:?}, valid until {}",
            cert.not_after
        );

        self.persist(desc, &cert).await;
        Ok(Arc::new(cert))
    }

    async fn load_cached(&self, desc: &CertDescription, domain: &DomainName) -> Option<IssuedCert> {
        let read = |key: String| async move {
            match self.inner.cache.get(&key).await {
                Ok(value) => value,
                Err(err) => {
                    warn!("Failed to read `{key}` from the cache: {err}");
                    None
                }
            }
        };

        let chain_pem = read(desc.cert_store_name()).await?;
        let key_pem = read(desc.key_store_name()).await?;

        match validate_pem(&chain_pem, &key_pem, std::slice::from_ref(domain), Utc::now()) {
            Ok(cert) => Some(cert),
            Err(err) => {
                debug!("Ignoring cached certificate for {desc}: {err}");
                None
            }
        }
    }

    async fn load_or_generate_key(&self, desc: &CertDescription) -> Result<KeyPair, CertError> {
        match self.inner.cache.get(&desc.key_store_name()).await {
            Ok(Some(pem)) => match load_key(&pem, desc.key_type) {
                Some(key_pair) => {
                    trace!("Reusing cached key for {desc}");
                    return Ok(key_pair);
                }
                None => warn!("Cached key for {desc} is unusable, generating a new one"),
            },
            Ok(None) => {}
            Err(err) => warn!("Failed to read the key for {desc}: {err}"),
        }

        debug!("Generating {} key for {desc}", desc.key_type);
        generate_key(desc.key_type)
    }

    /// Store the certificate for later runs; failures only cost a reissue after a restart
    async fn persist(&self, desc: &CertDescription, cert: &IssuedCert) {
        let cache = &self.inner.cache;

        // The key goes first so a stored certificate always has its key next to it
        if let Err(err) = cache.put(&desc.key_store_name(), cert.key_pem.as_bytes()).await {
            warn!("Failed to store the key for {desc}: {err}");
            return;
        }
        if let Err(err) = cache
            .put(&desc.cert_store_name(), cert.chain_pem().as_bytes())
            .await
        {
            warn!("Failed to store the certificate for {desc}: {err}");
            return;
        }

        #[cfg(feature = "toml")]
        {
            let metadata = super::CertMetadata::from(cert);
            match toml::to_string(&metadata) {
                Ok(metadata) => {
                    if let Err(err) = cache.put(&desc.meta_store_name(), metadata.as_bytes()).await {
                        warn!("Failed to store metadata for {desc}: {err}");
                    }
                }
                Err(err) => warn!("Failed to serialize metadata for {desc}: {err}"),
            }
        }
    }

    fn enabled_challenges(&self) -> Vec<ChallengeType> {
        let options = &self.inner.options;
        let mut enabled = Vec::with_capacity(2);
        if options.enable_tls_alpn {
            enabled.push(ChallengeType::TlsAlpn01);
        }
        if options.enable_http01 {
            enabled.push(ChallengeType::Http01);
        }
        enabled
    }

    /// Prove control of `domain`, trying each enabled challenge type in order
    async fn authorize_domain(&self, domain: &DomainName) -> Result<(), CertError> {
        let mut pending = Vec::new();
        let result = self.run_authorization(domain, &mut pending).await;

        if !pending.is_empty() {
            self.revoke_pending(pending);
        }

        result
    }

    async fn run_authorization(
        &self,
        domain: &DomainName,
        pending: &mut Vec<String>,
    ) -> Result<(), CertError> {
        let authz = self.inner.acme.authorize(domain).await?;
        pending.push(authz.uri.clone());

        match authz.status {
            AuthorizationStatus::Valid => {
                pending.retain(|uri| uri != &authz.uri);
                debug!("Authorization for {domain} is already valid");
                return Ok(());
            }
            AuthorizationStatus::Invalid => {
                return Err(CertError::AuthorizationInvalid(domain.to_string()));
            }
            _ => {}
        }

        let enabled = self.enabled_challenges();
        let mut tried: Vec<ChallengeType> = Vec::new();
        let mut failed = false;

        loop {
            let next = enabled
                .iter()
                .filter(|kind| !tried.contains(kind))
                .find_map(|kind| authz.challenges.iter().find(|c| &c.kind == kind));

            let Some(challenge) = next else {
                if failed && self.revalidated(&authz).await {
                    pending.retain(|uri| uri != &authz.uri);
                    return Ok(());
                }
                return Err(CertError::NoCompatibleChallenge(domain.to_string()));
            };
            tried.push(challenge.kind.clone());

            match self.fulfill(domain, &authz, challenge).await {
                Ok(()) => {
                    pending.retain(|uri| uri != &authz.uri);
                    info!("Authorized {domain} with {}", challenge.kind);
                    return Ok(());
                }
                // An invalid authorization is final, no other challenge can revive it
                Err(err @ CertError::AuthorizationInvalid(_)) => {
                    warn!("{} challenge for {domain} was rejected", challenge.kind);
                    return Err(err);
                }
                Err(err) => {
                    warn!("{} challenge for {domain} failed: {err}", challenge.kind);
                    failed = true;
                }
            }
        }
    }

    /// Re-read an authorization whose challenges all failed, in case it became valid anyway
    async fn revalidated(&self, authz: &Authorization) -> bool {
        match tokio::time::timeout(RECHECK_TIMEOUT, self.inner.acme.wait_authorization(&authz.uri))
            .await
        {
            Ok(Ok(current)) if current.status == AuthorizationStatus::Valid => {
                info!("Authorization for {} became valid after its challenges failed", authz.domain);
                true
            }
            _ => false,
        }
    }

    /// Publish the challenge response, accept the challenge and wait for the verdict.
    ///
    /// The published token lives exactly as long as this attempt.
    async fn fulfill(
        &self,
        domain: &DomainName,
        authz: &Authorization,
        challenge: &Challenge,
    ) -> Result<(), CertError> {
        let acme = &self.inner.acme;
        let tokens = &self.inner.tokens;

        let _guard: ChallengeGuard<'_> = match challenge.kind {
            ChallengeType::TlsAlpn01 => {
                let cert = acme.tls_alpn_challenge_cert(challenge, domain).await?;
                tokens.put_tls_alpn(domain.clone(), cert)
            }
            ChallengeType::Http01 => {
                let response = acme.http01_challenge_response(challenge).await?;
                tokens.put_http01(domain.clone(), challenge.token.clone(), Bytes::from(response))
            }
            _ => return Err(CertError::NoCompatibleChallenge(domain.to_string())),
        };

        acme.accept(challenge).await?;
        let settled = acme.wait_authorization(&authz.uri).await?;

        match settled.status {
            AuthorizationStatus::Valid => Ok(()),
            AuthorizationStatus::Invalid => Err(CertError::AuthorizationInvalid(domain.to_string())),
            status => Err(CertError::Acme(format!(
                "authorization for {domain} ended as {status:?}"
            ))),
        }
    }

    /// Revoke leftover authorizations in the background; failures are only logged
    fn revoke_pending(&self, uris: Vec<String>) {
        let acme = self.inner.acme.clone();
        let limit = self.inner.revoke_limit.clone();
        let timeout = self.inner.options.revoke_timeout;

        tokio::spawn(async move {
            let Ok(_permit) = limit.acquire_owned().await else {
                return;
            };

            let revoke_all = async {
                for uri in &uris {
                    match acme.revoke_authorization(uri).await {
                        Ok(()) => debug!("Revoked pending authorization {uri}"),
                        Err(err) => warn!("Failed to revoke authorization {uri}: {err}"),
                    }
                }
            };

            if tokio::time::timeout(timeout, revoke_all).await.is_err() {
                warn!("Timed out revoking pending authorizations {uris:?}");
            }
        });
    }
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("options", &self.inner.options)
            .field("identities", &self.inner.states.len())
            .finish()
    }
}
