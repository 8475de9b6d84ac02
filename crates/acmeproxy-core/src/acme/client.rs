// AcmeClient backed by instant-acme

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus as AcmeAuthorizationStatus, ChallengeType as AcmeChallengeType,
    Identifier, NewAccount, NewOrder, Order, OrderStatus,
};
use log::{debug, info, trace, warn};
use rcgen::{CertificateParams, CustomExtension, KeyPair};
use rustls::{
    crypto::aws_lc_rs::sign::any_supported_type,
    pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer},
    sign::CertifiedKey,
};
use tokio::sync::Mutex;

use super::{
    AcmeClient, Authorization, AuthorizationStatus, Challenge, ChallengeType, OrderedChain,
};
use crate::{
    cache::Cache, domain::DomainName, error::CertError, tls::certificate::parse_chain_pem,
};

const POLL_ATTEMPTS: u32 = 10;
const POLL_INITIAL_DELAY: Duration = Duration::from_millis(250);
const POLL_MAX_DELAY: Duration = Duration::from_secs(5);

fn acme_err(err: instant_acme::Error) -> CertError {
    CertError::Acme(err.to_string())
}

/// An order opened to authorize a single domain, kept until its authorization is settled
struct PendingAuthorization {
    domain: DomainName,
    order: Mutex<Order>,
    challenges: Vec<instant_acme::Challenge>,
}

/// [`AcmeClient`] speaking RFC 8555 through `instant-acme`.
///
/// instant-acme drives authorizations through orders, so every `authorize` call opens a
/// single-identifier order and tracks it by authorization URL until it settles.
pub struct InstantAcmeClient {
    account: Account,
    pending: DashMap<String, Arc<PendingAuthorization>>,
}

impl InstantAcmeClient {
    /// Use the account stored in `cache` for `directory_url`, registering and storing a new
    /// one if there is none
    pub async fn with_cache(
        directory_url: &str,
        email: Option<&str>,
        cache: &dyn Cache,
    ) -> Result<Self, CertError> {
        let key = account_cache_key(directory_url);

        if let Some(credentials) = stored_credentials(cache, &key).await {
            match Account::from_credentials(credentials).await {
                Ok(account) => {
                    info!("Using the ACME account stored in `{key}`");
                    return Ok(Self::from_account(account));
                }
                Err(err) => warn!("Stored ACME account `{key}` is unusable, registering a new one: {err}"),
            }
        }

        let (account, credentials) = Self::register(directory_url, email).await?;
        match serde_json::to_vec_pretty(&credentials) {
            Ok(json) => {
                if let Err(err) = cache.put(&key, &json).await {
                    warn!("Failed to store the ACME account, it will be registered again on restart: {err}");
                }
            }
            Err(err) => warn!("Failed to serialize the ACME account: {err}"),
        }

        Ok(Self::from_account(account))
    }

    async fn register(
        directory_url: &str,
        email: Option<&str>,
    ) -> Result<(Account, AccountCredentials), CertError> {
        info!("Creating ACME account with {directory_url}");

        let contact = email.map(|email| format!("mailto:{email}"));
        let contact: Vec<&str> = contact.iter().map(String::as_str).collect();

        Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory_url,
            None,
        )
        .await
        .map_err(acme_err)
    }

    fn from_account(account: Account) -> Self {
        Self {
            account,
            pending: DashMap::new(),
        }
    }

    fn tracked(&self, uri: &str) -> Result<Arc<PendingAuthorization>, CertError> {
        self.pending
            .get(uri)
            .map(|entry| entry.clone())
            .ok_or_else(|| CertError::Acme(format!("unknown authorization {uri}")))
    }

    fn find_challenge<'a>(
        pending: &'a PendingAuthorization,
        challenge: &Challenge,
    ) -> Result<&'a instant_acme::Challenge, CertError> {
        pending
            .challenges
            .iter()
            .find(|c| c.url == challenge.uri)
            .ok_or_else(|| CertError::Acme(format!("unknown challenge {}", challenge.uri)))
    }
}

/// Cache key of the account registered with `directory_url`, one per CA host
pub fn account_cache_key(directory_url: &str) -> String {
    let host = url::Url::parse(directory_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "acme".to_string());
    format!("{host}.account.json")
}

/// Credentials stored under `key`, `None` if absent or unreadable
async fn stored_credentials(cache: &dyn Cache, key: &str) -> Option<AccountCredentials> {
    let stored = match cache.get(key).await {
        Ok(stored) => stored?,
        Err(err) => {
            warn!("Failed to read the ACME account from `{key}`: {err}");
            return None;
        }
    };

    match serde_json::from_slice(&stored) {
        Ok(credentials) => Some(credentials),
        Err(err) => {
            warn!("Ignoring malformed ACME account in `{key}`: {err}");
            None
        }
    }
}

fn map_status(status: &AcmeAuthorizationStatus) -> AuthorizationStatus {
    match status {
        AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
        AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
        AcmeAuthorizationStatus::Invalid => AuthorizationStatus::Invalid,
        other => AuthorizationStatus::Other(format!("{other:?}")),
    }
}

fn map_challenge(challenge: &instant_acme::Challenge, authorization_uri: &str) -> Challenge {
    let kind = match &challenge.r#type {
        AcmeChallengeType::TlsAlpn01 => ChallengeType::TlsAlpn01,
        AcmeChallengeType::Http01 => ChallengeType::Http01,
        AcmeChallengeType::Dns01 => ChallengeType::Dns01,
        other => ChallengeType::Other(format!("{other:?}")),
    };

    Challenge {
        kind,
        uri: challenge.url.clone(),
        token: challenge.token.clone(),
        authorization_uri: authorization_uri.to_string(),
    }
}

fn backoff(attempt: u32) -> Duration {
    POLL_INITIAL_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(POLL_MAX_DELAY)
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
    async fn authorize(&self, domain: &DomainName) -> Result<Authorization, CertError> {
        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(acme_err)?;

        let authorization = order
            .authorizations()
            .await
            .map_err(acme_err)?
            .into_iter()
            .next()
            .ok_or_else(|| CertError::Acme(format!("no authorization returned for {domain}")))?;

        let uri = order
            .state()
            .authorizations
            .first()
            .cloned()
            .ok_or_else(|| CertError::Acme(format!("order for {domain} has no authorization")))?;

        let status = map_status(&authorization.status);
        let challenges = authorization
            .challenges
            .iter()
            .map(|challenge| map_challenge(challenge, &uri))
            .collect();

        if status == AuthorizationStatus::Pending {
            trace!("Tracking authorization {uri} for {domain}");
            self.pending.insert(
                uri.clone(),
                Arc::new(PendingAuthorization {
                    domain: domain.clone(),
                    order: Mutex::new(order),
                    challenges: authorization.challenges,
                }),
            );
        }

        Ok(Authorization {
            uri,
            domain: domain.clone(),
            status,
            challenges,
        })
    }

    async fn accept(&self, challenge: &Challenge) -> Result<Challenge, CertError> {
        let pending = self.tracked(&challenge.authorization_uri)?;
        debug!("Accepting {} challenge for {}", challenge.kind, pending.domain);

        let mut order = pending.order.lock().await;
        order
            .set_challenge_ready(&challenge.uri)
            .await
            .map_err(acme_err)?;

        Ok(challenge.clone())
    }

    async fn wait_authorization(&self, uri: &str) -> Result<Authorization, CertError> {
        let pending = self.tracked(uri)?;
        let mut order = pending.order.lock().await;

        for attempt in 0..POLL_ATTEMPTS {
            tokio::time::sleep(backoff(attempt)).await;

            let authorization = order
                .authorizations()
                .await
                .map_err(acme_err)?
                .into_iter()
                .next()
                .ok_or_else(|| CertError::Acme(format!("authorization {uri} disappeared")))?;

            let status = map_status(&authorization.status);
            trace!("Authorization {uri} is {status:?} after {} polls", attempt + 1);
            if status == AuthorizationStatus::Pending {
                continue;
            }

            drop(order);
            self.pending.remove(uri);

            let challenges = authorization
                .challenges
                .iter()
                .map(|challenge| map_challenge(challenge, uri))
                .collect();
            return Ok(Authorization {
                uri: uri.to_string(),
                domain: pending.domain.clone(),
                status,
                challenges,
            });
        }

        Err(CertError::Acme(format!("authorization {uri} is still pending")))
    }

    async fn create_order_cert(
        &self,
        csr_der: &[u8],
        domains: &[DomainName],
        bundle: bool,
    ) -> Result<OrderedChain, CertError> {
        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|domain| Identifier::Dns(domain.to_string()))
            .collect();
        let mut order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(acme_err)?;

        let mut attempt = 0;
        let mut status = order.state().status;
        while status == OrderStatus::Pending {
            if attempt >= POLL_ATTEMPTS {
                return Err(CertError::Acme(
                    "order still has pending authorizations".to_string(),
                ));
            }
            tokio::time::sleep(backoff(attempt)).await;
            attempt += 1;
            status = order.refresh().await.map_err(acme_err)?.status;
        }

        match status {
            OrderStatus::Ready => order.finalize(csr_der).await.map_err(acme_err)?,
            OrderStatus::Invalid => {
                return Err(CertError::Acme("order became invalid".to_string()));
            }
            _ => trace!("Order for {domains:?} is already {status:?}"),
        }

        let mut attempt = 0;
        let chain_pem = loop {
            if let Some(chain_pem) = order.certificate().await.map_err(acme_err)? {
                break chain_pem;
            }
            if attempt >= POLL_ATTEMPTS {
                return Err(CertError::Acme("certificate was not issued in time".to_string()));
            }
            tokio::time::sleep(backoff(attempt)).await;
            attempt += 1;
        };

        let mut chain = parse_chain_pem(chain_pem.as_bytes())?;
        if !bundle {
            chain.truncate(1);
        }

        let url = order.state().certificate.clone().unwrap_or_default();
        info!("Downloaded certificate for {domains:?} from {url}");

        Ok(OrderedChain { chain, url })
    }

    async fn revoke_authorization(&self, uri: &str) -> Result<(), CertError> {
        // instant-acme exposes no authorization deactivation; forgetting the order lets the CA
        // expire the pending authorization on its own
        if let Some((_, pending)) = self.pending.remove(uri) {
            debug!("Dropped pending authorization {uri} for {}", pending.domain);
        }
        Ok(())
    }

    async fn tls_alpn_challenge_cert(
        &self,
        challenge: &Challenge,
        domain: &DomainName,
    ) -> Result<Arc<CertifiedKey>, CertError> {
        let pending = self.tracked(&challenge.authorization_uri)?;
        let digest = {
            let order = pending.order.lock().await;
            let acme_challenge = Self::find_challenge(&pending, challenge)?;
            order.key_authorization(acme_challenge).digest().as_ref().to_vec()
        };

        challenge_response_cert(domain, &digest)
    }

    async fn http01_challenge_response(&self, challenge: &Challenge) -> Result<String, CertError> {
        let pending = self.tracked(&challenge.authorization_uri)?;
        let order = pending.order.lock().await;
        let acme_challenge = Self::find_challenge(&pending, challenge)?;
        Ok(order.key_authorization(acme_challenge).as_str().to_string())
    }
}

/// Self-signed certificate carrying the acmeIdentifier extension for `domain`
pub fn challenge_response_cert(
    domain: &DomainName,
    key_auth_digest: &[u8],
) -> Result<Arc<CertifiedKey>, CertError> {
    let key_pair = KeyPair::generate().map_err(|e| CertError::KeyGeneration(e.to_string()))?;

    let mut params = CertificateParams::new(vec![domain.to_string()])
        .map_err(|e| CertError::Acme(format!("bad challenge name {domain}: {e}")))?;
    params
        .custom_extensions
        .push(CustomExtension::new_acme_identifier(key_auth_digest));
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Acme(format!("failed to sign challenge certificate: {e}")))?;

    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let signing_key = any_supported_type(&key_der)
        .map_err(|e| CertError::KeyGeneration(format!("unsupported challenge key: {e}")))?;

    Ok(Arc::new(CertifiedKey::new(
        vec![cert.der().clone()],
        signing_key,
    )))
}
