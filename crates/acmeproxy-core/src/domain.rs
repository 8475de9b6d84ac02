use std::fmt::Display;

use serde::{Deserialize, Serialize};
use url::Host;

/// Normalizes a raw host name: trims whitespace, lowercases, strips trailing dots and converts
/// Unicode labels to their IDNA ASCII form.
///
/// Inputs that are not valid host names are only lowercased, so the function never fails and
/// `normalize(normalize(x)) == normalize(x)` holds for every input.
pub fn normalize(raw: &str) -> String {
    let trimmed = trim_host(raw);

    let normalized = match Host::parse(trimmed) {
        Ok(Host::Domain(domain)) => domain,
        Ok(host @ (Host::Ipv4(_) | Host::Ipv6(_))) => host.to_string(),
        Err(_) => trimmed.to_lowercase(),
    };

    trim_host(&normalized).to_string()
}

fn trim_host(raw: &str) -> &str {
    raw.trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

/// A normalized domain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    pub fn new(raw: &str) -> Self {
        DomainName(normalize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the name without `prefix`, if it starts with it and something remains
    pub fn strip_prefix(&self, prefix: &str) -> Option<DomainName> {
        self.0
            .strip_prefix(prefix)
            .filter(|rest| !rest.is_empty())
            .map(|rest| DomainName(rest.to_string()))
    }
}

impl From<String> for DomainName {
    fn from(raw: String) -> Self {
        DomainName::new(&raw)
    }
}

impl From<&str> for DomainName {
    fn from(raw: &str) -> Self {
        DomainName::new(raw)
    }
}

impl From<DomainName> for String {
    fn from(domain: DomainName) -> Self {
        domain.0
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The private key algorithm of a certificate
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Rsa,
    #[default]
    Ecdsa,
}

impl std::str::FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rsa" => Ok(KeyType::Rsa),
            "ecdsa" => Ok(KeyType::Ecdsa),
            _ => Err(format!("Invalid key type: {s}")),
        }
    }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key_type = match self {
            KeyType::Rsa => "rsa",
            KeyType::Ecdsa => "ecdsa",
        };
        write!(f, "{key_type}")
    }
}

/// The identity of a certificate: its main domain and key algorithm.
///
/// Every cache entry and every issuance slot is keyed by this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertDescription {
    pub main_domain: DomainName,
    pub key_type: KeyType,
}

impl CertDescription {
    pub fn new(main_domain: DomainName, key_type: KeyType) -> Self {
        CertDescription {
            main_domain,
            key_type,
        }
    }

    /// Derives the identity serving `domain` by stripping the first matching automatic
    /// subdomain prefix (e.g. `www.`).
    pub fn from_domain(domain: &DomainName, key_type: KeyType, subdomains: &[String]) -> Self {
        let main_domain = subdomains
            .iter()
            .find_map(|prefix| domain.strip_prefix(prefix))
            .unwrap_or_else(|| domain.clone());

        CertDescription::new(main_domain, key_type)
    }

    pub fn cert_store_name(&self) -> String {
        format!("{}.{}.cer", self.main_domain, self.key_type)
    }

    pub fn key_store_name(&self) -> String {
        format!("{}.{}.key", self.main_domain, self.key_type)
    }

    pub fn meta_store_name(&self) -> String {
        format!("{}.{}.toml", self.main_domain, self.key_type)
    }

    /// Presence of this key in the cache disables issuance for the main domain
    pub fn lock_name(&self) -> String {
        format!("{}.lock", self.main_domain)
    }

    /// The main domain followed by every automatic subdomain
    pub fn domain_names(&self, subdomains: &[String]) -> Vec<DomainName> {
        let mut names = vec![self.main_domain.clone()];
        for prefix in subdomains {
            let name = DomainName::new(&format!("{prefix}{}", self.main_domain));
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

impl Display for CertDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.main_domain, self.key_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_prefix_keeps_bare_prefix() {
        let domain = DomainName::new("www.");
        assert_eq!(domain.as_str(), "www");
        assert!(DomainName::new("www.").strip_prefix("www.").is_none());
    }

    #[test]
    fn test_from_domain_without_prefix() {
        let domain = DomainName::new("api.example.com");
        let desc = CertDescription::from_domain(&domain, KeyType::Rsa, &["www.".to_string()]);
        assert_eq!(desc.main_domain.as_str(), "api.example.com");
    }
}
