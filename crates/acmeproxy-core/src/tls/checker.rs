use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::DomainName;

/// Decides whether a domain may receive a certificate at all
#[async_trait]
pub trait DomainChecker: Send + Sync {
    async fn is_allowed(&self, domain: &DomainName) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl DomainChecker for AllowAll {
    async fn is_allowed(&self, _domain: &DomainName) -> bool {
        true
    }
}

/// Allows exact names and, for `*.example.com` entries, any name below `example.com`
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    exact: HashSet<DomainName>,
    suffixes: Vec<String>,
}

impl AllowList {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut list = AllowList::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            match entry.strip_prefix("*.") {
                Some(parent) => list.suffixes.push(format!(".{}", DomainName::new(parent))),
                None => {
                    list.exact.insert(DomainName::new(entry));
                }
            }
        }
        list
    }

    pub fn contains(&self, domain: &DomainName) -> bool {
        self.exact.contains(domain)
            || self
                .suffixes
                .iter()
                .any(|suffix| domain.as_str().ends_with(suffix.as_str()))
    }
}

#[async_trait]
impl DomainChecker for AllowList {
    async fn is_allowed(&self, domain: &DomainName) -> bool {
        self.contains(domain)
    }
}
