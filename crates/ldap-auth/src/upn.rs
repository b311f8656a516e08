//! Active Directory login resolution
//!
//! Logins arrive as `DOMAIN\login`, `login/domain` or a bare `login`. They are
//! turned into a user principal name (`login@domain`) for the directory and a
//! localpart for the local account.

use crate::connector::DirectoryConnector;
use crate::directory::SearchScope;
use crate::error::{LdapAuthError, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const ROOT_DOMAIN_ATTRIBUTE: &str = "rootDomainNamingContext";

/// Parts derived from one AD login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnParts {
    pub login: String,
    pub domain: String,
    /// `login` inside the default domain, `login/domain` otherwise
    pub localpart: String,
}

impl UpnParts {
    pub fn upn(&self) -> String {
        format!("{}@{}", self.login, self.domain)
    }
}

/// Forest root domain, discovered at most once per instance.
///
/// A failed discovery is cached as an empty string.
#[derive(Debug, Default)]
pub struct RootDomainCache {
    cell: OnceCell<String>,
}

impl RootDomainCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&str> {
        self.cell.get().map(String::as_str)
    }

    /// Return the cached value or run `discover` to fill it. Concurrent first
    /// callers wait for a single discovery.
    pub async fn get_or_discover<F, Fut>(&self, discover: F) -> &str
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = String>,
    {
        self.cell.get_or_init(discover).await.as_str()
    }
}

pub struct UpnResolver {
    default_domain: Option<String>,
    connector: Arc<DirectoryConnector>,
    root_domain: RootDomainCache,
}

impl UpnResolver {
    pub fn new(default_domain: Option<&str>, connector: Arc<DirectoryConnector>) -> Self {
        Self {
            default_domain: default_domain.map(str::to_lowercase),
            connector,
            root_domain: RootDomainCache::new(),
        }
    }

    pub fn default_domain(&self) -> Option<&str> {
        self.default_domain.as_deref()
    }

    pub fn root_domain_cache(&self) -> &RootDomainCache {
        &self.root_domain
    }

    pub async fn map_login_to_upn(&self, username: &str) -> Result<UpnParts> {
        let lowered = username.to_lowercase();

        let (login, domain) = if let Some((domain, login)) = lowered.rsplit_once('\\') {
            let mut domain = domain.to_string();
            let root_domain = self.fetch_root_domain().await;
            if !root_domain.is_empty() && !domain.ends_with(root_domain) {
                domain = format!("{}.{}", domain, root_domain);
            }
            (login.to_string(), domain)
        } else if let Some((login, domain)) = lowered.rsplit_once('/') {
            (login.to_string(), domain.to_string())
        } else if let Some(default_domain) = &self.default_domain {
            (lowered.clone(), default_domain.clone())
        } else {
            info!(
                "No LDAP separator \"/\" was found in uid \"{}\" and LDAP default domain was not configured",
                username
            );
            return Err(LdapAuthError::UnresolvableLogin(username.to_string()));
        };

        let localpart = match &self.default_domain {
            Some(default_domain) if *default_domain == domain => login.clone(),
            _ => format!("{}/{}", login, domain),
        };

        Ok(UpnParts {
            login,
            domain,
            localpart,
        })
    }

    /// The forest root domain, or an empty string if it cannot be discovered
    pub async fn fetch_root_domain(&self) -> &str {
        self.root_domain
            .get_or_discover(|| async {
                match self.discover_root_domain().await {
                    Ok(Some(domain)) => {
                        debug!("Discovered LDAP root domain '{}'", domain);
                        domain
                    }
                    Ok(None) => {
                        warn!(
                            "No valid `{}` attribute was found in the RootDSE, \
                             login names of the form DOMAIN\\login will not be suffixed",
                            ROOT_DOMAIN_ATTRIBUTE
                        );
                        String::new()
                    }
                    Err(e) => {
                        warn!("Error while fetching LDAP root domain: {}", e);
                        String::new()
                    }
                }
            })
            .await
    }

    async fn discover_root_domain(&self) -> Result<Option<String>> {
        let Some(mut session) = self.connector.service_bind().await? else {
            return Ok(None);
        };

        let entries = session
            .search(
                "",
                SearchScope::Base,
                "(objectClass=*)",
                &[ROOT_DOMAIN_ATTRIBUTE],
            )
            .await;
        session.release().await;

        Ok(entries?
            .iter()
            .find_map(|entry| entry.values(ROOT_DOMAIN_ATTRIBUTE)?.first().cloned())
            .and_then(|context| root_domain_from_naming_context(&context)))
    }
}

/// `DC=example,DC=com` → `example.com`
pub fn root_domain_from_naming_context(context: &str) -> Option<String> {
    let labels: Vec<&str> = context
        .split(',')
        .filter_map(|component| {
            let (key, value) = component.trim().split_once('=')?;
            key.trim().eq_ignore_ascii_case("dc").then(|| value.trim())
        })
        .filter(|label| !label.is_empty())
        .collect();

    if labels.is_empty() {
        None
    } else {
        Some(labels.join(".").to_lowercase())
    }
}

/// Localpart for a directory principal such as `bob@corp.example.com`.
///
/// Principals in the default domain lose their domain; others become
/// `login/domain`. Values without `@` are only lower-cased.
pub fn localpart_from_principal(principal: &str, default_domain: Option<&str>) -> String {
    let lowered = principal.to_lowercase();
    match lowered.rsplit_once('@') {
        Some((login, domain))
            if default_domain.is_some_and(|d| d.eq_ignore_ascii_case(domain)) =>
        {
            login.to_string()
        }
        Some((login, domain)) => format!("{}/{}", login, domain),
        None => lowered,
    }
}
