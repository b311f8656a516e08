//! Single authentication attempts against the directory
//!
//! Each attempt normalizes the username, reverses any localpart mapping,
//! resolves the AD principal if configured, verifies the password with a
//! bind, and finally resolves or registers the local account.

use crate::accounts::{AccountDirectory, IdentityRecordStore};
use crate::config::{LdapAuthConfig, LdapMode};
use crate::connector::{DirectoryConnector, SearchRequest};
use crate::directory::{BindKind, DirectoryClient, DirectoryEntry};
use crate::error::{LdapAuthError, Result};
use crate::mapping::IdentityMapper;
use crate::registration::RegistrationCoordinator;
use crate::upn::{localpart_from_principal, UpnResolver};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of an attempt that completed without a directory or store failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(String),
    /// Wrong password, unknown user or an unusable login. Callers must not
    /// be able to tell these apart.
    Rejected,
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated(account_id) => Some(account_id),
            Self::Rejected => None,
        }
    }

    pub fn into_account_id(self) -> Option<String> {
        match self {
            Self::Authenticated(account_id) => Some(account_id),
            Self::Rejected => None,
        }
    }
}

/// `@bob:example.com` → `bob`; anything else is returned unchanged
pub fn normalize_username(username: &str) -> &str {
    match username
        .strip_prefix('@')
        .and_then(|rest| rest.split_once(':'))
    {
        Some((localpart, _)) => localpart,
        None => username,
    }
}

/// Identity details gathered from the directory for registration
struct DirectoryIdentity {
    localpart: String,
    display_name: String,
    email: Option<String>,
}

pub struct CredentialVerifier {
    config: LdapAuthConfig,
    connector: Arc<DirectoryConnector>,
    upn: Option<UpnResolver>,
    mapper: Arc<IdentityMapper>,
    registration: RegistrationCoordinator,
}

impl CredentialVerifier {
    pub fn new(
        config: LdapAuthConfig,
        client: Arc<dyn DirectoryClient>,
        accounts: Arc<dyn AccountDirectory>,
        records: Arc<dyn IdentityRecordStore>,
    ) -> Self {
        let connector = Arc::new(DirectoryConnector::new(client, &config));
        let upn = config
            .active_directory
            .as_ref()
            .map(|ad| UpnResolver::new(ad.default_domain.as_deref(), connector.clone()));
        let mapper = Arc::new(IdentityMapper::new(&config, accounts.clone(), records));
        let registration = RegistrationCoordinator::new(accounts, mapper.clone());

        Self {
            config,
            connector,
            upn,
            mapper,
            registration,
        }
    }

    pub fn config(&self) -> &LdapAuthConfig {
        &self.config
    }

    pub fn connector(&self) -> &DirectoryConnector {
        &self.connector
    }

    pub fn upn_resolver(&self) -> Option<&UpnResolver> {
        self.upn.as_ref()
    }

    pub fn mapper(&self) -> &IdentityMapper {
        &self.mapper
    }

    /// Verify a username and password.
    ///
    /// `Err` is returned only for directory or account store failures.
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<AuthOutcome> {
        // A simple bind with an empty password is an unauthenticated bind
        // (RFC 4513 5.1.2) and proves nothing.
        if password.is_empty() {
            debug!("Rejecting login for '{}' with empty password", username);
            return Ok(AuthOutcome::Rejected);
        }

        let username = normalize_username(username);
        let original = self.mapper.reverse(username).await;

        let mut uid_value = original.clone();
        let mut default_display_name = original.clone();
        let mut localpart = original;

        if let Some(upn) = &self.upn {
            match upn.map_login_to_upn(&localpart).await {
                Ok(parts) => {
                    uid_value = parts.upn();
                    default_display_name = parts.login;
                    localpart = parts.localpart;
                }
                Err(LdapAuthError::UnresolvableLogin(_)) => return Ok(AuthOutcome::Rejected),
                Err(e) => return Err(e),
            }
        }

        debug!("Attempting LDAP connection with {:?}", self.connector.pool().uris());

        let identity = match self.config.mode {
            LdapMode::Simple => {
                let bind_dn = format!(
                    "{}={},{}",
                    self.config.attributes.uid,
                    ldap3::dn_escape(uid_value.as_str()),
                    self.config.base
                );
                let Some(session) = self
                    .connector
                    .bind(Some(&bind_dn), Some(password), BindKind::Simple)
                    .await?
                else {
                    return Ok(AuthOutcome::Rejected);
                };
                info!("User authenticated against LDAP server: {}", session.bound_as());
                session.release().await;

                DirectoryIdentity {
                    localpart,
                    display_name: default_display_name,
                    email: None,
                }
            }
            LdapMode::Search => {
                let request = self.search_request(&self.config.attributes.uid, &uid_value);
                let Some((session, entry)) = self
                    .connector
                    .authenticated_search(&request, password)
                    .await?
                else {
                    return Ok(AuthOutcome::Rejected);
                };
                info!("User authenticated against LDAP server: {}", session.bound_as());
                session.release().await;

                let display_name = self.display_name(&entry, &localpart, &default_display_name);
                let email = entry
                    .single_value(&self.config.attributes.mail)
                    .map(str::to_string);

                DirectoryIdentity {
                    localpart,
                    display_name,
                    email,
                }
            }
        };

        self.resolve_account(identity).await
    }

    /// Verify a third-party identifier (only `email`) and password.
    ///
    /// Requires search mode; any other combination is rejected without
    /// contacting the directory.
    pub async fn verify_third_party(
        &self,
        medium: &str,
        address: &str,
        password: &str,
    ) -> Result<AuthOutcome> {
        if self.config.mode != LdapMode::Search {
            debug!("3PID LDAP login/register attempted but LDAP search mode not enabled");
            return Ok(AuthOutcome::Rejected);
        }
        if medium != "email" {
            debug!("Unsupported 3PID medium '{}'", medium);
            return Ok(AuthOutcome::Rejected);
        }
        if password.is_empty() {
            return Ok(AuthOutcome::Rejected);
        }

        let request = self.search_request(&self.config.attributes.mail, address);
        let Some((session, entry)) = self
            .connector
            .authenticated_search(&request, password)
            .await?
        else {
            return Ok(AuthOutcome::Rejected);
        };
        session.release().await;

        let Some(uid) = entry.single_value(&self.config.attributes.uid) else {
            info!(
                "LDAP entry '{}' has no single '{}' value, cannot derive a localpart",
                entry.dn, self.config.attributes.uid
            );
            return Ok(AuthOutcome::Rejected);
        };

        let localpart = match &self.upn {
            Some(upn) => localpart_from_principal(uid, upn.default_domain()),
            None => uid.to_lowercase(),
        };
        let display_name = entry
            .single_value(&self.config.attributes.name)
            .map(str::to_string)
            .unwrap_or_else(|| localpart.clone());

        self.resolve_account(DirectoryIdentity {
            localpart,
            display_name,
            email: Some(address.to_string()),
        })
        .await
    }

    fn search_request<'a>(&'a self, attribute: &'a str, value: &'a str) -> SearchRequest<'a> {
        SearchRequest {
            base: &self.config.base,
            terms: vec![(attribute, value)],
            extra_filter: self.config.filter.as_deref(),
            attributes: self.config.attributes.all(),
        }
    }

    /// Missing name attribute falls back to the localpart, a multi-valued one
    /// to the default display name.
    fn display_name(&self, entry: &DirectoryEntry, localpart: &str, default: &str) -> String {
        match entry.values(&self.config.attributes.name) {
            None | Some([]) => localpart.to_string(),
            Some([name]) => name.clone(),
            Some(_) => default.to_string(),
        }
    }

    async fn resolve_account(&self, identity: DirectoryIdentity) -> Result<AuthOutcome> {
        let mapped = self.mapper.apply(&identity.localpart);
        let account_id = self
            .registration
            .resolve_or_register(
                &identity.localpart,
                &mapped,
                &identity.display_name,
                identity.email.as_deref(),
            )
            .await?;
        Ok(AuthOutcome::Authenticated(account_id))
    }
}
