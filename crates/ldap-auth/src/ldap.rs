//! `ldap3`-backed directory client

use crate::{
    config::LdapAuthConfig,
    directory::{BindKind, BindOutcome, DirectoryClient, DirectoryEntry, DirectorySession, SearchScope},
    error::{LdapAuthError, Result},
};
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchResult};
use native_tls::{Certificate, TlsConnector};
use std::fs;
use std::time::Duration;
use tracing::debug;

const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

#[derive(Clone)]
pub struct Ldap3Client {
    verify_certificates: bool,
    connector: Option<TlsConnector>,
    timeout: Option<Duration>,
}

impl Ldap3Client {
    pub fn new(config: &LdapAuthConfig) -> Result<Self> {
        let verify_certificates = config.tls.verify_certificates();

        let connector = match config.tls.ca_certs_file() {
            Some(path) => {
                let pem = fs::read(path)?;
                let certificate = Certificate::from_pem(&pem).map_err(|e| {
                    LdapAuthError::config(format!(
                        "invalid CA certificate in {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let connector = TlsConnector::builder()
                    .add_root_certificate(certificate)
                    .danger_accept_invalid_certs(!verify_certificates)
                    .build()
                    .map_err(|e| LdapAuthError::config(format!("TLS setup failed: {}", e)))?;
                Some(connector)
            }
            None => None,
        };

        Ok(Self {
            verify_certificates,
            connector,
            timeout: config.timeout,
        })
    }

    fn settings(&self, start_tls: bool) -> LdapConnSettings {
        let mut settings = LdapConnSettings::new()
            .set_starttls(start_tls)
            .set_no_tls_verify(!self.verify_certificates);

        if let Some(timeout) = self.timeout {
            settings = settings.set_conn_timeout(timeout);
        }
        if let Some(connector) = &self.connector {
            settings = settings.set_connector(connector.clone());
        }

        settings
    }
}

#[async_trait]
impl DirectoryClient for Ldap3Client {
    async fn connect(&self, uri: &str, start_tls: bool) -> Result<Box<dyn DirectorySession>> {
        let (conn, ldap) = LdapConnAsync::with_settings(self.settings(start_tls), uri).await?;

        ldap3::drive!(conn);

        if start_tls {
            debug!("Upgraded LDAP connection to {} through StartTLS", uri);
        }

        Ok(Box::new(Ldap3Session { ldap }))
    }
}

pub struct Ldap3Session {
    ldap: Ldap,
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn bind(&mut self, kind: BindKind, dn: &str, password: &str) -> Result<BindOutcome> {
        let result = match kind {
            BindKind::Anonymous => self.ldap.simple_bind("", "").await?,
            BindKind::Simple => self.ldap.simple_bind(dn, password).await?,
        };

        if result.rc == 0 {
            Ok(BindOutcome::Success)
        } else {
            Ok(BindOutcome::Refused {
                code: result.rc,
                description: result.text,
            })
        }
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        let scope = match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::Subtree => Scope::Subtree,
        };

        let result = self
            .ldap
            .search(base, scope, filter, attributes.to_vec())
            .await?;
        search_entries(result)
    }

    async fn release(&mut self) -> Result<()> {
        self.ldap.unbind().await?;
        Ok(())
    }
}

/// Entries of a finished search.
///
/// A referral result still carries the entries found locally. A size-limited
/// result is incomplete and reported as [`LdapAuthError::SizeLimitExceeded`].
fn search_entries(SearchResult(entries, result): SearchResult) -> Result<Vec<DirectoryEntry>> {
    if result.rc == RC_SIZE_LIMIT_EXCEEDED {
        return Err(LdapAuthError::SizeLimitExceeded(entries.len()));
    }
    result.non_error()?;

    Ok(entries
        .into_iter()
        .filter(|entry| !entry.is_ref() && !entry.is_intermediate())
        .map(SearchEntry::construct)
        .map(|entry| DirectoryEntry {
            dn: entry.dn,
            attributes: entry.attrs,
        })
        .collect())
}
