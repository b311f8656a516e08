//! Bind and search protocol against the configured directory servers

use crate::config::{BindCredentials, LdapAuthConfig};
use crate::directory::{
    BindKind, BindOutcome, BoundSession, DirectoryClient, DirectoryEntry, SearchScope, ServerPool,
};
use crate::error::{LdapAuthError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// A subtree search for a single entry
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub base: &'a str,
    /// `(attribute, value)` pairs, ANDed together
    pub terms: Vec<(&'a str, &'a str)>,
    /// Raw filter appended to the terms
    pub extra_filter: Option<&'a str>,
    pub attributes: Vec<&'a str>,
}

impl SearchRequest<'_> {
    pub fn filter(&self) -> String {
        build_filter(&self.terms, self.extra_filter)
    }
}

/// `(&(a=v)(b=w)<extra>)` with values escaped
pub fn build_filter(terms: &[(&str, &str)], extra_filter: Option<&str>) -> String {
    let mut query: String = terms
        .iter()
        .map(|(key, value)| format!("({}={})", key, ldap3::ldap_escape(*value)))
        .collect();
    if let Some(extra) = extra_filter {
        query.push_str(extra);
    }
    format!("(&{})", query)
}

pub struct DirectoryConnector {
    client: Arc<dyn DirectoryClient>,
    pool: ServerPool,
    start_tls: bool,
    service_account: Option<BindCredentials>,
    workers: Arc<Semaphore>,
}

impl DirectoryConnector {
    pub fn new(client: Arc<dyn DirectoryClient>, config: &LdapAuthConfig) -> Self {
        Self {
            client,
            pool: ServerPool::new(config.uris.clone()),
            start_tls: config.start_tls,
            service_account: config.bind.clone(),
            workers: Arc::new(Semaphore::new(config.max_concurrent_operations)),
        }
    }

    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// Directory sessions that may still be opened before callers have to wait
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    async fn open(&self) -> Result<BoundSession> {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LdapAuthError::directory("directory worker pool closed"))?;

        let mut last_error = None;
        for uri in self.pool.rotation() {
            match self.client.connect(uri, self.start_tls).await {
                Ok(session) => {
                    debug!("Established LDAP connection with {}", uri);
                    return Ok(BoundSession::new(session, permit));
                }
                Err(e) => {
                    warn!("Unable to connect to LDAP server {}: {}", uri, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LdapAuthError::directory("no LDAP servers configured")))
    }

    /// Bind against the pool.
    ///
    /// `Ok(None)` means the directory refused the bind; the connection has
    /// been released. Simple binds need both `identity` and `secret`.
    pub async fn bind(
        &self,
        identity: Option<&str>,
        secret: Option<&str>,
        kind: BindKind,
    ) -> Result<Option<BoundSession>> {
        let (dn, password) = match (kind, identity, secret) {
            (BindKind::Anonymous, _, _) => ("", ""),
            (BindKind::Simple, Some(dn), Some(password)) => (dn, password),
            (BindKind::Simple, _, _) => {
                return Err(LdapAuthError::config("Missing bind DN or bind password"))
            }
        };

        let mut session = self.open().await?;
        match session.bind(kind, dn, password).await {
            Ok(BindOutcome::Success) => {
                debug!("LDAP bind successful as '{}'", dn);
                Ok(Some(session))
            }
            Ok(BindOutcome::Refused { code, description }) => {
                info!(
                    "Binding against LDAP failed for '{}' (rc={}): {}",
                    dn, code, description
                );
                session.release().await;
                Ok(None)
            }
            Err(e) => {
                warn!("Error during LDAP bind: {}", e);
                session.release().await;
                Err(e)
            }
        }
    }

    /// Bind with the configured service account, or anonymously without one
    pub async fn service_bind(&self) -> Result<Option<BoundSession>> {
        match &self.service_account {
            Some(account) => {
                self.bind(
                    Some(&account.dn),
                    Some(&account.password),
                    BindKind::Simple,
                )
                .await
            }
            None => self.bind(None, None, BindKind::Anonymous).await,
        }
    }

    /// Search for exactly one entry, then bind as it with `password`.
    ///
    /// The search session is released in every case. Zero or several
    /// matches, including a size-limited result, yield `Ok(None)`.
    pub async fn search_one(
        &self,
        mut session: BoundSession,
        request: &SearchRequest<'_>,
        password: &str,
    ) -> Result<Option<(BoundSession, DirectoryEntry)>> {
        let filter = request.filter();
        debug!("LDAP search filter: {}", filter);

        let entries = match session
            .search(
                request.base,
                SearchScope::Subtree,
                &filter,
                &request.attributes,
            )
            .await
        {
            Ok(entries) => entries,
            Err(LdapAuthError::SizeLimitExceeded(returned)) => {
                info!(
                    "LDAP search hit the server size limit after {} results for '{}'",
                    returned, filter
                );
                session.release().await;
                return Ok(None);
            }
            Err(e) => {
                warn!("Error during LDAP search: {}", e);
                session.release().await;
                return Err(e);
            }
        };
        session.release().await;

        let mut entries = entries.into_iter();
        let entry = match (entries.next(), entries.len()) {
            (Some(entry), 0) => entry,
            (None, _) => {
                info!("LDAP search returned no results for '{}'", filter);
                return Ok(None);
            }
            (Some(_), rest) => {
                info!(
                    "LDAP search returned too many ({}) results for '{}'",
                    rest + 1,
                    filter
                );
                return Ok(None);
            }
        };
        debug!("LDAP search found dn: {}", entry.dn);

        Ok(self
            .bind(Some(&entry.dn), Some(password), BindKind::Simple)
            .await?
            .map(|user_session| (user_session, entry)))
    }

    /// Service bind followed by [`search_one`](Self::search_one)
    pub async fn authenticated_search(
        &self,
        request: &SearchRequest<'_>,
        password: &str,
    ) -> Result<Option<(BoundSession, DirectoryEntry)>> {
        match self.service_bind().await? {
            Some(session) => self.search_one(session, request, password).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        assert_eq!(build_filter(&[("cn", "bob")], None), "(&(cn=bob))");
        assert_eq!(
            build_filter(
                &[("cn", "bob"), ("mail", "bob@example.com")],
                Some("(objectClass=person)")
            ),
            "(&(cn=bob)(mail=bob@example.com)(objectClass=person))"
        );
    }

    #[test]
    fn test_filter_values_are_escaped() {
        assert_eq!(
            build_filter(&[("cn", "*)(uid=*")], None),
            "(&(cn=\\2a\\29\\28uid=\\2a))"
        );
    }
}
