//! Directory transport capability
//!
//! [`DirectoryClient`] opens connections and [`DirectorySession`] performs
//! binds and searches on one of them. Sessions handed out by the connector
//! are wrapped in [`BoundSession`], which unbinds on every exit path.

use crate::error::{LdapAuthError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    Anonymous,
    Simple,
}

/// Result reported by the directory for a bind request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Success,
    Refused { code: u32, description: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    Subtree,
}

/// A search result entry. Every attribute is multi-valued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: &[&str]) -> Self {
        self.attributes.insert(
            name.into(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// The attribute value if the attribute has exactly one
    pub fn single_value(&self, name: &str) -> Option<&str> {
        match self.values(name) {
            Some([value]) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Opens connections to directory servers
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Connect to `uri`. With `start_tls` the connection is upgraded before
    /// it is returned, so the subsequent bind runs over TLS.
    async fn connect(&self, uri: &str, start_tls: bool) -> Result<Box<dyn DirectorySession>>;
}

/// One open directory connection
#[async_trait]
pub trait DirectorySession: Send {
    async fn bind(&mut self, kind: BindKind, dn: &str, password: &str) -> Result<BindOutcome>;

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>>;

    /// Unbind and close the connection
    async fn release(&mut self) -> Result<()>;
}

/// Configured directory endpoints, handed out round-robin
#[derive(Debug)]
pub struct ServerPool {
    uris: Vec<String>,
    next: AtomicUsize,
}

impl ServerPool {
    pub fn new(uris: Vec<String>) -> Self {
        Self {
            uris,
            next: AtomicUsize::new(0),
        }
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    /// All endpoints, starting from the next one in rotation
    pub fn rotation(&self) -> Vec<&str> {
        if self.uris.is_empty() {
            return Vec::new();
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.uris.len();
        self.uris[start..]
            .iter()
            .chain(self.uris[..start].iter())
            .map(String::as_str)
            .collect()
    }
}

/// An open session that is released when the owner is done with it.
///
/// Call [`BoundSession::release`] to unbind. A guard dropped without release
/// schedules the unbind on the current runtime and keeps its worker until the
/// unbind finishes.
pub struct BoundSession {
    session: Option<Box<dyn DirectorySession>>,
    bound_as: String,
    permit: Option<OwnedSemaphorePermit>,
}

impl BoundSession {
    pub(crate) fn new(session: Box<dyn DirectorySession>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            session: Some(session),
            bound_as: String::new(),
            permit: Some(permit),
        }
    }

    /// DN the session is bound as; empty for anonymous binds
    pub fn bound_as(&self) -> &str {
        &self.bound_as
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn DirectorySession>> {
        self.session
            .as_mut()
            .ok_or_else(|| LdapAuthError::directory("directory session already released"))
    }

    pub(crate) async fn bind(
        &mut self,
        kind: BindKind,
        dn: &str,
        password: &str,
    ) -> Result<BindOutcome> {
        let outcome = self.session_mut()?.bind(kind, dn, password).await?;
        if outcome == BindOutcome::Success {
            self.bound_as = dn.to_string();
        }
        Ok(outcome)
    }

    pub async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        self.session_mut()?
            .search(base, scope, filter, attributes)
            .await
    }

    pub async fn release(mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.release().await {
                debug!("Failed to unbind LDAP session: {}", e);
            }
        }
    }
}

impl Drop for BoundSession {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.release().await {
                        debug!("Failed to unbind dropped LDAP session: {}", e);
                    }
                    drop(permit);
                });
            }
            Err(_) => warn!("LDAP session dropped outside of a runtime, closing without unbind"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value() {
        let entry = DirectoryEntry::new("cn=bob,dc=example,dc=com")
            .with_attribute("cn", &["bob"])
            .with_attribute("mail", &["bob@example.com", "robert@example.com"])
            .with_attribute("givenName", &[]);

        assert_eq!(entry.single_value("cn"), Some("bob"));
        assert_eq!(entry.single_value("mail"), None);
        assert_eq!(entry.single_value("givenName"), None);
        assert_eq!(entry.single_value("sn"), None);
        assert_eq!(entry.values("mail").map(<[String]>::len), Some(2));
    }

    #[test]
    fn test_server_pool_rotation() {
        let pool = ServerPool::new(vec![
            "ldap://a".to_string(),
            "ldap://b".to_string(),
            "ldap://c".to_string(),
        ]);
        assert_eq!(pool.rotation(), vec!["ldap://a", "ldap://b", "ldap://c"]);
        assert_eq!(pool.rotation(), vec!["ldap://b", "ldap://c", "ldap://a"]);
        assert_eq!(pool.rotation(), vec!["ldap://c", "ldap://a", "ldap://b"]);
        assert_eq!(pool.rotation(), vec!["ldap://a", "ldap://b", "ldap://c"]);
    }

    #[test]
    fn test_empty_pool() {
        let pool = ServerPool::new(Vec::new());
        assert!(pool.is_empty());
        assert!(pool.rotation().is_empty());
    }
}
