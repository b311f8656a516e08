//! Scripted in-memory directory for exercising the authentication flows

#![allow(dead_code)]

use async_trait::async_trait;
use ldap_auth::{
    BindKind, BindOutcome, DirectoryClient, DirectoryEntry, DirectorySession, LdapAuthConfig,
    LdapAuthError, LdapAuthProvider, MemoryAccountDirectory, MemoryIdentityRecordStore, Result,
    SearchScope,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const INVALID_CREDENTIALS: u32 = 49;
pub const INAPPROPRIATE_AUTHENTICATION: u32 = 48;

/// Counters for everything the mock was asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connects: usize,
    pub start_tls_connects: usize,
    pub binds: usize,
    pub searches: usize,
    pub root_dse_searches: usize,
    pub releases: usize,
    pub connected_uris: Vec<String>,
    pub bound_dns: Vec<String>,
}

struct MockAccount {
    entry: DirectoryEntry,
    password: String,
}

#[derive(Default)]
struct MockState {
    accounts: Vec<MockAccount>,
    root_naming_context: Option<String>,
    unreachable: HashSet<String>,
    allow_anonymous: bool,
    fail_binds: bool,
    fail_searches: bool,
    size_limit: Option<usize>,
    release_gate: Option<Arc<Notify>>,
    stats: MockStats,
}

#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<MockState>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry that can bind with `password`
    pub fn with_entry(self, entry: DirectoryEntry, password: &str) -> Self {
        self.state.lock().unwrap().accounts.push(MockAccount {
            entry,
            password: password.to_string(),
        });
        self
    }

    /// Add a bind-only account such as a service account
    pub fn with_account(self, dn: &str, password: &str) -> Self {
        self.with_entry(DirectoryEntry::new(dn), password)
    }

    pub fn with_root_naming_context(self, context: &str) -> Self {
        self.state.lock().unwrap().root_naming_context = Some(context.to_string());
        self
    }

    pub fn with_unreachable(self, uri: &str) -> Self {
        self.state.lock().unwrap().unreachable.insert(uri.to_string());
        self
    }

    pub fn allow_anonymous(self) -> Self {
        self.state.lock().unwrap().allow_anonymous = true;
        self
    }

    pub fn fail_binds(&self, fail: bool) {
        self.state.lock().unwrap().fail_binds = fail;
    }

    pub fn fail_searches(&self, fail: bool) {
        self.state.lock().unwrap().fail_searches = fail;
    }

    /// Stop subtree searches after `limit` entries, as a server size limit does
    pub fn with_size_limit(self, limit: usize) -> Self {
        self.state.lock().unwrap().size_limit = Some(limit);
        self
    }

    /// Make every unbind wait until the returned gate is notified
    pub fn gate_releases(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().release_gate = Some(gate.clone());
        gate
    }

    pub fn stats(&self) -> MockStats {
        self.state.lock().unwrap().stats.clone()
    }

    pub fn client(&self) -> Arc<dyn DirectoryClient> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl DirectoryClient for MockDirectory {
    async fn connect(&self, uri: &str, start_tls: bool) -> Result<Box<dyn DirectorySession>> {
        let mut state = self.state.lock().unwrap();
        state.stats.connects += 1;
        if state.unreachable.contains(uri) {
            return Err(LdapAuthError::directory(format!(
                "connection to {} refused",
                uri
            )));
        }
        if start_tls {
            state.stats.start_tls_connects += 1;
        }
        state.stats.connected_uris.push(uri.to_string());

        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl DirectorySession for MockSession {
    async fn bind(&mut self, kind: BindKind, dn: &str, password: &str) -> Result<BindOutcome> {
        let mut state = self.state.lock().unwrap();
        state.stats.binds += 1;
        if state.fail_binds {
            return Err(LdapAuthError::directory("connection reset by peer"));
        }

        let accepted = match kind {
            BindKind::Anonymous => {
                if !state.allow_anonymous {
                    return Ok(BindOutcome::Refused {
                        code: INAPPROPRIATE_AUTHENTICATION,
                        description: "anonymous bind disallowed".to_string(),
                    });
                }
                true
            }
            BindKind::Simple => state.accounts.iter().any(|account| {
                account.entry.dn.eq_ignore_ascii_case(dn) && account.password == password
            }),
        };

        if accepted {
            state.stats.bound_dns.push(dn.to_string());
            Ok(BindOutcome::Success)
        } else {
            Ok(BindOutcome::Refused {
                code: INVALID_CREDENTIALS,
                description: "invalid credentials".to_string(),
            })
        }
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        _attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        let mut state = self.state.lock().unwrap();
        state.stats.searches += 1;
        if state.fail_searches {
            return Err(LdapAuthError::directory("search operation timed out"));
        }

        if base.is_empty() && scope == SearchScope::Base {
            state.stats.root_dse_searches += 1;
            return Ok(state
                .root_naming_context
                .iter()
                .map(|context| {
                    DirectoryEntry::new("").with_attribute("rootDomainNamingContext", &[context.as_str()])
                })
                .collect());
        }

        let terms = parse_filter(filter);
        let base = base.to_lowercase();
        let entries: Vec<DirectoryEntry> = state
            .accounts
            .iter()
            .map(|account| &account.entry)
            .filter(|entry| entry.dn.to_lowercase().ends_with(&base))
            .filter(|entry| terms.iter().all(|(k, v)| matches_term(entry, k, v.as_deref())))
            .cloned()
            .collect();

        match state.size_limit {
            Some(limit) if entries.len() > limit => Err(LdapAuthError::SizeLimitExceeded(limit)),
            _ => Ok(entries),
        }
    }

    async fn release(&mut self) -> Result<()> {
        let gate = self.state.lock().unwrap().release_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.state.lock().unwrap().stats.releases += 1;
        Ok(())
    }
}

/// Terms of an `(&(a=b)(c=d))` filter. `None` is a presence test (`a=*`).
fn parse_filter(filter: &str) -> Vec<(String, Option<String>)> {
    let inner = filter
        .strip_prefix("(&")
        .and_then(|f| f.strip_suffix(')'))
        .unwrap_or(filter);

    inner
        .split(')')
        .filter_map(|term| term.strip_prefix('('))
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| {
            let value = if v == "*" { None } else { Some(unescape(v)) };
            (k.to_string(), value)
        })
        .collect()
}

fn unescape(value: &str) -> String {
    let mut out = String::new();
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let hex: String = chars.by_ref().take(2).collect();
            if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                out.push(byte as char);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn matches_term(entry: &DirectoryEntry, attribute: &str, value: Option<&str>) -> bool {
    let values = entry
        .attributes
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
        .map(|(_, values)| values.as_slice())
        .unwrap_or_default();

    match value {
        None => !values.is_empty(),
        Some(value) => values.iter().any(|v| v.eq_ignore_ascii_case(value)),
    }
}

pub const SERVICE_DN: &str = "cn=service,dc=example,dc=com";
pub const SERVICE_PASSWORD: &str = "service-secret";

pub fn person(uid: &str, name: &[&str], mail: &[&str]) -> DirectoryEntry {
    DirectoryEntry::new(format!("uid={},ou=people,dc=example,dc=com", uid))
        .with_attribute("uid", &[uid])
        .with_attribute("cn", name)
        .with_attribute("mail", mail)
        .with_attribute("objectClass", &["person"])
}

pub fn simple_config() -> LdapAuthConfig {
    LdapAuthConfig::from_toml_str(
        r#"
uri = "ldap://ldap.example.com:389"
base = "ou=people,dc=example,dc=com"

[attributes]
uid = "uid"
name = "cn"
mail = "mail"
"#,
    )
    .unwrap()
}

pub fn search_config() -> LdapAuthConfig {
    LdapAuthConfig::from_toml_str(&format!(
        r#"
mode = "search"
uri = "ldap://ldap.example.com:389"
base = "ou=people,dc=example,dc=com"
bind_dn = "{}"
bind_password = "{}"
filter = "(objectClass=person)"

[attributes]
uid = "uid"
name = "cn"
mail = "mail"
"#,
        SERVICE_DN, SERVICE_PASSWORD
    ))
    .unwrap()
}

pub struct Harness {
    pub directory: MockDirectory,
    pub accounts: Arc<MemoryAccountDirectory>,
    pub records: Arc<MemoryIdentityRecordStore>,
    pub provider: LdapAuthProvider,
}

impl Harness {
    pub fn new(config: LdapAuthConfig, directory: MockDirectory) -> Self {
        Self::with_stores(
            config,
            directory,
            Arc::new(MemoryAccountDirectory::new("example.com")),
            Arc::new(MemoryIdentityRecordStore::new()),
        )
    }

    /// Harness sharing account and record stores with an earlier one
    pub fn with_stores(
        config: LdapAuthConfig,
        directory: MockDirectory,
        accounts: Arc<MemoryAccountDirectory>,
        records: Arc<MemoryIdentityRecordStore>,
    ) -> Self {
        let provider = LdapAuthProvider::with_client(
            config,
            directory.client(),
            accounts.clone(),
            records.clone(),
        );
        Self {
            directory,
            accounts,
            records,
            provider,
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Option<String> {
        let login: HashMap<String, String> = [("password".to_string(), password.to_string())]
            .into_iter()
            .collect();
        self.provider
            .check_auth(username, ldap_auth::SUPPORTED_LOGIN_TYPE, &login)
            .await
    }
}
