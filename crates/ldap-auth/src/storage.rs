//! In-memory account registry and identity record store

use crate::accounts::{AccountDirectory, ExternalId, IdentityRecordStore, Registration};
use crate::error::{LdapAuthError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub account_id: String,
    pub display_name: String,
    pub emails: Vec<String>,
}

/// Account registry keyed by lower-cased account id
pub struct MemoryAccountDirectory {
    server_name: String,
    accounts: DashMap<String, AccountRecord>,
}

impl MemoryAccountDirectory {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            accounts: DashMap::new(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn get_account(&self, account_id: &str) -> Option<AccountRecord> {
        self.accounts
            .get(&account_id.to_lowercase())
            .map(|entry| entry.value().clone())
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccountDirectory {
    fn qualified_account_id(&self, localpart: &str) -> String {
        format!("@{}:{}", localpart, self.server_name)
    }

    async fn account_exists(&self, account_id: &str) -> Result<Option<String>> {
        Ok(self
            .accounts
            .get(&account_id.to_lowercase())
            .map(|entry| entry.value().account_id.clone()))
    }

    async fn register(
        &self,
        localpart: &str,
        display_name: &str,
        emails: &[String],
    ) -> Result<Registration> {
        let account_id = self.qualified_account_id(localpart);
        match self.accounts.entry(account_id.to_lowercase()) {
            Entry::Occupied(_) => Err(LdapAuthError::AccountExists(account_id)),
            Entry::Vacant(slot) => {
                slot.insert(AccountRecord {
                    account_id: account_id.clone(),
                    display_name: display_name.to_string(),
                    emails: emails.to_vec(),
                });
                debug!("Registered account {}", account_id);
                Ok(Registration {
                    account_id,
                    access_token: Uuid::new_v4().to_string(),
                })
            }
        }
    }
}

/// Identity record store keyed by (provider, external id)
#[derive(Default)]
pub struct MemoryIdentityRecordStore {
    records: DashMap<ExternalId, String>,
}

impl MemoryIdentityRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl IdentityRecordStore for MemoryIdentityRecordStore {
    async fn record_external_id(
        &self,
        provider: &str,
        external_id: &str,
        account_id: &str,
    ) -> Result<()> {
        match self.records.entry(ExternalId::new(provider, external_id)) {
            Entry::Occupied(existing) if existing.get() == account_id => Ok(()),
            Entry::Occupied(existing) => Err(LdapAuthError::IdentityConflict {
                provider: provider.to_string(),
                external_id: external_id.to_string(),
                account_id: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(account_id.to_string());
                Ok(())
            }
        }
    }

    async fn external_ids_for_account(&self, account_id: &str) -> Result<Vec<ExternalId>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value() == account_id)
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn account_for_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .records
            .get(&ExternalId::new(provider, external_id))
            .map(|entry| entry.value().clone()))
    }
}
