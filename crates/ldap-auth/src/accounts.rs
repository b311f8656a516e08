//! Capabilities of the host's account registry and identity record store

use crate::error::Result;
use async_trait::async_trait;

/// An account created by [`AccountDirectory::register`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub account_id: String,
    pub access_token: String,
}

/// An external identifier linked to a local account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId {
    pub provider: String,
    pub external_id: String,
}

impl ExternalId {
    pub fn new(provider: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            external_id: external_id.into(),
        }
    }
}

/// Local account registry
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Fully qualified account id for a localpart
    fn qualified_account_id(&self, localpart: &str) -> String;

    /// Canonical id of the account if it exists
    async fn account_exists(&self, account_id: &str) -> Result<Option<String>>;

    /// Create an account. Fails with `AccountExists` if the localpart is taken.
    async fn register(
        &self,
        localpart: &str,
        display_name: &str,
        emails: &[String],
    ) -> Result<Registration>;
}

/// Persistent associations between external identifiers and accounts
#[async_trait]
pub trait IdentityRecordStore: Send + Sync {
    /// Link `external_id` under `provider` to `account_id`.
    ///
    /// Linking an external id that already belongs to a different account
    /// fails with `IdentityConflict`.
    async fn record_external_id(
        &self,
        provider: &str,
        external_id: &str,
        account_id: &str,
    ) -> Result<()>;

    async fn external_ids_for_account(&self, account_id: &str) -> Result<Vec<ExternalId>>;

    async fn account_for_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<String>>;
}
