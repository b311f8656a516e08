//! Reconcile authenticated directory identities with local accounts

use crate::accounts::AccountDirectory;
use crate::error::{LdapAuthError, Result};
use crate::mapping::IdentityMapper;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RegistrationCoordinator {
    accounts: Arc<dyn AccountDirectory>,
    mapper: Arc<IdentityMapper>,
}

impl RegistrationCoordinator {
    pub fn new(accounts: Arc<dyn AccountDirectory>, mapper: Arc<IdentityMapper>) -> Self {
        Self { accounts, mapper }
    }

    /// Account id for an authenticated directory identity.
    ///
    /// Lookup order: account recorded for the original localpart, then an
    /// existing account under the mapped localpart, then a new registration.
    pub async fn resolve_or_register(
        &self,
        original: &str,
        mapped: &str,
        display_name: &str,
        email: Option<&str>,
    ) -> Result<String> {
        let original = original.to_lowercase();
        let mapped = mapped.to_lowercase();

        if let Some(account_id) = self.mapper.account_for_original(&original).await {
            debug!(
                "Found existing user '{}' for original localpart '{}'",
                account_id, original
            );
            return Ok(account_id);
        }

        let account_id = self.accounts.qualified_account_id(&mapped);
        if let Some(canonical) = self.accounts.account_exists(&account_id).await? {
            debug!("User '{}' already exists", canonical);
            return Ok(canonical);
        }

        let emails: Vec<String> = email.map(str::to_string).into_iter().collect();
        let account_id = match self.accounts.register(&mapped, display_name, &emails).await {
            Ok(registration) => {
                info!(
                    "Registration based on LDAP data was successful: {}",
                    registration.account_id
                );
                registration.account_id
            }
            Err(LdapAuthError::AccountExists(_)) => {
                // Lost a race with a concurrent first login for the same user
                self.accounts
                    .account_exists(&account_id)
                    .await?
                    .ok_or_else(|| {
                        LdapAuthError::store(format!(
                            "account {} reported as existing but not found",
                            account_id
                        ))
                    })?
            }
            Err(e) => return Err(e),
        };

        if original != mapped {
            self.mapper.persist(&account_id, &original).await;
        }

        Ok(account_id)
    }
}
