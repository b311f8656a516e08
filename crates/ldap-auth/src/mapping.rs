//! Localpart mapping between directory identifiers and local accounts
//!
//! A configured template such as `u{localpart}` turns the directory's
//! identifier (`790159`) into the localpart used for the local account
//! (`u790159`). The original identifier is recorded against the account so
//! later logins with either form can be traced back to the directory entry.

use crate::accounts::{AccountDirectory, IdentityRecordStore};
use crate::config::LdapAuthConfig;
use crate::error::{LdapAuthError, Result};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("unclosed '{{' in template")]
    Unclosed,

    #[error("single '}}' encountered in template")]
    UnmatchedClose,
}

/// Template with a `{localpart}` placeholder. `{{` and `}}` render literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalpartTemplate(String);

impl LocalpartTemplate {
    pub const PLACEHOLDER: &'static str = "{localpart}";

    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(Self::PLACEHOLDER) {
            return Err(LdapAuthError::config(
                "localpart_template must contain {localpart} placeholder",
            ));
        }
        Ok(Self(template))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(&self, localpart: &str) -> std::result::Result<String, TemplateError> {
        let mut rendered = String::with_capacity(self.0.len() + localpart.len());
        let mut chars = self.0.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    rendered.push('{');
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => field.push(c),
                            None => return Err(TemplateError::Unclosed),
                        }
                    }
                    if field != "localpart" {
                        return Err(TemplateError::UnknownField(field));
                    }
                    rendered.push_str(localpart);
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    rendered.push('}');
                }
                '}' => return Err(TemplateError::UnmatchedClose),
                c => rendered.push(c),
            }
        }

        Ok(rendered)
    }
}

/// Applies, reverses and records localpart mappings
pub struct IdentityMapper {
    enabled: bool,
    template: Option<LocalpartTemplate>,
    provider: String,
    accounts: Arc<dyn AccountDirectory>,
    records: Arc<dyn IdentityRecordStore>,
}

impl IdentityMapper {
    pub fn new(
        config: &LdapAuthConfig,
        accounts: Arc<dyn AccountDirectory>,
        records: Arc<dyn IdentityRecordStore>,
    ) -> Self {
        Self {
            enabled: config.user_mapping.is_some(),
            template: config.localpart_template().cloned(),
            provider: config.external_id_provider().to_string(),
            accounts,
            records,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Map an original localpart through the template. Template errors leave
    /// the localpart unchanged.
    pub fn apply(&self, localpart: &str) -> String {
        let template = match &self.template {
            Some(template) if self.enabled => template,
            _ => return localpart.to_string(),
        };

        match template.render(localpart) {
            Ok(mapped) => {
                debug!(
                    "Mapped localpart '{}' to '{}' using template '{}'",
                    localpart,
                    mapped,
                    template.as_str()
                );
                mapped
            }
            Err(e) => {
                warn!(
                    "Failed to apply user mapping template '{}' to localpart '{}': {}",
                    template.as_str(),
                    localpart,
                    e
                );
                localpart.to_string()
            }
        }
    }

    /// Recover the original directory localpart for a possibly mapped one.
    ///
    /// Without a record the candidate is assumed to be original already.
    pub async fn reverse(&self, candidate: &str) -> String {
        if !self.enabled {
            return candidate.to_string();
        }

        match self.recorded_original(candidate).await {
            Ok(Some(original)) => {
                debug!(
                    "Found original localpart '{}' for '{}'",
                    original, candidate
                );
                original
            }
            Ok(None) => {
                debug!(
                    "No original localpart found for '{}', assuming it's already original",
                    candidate
                );
                candidate.to_string()
            }
            Err(e) => {
                warn!(
                    "Failed to get original localpart for '{}': {}",
                    candidate, e
                );
                candidate.to_string()
            }
        }
    }

    async fn recorded_original(&self, mapped: &str) -> Result<Option<String>> {
        let account_id = self.accounts.qualified_account_id(mapped);
        let account_id = match self.accounts.account_exists(&account_id).await? {
            Some(canonical) => canonical,
            None => return Ok(None),
        };

        Ok(self
            .records
            .external_ids_for_account(&account_id)
            .await?
            .into_iter()
            .find(|id| id.provider == self.provider)
            .map(|id| id.external_id))
    }

    /// Account previously linked to an original localpart
    pub async fn account_for_original(&self, original: &str) -> Option<String> {
        match self
            .records
            .account_for_external_id(&self.provider, original)
            .await
        {
            Ok(Some(account_id)) => {
                debug!(
                    "Found user '{}' by original localpart '{}'",
                    account_id, original
                );
                Some(account_id)
            }
            Ok(None) => {
                debug!("No user found for original localpart '{}'", original);
                None
            }
            Err(e) => {
                debug!(
                    "Error searching for user with original localpart '{}': {}",
                    original, e
                );
                None
            }
        }
    }

    /// Record `original` against `account_id`. An existing, different original
    /// for the same account is kept.
    pub async fn persist(&self, account_id: &str, original: &str) {
        if let Err(e) = self.try_persist(account_id, original).await {
            warn!(
                "Failed to store original localpart '{}' for user '{}': {}",
                original, account_id, e
            );
        }
    }

    async fn try_persist(&self, account_id: &str, original: &str) -> Result<()> {
        let existing = self
            .records
            .external_ids_for_account(account_id)
            .await?
            .into_iter()
            .find(|id| id.provider == self.provider);

        if let Some(existing) = existing {
            if existing.external_id == original {
                debug!(
                    "Original localpart '{}' already stored for user '{}'",
                    original, account_id
                );
            } else {
                info!(
                    "User '{}' already has different original localpart '{}', not updating to '{}'",
                    account_id, existing.external_id, original
                );
            }
            return Ok(());
        }

        self.records
            .record_external_id(&self.provider, original, account_id)
            .await?;
        debug!(
            "Stored original localpart '{}' for user '{}'",
            original, account_id
        );
        Ok(())
    }
}
