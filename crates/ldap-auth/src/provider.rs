//! Host-facing password authentication provider

use crate::accounts::{AccountDirectory, IdentityRecordStore};
use crate::config::LdapAuthConfig;
use crate::directory::DirectoryClient;
use crate::error::Result;
use crate::ldap::Ldap3Client;
use crate::verifier::{AuthOutcome, CredentialVerifier};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SUPPORTED_LOGIN_TYPE: &str = "m.login.password";
pub const SUPPORTED_LOGIN_FIELDS: &[&str] = &["password"];

/// Entry points called by the host for password and third-party logins.
///
/// Both entry points fail closed: directory and store failures are logged
/// and reported as "no authenticated user". Use [`verifier`](Self::verifier)
/// to tell failures apart from rejections.
pub struct LdapAuthProvider {
    verifier: CredentialVerifier,
}

impl LdapAuthProvider {
    /// Provider talking to the configured directory servers
    pub fn new(
        config: LdapAuthConfig,
        accounts: Arc<dyn AccountDirectory>,
        records: Arc<dyn IdentityRecordStore>,
    ) -> Result<Self> {
        let client = Arc::new(Ldap3Client::new(&config)?);
        Ok(Self::with_client(config, client, accounts, records))
    }

    pub fn with_client(
        config: LdapAuthConfig,
        client: Arc<dyn DirectoryClient>,
        accounts: Arc<dyn AccountDirectory>,
        records: Arc<dyn IdentityRecordStore>,
    ) -> Self {
        Self {
            verifier: CredentialVerifier::new(config, client, accounts, records),
        }
    }

    pub fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }

    pub fn supported_login_types(&self) -> HashMap<&'static str, &'static [&'static str]> {
        HashMap::from([(SUPPORTED_LOGIN_TYPE, SUPPORTED_LOGIN_FIELDS)])
    }

    /// Check a login submitted as `login_type` with the given fields.
    ///
    /// Returns the canonical account id, registering the account on first login.
    pub async fn check_auth(
        &self,
        username: &str,
        login_type: &str,
        login: &HashMap<String, String>,
    ) -> Option<String> {
        if login_type != SUPPORTED_LOGIN_TYPE {
            debug!("Unsupported login type '{}'", login_type);
            return None;
        }
        let password = login.get("password")?;

        match self.verifier.verify_password(username, password).await {
            Ok(outcome) => outcome.into_account_id(),
            Err(e) => {
                warn!("Error during ldap authentication: {}", e);
                None
            }
        }
    }

    /// Check a third-party identifier login. Only `email` in search mode is supported.
    pub async fn check_3pid_auth(
        &self,
        medium: &str,
        address: &str,
        password: &str,
    ) -> Option<String> {
        match self
            .verifier
            .verify_third_party(medium, address, password)
            .await
        {
            Ok(AuthOutcome::Authenticated(account_id)) => Some(account_id),
            Ok(AuthOutcome::Rejected) => None,
            Err(e) => {
                warn!("Error during ldap 3PID authentication: {}", e);
                None
            }
        }
    }
}
