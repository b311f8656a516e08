//! Error types for directory authentication

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LdapAuthError>;

#[derive(Error, Debug)]
pub enum LdapAuthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Login cannot be mapped to a user principal name: {0}")]
    UnresolvableLogin(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("LDAP error: {0}")]
    Ldap(#[from] ldap3::LdapError),

    /// The server stopped returning entries at its size limit
    #[error("Search size limit exceeded after {0} entries")]
    SizeLimitExceeded(usize),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("External id {provider}/{external_id} is already linked to {account_id}")]
    IdentityConflict {
        provider: String,
        external_id: String,
        account_id: String,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LdapAuthError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Transport or protocol failure while talking to the directory.
    pub fn is_directory_error(&self) -> bool {
        matches!(self, Self::Directory(_) | Self::Ldap(_))
    }
}
