//! Configuration for directory authentication
//!
//! Configuration is read in two steps: the document is deserialized into
//! [`RawLdapConfig`], where every key is optional, and [`LdapAuthConfig::parse`]
//! then enforces required keys and mutually exclusive options before anything
//! talks to the directory.

use crate::error::{LdapAuthError, Result};
use crate::mapping::LocalpartTemplate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Provider tag under which original directory localparts are recorded.
pub const DEFAULT_EXTERNAL_ID_PROVIDER: &str = "ldap_original";

/// Default size of the directory worker pool.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 10;

/// How a user's password is checked against the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LdapMode {
    /// Bind directly as `<uid attribute>=<login>,<base>`
    Simple,
    /// Search for the user with a service account, then bind as the entry found
    Search,
}

impl fmt::Display for LdapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdapMode::Simple => write!(f, "simple"),
            LdapMode::Search => write!(f, "search"),
        }
    }
}

/// A single endpoint or a list of endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UriList {
    One(String),
    Many(Vec<String>),
}

impl UriList {
    fn into_vec(self) -> Vec<String> {
        match self {
            UriList::One(uri) => vec![uri],
            UriList::Many(uris) => uris,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsOptions {
    /// Whether to verify the server certificate
    #[serde(default = "default_true")]
    pub validate: bool,

    /// PEM bundle with additional trusted CA certificates
    pub ca_certs_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// TLS policy: either the plain `validate_cert` switch or explicit options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    ValidateCert(bool),
    Options(TlsOptions),
}

impl TlsPolicy {
    pub fn verify_certificates(&self) -> bool {
        match self {
            TlsPolicy::ValidateCert(validate) => *validate,
            TlsPolicy::Options(options) => options.validate,
        }
    }

    pub fn ca_certs_file(&self) -> Option<&Path> {
        match self {
            TlsPolicy::ValidateCert(_) => None,
            TlsPolicy::Options(options) => options.ca_certs_file.as_deref(),
        }
    }
}

/// Directory attribute names used for the login, display name and email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMap {
    pub uid: String,
    pub name: String,
    pub mail: String,
}

impl AttributeMap {
    pub fn all(&self) -> Vec<&str> {
        vec![self.uid.as_str(), self.name.as_str(), self.mail.as_str()]
    }
}

/// Service account used for searches and root domain discovery
#[derive(Clone, PartialEq, Eq)]
pub struct BindCredentials {
    pub dn: String,
    pub password: String,
}

impl fmt::Debug for BindCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindCredentials")
            .field("dn", &self.dn)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveDirectoryConfig {
    /// Domain assumed for logins without a domain qualifier
    pub default_domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMappingConfig {
    pub localpart_template: Option<LocalpartTemplate>,
    pub external_id_provider: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUserMapping {
    pub localpart_template: Option<String>,
    pub external_id_provider: Option<String>,
}

/// Configuration document as written by the operator
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLdapConfig {
    pub enabled: Option<bool>,
    pub mode: Option<LdapMode>,
    pub uri: Option<UriList>,
    pub start_tls: Option<bool>,
    pub validate_cert: Option<bool>,
    pub tls_options: Option<TlsOptions>,
    pub base: Option<String>,
    pub attributes: Option<HashMap<String, String>>,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    pub bind_password_file: Option<PathBuf>,
    pub filter: Option<String>,
    pub active_directory: Option<bool>,
    pub default_domain: Option<String>,
    pub user_mapping: Option<RawUserMapping>,
    pub timeout_secs: Option<u64>,
    pub max_concurrent_operations: Option<usize>,
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct LdapAuthConfig {
    /// Whether the host should load this provider; not consulted by the provider itself
    pub enabled: bool,
    pub mode: LdapMode,
    pub uris: Vec<String>,
    pub start_tls: bool,
    pub tls: TlsPolicy,
    pub base: String,
    pub attributes: AttributeMap,
    pub bind: Option<BindCredentials>,
    pub filter: Option<String>,
    pub active_directory: Option<ActiveDirectoryConfig>,
    pub user_mapping: Option<UserMappingConfig>,
    pub timeout: Option<Duration>,
    pub max_concurrent_operations: usize,
}

impl LdapAuthConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawLdapConfig = toml::from_str(s)?;
        Self::parse(raw)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let raw: RawLdapConfig = serde_yaml::from_str(s)?;
        Self::parse(raw)
    }

    /// Load from a `.yaml`/`.yml` or TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn parse(raw: RawLdapConfig) -> Result<Self> {
        let mut missing = Vec::new();
        if raw.uri.is_none() {
            missing.push("uri");
        }
        if raw.base.is_none() {
            missing.push("base");
        }
        if raw.attributes.is_none() {
            missing.push("attributes");
        }
        require_keys(&missing)?;

        let uris = raw.uri.map(UriList::into_vec).unwrap_or_default();
        if uris.is_empty() {
            return Err(LdapAuthError::config("uri must name at least one server"));
        }

        let mut mode = raw.mode.unwrap_or(LdapMode::Simple);

        let bind = match raw.bind_dn {
            Some(dn) => {
                mode = LdapMode::Search;
                let password = match (raw.bind_password, raw.bind_password_file) {
                    (Some(password), _) => password,
                    (None, Some(path)) => read_password_file(&path)?,
                    (None, None) => {
                        return Err(LdapAuthError::config(
                            "Either bind_password or bind_password_file must be set",
                        ))
                    }
                };
                Some(BindCredentials { dn, password })
            }
            None => None,
        };

        if mode == LdapMode::Search && bind.is_none() {
            return Err(LdapAuthError::config(
                "search mode requires bind_dn and bind_password",
            ));
        }

        let attributes = raw.attributes.unwrap_or_default();
        let missing: Vec<&str> = ["uid", "name", "mail"]
            .into_iter()
            .filter(|key| !attributes.contains_key(*key))
            .collect();
        require_keys(&missing)?;
        let attributes = AttributeMap {
            uid: attributes["uid"].clone(),
            name: attributes["name"].clone(),
            mail: attributes["mail"].clone(),
        };

        let tls = match (raw.validate_cert, raw.tls_options) {
            (Some(_), Some(_)) => {
                return Err(LdapAuthError::config(
                    "You cannot include both validate_cert and tls_options in the config",
                ))
            }
            (_, Some(options)) => TlsPolicy::Options(options),
            (validate, None) => TlsPolicy::ValidateCert(validate.unwrap_or(true)),
        };

        let filter = match mode {
            LdapMode::Search => raw.filter,
            LdapMode::Simple => None,
        };

        let active_directory = if raw.active_directory.unwrap_or(false) {
            Some(ActiveDirectoryConfig {
                default_domain: raw.default_domain,
            })
        } else {
            None
        };

        let user_mapping = match raw.user_mapping {
            Some(mapping) => Some(UserMappingConfig {
                localpart_template: mapping
                    .localpart_template
                    .filter(|template| !template.is_empty())
                    .map(LocalpartTemplate::new)
                    .transpose()?,
                external_id_provider: mapping
                    .external_id_provider
                    .unwrap_or_else(|| DEFAULT_EXTERNAL_ID_PROVIDER.to_string()),
            }),
            None => None,
        };

        let max_concurrent_operations = raw
            .max_concurrent_operations
            .unwrap_or(DEFAULT_MAX_CONCURRENT_OPERATIONS);
        if max_concurrent_operations == 0 {
            return Err(LdapAuthError::config(
                "max_concurrent_operations must be at least 1",
            ));
        }

        Ok(Self {
            enabled: raw.enabled.unwrap_or(false),
            mode,
            uris,
            start_tls: raw.start_tls.unwrap_or(false),
            tls,
            base: raw.base.unwrap_or_default(),
            attributes,
            bind,
            filter,
            active_directory,
            user_mapping,
            timeout: raw.timeout_secs.map(Duration::from_secs),
            max_concurrent_operations,
        })
    }

    pub fn default_domain(&self) -> Option<&str> {
        self.active_directory
            .as_ref()
            .and_then(|ad| ad.default_domain.as_deref())
    }

    pub fn localpart_template(&self) -> Option<&LocalpartTemplate> {
        self.user_mapping
            .as_ref()
            .and_then(|mapping| mapping.localpart_template.as_ref())
    }

    pub fn external_id_provider(&self) -> &str {
        self.user_mapping
            .as_ref()
            .map(|mapping| mapping.external_id_provider.as_str())
            .unwrap_or(DEFAULT_EXTERNAL_ID_PROVIDER)
    }
}

fn require_keys(missing: &[&str]) -> Result<()> {
    if missing.is_empty() {
        return Ok(());
    }
    Err(LdapAuthError::config(format!(
        "missing required config values: {}",
        missing.join(", ")
    )))
}

fn read_password_file(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)?;
    Ok(content.trim_end_matches('\n').to_string())
}
