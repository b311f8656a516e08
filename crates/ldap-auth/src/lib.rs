//! Directory-backed password authentication
//!
//! Verifies credentials against an LDAP or Active Directory server and maps
//! the directory identity onto a local account, registering it on first login.

pub mod accounts;
pub mod config;
pub mod connector;
pub mod directory;
pub mod error;
pub mod ldap;
pub mod mapping;
pub mod provider;
pub mod registration;
pub mod storage;
pub mod upn;
pub mod verifier;

pub use accounts::{AccountDirectory, ExternalId, IdentityRecordStore, Registration};
pub use config::{LdapAuthConfig, LdapMode, RawLdapConfig};
pub use connector::{DirectoryConnector, SearchRequest};
pub use directory::{
    BindKind, BindOutcome, BoundSession, DirectoryClient, DirectoryEntry, DirectorySession,
    SearchScope,
};
pub use error::{LdapAuthError, Result};
pub use ldap::Ldap3Client;
pub use mapping::{IdentityMapper, LocalpartTemplate};
pub use provider::{LdapAuthProvider, SUPPORTED_LOGIN_FIELDS, SUPPORTED_LOGIN_TYPE};
pub use registration::RegistrationCoordinator;
pub use storage::{MemoryAccountDirectory, MemoryIdentityRecordStore};
pub use upn::{RootDomainCache, UpnParts, UpnResolver};
pub use verifier::{AuthOutcome, CredentialVerifier};
