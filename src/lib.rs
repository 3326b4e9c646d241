pub mod config;
pub mod crypto;
pub mod directory;
pub mod fixture;
pub mod ldap;
pub mod ldif;
pub mod server;

pub use config::FixtureConfig;
pub use directory::{DefaultDirectoryService, DirectoryService, Dn, LdapEntry, Partition};
pub use fixture::{EmbeddedDirectoryServer, FixtureState};

use ldap::protocol::LdapResultCode;

#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid DN: {0}")]
    InvalidDn(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("LDIF error at line {line}: {message}")]
    Ldif { line: usize, message: String },

    #[error("LDAP protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Entry already exists: {0}")]
    EntryAlreadyExists(String),

    #[error("Entry has children: {0}")]
    NotAllowedOnNonLeaf(String),

    #[error("No such attribute: {0}")]
    NoSuchAttribute(String),

    #[error("Object class violation: {0}")]
    ObjectClassViolation(String),

    #[error("Insufficient access rights: {0}")]
    InsufficientAccessRights(String),

    #[error("Unwilling to perform: {0}")]
    UnwillingToPerform(String),

    #[error("Directory service is not started")]
    NotStarted,

    #[error("Directory server is already started")]
    AlreadyStarted,

    #[error("Directory server has been stopped")]
    Stopped,

    #[error("Directory error: {0}")]
    Directory(String),
}

impl DirectoryError {
    /// The LDAP result code reported to clients for this error.
    pub fn result_code(&self) -> LdapResultCode {
        match self {
            DirectoryError::InvalidDn(_) => LdapResultCode::InvalidDNSyntax,
            DirectoryError::InvalidFilter(_) | DirectoryError::Protocol(_) => {
                LdapResultCode::ProtocolError
            }
            DirectoryError::Auth(_) | DirectoryError::InvalidCredentials => {
                LdapResultCode::InvalidCredentials
            }
            DirectoryError::NoSuchObject(_) => LdapResultCode::NoSuchObject,
            DirectoryError::EntryAlreadyExists(_) => LdapResultCode::EntryAlreadyExists,
            DirectoryError::NotAllowedOnNonLeaf(_) => LdapResultCode::NotAllowedOnNonLeaf,
            DirectoryError::NoSuchAttribute(_) => LdapResultCode::NoSuchAttribute,
            DirectoryError::ObjectClassViolation(_) => LdapResultCode::ObjectClassViolation,
            DirectoryError::InsufficientAccessRights(_) => {
                LdapResultCode::InsufficientAccessRights
            }
            DirectoryError::UnwillingToPerform(_) => LdapResultCode::UnwillingToPerform,
            DirectoryError::NotStarted | DirectoryError::Stopped => LdapResultCode::Unavailable,
            _ => LdapResultCode::OperationsError,
        }
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
