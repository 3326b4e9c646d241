pub mod auth;
pub mod changelog;
pub mod dn;
pub mod entry;
pub mod partition;
pub mod service;
pub mod session;

pub use auth::Principal;
pub use changelog::{ChangeKind, ChangeLog, ChangeLogEvent};
pub use dn::{Dn, Rdn};
pub use entry::{
    AttributeSyntax, AttributeValue, LdapAttribute, LdapEntry, Modification, ModificationOp,
};
pub use partition::{Partition, SearchScope};
pub use service::{DefaultDirectoryService, DirectoryService, ServiceFlags};
pub use session::CoreSession;
