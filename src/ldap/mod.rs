pub mod ber;
pub mod bind;
pub mod codec;
pub mod filters;
pub mod operations;
pub mod protocol;

pub use bind::handle_bind_request;
pub use codec::LdapCodec;
pub use filters::{parse_ldap_filter, LdapFilter};
pub use operations::handle_operation;
pub use protocol::{LdapMessage, LdapMessageId, LdapProtocolOp, LdapResultCode};
