use super::filters::LdapFilter;
use crate::directory::entry::ModificationOp;
use crate::directory::partition::SearchScope;
use crate::DirectoryError;

pub type LdapMessageId = i32;

#[derive(Debug, Clone, PartialEq)]
pub struct LdapMessage {
    pub message_id: LdapMessageId,
    pub protocol_op: LdapProtocolOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LdapProtocolOp {
    BindRequest {
        version: u8,
        dn: String,
        authentication: BindAuthentication,
    },
    BindResponse {
        result: LdapResult,
    },
    UnbindRequest,
    SearchRequest {
        base_dn: String,
        scope: SearchScope,
        deref_aliases: DerefAliases,
        size_limit: u32,
        time_limit: u32,
        types_only: bool,
        filter: LdapFilter,
        attributes: Vec<String>,
    },
    SearchResultEntry {
        dn: String,
        attributes: Vec<PartialAttribute>,
    },
    SearchResultDone {
        result: LdapResult,
    },
    ModifyRequest {
        dn: String,
        changes: Vec<ModifyChange>,
    },
    ModifyResponse {
        result: LdapResult,
    },
    AddRequest {
        dn: String,
        attributes: Vec<PartialAttribute>,
    },
    AddResponse {
        result: LdapResult,
    },
    DelRequest {
        dn: String,
    },
    DelResponse {
        result: LdapResult,
    },
    CompareRequest {
        dn: String,
        attribute: String,
        value: Vec<u8>,
    },
    CompareResponse {
        result: LdapResult,
    },
    AbandonRequest {
        message_id: LdapMessageId,
    },
    ExtendedRequest {
        name: String,
        value: Option<Vec<u8>>,
    },
    ExtendedResponse {
        result: LdapResult,
        name: Option<String>,
        value: Option<Vec<u8>>,
    },
}

impl LdapProtocolOp {
    /// Short operation name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            LdapProtocolOp::BindRequest { .. } => "bind",
            LdapProtocolOp::BindResponse { .. } => "bind response",
            LdapProtocolOp::UnbindRequest => "unbind",
            LdapProtocolOp::SearchRequest { .. } => "search",
            LdapProtocolOp::SearchResultEntry { .. } => "search entry",
            LdapProtocolOp::SearchResultDone { .. } => "search done",
            LdapProtocolOp::ModifyRequest { .. } => "modify",
            LdapProtocolOp::ModifyResponse { .. } => "modify response",
            LdapProtocolOp::AddRequest { .. } => "add",
            LdapProtocolOp::AddResponse { .. } => "add response",
            LdapProtocolOp::DelRequest { .. } => "delete",
            LdapProtocolOp::DelResponse { .. } => "delete response",
            LdapProtocolOp::CompareRequest { .. } => "compare",
            LdapProtocolOp::CompareResponse { .. } => "compare response",
            LdapProtocolOp::AbandonRequest { .. } => "abandon",
            LdapProtocolOp::ExtendedRequest { .. } => "extended",
            LdapProtocolOp::ExtendedResponse { .. } => "extended response",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindAuthentication {
    /// Simple bind; an empty password with an empty DN is an anonymous bind.
    Simple(String),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerefAliases {
    NeverDerefAliases = 0,
    DerefInSearching = 1,
    DerefFindingBaseObj = 2,
    DerefAlways = 3,
}

impl TryFrom<i64> for DerefAliases {
    type Error = DirectoryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DerefAliases::NeverDerefAliases),
            1 => Ok(DerefAliases::DerefInSearching),
            2 => Ok(DerefAliases::DerefFindingBaseObj),
            3 => Ok(DerefAliases::DerefAlways),
            other => Err(DirectoryError::Protocol(format!(
                "unknown derefAliases value {}",
                other
            ))),
        }
    }
}

/// An attribute description with its raw values, as carried by add
/// requests, modify changes and search result entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialAttribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl PartialAttribute {
    pub fn new(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            values: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifyChange {
    pub operation: ModificationOp,
    pub modification: PartialAttribute,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LdapResult {
    pub result_code: LdapResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum LdapResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    NoSuchObject = 32,
    AliasProblem = 33,
    InvalidDNSyntax = 34,
    InappropriateAuthentication = 48,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    LoopDetect = 54,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    NotAllowedOnRDN = 67,
    EntryAlreadyExists = 68,
    ObjectClassModsProhibited = 69,
    Other = 80,
}

impl TryFrom<i64> for LdapResultCode {
    type Error = DirectoryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        use LdapResultCode::*;
        let code = match value {
            0 => Success,
            1 => OperationsError,
            2 => ProtocolError,
            3 => TimeLimitExceeded,
            4 => SizeLimitExceeded,
            5 => CompareFalse,
            6 => CompareTrue,
            7 => AuthMethodNotSupported,
            8 => StrongerAuthRequired,
            16 => NoSuchAttribute,
            17 => UndefinedAttributeType,
            18 => InappropriateMatching,
            19 => ConstraintViolation,
            20 => AttributeOrValueExists,
            21 => InvalidAttributeSyntax,
            32 => NoSuchObject,
            33 => AliasProblem,
            34 => InvalidDNSyntax,
            48 => InappropriateAuthentication,
            49 => InvalidCredentials,
            50 => InsufficientAccessRights,
            51 => Busy,
            52 => Unavailable,
            53 => UnwillingToPerform,
            54 => LoopDetect,
            64 => NamingViolation,
            65 => ObjectClassViolation,
            66 => NotAllowedOnNonLeaf,
            67 => NotAllowedOnRDN,
            68 => EntryAlreadyExists,
            69 => ObjectClassModsProhibited,
            80 => Other,
            other => {
                return Err(DirectoryError::Protocol(format!(
                    "unknown result code {}",
                    other
                )))
            }
        };
        Ok(code)
    }
}

impl LdapResult {
    pub fn success() -> Self {
        Self {
            result_code: LdapResultCode::Success,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
        }
    }

    pub fn error(code: LdapResultCode, message: String) -> Self {
        Self {
            result_code: code,
            matched_dn: String::new(),
            diagnostic_message: message,
        }
    }

    pub fn from_error(error: &DirectoryError) -> Self {
        Self::error(error.result_code(), error.to_string())
    }
}
