use super::ber::{
    self, read_length, write_boolean, write_constructed, write_integer, write_octet_string,
    BerReader, TAG_BOOLEAN, TAG_ENUMERATED, TAG_INTEGER, TAG_OCTET_STRING, TAG_SEQUENCE, TAG_SET,
};
use super::filters::{ExtensibleFilter, LdapFilter, SubstringFilter, MAX_FILTER_DEPTH};
use super::protocol::*;
use crate::directory::entry::ModificationOp;
use crate::directory::partition::SearchScope;
use crate::DirectoryError;
use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

const LDAP_BIND_REQUEST: u8 = 0x60;
const LDAP_BIND_RESPONSE: u8 = 0x61;
const LDAP_UNBIND_REQUEST: u8 = 0x42;
const LDAP_SEARCH_REQUEST: u8 = 0x63;
const LDAP_SEARCH_RESULT_ENTRY: u8 = 0x64;
const LDAP_SEARCH_RESULT_DONE: u8 = 0x65;
const LDAP_MODIFY_REQUEST: u8 = 0x66;
const LDAP_MODIFY_RESPONSE: u8 = 0x67;
const LDAP_ADD_REQUEST: u8 = 0x68;
const LDAP_ADD_RESPONSE: u8 = 0x69;
const LDAP_DEL_REQUEST: u8 = 0x4a;
const LDAP_DEL_RESPONSE: u8 = 0x6b;
const LDAP_COMPARE_REQUEST: u8 = 0x6e;
const LDAP_COMPARE_RESPONSE: u8 = 0x6f;
const LDAP_ABANDON_REQUEST: u8 = 0x50;
const LDAP_EXTENDED_REQUEST: u8 = 0x77;
const LDAP_EXTENDED_RESPONSE: u8 = 0x78;

const AUTH_SIMPLE: u8 = 0x80;
const AUTH_SASL: u8 = 0xa3;
const EXTENDED_REQUEST_NAME: u8 = 0x80;
const EXTENDED_REQUEST_VALUE: u8 = 0x81;
const EXTENDED_RESPONSE_NAME: u8 = 0x8a;
const EXTENDED_RESPONSE_VALUE: u8 = 0x8b;

const FILTER_AND: u8 = 0xa0;
const FILTER_OR: u8 = 0xa1;
const FILTER_NOT: u8 = 0xa2;
const FILTER_EQUALITY: u8 = 0xa3;
const FILTER_SUBSTRINGS: u8 = 0xa4;
const FILTER_GREATER_OR_EQUAL: u8 = 0xa5;
const FILTER_LESS_OR_EQUAL: u8 = 0xa6;
const FILTER_PRESENT: u8 = 0x87;
const FILTER_APPROX: u8 = 0xa8;
const FILTER_EXTENSIBLE: u8 = 0xa9;

const SUBSTRING_INITIAL: u8 = 0x80;
const SUBSTRING_ANY: u8 = 0x81;
const SUBSTRING_FINAL: u8 = 0x82;

const MATCHING_RULE: u8 = 0x81;
const MATCHING_TYPE: u8 = 0x82;
const MATCHING_VALUE: u8 = 0x83;
const MATCHING_DN_ATTRIBUTES: u8 = 0x84;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Frames BER encoded LDAP messages on a byte stream.
#[derive(Debug, Clone)]
pub struct LdapCodec {
    max_message_size: usize,
}

impl LdapCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for LdapCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

fn invalid_data(e: DirectoryError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

impl Decoder for LdapCodec {
    type Item = LdapMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] != TAG_SEQUENCE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected LDAPMessage SEQUENCE, found 0x{:02x}", src[0]),
            ));
        }

        let Some((length, length_octets)) = read_length(&src[1..]).map_err(invalid_data)? else {
            return Ok(None);
        };

        if length > self.max_message_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "message of {} bytes exceeds the {} byte limit",
                    length, self.max_message_size
                ),
            ));
        }

        let total_len = 1 + length_octets + length;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total_len);
        let message = decode_message(&frame).map_err(invalid_data)?;
        trace!(
            "Decoded LDAP message: id={}, op={}",
            message.message_id,
            message.protocol_op.name()
        );
        Ok(Some(message))
    }
}

impl Encoder<LdapMessage> for LdapCodec {
    type Error = io::Error;

    fn encode(&mut self, item: LdapMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst);
        Ok(())
    }
}

/// Decodes one complete LDAPMessage. Controls are read past and ignored.
pub fn decode_message(data: &[u8]) -> crate::Result<LdapMessage> {
    let mut outer = BerReader::new(data);
    let mut message = outer.read_sequence(TAG_SEQUENCE)?;

    let message_id = read_message_id(&mut message)?;
    let (tag, body) = message.read_tlv()?;
    let mut reader = BerReader::new(body);

    let protocol_op = match tag {
        LDAP_BIND_REQUEST => {
            let version = reader.read_integer(TAG_INTEGER)?;
            let dn = reader.read_string(TAG_OCTET_STRING)?;
            let (auth_tag, auth) = reader.read_tlv()?;
            let authentication = match auth_tag {
                AUTH_SIMPLE => BindAuthentication::Simple(
                    String::from_utf8(auth.to_vec())
                        .map_err(|_| DirectoryError::Protocol("password is not UTF-8".into()))?,
                ),
                AUTH_SASL => {
                    let mut sasl = BerReader::new(auth);
                    let mechanism = sasl.read_string(TAG_OCTET_STRING)?;
                    let credentials = if sasl.is_empty() {
                        None
                    } else {
                        Some(sasl.read_octet_string(TAG_OCTET_STRING)?)
                    };
                    BindAuthentication::Sasl {
                        mechanism,
                        credentials,
                    }
                }
                other => {
                    return Err(DirectoryError::Protocol(format!(
                        "unknown authentication choice 0x{:02x}",
                        other
                    )))
                }
            };
            LdapProtocolOp::BindRequest {
                version: u8::try_from(version)
                    .map_err(|_| DirectoryError::Protocol(format!("bad version {}", version)))?,
                dn,
                authentication,
            }
        }

        LDAP_BIND_RESPONSE => LdapProtocolOp::BindResponse {
            result: read_result(&mut reader)?,
        },

        LDAP_UNBIND_REQUEST => LdapProtocolOp::UnbindRequest,

        LDAP_SEARCH_REQUEST => {
            let base_dn = reader.read_string(TAG_OCTET_STRING)?;
            let scope = SearchScope::try_from(reader.read_integer(TAG_ENUMERATED)?)?;
            let deref_aliases = DerefAliases::try_from(reader.read_integer(TAG_ENUMERATED)?)?;
            let size_limit = read_limit(&mut reader)?;
            let time_limit = read_limit(&mut reader)?;
            let types_only = reader.read_boolean(TAG_BOOLEAN)?;
            let filter = decode_filter(&mut reader, 0)?;
            let mut attribute_list = reader.read_sequence(TAG_SEQUENCE)?;
            let mut attributes = Vec::new();
            while !attribute_list.is_empty() {
                attributes.push(attribute_list.read_string(TAG_OCTET_STRING)?);
            }
            LdapProtocolOp::SearchRequest {
                base_dn,
                scope,
                deref_aliases,
                size_limit,
                time_limit,
                types_only,
                filter,
                attributes,
            }
        }

        LDAP_SEARCH_RESULT_ENTRY => LdapProtocolOp::SearchResultEntry {
            dn: reader.read_string(TAG_OCTET_STRING)?,
            attributes: read_attribute_list(&mut reader)?,
        },

        LDAP_SEARCH_RESULT_DONE => LdapProtocolOp::SearchResultDone {
            result: read_result(&mut reader)?,
        },

        LDAP_MODIFY_REQUEST => {
            let dn = reader.read_string(TAG_OCTET_STRING)?;
            let mut change_list = reader.read_sequence(TAG_SEQUENCE)?;
            let mut changes = Vec::new();
            while !change_list.is_empty() {
                let mut change = change_list.read_sequence(TAG_SEQUENCE)?;
                let operation = match change.read_integer(TAG_ENUMERATED)? {
                    0 => ModificationOp::Add,
                    1 => ModificationOp::Delete,
                    2 => ModificationOp::Replace,
                    other => {
                        return Err(DirectoryError::Protocol(format!(
                            "unknown modify operation {}",
                            other
                        )))
                    }
                };
                let modification = read_partial_attribute(&mut change)?;
                changes.push(ModifyChange {
                    operation,
                    modification,
                });
            }
            LdapProtocolOp::ModifyRequest { dn, changes }
        }

        LDAP_MODIFY_RESPONSE => LdapProtocolOp::ModifyResponse {
            result: read_result(&mut reader)?,
        },

        LDAP_ADD_REQUEST => LdapProtocolOp::AddRequest {
            dn: reader.read_string(TAG_OCTET_STRING)?,
            attributes: read_attribute_list(&mut reader)?,
        },

        LDAP_ADD_RESPONSE => LdapProtocolOp::AddResponse {
            result: read_result(&mut reader)?,
        },

        LDAP_DEL_REQUEST => LdapProtocolOp::DelRequest {
            dn: String::from_utf8(body.to_vec())
                .map_err(|_| DirectoryError::Protocol("DN is not UTF-8".into()))?,
        },

        LDAP_DEL_RESPONSE => LdapProtocolOp::DelResponse {
            result: read_result(&mut reader)?,
        },

        LDAP_COMPARE_REQUEST => {
            let dn = reader.read_string(TAG_OCTET_STRING)?;
            let mut ava = reader.read_sequence(TAG_SEQUENCE)?;
            LdapProtocolOp::CompareRequest {
                dn,
                attribute: ava.read_string(TAG_OCTET_STRING)?,
                value: ava.read_octet_string(TAG_OCTET_STRING)?,
            }
        }

        LDAP_COMPARE_RESPONSE => LdapProtocolOp::CompareResponse {
            result: read_result(&mut reader)?,
        },

        LDAP_ABANDON_REQUEST => LdapProtocolOp::AbandonRequest {
            message_id: i32::try_from(ber::decode_integer(body)?)
                .map_err(|_| DirectoryError::Protocol("abandon id out of range".into()))?,
        },

        LDAP_EXTENDED_REQUEST => {
            let name = reader.read_string(EXTENDED_REQUEST_NAME)?;
            let value = if reader.peek_tag() == Some(EXTENDED_REQUEST_VALUE) {
                Some(reader.read_octet_string(EXTENDED_REQUEST_VALUE)?)
            } else {
                None
            };
            LdapProtocolOp::ExtendedRequest { name, value }
        }

        LDAP_EXTENDED_RESPONSE => {
            let result = read_result(&mut reader)?;
            let name = if reader.peek_tag() == Some(EXTENDED_RESPONSE_NAME) {
                Some(reader.read_string(EXTENDED_RESPONSE_NAME)?)
            } else {
                None
            };
            let value = if reader.peek_tag() == Some(EXTENDED_RESPONSE_VALUE) {
                Some(reader.read_octet_string(EXTENDED_RESPONSE_VALUE)?)
            } else {
                None
            };
            LdapProtocolOp::ExtendedResponse {
                result,
                name,
                value,
            }
        }

        other => {
            return Err(DirectoryError::Protocol(format!(
                "unsupported operation tag 0x{:02x}",
                other
            )))
        }
    };

    Ok(LdapMessage {
        message_id,
        protocol_op,
    })
}

fn read_message_id(reader: &mut BerReader<'_>) -> crate::Result<LdapMessageId> {
    let id = reader.read_integer(TAG_INTEGER)?;
    i32::try_from(id)
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| DirectoryError::Protocol(format!("message id {} out of range", id)))
}

fn read_limit(reader: &mut BerReader<'_>) -> crate::Result<u32> {
    let limit = reader.read_integer(TAG_INTEGER)?;
    u32::try_from(limit).map_err(|_| DirectoryError::Protocol(format!("bad limit {}", limit)))
}

fn read_result(reader: &mut BerReader<'_>) -> crate::Result<LdapResult> {
    Ok(LdapResult {
        result_code: LdapResultCode::try_from(reader.read_integer(TAG_ENUMERATED)?)?,
        matched_dn: reader.read_string(TAG_OCTET_STRING)?,
        diagnostic_message: reader.read_string(TAG_OCTET_STRING)?,
    })
}

fn read_partial_attribute(reader: &mut BerReader<'_>) -> crate::Result<PartialAttribute> {
    let mut attribute = reader.read_sequence(TAG_SEQUENCE)?;
    let name = attribute.read_string(TAG_OCTET_STRING)?;
    let mut value_set = attribute.read_sequence(TAG_SET)?;
    let mut values = Vec::new();
    while !value_set.is_empty() {
        values.push(value_set.read_octet_string(TAG_OCTET_STRING)?);
    }
    Ok(PartialAttribute { name, values })
}

fn read_attribute_list(reader: &mut BerReader<'_>) -> crate::Result<Vec<PartialAttribute>> {
    let mut list = reader.read_sequence(TAG_SEQUENCE)?;
    let mut attributes = Vec::new();
    while !list.is_empty() {
        attributes.push(read_partial_attribute(&mut list)?);
    }
    Ok(attributes)
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

fn read_assertion(body: &[u8]) -> crate::Result<(String, String)> {
    let mut ava = BerReader::new(body);
    let attribute = ava.read_string(TAG_OCTET_STRING)?;
    let value = lossy(ava.read_octet_string(TAG_OCTET_STRING)?);
    Ok((attribute, value))
}

/// Decodes one BER filter element.
pub fn decode_filter(reader: &mut BerReader<'_>, depth: usize) -> crate::Result<LdapFilter> {
    if depth > MAX_FILTER_DEPTH {
        return Err(DirectoryError::InvalidFilter("filter nested too deeply".into()));
    }

    let (tag, body) = reader.read_tlv()?;
    let filter = match tag {
        FILTER_AND | FILTER_OR => {
            let mut inner = BerReader::new(body);
            let mut filters = Vec::new();
            while !inner.is_empty() {
                filters.push(decode_filter(&mut inner, depth + 1)?);
            }
            if tag == FILTER_AND {
                LdapFilter::And(filters)
            } else {
                LdapFilter::Or(filters)
            }
        }
        FILTER_NOT => {
            let mut inner = BerReader::new(body);
            LdapFilter::Not(Box::new(decode_filter(&mut inner, depth + 1)?))
        }
        FILTER_EQUALITY => {
            let (attr, value) = read_assertion(body)?;
            LdapFilter::Equality(attr, value)
        }
        FILTER_GREATER_OR_EQUAL => {
            let (attr, value) = read_assertion(body)?;
            LdapFilter::GreaterOrEqual(attr, value)
        }
        FILTER_LESS_OR_EQUAL => {
            let (attr, value) = read_assertion(body)?;
            LdapFilter::LessOrEqual(attr, value)
        }
        FILTER_APPROX => {
            let (attr, value) = read_assertion(body)?;
            LdapFilter::Approximate(attr, value)
        }
        FILTER_PRESENT => LdapFilter::Present(lossy(body.to_vec())),
        FILTER_SUBSTRINGS => {
            let mut inner = BerReader::new(body);
            let attr = inner.read_string(TAG_OCTET_STRING)?;
            let mut parts = inner.read_sequence(TAG_SEQUENCE)?;
            let mut substring = SubstringFilter {
                initial: None,
                any: Vec::new(),
                final_: None,
            };
            while !parts.is_empty() {
                let (part_tag, value) = parts.read_tlv()?;
                let value = lossy(value.to_vec());
                match part_tag {
                    SUBSTRING_INITIAL => substring.initial = Some(value),
                    SUBSTRING_ANY => substring.any.push(value),
                    SUBSTRING_FINAL => substring.final_ = Some(value),
                    other => {
                        return Err(DirectoryError::InvalidFilter(format!(
                            "unknown substring choice 0x{:02x}",
                            other
                        )))
                    }
                }
            }
            LdapFilter::Substring(attr, substring)
        }
        FILTER_EXTENSIBLE => {
            let mut inner = BerReader::new(body);
            let mut extensible = ExtensibleFilter {
                attribute: None,
                matching_rule: None,
                value: String::new(),
                dn_attributes: false,
            };
            while !inner.is_empty() {
                match inner.peek_tag() {
                    Some(MATCHING_RULE) => {
                        extensible.matching_rule = Some(inner.read_string(MATCHING_RULE)?)
                    }
                    Some(MATCHING_TYPE) => {
                        extensible.attribute = Some(inner.read_string(MATCHING_TYPE)?)
                    }
                    Some(MATCHING_VALUE) => {
                        extensible.value = lossy(inner.read_octet_string(MATCHING_VALUE)?)
                    }
                    Some(MATCHING_DN_ATTRIBUTES) => {
                        extensible.dn_attributes = inner.read_boolean(MATCHING_DN_ATTRIBUTES)?
                    }
                    other => {
                        return Err(DirectoryError::InvalidFilter(format!(
                            "unknown extensible match element {:?}",
                            other
                        )))
                    }
                }
            }
            LdapFilter::Extensible(extensible)
        }
        other => {
            return Err(DirectoryError::InvalidFilter(format!(
                "unknown filter choice 0x{:02x}",
                other
            )))
        }
    };
    Ok(filter)
}

pub fn encode_message(message: &LdapMessage, dst: &mut BytesMut) {
    write_constructed(dst, TAG_SEQUENCE, |content| {
        write_integer(content, TAG_INTEGER, message.message_id as i64);
        encode_protocol_op(&message.protocol_op, content);
    });
}

fn encode_protocol_op(op: &LdapProtocolOp, buf: &mut BytesMut) {
    match op {
        LdapProtocolOp::BindRequest {
            version,
            dn,
            authentication,
        } => write_constructed(buf, LDAP_BIND_REQUEST, |body| {
            write_integer(body, TAG_INTEGER, *version as i64);
            write_octet_string(body, TAG_OCTET_STRING, dn.as_bytes());
            match authentication {
                BindAuthentication::Simple(password) => {
                    write_octet_string(body, AUTH_SIMPLE, password.as_bytes())
                }
                BindAuthentication::Sasl {
                    mechanism,
                    credentials,
                } => write_constructed(body, AUTH_SASL, |sasl| {
                    write_octet_string(sasl, TAG_OCTET_STRING, mechanism.as_bytes());
                    if let Some(credentials) = credentials {
                        write_octet_string(sasl, TAG_OCTET_STRING, credentials);
                    }
                }),
            }
        }),

        LdapProtocolOp::BindResponse { result } => write_result(buf, LDAP_BIND_RESPONSE, result),

        LdapProtocolOp::UnbindRequest => {
            buf.put_u8(LDAP_UNBIND_REQUEST);
            buf.put_u8(0);
        }

        LdapProtocolOp::SearchRequest {
            base_dn,
            scope,
            deref_aliases,
            size_limit,
            time_limit,
            types_only,
            filter,
            attributes,
        } => write_constructed(buf, LDAP_SEARCH_REQUEST, |body| {
            write_octet_string(body, TAG_OCTET_STRING, base_dn.as_bytes());
            write_integer(body, TAG_ENUMERATED, *scope as i64);
            write_integer(body, TAG_ENUMERATED, *deref_aliases as i64);
            write_integer(body, TAG_INTEGER, *size_limit as i64);
            write_integer(body, TAG_INTEGER, *time_limit as i64);
            write_boolean(body, TAG_BOOLEAN, *types_only);
            encode_filter(filter, body);
            write_constructed(body, TAG_SEQUENCE, |list| {
                for attribute in attributes {
                    write_octet_string(list, TAG_OCTET_STRING, attribute.as_bytes());
                }
            });
        }),

        LdapProtocolOp::SearchResultEntry { dn, attributes } => {
            write_constructed(buf, LDAP_SEARCH_RESULT_ENTRY, |body| {
                write_octet_string(body, TAG_OCTET_STRING, dn.as_bytes());
                write_attribute_list(body, attributes);
            })
        }

        LdapProtocolOp::SearchResultDone { result } => {
            write_result(buf, LDAP_SEARCH_RESULT_DONE, result)
        }

        LdapProtocolOp::ModifyRequest { dn, changes } => {
            write_constructed(buf, LDAP_MODIFY_REQUEST, |body| {
                write_octet_string(body, TAG_OCTET_STRING, dn.as_bytes());
                write_constructed(body, TAG_SEQUENCE, |list| {
                    for change in changes {
                        write_constructed(list, TAG_SEQUENCE, |item| {
                            let operation = match change.operation {
                                ModificationOp::Add => 0,
                                ModificationOp::Delete => 1,
                                ModificationOp::Replace => 2,
                            };
                            write_integer(item, TAG_ENUMERATED, operation);
                            write_partial_attribute(item, &change.modification);
                        });
                    }
                });
            })
        }

        LdapProtocolOp::ModifyResponse { result } => {
            write_result(buf, LDAP_MODIFY_RESPONSE, result)
        }

        LdapProtocolOp::AddRequest { dn, attributes } => {
            write_constructed(buf, LDAP_ADD_REQUEST, |body| {
                write_octet_string(body, TAG_OCTET_STRING, dn.as_bytes());
                write_attribute_list(body, attributes);
            })
        }

        LdapProtocolOp::AddResponse { result } => write_result(buf, LDAP_ADD_RESPONSE, result),

        LdapProtocolOp::DelRequest { dn } => {
            write_octet_string(buf, LDAP_DEL_REQUEST, dn.as_bytes())
        }

        LdapProtocolOp::DelResponse { result } => write_result(buf, LDAP_DEL_RESPONSE, result),

        LdapProtocolOp::CompareRequest {
            dn,
            attribute,
            value,
        } => write_constructed(buf, LDAP_COMPARE_REQUEST, |body| {
            write_octet_string(body, TAG_OCTET_STRING, dn.as_bytes());
            write_constructed(body, TAG_SEQUENCE, |ava| {
                write_octet_string(ava, TAG_OCTET_STRING, attribute.as_bytes());
                write_octet_string(ava, TAG_OCTET_STRING, value);
            });
        }),

        LdapProtocolOp::CompareResponse { result } => {
            write_result(buf, LDAP_COMPARE_RESPONSE, result)
        }

        LdapProtocolOp::AbandonRequest { message_id } => {
            write_integer(buf, LDAP_ABANDON_REQUEST, *message_id as i64)
        }

        LdapProtocolOp::ExtendedRequest { name, value } => {
            write_constructed(buf, LDAP_EXTENDED_REQUEST, |body| {
                write_octet_string(body, EXTENDED_REQUEST_NAME, name.as_bytes());
                if let Some(value) = value {
                    write_octet_string(body, EXTENDED_REQUEST_VALUE, value);
                }
            })
        }

        LdapProtocolOp::ExtendedResponse {
            result,
            name,
            value,
        } => write_constructed(buf, LDAP_EXTENDED_RESPONSE, |body| {
            write_result_fields(body, result);
            if let Some(name) = name {
                write_octet_string(body, EXTENDED_RESPONSE_NAME, name.as_bytes());
            }
            if let Some(value) = value {
                write_octet_string(body, EXTENDED_RESPONSE_VALUE, value);
            }
        }),
    }
}

fn write_result_fields(buf: &mut BytesMut, result: &LdapResult) {
    write_integer(buf, TAG_ENUMERATED, result.result_code as i64);
    write_octet_string(buf, TAG_OCTET_STRING, result.matched_dn.as_bytes());
    write_octet_string(buf, TAG_OCTET_STRING, result.diagnostic_message.as_bytes());
}

fn write_result(buf: &mut BytesMut, tag: u8, result: &LdapResult) {
    write_constructed(buf, tag, |body| write_result_fields(body, result));
}

fn write_partial_attribute(buf: &mut BytesMut, attribute: &PartialAttribute) {
    write_constructed(buf, TAG_SEQUENCE, |attr| {
        write_octet_string(attr, TAG_OCTET_STRING, attribute.name.as_bytes());
        write_constructed(attr, TAG_SET, |set| {
            for value in &attribute.values {
                write_octet_string(set, TAG_OCTET_STRING, value);
            }
        });
    });
}

fn write_attribute_list(buf: &mut BytesMut, attributes: &[PartialAttribute]) {
    write_constructed(buf, TAG_SEQUENCE, |list| {
        for attribute in attributes {
            write_partial_attribute(list, attribute);
        }
    });
}

fn write_assertion(buf: &mut BytesMut, tag: u8, attribute: &str, value: &str) {
    write_constructed(buf, tag, |ava| {
        write_octet_string(ava, TAG_OCTET_STRING, attribute.as_bytes());
        write_octet_string(ava, TAG_OCTET_STRING, value.as_bytes());
    });
}

pub fn encode_filter(filter: &LdapFilter, buf: &mut BytesMut) {
    match filter {
        LdapFilter::And(filters) | LdapFilter::Or(filters) => {
            let tag = if matches!(filter, LdapFilter::And(_)) {
                FILTER_AND
            } else {
                FILTER_OR
            };
            write_constructed(buf, tag, |inner| {
                for f in filters {
                    encode_filter(f, inner);
                }
            });
        }
        LdapFilter::Not(inner) => write_constructed(buf, FILTER_NOT, |body| encode_filter(inner, body)),
        LdapFilter::Equality(attr, value) => write_assertion(buf, FILTER_EQUALITY, attr, value),
        LdapFilter::GreaterOrEqual(attr, value) => {
            write_assertion(buf, FILTER_GREATER_OR_EQUAL, attr, value)
        }
        LdapFilter::LessOrEqual(attr, value) => {
            write_assertion(buf, FILTER_LESS_OR_EQUAL, attr, value)
        }
        LdapFilter::Approximate(attr, value) => write_assertion(buf, FILTER_APPROX, attr, value),
        LdapFilter::Present(attr) => write_octet_string(buf, FILTER_PRESENT, attr.as_bytes()),
        LdapFilter::Substring(attr, substring) => {
            write_constructed(buf, FILTER_SUBSTRINGS, |body| {
                write_octet_string(body, TAG_OCTET_STRING, attr.as_bytes());
                write_constructed(body, TAG_SEQUENCE, |parts| {
                    if let Some(initial) = &substring.initial {
                        write_octet_string(parts, SUBSTRING_INITIAL, initial.as_bytes());
                    }
                    for any in &substring.any {
                        write_octet_string(parts, SUBSTRING_ANY, any.as_bytes());
                    }
                    if let Some(final_) = &substring.final_ {
                        write_octet_string(parts, SUBSTRING_FINAL, final_.as_bytes());
                    }
                });
            })
        }
        LdapFilter::Extensible(ext) => write_constructed(buf, FILTER_EXTENSIBLE, |body| {
            if let Some(rule) = &ext.matching_rule {
                write_octet_string(body, MATCHING_RULE, rule.as_bytes());
            }
            if let Some(attr) = &ext.attribute {
                write_octet_string(body, MATCHING_TYPE, attr.as_bytes());
            }
            write_octet_string(body, MATCHING_VALUE, ext.value.as_bytes());
            if ext.dn_attributes {
                write_boolean(body, MATCHING_DN_ATTRIBUTES, true);
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::filters::parse_ldap_filter;

    fn encode(message: &LdapMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        LdapCodec::default().encode(message.clone(), &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_decode_bind_request_bytes() {
        // Simple bind as cn=admin with password "secret", message id 1
        let bytes: &[u8] = &[
            0x30, 0x1a, 0x02, 0x01, 0x01, 0x60, 0x15, 0x02, 0x01, 0x03, 0x04, 0x08, b'c', b'n',
            b'=', b'a', b'd', b'm', b'i', b'n', 0x80, 0x06, b's', b'e', b'c', b'r', b'e', b't',
        ];
        let mut buf = BytesMut::from(bytes);
        let message = LdapCodec::default().decode(&mut buf).unwrap().unwrap();

        assert_eq!(message.message_id, 1);
        assert_eq!(
            message.protocol_op,
            LdapProtocolOp::BindRequest {
                version: 3,
                dn: "cn=admin".to_string(),
                authentication: BindAuthentication::Simple("secret".to_string()),
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_result_code_is_enumerated() {
        let buf = encode(&LdapMessage {
            message_id: 1,
            protocol_op: LdapProtocolOp::BindResponse {
                result: LdapResult::success(),
            },
        });
        assert_eq!(
            &buf[..],
            &[0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00]
        );
    }

    #[test]
    fn test_partial_frames_wait_for_more_data() {
        let buf = encode(&LdapMessage {
            message_id: 3,
            protocol_op: LdapProtocolOp::DelRequest {
                dn: "cn=gone,dc=example,dc=org".to_string(),
            },
        });

        let mut codec = LdapCodec::default();
        let mut partial = BytesMut::from(&buf[..buf.len() - 4]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&buf[buf.len() - 4..]);
        let message = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(
            message.protocol_op,
            LdapProtocolOp::DelRequest {
                dn: "cn=gone,dc=example,dc=org".to_string()
            }
        );
    }

    #[test]
    fn test_search_request_survives_codec() {
        let message = LdapMessage {
            message_id: 7,
            protocol_op: LdapProtocolOp::SearchRequest {
                base_dn: "dc=example,dc=org".to_string(),
                scope: SearchScope::WholeSubtree,
                deref_aliases: DerefAliases::NeverDerefAliases,
                size_limit: 10,
                time_limit: 0,
                types_only: false,
                filter: parse_ldap_filter(
                    "(&(objectClass=person)(|(cn=jo*n*d)(!(uid=x)))(uidNumber>=5)(cn:dn:2.5.13.5:=a))",
                )
                .unwrap(),
                attributes: vec!["cn".to_string(), "+".to_string()],
            },
        };

        let mut buf = encode(&message);
        let decoded = LdapCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_modify_and_extended_requests() {
        let modify = LdapMessage {
            message_id: 4,
            protocol_op: LdapProtocolOp::ModifyRequest {
                dn: "cn=jdoe,dc=example,dc=org".to_string(),
                changes: vec![ModifyChange {
                    operation: ModificationOp::Replace,
                    modification: PartialAttribute::new("mail", &["j@example.org"]),
                }],
            },
        };
        let extended = LdapMessage {
            message_id: 5,
            protocol_op: LdapProtocolOp::ExtendedRequest {
                name: "1.3.6.1.4.1.4203.1.11.3".to_string(),
                value: None,
            },
        };

        let mut buf = encode(&modify);
        buf.extend_from_slice(&encode(&extended));

        let mut codec = LdapCodec::default();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), modify);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), extended);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut codec = LdapCodec::new(16);
        let mut buf = BytesMut::from(&[0x30, 0x84, 0x00, 0x01, 0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert!(LdapCodec::default().decode(&mut buf).is_err());

        // Valid envelope around an unknown operation
        let mut buf = BytesMut::from(&[0x30, 0x05, 0x02, 0x01, 0x01, 0x7f, 0x00][..]);
        assert!(LdapCodec::default().decode(&mut buf).is_err());
    }
}
