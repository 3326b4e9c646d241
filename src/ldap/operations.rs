use super::bind::handle_bind_request;
use super::protocol::*;
use crate::directory::entry::is_operational_attribute;
use crate::directory::service::WHO_AM_I_OID;
use crate::directory::{
    AttributeSyntax, AttributeValue, DirectoryService, Dn, LdapEntry, Modification,
};
use crate::server::session::LdapSession;
use tracing::{debug, warn};

const NO_ATTRIBUTES: &str = "1.1";

/// Runs one request against the directory and returns the responses to send
/// back, in order. Unbind and abandon produce no response.
pub fn handle_operation<S: DirectoryService + ?Sized>(
    message: LdapMessage,
    service: &S,
    session: &mut LdapSession,
) -> Vec<LdapMessage> {
    let message_id = message.message_id;
    let respond = |protocol_op| {
        vec![LdapMessage {
            message_id,
            protocol_op,
        }]
    };

    match message.protocol_op {
        LdapProtocolOp::BindRequest {
            version,
            dn,
            authentication,
        } => vec![handle_bind_request(
            message_id,
            version,
            &dn,
            authentication,
            service,
            session,
        )],

        LdapProtocolOp::UnbindRequest => Vec::new(),

        LdapProtocolOp::AbandonRequest { message_id: target } => {
            // Requests run to completion before the next one is read
            debug!("Ignoring abandon of message {}", target);
            Vec::new()
        }

        LdapProtocolOp::SearchRequest {
            base_dn,
            scope,
            size_limit,
            types_only,
            filter,
            attributes,
            ..
        } => {
            let entries = Dn::parse(&base_dn).and_then(|base| {
                service
                    .session(session.principal().clone())
                    .search_with(&base, scope, &filter)
            });

            let mut entries = match entries {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Search under {:?} failed: {}", base_dn, e);
                    return respond(LdapProtocolOp::SearchResultDone {
                        result: LdapResult::from_error(&e),
                    });
                }
            };

            let mut result = LdapResult::success();
            if size_limit > 0 && entries.len() > size_limit as usize {
                entries.truncate(size_limit as usize);
                result = LdapResult::error(
                    LdapResultCode::SizeLimitExceeded,
                    format!("size limit of {} exceeded", size_limit),
                );
            }

            let denormalize = service.flags().denormalize_op_attrs_enabled;
            let mut responses: Vec<LdapMessage> = entries
                .iter()
                .map(|entry| LdapMessage {
                    message_id,
                    protocol_op: LdapProtocolOp::SearchResultEntry {
                        dn: entry.dn.up_name().to_string(),
                        attributes: select_attributes(entry, &attributes, types_only, denormalize),
                    },
                })
                .collect();

            responses.push(LdapMessage {
                message_id,
                protocol_op: LdapProtocolOp::SearchResultDone { result },
            });
            responses
        }

        LdapProtocolOp::AddRequest { dn, attributes } => {
            let result = Dn::parse(&dn).and_then(|dn| {
                let mut entry = service.new_entry(dn);
                for attribute in attributes {
                    for value in attribute.values {
                        entry.put_value(
                            &attribute.name,
                            AttributeValue::from_bytes(&attribute.name, value),
                        );
                    }
                }
                service.session(session.principal().clone()).add(entry)
            });
            respond(LdapProtocolOp::AddResponse {
                result: to_result(result, "add", &dn),
            })
        }

        LdapProtocolOp::DelRequest { dn } => {
            let result = service.session(session.principal().clone()).delete(&dn);
            respond(LdapProtocolOp::DelResponse {
                result: to_result(result, "delete", &dn),
            })
        }

        LdapProtocolOp::ModifyRequest { dn, changes } => {
            let modifications: Vec<Modification> = changes
                .into_iter()
                .map(|change| {
                    let name = change.modification.name;
                    Modification {
                        op: change.operation,
                        values: change
                            .modification
                            .values
                            .into_iter()
                            .map(|v| AttributeValue::from_bytes(&name, v))
                            .collect(),
                        attribute: name,
                    }
                })
                .collect();

            let result = service
                .session(session.principal().clone())
                .modify(&dn, &modifications);
            respond(LdapProtocolOp::ModifyResponse {
                result: to_result(result, "modify", &dn),
            })
        }

        LdapProtocolOp::CompareRequest {
            dn,
            attribute,
            value,
        } => {
            let assertion = String::from_utf8_lossy(&value);
            let result = match service
                .session(session.principal().clone())
                .compare(&dn, &attribute, &assertion)
            {
                Ok(true) => LdapResult::error(LdapResultCode::CompareTrue, String::new()),
                Ok(false) => LdapResult::error(LdapResultCode::CompareFalse, String::new()),
                Err(e) => {
                    debug!("Compare on {:?} failed: {}", dn, e);
                    LdapResult::from_error(&e)
                }
            };
            respond(LdapProtocolOp::CompareResponse { result })
        }

        LdapProtocolOp::ExtendedRequest { name, .. } => {
            if name == WHO_AM_I_OID {
                let authz_id = session
                    .bound_dn()
                    .map(|dn| format!("dn:{}", dn))
                    .unwrap_or_default();
                respond(LdapProtocolOp::ExtendedResponse {
                    result: LdapResult::success(),
                    name: None,
                    value: Some(authz_id.into_bytes()),
                })
            } else {
                respond(LdapProtocolOp::ExtendedResponse {
                    result: LdapResult::error(
                        LdapResultCode::ProtocolError,
                        format!("unsupported extended operation {}", name),
                    ),
                    name: None,
                    value: None,
                })
            }
        }

        other => {
            warn!("Client sent a {} message, ignoring it", other.name());
            Vec::new()
        }
    }
}

fn to_result(result: crate::Result<()>, operation: &str, dn: &str) -> LdapResult {
    match result {
        Ok(()) => LdapResult::success(),
        Err(e) => {
            debug!("{} of {:?} failed: {}", operation, dn, e);
            LdapResult::from_error(&e)
        }
    }
}

/// Picks the attributes of `entry` a search asked for.
///
/// No list or `*` selects every user attribute and `+` every operational one.
/// Operational attributes are otherwise only returned when named. A lone
/// `1.1` selects nothing.
pub fn select_attributes(
    entry: &LdapEntry,
    requested: &[String],
    types_only: bool,
    denormalize: bool,
) -> Vec<PartialAttribute> {
    let all_user = requested.is_empty() || requested.iter().any(|a| a == "*");
    let all_operational = requested.iter().any(|a| a == "+");

    let mut selected: Vec<_> = entry
        .attributes
        .values()
        .filter(|attr| {
            let operational = is_operational_attribute(&attr.name);
            let named = requested
                .iter()
                .any(|a| a != NO_ATTRIBUTES && a.eq_ignore_ascii_case(&attr.name));
            named || (operational && all_operational) || (!operational && all_user)
        })
        .collect();

    // objectClass first, then by name
    selected.sort_by_key(|attr| {
        (
            !attr.name.eq_ignore_ascii_case("objectClass"),
            attr.name.to_lowercase(),
        )
    });

    selected
        .into_iter()
        .map(|attr| PartialAttribute {
            name: attr.name.clone(),
            values: if types_only {
                Vec::new()
            } else {
                attr.values
                    .iter()
                    .map(|value| encode_value(value, attr.syntax, denormalize))
                    .collect()
            },
        })
        .collect()
}

fn encode_value(value: &AttributeValue, syntax: AttributeSyntax, denormalize: bool) -> Vec<u8> {
    match value {
        AttributeValue::Dn(dn) if syntax == AttributeSyntax::Dn && !denormalize => Dn::parse(dn)
            .map(|dn| dn.normalized().as_bytes().to_vec())
            .unwrap_or_else(|_| dn.as_bytes().to_vec()),
        other => other.as_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DefaultDirectoryService, Partition, Principal, SearchScope, ServiceFlags};
    use crate::ldap::filters::parse_ldap_filter;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> DefaultDirectoryService {
        let service = DefaultDirectoryService::new(dir.path(), ServiceFlags::fixture());
        service
            .add_partition(Partition::new("example", "dc=example,dc=org").unwrap())
            .unwrap();
        service.startup().unwrap();
        let mut root = LdapEntry::new(Dn::parse("dc=example,dc=org").unwrap());
        root.add_values("objectClass", &["top", "domain"]);
        service.admin_session().add(root).unwrap();
        service
    }

    fn admin_session() -> LdapSession {
        let mut session = LdapSession::new();
        session.bind(Principal::Admin);
        session
    }

    fn request(message_id: i32, protocol_op: LdapProtocolOp) -> LdapMessage {
        LdapMessage {
            message_id,
            protocol_op,
        }
    }

    fn add_person(service: &DefaultDirectoryService, session: &mut LdapSession, uid: &str) -> LdapResultCode {
        let responses = handle_operation(
            request(
                2,
                LdapProtocolOp::AddRequest {
                    dn: format!("uid={},dc=example,dc=org", uid),
                    attributes: vec![
                        PartialAttribute::new("objectClass", &["top", "person"]),
                        PartialAttribute::new("sn", &["Doe"]),
                    ],
                },
            ),
            service,
            session,
        );
        match &responses[0].protocol_op {
            LdapProtocolOp::AddResponse { result } => result.result_code,
            other => panic!("Expected AddResponse, got {:?}", other),
        }
    }

    fn search(
        service: &DefaultDirectoryService,
        session: &mut LdapSession,
        filter: &str,
        attributes: &[&str],
        size_limit: u32,
    ) -> Vec<LdapMessage> {
        handle_operation(
            request(
                3,
                LdapProtocolOp::SearchRequest {
                    base_dn: "dc=example,dc=org".to_string(),
                    scope: SearchScope::WholeSubtree,
                    deref_aliases: DerefAliases::NeverDerefAliases,
                    size_limit,
                    time_limit: 0,
                    types_only: false,
                    filter: parse_ldap_filter(filter).unwrap(),
                    attributes: attributes.iter().map(|a| a.to_string()).collect(),
                },
            ),
            service,
            session,
        )
    }

    #[test]
    fn test_add_then_search() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let mut session = admin_session();

        assert_eq!(add_person(&service, &mut session, "jdoe"), LdapResultCode::Success);
        assert_eq!(
            add_person(&service, &mut session, "jdoe"),
            LdapResultCode::EntryAlreadyExists
        );

        let responses = search(&service, &mut session, "(uid=jdoe)", &[], 0);
        assert_eq!(responses.len(), 2);
        match &responses[0].protocol_op {
            LdapProtocolOp::SearchResultEntry { dn, attributes } => {
                assert_eq!(dn, "uid=jdoe,dc=example,dc=org");
                assert_eq!(attributes[0].name, "objectClass");
                assert!(attributes.iter().any(|a| a.name == "uid"));
                assert!(!attributes.iter().any(|a| a.name == "createTimestamp"));
            }
            other => panic!("Expected SearchResultEntry, got {:?}", other),
        }
        assert!(matches!(
            &responses[1].protocol_op,
            LdapProtocolOp::SearchResultDone { result } if result.result_code == LdapResultCode::Success
        ));
    }

    #[test]
    fn test_anonymous_cannot_add() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let mut session = LdapSession::new();
        assert_eq!(
            add_person(&service, &mut session, "jdoe"),
            LdapResultCode::InsufficientAccessRights
        );
    }

    #[test]
    fn test_size_limit() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let mut session = admin_session();
        for uid in ["a", "b", "c"] {
            add_person(&service, &mut session, uid);
        }

        let responses = search(&service, &mut session, "(objectClass=person)", &["1.1"], 2);
        assert_eq!(responses.len(), 3);
        match &responses[0].protocol_op {
            LdapProtocolOp::SearchResultEntry { attributes, .. } => assert!(attributes.is_empty()),
            other => panic!("Expected SearchResultEntry, got {:?}", other),
        }
        assert!(matches!(
            &responses[2].protocol_op,
            LdapProtocolOp::SearchResultDone { result } if result.result_code == LdapResultCode::SizeLimitExceeded
        ));
    }

    #[test]
    fn test_missing_base_reports_no_such_object() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let mut session = admin_session();
        let responses = handle_operation(
            request(
                4,
                LdapProtocolOp::SearchRequest {
                    base_dn: "ou=missing,dc=example,dc=org".to_string(),
                    scope: SearchScope::BaseObject,
                    deref_aliases: DerefAliases::NeverDerefAliases,
                    size_limit: 0,
                    time_limit: 0,
                    types_only: false,
                    filter: parse_ldap_filter("(objectClass=*)").unwrap(),
                    attributes: vec![],
                },
            ),
            &service,
            &mut session,
        );
        assert_eq!(responses.len(), 1);
        assert!(matches!(
            &responses[0].protocol_op,
            LdapProtocolOp::SearchResultDone { result } if result.result_code == LdapResultCode::NoSuchObject
        ));
    }

    #[test]
    fn test_modify_compare_delete() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let mut session = admin_session();
        add_person(&service, &mut session, "jdoe");
        let dn = "uid=jdoe,dc=example,dc=org".to_string();

        let responses = handle_operation(
            request(
                5,
                LdapProtocolOp::ModifyRequest {
                    dn: dn.clone(),
                    changes: vec![ModifyChange {
                        operation: crate::directory::ModificationOp::Replace,
                        modification: PartialAttribute::new("sn", &["Smith"]),
                    }],
                },
            ),
            &service,
            &mut session,
        );
        assert!(matches!(
            &responses[0].protocol_op,
            LdapProtocolOp::ModifyResponse { result } if result.result_code == LdapResultCode::Success
        ));

        let compare = |value: &str, session: &mut LdapSession| {
            let responses = handle_operation(
                request(
                    6,
                    LdapProtocolOp::CompareRequest {
                        dn: dn.clone(),
                        attribute: "sn".to_string(),
                        value: value.as_bytes().to_vec(),
                    },
                ),
                &service,
                session,
            );
            match &responses[0].protocol_op {
                LdapProtocolOp::CompareResponse { result } => result.result_code,
                other => panic!("Expected CompareResponse, got {:?}", other),
            }
        };
        assert_eq!(compare("smith", &mut session), LdapResultCode::CompareTrue);
        assert_eq!(compare("doe", &mut session), LdapResultCode::CompareFalse);

        let responses = handle_operation(
            request(7, LdapProtocolOp::DelRequest { dn: dn.clone() }),
            &service,
            &mut session,
        );
        assert!(matches!(
            &responses[0].protocol_op,
            LdapProtocolOp::DelResponse { result } if result.result_code == LdapResultCode::Success
        ));
        assert_eq!(compare("smith", &mut session), LdapResultCode::NoSuchObject);
    }

    #[test]
    fn test_who_am_i_and_unknown_extended() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let mut session = admin_session();

        let responses = handle_operation(
            request(
                8,
                LdapProtocolOp::ExtendedRequest {
                    name: WHO_AM_I_OID.to_string(),
                    value: None,
                },
            ),
            &service,
            &mut session,
        );
        match &responses[0].protocol_op {
            LdapProtocolOp::ExtendedResponse { value, .. } => {
                assert_eq!(value.as_deref(), Some(&b"dn:uid=admin,ou=system"[..]));
            }
            other => panic!("Expected ExtendedResponse, got {:?}", other),
        }

        let responses = handle_operation(
            request(
                9,
                LdapProtocolOp::ExtendedRequest {
                    name: "1.3.6.1.4.1.1466.20037".to_string(),
                    value: None,
                },
            ),
            &service,
            &mut session,
        );
        assert!(matches!(
            &responses[0].protocol_op,
            LdapProtocolOp::ExtendedResponse { result, .. } if result.result_code == LdapResultCode::ProtocolError
        ));
    }

    #[test]
    fn test_operational_attribute_selection() {
        let mut entry = LdapEntry::new(Dn::parse("uid=jdoe,dc=example,dc=org").unwrap());
        entry.add_values("objectClass", &["top", "person"]);
        entry.add_values("sn", &["Doe"]);
        entry.add_values("creatorsName", &["UID=Admin, OU=System"]);

        let names = |attrs: Vec<PartialAttribute>| -> Vec<String> {
            attrs.into_iter().map(|a| a.name).collect()
        };

        assert_eq!(names(select_attributes(&entry, &[], false, true)), vec!["objectClass", "sn"]);
        assert_eq!(
            names(select_attributes(&entry, &["+".to_string()], false, true)),
            vec!["creatorsName"]
        );
        assert_eq!(
            names(select_attributes(&entry, &["SN".to_string(), "creatorsname".to_string()], false, true)),
            vec!["creatorsName", "sn"]
        );

        let denormalized = select_attributes(&entry, &["creatorsName".to_string()], false, true);
        assert_eq!(denormalized[0].values[0], b"UID=Admin, OU=System".to_vec());
        let normalized = select_attributes(&entry, &["creatorsName".to_string()], false, false);
        assert_eq!(normalized[0].values[0], b"uid=admin,ou=system".to_vec());

        let types_only = select_attributes(&entry, &["sn".to_string()], true, true);
        assert!(types_only[0].values.is_empty());
    }
}
