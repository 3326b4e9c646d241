use super::protocol::{
    BindAuthentication, LdapMessage, LdapMessageId, LdapProtocolOp, LdapResult, LdapResultCode,
};
use crate::directory::{DirectoryService, Dn, Principal};
use crate::server::session::LdapSession;
use tracing::{debug, info};

pub fn handle_bind_request<S: DirectoryService + ?Sized>(
    message_id: LdapMessageId,
    version: u8,
    dn: &str,
    authentication: BindAuthentication,
    service: &S,
    session: &mut LdapSession,
) -> LdapMessage {
    let result = match bind(version, dn, authentication, service) {
        Ok(principal) => {
            info!("Successful bind for DN: {:?}", principal.name());
            session.bind(principal);
            LdapResult::success()
        }
        Err(result) => {
            debug!("Bind for {:?} failed: {}", dn, result.diagnostic_message);
            session.reset();
            result
        }
    };

    LdapMessage {
        message_id,
        protocol_op: LdapProtocolOp::BindResponse { result },
    }
}

fn bind<S: DirectoryService + ?Sized>(
    version: u8,
    dn: &str,
    authentication: BindAuthentication,
    service: &S,
) -> Result<Principal, LdapResult> {
    if version != 3 {
        return Err(LdapResult::error(
            LdapResultCode::ProtocolError,
            format!("LDAP version {} is not supported", version),
        ));
    }

    let password = match authentication {
        BindAuthentication::Simple(password) => password,
        BindAuthentication::Sasl { mechanism, .. } => {
            return Err(LdapResult::error(
                LdapResultCode::AuthMethodNotSupported,
                format!("SASL mechanism {} is not supported", mechanism),
            ))
        }
    };

    match (dn.trim().is_empty(), password.is_empty()) {
        (true, true) => {
            if service.flags().allow_anonymous_access {
                Ok(Principal::Anonymous)
            } else {
                Err(LdapResult::error(
                    LdapResultCode::InappropriateAuthentication,
                    "anonymous bind is not allowed".to_string(),
                ))
            }
        }
        (true, false) => Err(LdapResult::error(
            LdapResultCode::InvalidCredentials,
            "a password was given without a DN".to_string(),
        )),
        (false, true) => Err(LdapResult::error(
            LdapResultCode::UnwillingToPerform,
            "unauthenticated bind is not allowed".to_string(),
        )),
        (false, false) => {
            let dn = Dn::parse(dn).map_err(|e| LdapResult::from_error(&e))?;
            service
                .authenticate(&dn, &password)
                .map_err(|e| LdapResult::from_error(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DefaultDirectoryService, LdapEntry, Partition, ServiceFlags};
    use tempfile::TempDir;

    fn service(dir: &TempDir, flags: ServiceFlags) -> DefaultDirectoryService {
        let service = DefaultDirectoryService::new(dir.path(), flags);
        service
            .add_partition(Partition::new("example", "dc=example,dc=org").unwrap())
            .unwrap();
        service.startup().unwrap();

        let session = service.admin_session();
        let mut root = LdapEntry::new(Dn::parse("dc=example,dc=org").unwrap());
        root.add_values("objectClass", &["top", "domain"]);
        session.add(root).unwrap();
        let mut user = LdapEntry::new(Dn::parse("uid=jdoe,dc=example,dc=org").unwrap());
        user.add_values("objectClass", &["top", "person"]);
        user.add_values("userPassword", &["password"]);
        session.add(user).unwrap();
        service
    }

    fn result_code(message: &LdapMessage) -> LdapResultCode {
        match &message.protocol_op {
            LdapProtocolOp::BindResponse { result } => result.result_code,
            other => panic!("Expected BindResponse, got {:?}", other),
        }
    }

    fn simple(
        service: &DefaultDirectoryService,
        session: &mut LdapSession,
        dn: &str,
        password: &str,
    ) -> LdapResultCode {
        let response = handle_bind_request(
            1,
            3,
            dn,
            BindAuthentication::Simple(password.to_string()),
            service,
            session,
        );
        result_code(&response)
    }

    #[test]
    fn test_admin_and_user_binds() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ServiceFlags::fixture());
        let mut session = LdapSession::new();

        assert_eq!(
            simple(&service, &mut session, "uid=admin,ou=system", "secret"),
            LdapResultCode::Success
        );
        assert_eq!(session.principal(), &Principal::Admin);

        assert_eq!(
            simple(&service, &mut session, "uid=jdoe,dc=example,dc=org", "password"),
            LdapResultCode::Success
        );
        assert_eq!(session.bound_dn().unwrap(), "uid=jdoe,dc=example,dc=org");
    }

    #[test]
    fn test_failed_bind_resets_session() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ServiceFlags::fixture());
        let mut session = LdapSession::new();
        session.bind(Principal::Admin);

        assert_eq!(
            simple(&service, &mut session, "uid=jdoe,dc=example,dc=org", "wrong"),
            LdapResultCode::InvalidCredentials
        );
        assert!(session.principal().is_anonymous());
        assert_eq!(
            simple(&service, &mut session, "uid=nobody,dc=example,dc=org", "x"),
            LdapResultCode::InvalidCredentials
        );
    }

    #[test]
    fn test_anonymous_and_unauthenticated_binds() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ServiceFlags::fixture());
        let mut session = LdapSession::new();

        assert_eq!(simple(&service, &mut session, "", ""), LdapResultCode::Success);
        assert!(session.is_bound());
        assert_eq!(
            simple(&service, &mut session, "uid=jdoe,dc=example,dc=org", ""),
            LdapResultCode::UnwillingToPerform
        );
        assert_eq!(
            simple(&service, &mut session, "not a dn", "x"),
            LdapResultCode::InvalidDNSyntax
        );

        let locked = TempDir::new().unwrap();
        let locked = self::service(
            &locked,
            ServiceFlags {
                allow_anonymous_access: false,
                ..ServiceFlags::fixture()
            },
        );
        assert_eq!(
            simple(&locked, &mut session, "", ""),
            LdapResultCode::InappropriateAuthentication
        );
    }

    #[test]
    fn test_unsupported_version_and_sasl() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ServiceFlags::fixture());
        let mut session = LdapSession::new();

        let response = handle_bind_request(
            1,
            2,
            "",
            BindAuthentication::Simple(String::new()),
            &service,
            &mut session,
        );
        assert_eq!(result_code(&response), LdapResultCode::ProtocolError);

        let response = handle_bind_request(
            2,
            3,
            "",
            BindAuthentication::Sasl {
                mechanism: "EXTERNAL".to_string(),
                credentials: None,
            },
            &service,
            &mut session,
        );
        assert_eq!(result_code(&response), LdapResultCode::AuthMethodNotSupported);
    }
}
