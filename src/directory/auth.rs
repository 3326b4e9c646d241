use super::dn::Dn;
use super::entry::{AttributeValue, LdapEntry};
use crate::crypto::passwords::verify_password;
use crate::DirectoryError;

pub const ADMIN_DN: &str = "uid=admin,ou=system";
pub const ADMIN_PASSWORD: &str = "secret";

/// The identity an operation runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    Admin,
    User(Dn),
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn name(&self) -> String {
        match self {
            Principal::Anonymous => String::new(),
            Principal::Admin => ADMIN_DN.to_string(),
            Principal::User(dn) => dn.up_name().to_string(),
        }
    }
}

pub fn is_admin_dn(dn: &Dn) -> bool {
    Dn::parse(ADMIN_DN).map(|admin| &admin == dn).unwrap_or(false)
}

/// Checks `password` against every `userPassword` value of `entry`.
pub fn verify_entry_password(entry: &LdapEntry, password: &str) -> crate::Result<bool> {
    let password_attr = entry
        .get_attribute("userPassword")
        .ok_or_else(|| DirectoryError::Auth(format!("{} has no userPassword", entry.dn)))?;

    for value in &password_attr.values {
        let stored = match value {
            AttributeValue::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            other => other.as_string(),
        };
        if verify_password(password, &stored)? {
            return Ok(true);
        }
    }

    Ok(false)
}
