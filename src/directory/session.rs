use super::auth::Principal;
use super::dn::Dn;
use super::entry::{LdapEntry, Modification};
use super::partition::SearchScope;
use super::service::DirectoryService;
use crate::ldap::filters::{parse_ldap_filter, LdapFilter};

/// Runs directory operations as one principal.
///
/// Obtained from [`DirectoryService::admin_session`] or
/// [`DirectoryService::session`]. DNs and filters are taken in string form and
/// parsed here.
pub struct CoreSession<'a, S: DirectoryService + ?Sized> {
    service: &'a S,
    principal: Principal,
}

impl<'a, S: DirectoryService + ?Sized> CoreSession<'a, S> {
    pub fn new(service: &'a S, principal: Principal) -> Self {
        Self { service, principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn service(&self) -> &'a S {
        self.service
    }

    pub fn add(&self, entry: LdapEntry) -> crate::Result<()> {
        self.service.add_entry(&self.principal, entry)
    }

    pub fn lookup(&self, dn: &str) -> crate::Result<Option<LdapEntry>> {
        self.service.lookup_entry(&Dn::parse(dn)?)
    }

    pub fn exists(&self, dn: &str) -> crate::Result<bool> {
        Ok(self.lookup(dn)?.is_some())
    }

    pub fn delete(&self, dn: &str) -> crate::Result<()> {
        self.service.delete_entry(&self.principal, &Dn::parse(dn)?)
    }

    pub fn modify(&self, dn: &str, modifications: &[Modification]) -> crate::Result<()> {
        self.service
            .modify_entry(&self.principal, &Dn::parse(dn)?, modifications)
    }

    pub fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
    ) -> crate::Result<Vec<LdapEntry>> {
        let filter = parse_ldap_filter(filter)?;
        self.search_with(&Dn::parse(base)?, scope, &filter)
    }

    pub fn search_with(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &LdapFilter,
    ) -> crate::Result<Vec<LdapEntry>> {
        self.service
            .search_entries(&self.principal, base, scope, filter)
    }

    pub fn compare(&self, dn: &str, attribute: &str, value: &str) -> crate::Result<bool> {
        self.service
            .compare_entry(&self.principal, &Dn::parse(dn)?, attribute, value)
    }
}
