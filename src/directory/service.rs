use super::auth::{is_admin_dn, verify_entry_password, Principal, ADMIN_PASSWORD};
use super::changelog::{ChangeKind, ChangeLog};
use super::dn::Dn;
use super::entry::{
    is_operational_attribute, AttributeSyntax, AttributeValue, LdapEntry, Modification,
};
use super::partition::{Partition, SearchScope};
use super::session::CoreSession;
use crate::ldap::filters::LdapFilter;
use crate::DirectoryError;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

pub const WHO_AM_I_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// Service-wide switches fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFlags {
    pub change_log_enabled: bool,
    pub shutdown_hook_enabled: bool,
    pub denormalize_op_attrs_enabled: bool,
    pub allow_anonymous_access: bool,
}

impl Default for ServiceFlags {
    fn default() -> Self {
        Self {
            change_log_enabled: true,
            shutdown_hook_enabled: true,
            denormalize_op_attrs_enabled: false,
            allow_anonymous_access: true,
        }
    }
}

impl ServiceFlags {
    /// The flags the embedded test fixture runs with.
    pub fn fixture() -> Self {
        Self {
            change_log_enabled: false,
            denormalize_op_attrs_enabled: true,
            ..Self::default()
        }
    }
}

/// The operations the fixture and the protocol layer need from a directory
/// engine.
pub trait DirectoryService: Send + Sync {
    fn add_partition(&self, partition: Partition) -> crate::Result<()>;

    fn startup(&self) -> crate::Result<()>;

    /// Shutting down a service that is not started does nothing.
    fn shutdown(&self) -> crate::Result<()>;

    fn is_started(&self) -> bool;

    fn working_directory(&self) -> &Path;

    fn flags(&self) -> ServiceFlags;

    fn new_entry(&self, dn: Dn) -> LdapEntry {
        LdapEntry::new(dn)
    }

    fn admin_session(&self) -> CoreSession<'_, Self> {
        CoreSession::new(self, Principal::Admin)
    }

    fn session(&self, principal: Principal) -> CoreSession<'_, Self> {
        CoreSession::new(self, principal)
    }

    fn add_entry(&self, principal: &Principal, entry: LdapEntry) -> crate::Result<()>;

    fn lookup_entry(&self, dn: &Dn) -> crate::Result<Option<LdapEntry>>;

    fn delete_entry(&self, principal: &Principal, dn: &Dn) -> crate::Result<()>;

    fn modify_entry(
        &self,
        principal: &Principal,
        dn: &Dn,
        modifications: &[Modification],
    ) -> crate::Result<()>;

    fn search_entries(
        &self,
        principal: &Principal,
        base: &Dn,
        scope: SearchScope,
        filter: &LdapFilter,
    ) -> crate::Result<Vec<LdapEntry>>;

    fn compare_entry(
        &self,
        principal: &Principal,
        dn: &Dn,
        attribute: &str,
        value: &str,
    ) -> crate::Result<bool>;

    fn authenticate(&self, dn: &Dn, password: &str) -> crate::Result<Principal>;
}

#[derive(Debug)]
pub struct DefaultDirectoryService {
    working_directory: PathBuf,
    flags: ServiceFlags,
    partitions: RwLock<Vec<Arc<Partition>>>,
    started: AtomicBool,
    change_log: ChangeLog,
}

impl DefaultDirectoryService {
    pub fn new(working_directory: impl Into<PathBuf>, flags: ServiceFlags) -> Self {
        Self {
            working_directory: working_directory.into(),
            flags,
            partitions: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            change_log: ChangeLog::new(flags.change_log_enabled),
        }
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    pub fn partitions(&self) -> Vec<Arc<Partition>> {
        self.partitions
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// The partition with the longest suffix containing `dn`.
    fn partition_for(&self, dn: &Dn) -> Option<Arc<Partition>> {
        self.partitions()
            .into_iter()
            .filter(|p| p.contains_dn(dn))
            .max_by_key(|p| p.suffix().len())
    }

    fn ensure_started(&self) -> crate::Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(DirectoryError::NotStarted)
        }
    }

    fn ensure_readable(&self, principal: &Principal) -> crate::Result<()> {
        if principal.is_anonymous() && !self.flags.allow_anonymous_access {
            return Err(DirectoryError::InsufficientAccessRights(
                "anonymous access is disabled".to_string(),
            ));
        }
        Ok(())
    }

    fn root_dse(&self) -> LdapEntry {
        let mut entry = LdapEntry::new(Dn::root());
        entry.add_values("objectClass", &["top", "extensibleObject"]);
        for partition in self.partitions() {
            entry.add_values("namingContexts", &[partition.suffix().up_name()]);
        }
        entry.add_values("supportedLDAPVersion", &["3"]);
        entry.add_values("supportedExtension", &[WHO_AM_I_OID]);
        entry.add_values("vendorName", &["embedldap"]);
        entry.add_values("vendorVersion", &[env!("CARGO_PKG_VERSION")]);
        entry
    }

    fn search_root(&self, scope: SearchScope, filter: &LdapFilter) -> Vec<LdapEntry> {
        if scope == SearchScope::BaseObject {
            let dse = self.root_dse();
            return if filter.matches(&dse) { vec![dse] } else { Vec::new() };
        }

        let partition_scope = match scope {
            SearchScope::SingleLevel => SearchScope::BaseObject,
            other => other,
        };
        self.partitions()
            .iter()
            .flat_map(|p| p.search(p.suffix(), partition_scope, |e| filter.matches(e)))
            .collect()
    }
}

fn ensure_writer(principal: &Principal) -> crate::Result<()> {
    if principal.is_anonymous() {
        return Err(DirectoryError::InsufficientAccessRights(
            "anonymous users cannot modify the directory".to_string(),
        ));
    }
    Ok(())
}

impl DirectoryService for DefaultDirectoryService {
    fn add_partition(&self, partition: Partition) -> crate::Result<()> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|e| DirectoryError::Directory(format!("partition lock poisoned: {}", e)))?;

        if partitions
            .iter()
            .any(|p| p.id() == partition.id() || p.suffix() == partition.suffix())
        {
            return Err(DirectoryError::Config(format!(
                "partition {} ({}) is already registered",
                partition.id(),
                partition.suffix()
            )));
        }

        if self.is_started() {
            partition.init(&self.working_directory)?;
        }

        info!(
            "Added partition {} with suffix {}",
            partition.id(),
            partition.suffix()
        );
        partitions.push(Arc::new(partition));
        Ok(())
    }

    fn startup(&self) -> crate::Result<()> {
        if self.is_started() {
            debug!("Directory service already started");
            return Ok(());
        }

        fs::create_dir_all(&self.working_directory)?;
        for partition in self.partitions() {
            partition.init(&self.working_directory)?;
        }

        self.started.store(true, Ordering::SeqCst);
        info!(
            "Directory service started in {}",
            self.working_directory.display()
        );
        Ok(())
    }

    fn shutdown(&self) -> crate::Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            debug!("Directory service not started, nothing to shut down");
            return Ok(());
        }

        let mut first_error = None;
        for partition in self.partitions() {
            if let Err(e) = partition.sync() {
                error!("Failed to sync partition {}: {}", partition.id(), e);
                first_error.get_or_insert(e);
            }
            partition.destroy();
        }

        info!("Directory service shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    fn flags(&self) -> ServiceFlags {
        self.flags
    }

    fn add_entry(&self, principal: &Principal, mut entry: LdapEntry) -> crate::Result<()> {
        self.ensure_started()?;
        ensure_writer(principal)?;

        let partition = self.partition_for(&entry.dn).ok_or_else(|| {
            DirectoryError::NoSuchObject(format!("no partition holds {}", entry.dn))
        })?;
        let _writes = partition.lock_writes()?;

        if partition.exists(&entry.dn) {
            return Err(DirectoryError::EntryAlreadyExists(entry.dn.to_string()));
        }

        if entry.object_classes.is_empty() {
            return Err(DirectoryError::ObjectClassViolation(format!(
                "{} has no objectClass",
                entry.dn
            )));
        }

        if &entry.dn != partition.suffix() {
            let parent = entry.dn.parent().unwrap_or_else(Dn::root);
            if !partition.exists(&parent) {
                return Err(DirectoryError::NoSuchObject(format!(
                    "parent {} of {} does not exist",
                    parent, entry.dn
                )));
            }
        }

        // The naming attribute must be present in the entry itself
        if let Some(rdn) = entry.dn.rdn().cloned() {
            let value = rdn.value();
            let present = entry
                .get_attribute(rdn.attr_type())
                .map(|attr| attr.contains(&value))
                .unwrap_or(false);
            if !present && !rdn.up_name().contains('+') {
                entry.put_value(
                    rdn.attr_type(),
                    AttributeValue::from_string(rdn.attr_type(), value),
                );
            }
        }

        if !entry.has_attribute("createTimestamp") {
            entry.add_attribute(
                "createTimestamp".to_string(),
                vec![AttributeValue::GeneralizedTime(Utc::now())],
                AttributeSyntax::GeneralizedTime,
            );
        }
        if !entry.has_attribute("creatorsName") {
            entry.add_attribute(
                "creatorsName".to_string(),
                vec![AttributeValue::Dn(principal.name())],
                AttributeSyntax::Dn,
            );
        }
        if !entry.has_attribute("entryUUID") {
            entry.add_attribute(
                "entryUUID".to_string(),
                vec![AttributeValue::String(Uuid::new_v4().to_string())],
                AttributeSyntax::String,
            );
        }

        let dn = entry.dn.clone();
        partition.insert_new(entry)?;
        self.change_log.record(ChangeKind::Add, &dn, &principal.name());
        debug!("Added entry {}", dn);
        Ok(())
    }

    fn lookup_entry(&self, dn: &Dn) -> crate::Result<Option<LdapEntry>> {
        self.ensure_started()?;
        if dn.is_root() {
            return Ok(Some(self.root_dse()));
        }
        Ok(self.partition_for(dn).and_then(|p| p.get(dn)))
    }

    fn delete_entry(&self, principal: &Principal, dn: &Dn) -> crate::Result<()> {
        self.ensure_started()?;
        ensure_writer(principal)?;

        let partition = self
            .partition_for(dn)
            .filter(|p| p.exists(dn))
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))?;
        let _writes = partition.lock_writes()?;

        if !partition.exists(dn) {
            return Err(DirectoryError::NoSuchObject(dn.to_string()));
        }
        if partition.has_children(dn) {
            return Err(DirectoryError::NotAllowedOnNonLeaf(dn.to_string()));
        }

        partition.remove(dn);
        self.change_log
            .record(ChangeKind::Delete, dn, &principal.name());
        debug!("Deleted entry {}", dn);
        Ok(())
    }

    fn modify_entry(
        &self,
        principal: &Principal,
        dn: &Dn,
        modifications: &[Modification],
    ) -> crate::Result<()> {
        self.ensure_started()?;
        ensure_writer(principal)?;

        let partition = self
            .partition_for(dn)
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))?;
        let _writes = partition.lock_writes()?;
        let mut entry = partition
            .get(dn)
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))?;

        for modification in modifications {
            if is_operational_attribute(&modification.attribute) {
                return Err(DirectoryError::UnwillingToPerform(format!(
                    "{} is not user modifiable",
                    modification.attribute
                )));
            }
            entry.apply(modification)?;
        }

        if entry.object_classes.is_empty() {
            return Err(DirectoryError::ObjectClassViolation(format!(
                "{} would have no objectClass",
                dn
            )));
        }

        entry.add_attribute(
            "modifyTimestamp".to_string(),
            vec![AttributeValue::GeneralizedTime(Utc::now())],
            AttributeSyntax::GeneralizedTime,
        );
        entry.add_attribute(
            "modifiersName".to_string(),
            vec![AttributeValue::Dn(principal.name())],
            AttributeSyntax::Dn,
        );

        partition.insert(entry);
        self.change_log
            .record(ChangeKind::Modify, dn, &principal.name());
        debug!("Modified entry {}", dn);
        Ok(())
    }

    fn search_entries(
        &self,
        principal: &Principal,
        base: &Dn,
        scope: SearchScope,
        filter: &LdapFilter,
    ) -> crate::Result<Vec<LdapEntry>> {
        self.ensure_started()?;
        self.ensure_readable(principal)?;

        if base.is_root() {
            return Ok(self.search_root(scope, filter));
        }

        let partition = self
            .partition_for(base)
            .filter(|p| p.exists(base))
            .ok_or_else(|| DirectoryError::NoSuchObject(base.to_string()))?;

        Ok(partition.search(base, scope, |entry| filter.matches(entry)))
    }

    fn compare_entry(
        &self,
        principal: &Principal,
        dn: &Dn,
        attribute: &str,
        value: &str,
    ) -> crate::Result<bool> {
        self.ensure_readable(principal)?;

        let entry = self
            .lookup_entry(dn)?
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))?;
        let attr = entry
            .get_attribute(attribute)
            .ok_or_else(|| DirectoryError::NoSuchAttribute(format!("{} on {}", attribute, dn)))?;

        Ok(attr.contains(value))
    }

    fn authenticate(&self, dn: &Dn, password: &str) -> crate::Result<Principal> {
        self.ensure_started()?;

        if is_admin_dn(dn) {
            return if password == ADMIN_PASSWORD {
                Ok(Principal::Admin)
            } else {
                Err(DirectoryError::InvalidCredentials)
            };
        }

        let entry = self
            .lookup_entry(dn)?
            .ok_or(DirectoryError::InvalidCredentials)?;

        match verify_entry_password(&entry, password) {
            Ok(true) => Ok(Principal::User(entry.dn)),
            Ok(false) => Err(DirectoryError::InvalidCredentials),
            Err(e) => {
                debug!("Bind as {} rejected: {}", dn, e);
                Err(DirectoryError::InvalidCredentials)
            }
        }
    }
}
