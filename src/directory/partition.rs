use super::dn::Dn;
use super::entry::LdapEntry;
use crate::ldif::{self, LdifRecord};
use crate::DirectoryError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
}

impl TryFrom<i64> for SearchScope {
    type Error = DirectoryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SearchScope::BaseObject),
            1 => Ok(SearchScope::SingleLevel),
            2 => Ok(SearchScope::WholeSubtree),
            other => Err(DirectoryError::Protocol(format!(
                "unknown search scope {}",
                other
            ))),
        }
    }
}

/// A storage root for the subtree below one suffix DN.
///
/// Entries live in memory keyed by normalized DN. Once initialized against a
/// working directory the partition owns `<work_dir>/partitions/<id>/` and
/// flushes its entries there as LDIF on `sync`.
#[derive(Debug)]
pub struct Partition {
    id: String,
    suffix: Dn,
    entries: DashMap<String, LdapEntry>,
    storage_dir: RwLock<Option<PathBuf>>,
    writes: Mutex<()>,
}

impl Partition {
    pub fn new(id: &str, suffix: &str) -> crate::Result<Self> {
        if id.is_empty() {
            return Err(DirectoryError::Config("partition id cannot be empty".to_string()));
        }

        let suffix = Dn::parse(suffix)?;
        if suffix.is_root() {
            return Err(DirectoryError::InvalidDn(
                "partition suffix cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: id.to_string(),
            suffix,
            entries: DashMap::new(),
            storage_dir: RwLock::new(None),
            writes: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn suffix(&self) -> &Dn {
        &self.suffix
    }

    pub fn contains_dn(&self, dn: &Dn) -> bool {
        dn.is_within(&self.suffix)
    }

    pub fn storage_dir(&self) -> Option<PathBuf> {
        self.storage_dir.read().ok().and_then(|dir| dir.clone())
    }

    pub fn storage_file(&self) -> Option<PathBuf> {
        self.storage_dir()
            .map(|dir| dir.join(format!("{}.ldif", self.id)))
    }

    /// Creates the on-disk storage root under `work_dir` and reloads entries a
    /// previous `sync` left there. Returns the number of reloaded entries.
    pub fn init(&self, work_dir: &Path) -> crate::Result<usize> {
        let dir = work_dir.join("partitions").join(&self.id);
        fs::create_dir_all(&dir)?;

        let file = dir.join(format!("{}.ldif", self.id));
        let mut loaded = 0;
        if file.exists() {
            let content = fs::read_to_string(&file)?;
            for record in ldif::parse_ldif(&content)? {
                if let LdifRecord::Add(entry) = record {
                    self.insert(entry);
                    loaded += 1;
                }
            }
            info!("Partition {} reloaded {} entries from {}", self.id, loaded, file.display());
        }

        let mut storage_dir = self
            .storage_dir
            .write()
            .map_err(|e| DirectoryError::Directory(format!("partition lock poisoned: {}", e)))?;
        *storage_dir = Some(dir);
        Ok(loaded)
    }

    /// Writes every entry to the storage file, parents before children.
    pub fn sync(&self) -> crate::Result<()> {
        let Some(file) = self.storage_file() else {
            debug!("Partition {} has no storage root, nothing to sync", self.id);
            return Ok(());
        };

        let mut entries: Vec<LdapEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.dn.len()
                .cmp(&b.dn.len())
                .then_with(|| a.dn.normalized().cmp(b.dn.normalized()))
        });

        fs::write(&file, ldif::write_entries(&entries))?;
        debug!("Partition {} flushed {} entries", self.id, entries.len());
        Ok(())
    }

    /// Drops the in-memory entries and forgets the storage root.
    pub fn destroy(&self) {
        self.entries.clear();
        if let Ok(mut dir) = self.storage_dir.write() {
            *dir = None;
        }
    }

    pub fn get(&self, dn: &Dn) -> Option<LdapEntry> {
        self.entries.get(dn.normalized()).map(|e| e.clone())
    }

    pub fn exists(&self, dn: &Dn) -> bool {
        self.entries.contains_key(dn.normalized())
    }

    /// Stores an entry as is, replacing any entry with the same DN.
    pub fn insert(&self, entry: LdapEntry) {
        self.entries.insert(entry.dn.normalized().to_string(), entry);
    }

    /// Stores an entry unless one with the same DN is already present.
    pub fn insert_new(&self, entry: LdapEntry) -> crate::Result<()> {
        match self.entries.entry(entry.dn.normalized().to_string()) {
            Entry::Occupied(_) => Err(DirectoryError::EntryAlreadyExists(entry.dn.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Serializes structural writes, so a parent check and the write that
    /// depends on it cannot interleave with another writer.
    pub fn lock_writes(&self) -> crate::Result<MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|e| DirectoryError::Directory(format!("partition lock poisoned: {}", e)))
    }

    pub fn remove(&self, dn: &Dn) -> Option<LdapEntry> {
        self.entries.remove(dn.normalized()).map(|(_, entry)| entry)
    }

    pub fn has_children(&self, dn: &Dn) -> bool {
        self.entries.iter().any(|e| e.value().dn.is_child_of(dn))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn search<F>(&self, base: &Dn, scope: SearchScope, filter: F) -> Vec<LdapEntry>
    where
        F: Fn(&LdapEntry) -> bool,
    {
        let mut results: Vec<LdapEntry> = self
            .entries
            .iter()
            .filter(|e| {
                let dn = &e.value().dn;
                match scope {
                    SearchScope::BaseObject => dn == base,
                    SearchScope::SingleLevel => dn.is_child_of(base),
                    SearchScope::WholeSubtree => dn.is_within(base),
                }
            })
            .filter(|e| filter(e.value()))
            .map(|e| e.value().clone())
            .collect();

        // Stable order: shallow entries first
        results.sort_by(|a, b| {
            a.dn.len()
                .cmp(&b.dn.len())
                .then_with(|| a.dn.normalized().cmp(b.dn.normalized()))
        });
        results
    }
}
