use super::{parse_ldif, resolve_location, LdifRecord};
use crate::directory::{CoreSession, DirectoryService};
use tracing::{debug, info, warn};

/// Applies the records of an LDIF file through a directory session.
pub struct LdifLoader<'a, S: DirectoryService + ?Sized> {
    session: CoreSession<'a, S>,
    location: String,
}

impl<'a, S: DirectoryService + ?Sized> LdifLoader<'a, S> {
    pub fn new(session: CoreSession<'a, S>, location: &str) -> Self {
        Self {
            session,
            location: location.to_string(),
        }
    }

    /// Reads and applies every record, returning how many were applied.
    /// Entries that already exist are skipped.
    pub async fn execute(&self) -> crate::Result<usize> {
        let path = resolve_location(&self.location)?;
        info!("Loading LDIF from {}", path.display());

        let content = tokio::fs::read_to_string(&path).await?;
        let records = parse_ldif(&content)?;

        let mut applied = 0;
        for record in records {
            match record {
                LdifRecord::Add(entry) => {
                    if self.session.service().lookup_entry(&entry.dn)?.is_some() {
                        warn!("Entry {} already exists, skipping", entry.dn);
                        continue;
                    }
                    debug!("Adding {}", entry.dn);
                    self.session.add(entry)?;
                }
                LdifRecord::Delete(dn) => {
                    debug!("Deleting {}", dn);
                    self.session.delete(dn.up_name())?;
                }
                LdifRecord::Modify { dn, modifications } => {
                    debug!("Modifying {}", dn);
                    self.session.modify(dn.up_name(), &modifications)?;
                }
            }
            applied += 1;
        }

        info!("Applied {} LDIF records from {}", applied, self.location);
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DefaultDirectoryService, Dn, LdapEntry, Partition, ServiceFlags};
    use crate::DirectoryError;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn service(dir: &TempDir) -> DefaultDirectoryService {
        let service = DefaultDirectoryService::new(dir.path(), ServiceFlags::fixture());
        service
            .add_partition(Partition::new("root", "dc=example,dc=org").unwrap())
            .unwrap();
        service.startup().unwrap();
        let mut root = LdapEntry::new(Dn::parse("dc=example,dc=org").unwrap());
        root.add_values("objectClass", &["top", "domain"]);
        service.admin_session().add(root).unwrap();
        service
    }

    fn ldif_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_loads_entries_and_changes() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let file = ldif_file(
            "\
dn: dc=example,dc=org
objectClass: top
objectClass: domain

dn: ou=people,dc=example,dc=org
objectClass: organizationalUnit

dn: uid=jdoe,ou=people,dc=example,dc=org
objectClass: person
sn: Doe

dn: uid=jdoe,ou=people,dc=example,dc=org
changetype: modify
replace: sn
sn: Smith
",
        );

        let location = format!("file://{}", file.path().display());
        let applied = LdifLoader::new(service.admin_session(), &location)
            .execute()
            .await
            .unwrap();
        assert_eq!(applied, 3);

        let jdoe = service
            .admin_session()
            .lookup("uid=jdoe,ou=people,dc=example,dc=org")
            .unwrap()
            .unwrap();
        assert_eq!(jdoe.first_value("sn").unwrap(), "Smith");
    }

    #[tokio::test]
    async fn test_missing_file_and_bad_content() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let result = LdifLoader::new(service.admin_session(), "/nonexistent/users.ldif")
            .execute()
            .await;
        assert!(matches!(result, Err(DirectoryError::Io(_))));

        let file = ldif_file("dn: uid=x,dc=example,dc=org\nobjectClass person\n");
        let result = LdifLoader::new(service.admin_session(), &file.path().display().to_string())
            .execute()
            .await;
        assert!(matches!(result, Err(DirectoryError::Ldif { line: 2, .. })));
    }

    #[tokio::test]
    async fn test_orphan_entry_fails() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let file = ldif_file("dn: uid=x,ou=missing,dc=example,dc=org\nobjectClass: person\n");

        let result = LdifLoader::new(service.admin_session(), &file.path().display().to_string())
            .execute()
            .await;
        assert!(matches!(result, Err(DirectoryError::NoSuchObject(_))));
    }
}
