use embedldap::directory::ServiceFlags;
use embedldap::{DirectoryService, EmbeddedDirectoryServer, FixtureConfig};
use ldap3::exop::{WhoAmI, WhoAmIResp};
use ldap3::{Ldap, LdapConnAsync, Mod, Scope, SearchEntry};
use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::timeout;

const ROOT_DN: &str = "dc=example,dc=org";

const SEED: &str = "\
dn: ou=people,dc=example,dc=org
objectClass: organizationalUnit
ou: people

dn: uid=alice,ou=people,dc=example,dc=org
objectClass: top
objectClass: person
objectClass: inetOrgPerson
uid: alice
cn: Alice Example
sn: Example
mail: alice@example.org
employeeNumber: 17
userPassword: alice-password

dn: uid=bob,ou=people,dc=example,dc=org
objectClass: top
objectClass: person
objectClass: inetOrgPerson
uid: bob
cn: Bob Builder
sn: Builder
employeeNumber: 42
userPassword: bob-password
";

async fn start_server(temp: &TempDir, port: i32, flags: ServiceFlags) -> EmbeddedDirectoryServer {
    let config = FixtureConfig::new(ROOT_DN)
        .with_work_dir(temp.path().join("work"))
        .with_port(port)
        .with_flags(flags);
    let mut server = EmbeddedDirectoryServer::with_config(config).unwrap();
    server.start().await.unwrap();

    let mut seed = NamedTempFile::new().unwrap();
    seed.write_all(SEED.as_bytes()).unwrap();
    seed.flush().unwrap();
    server
        .load_ldif(&seed.path().display().to_string())
        .await
        .unwrap();
    server
}

async fn connect(server: &EmbeddedDirectoryServer) -> Ldap {
    let (conn, ldap) = LdapConnAsync::new(&server.ldap_url()).await.unwrap();
    ldap3::drive!(conn);
    ldap
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_bind_and_wrong_password() {
    let temp = TempDir::new().unwrap();
    let mut server = start_server(&temp, 41400, ServiceFlags::fixture()).await;
    let mut ldap = connect(&server).await;

    let result = ldap.simple_bind("uid=admin,ou=system", "secret").await.unwrap();
    assert_eq!(result.rc, 0);

    let result = ldap.simple_bind("uid=admin,ou=system", "wrong").await.unwrap();
    assert_eq!(result.rc, 49);

    let result = ldap
        .simple_bind("uid=alice,ou=people,dc=example,dc=org", "alice-password")
        .await
        .unwrap();
    assert_eq!(result.rc, 0);

    let result = ldap
        .simple_bind("uid=nobody,ou=people,dc=example,dc=org", "alice-password")
        .await
        .unwrap();
    assert_eq!(result.rc, 49);

    ldap.unbind().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_with_filters() {
    let temp = TempDir::new().unwrap();
    let mut server = start_server(&temp, 41401, ServiceFlags::fixture()).await;
    let mut ldap = connect(&server).await;

    let (entries, _) = ldap
        .search(ROOT_DN, Scope::Subtree, "(objectClass=person)", vec!["uid"])
        .await
        .unwrap()
        .success()
        .unwrap();
    let mut uids: Vec<String> = entries
        .into_iter()
        .map(SearchEntry::construct)
        .map(|e| e.attrs["uid"][0].clone())
        .collect();
    uids.sort();
    assert_eq!(uids, vec!["alice", "bob"]);

    let (entries, _) = ldap
        .search(
            ROOT_DN,
            Scope::Subtree,
            "(&(objectClass=inetOrgPerson)(|(cn=Ali*)(mail=*@nowhere.org))(!(uid=bob)))",
            vec!["cn", "mail"],
        )
        .await
        .unwrap()
        .success()
        .unwrap();
    assert_eq!(entries.len(), 1);
    let alice = SearchEntry::construct(entries[0].clone());
    assert_eq!(alice.dn, "uid=alice,ou=people,dc=example,dc=org");
    assert_eq!(alice.attrs["cn"], vec!["Alice Example"]);
    assert_eq!(alice.attrs["mail"], vec!["alice@example.org"]);
    assert!(!alice.attrs.contains_key("sn"));

    let (entries, _) = ldap
        .search(ROOT_DN, Scope::Subtree, "(employeeNumber>=20)", vec!["uid"])
        .await
        .unwrap()
        .success()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(SearchEntry::construct(entries[0].clone()).attrs["uid"], vec!["bob"]);

    let (entries, _) = ldap
        .search(ROOT_DN, Scope::OneLevel, "(objectClass=*)", vec!["1.1"])
        .await
        .unwrap()
        .success()
        .unwrap();
    assert_eq!(entries.len(), 1);
    let people = SearchEntry::construct(entries[0].clone());
    assert_eq!(people.dn, "ou=people,dc=example,dc=org");
    assert!(people.attrs.is_empty());

    let result = ldap
        .search(
            "ou=missing,dc=example,dc=org",
            Scope::Base,
            "(objectClass=*)",
            vec!["*"],
        )
        .await
        .unwrap();
    assert_eq!(result.1.rc, 32);

    ldap.unbind().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_root_dse() {
    let temp = TempDir::new().unwrap();
    let mut server = start_server(&temp, 41402, ServiceFlags::fixture()).await;
    let mut ldap = connect(&server).await;

    let (entries, _) = ldap
        .search("", Scope::Base, "(objectClass=*)", vec!["*"])
        .await
        .unwrap()
        .success()
        .unwrap();
    let dse = SearchEntry::construct(entries[0].clone());
    assert_eq!(dse.attrs["namingContexts"], vec![ROOT_DN]);
    assert_eq!(dse.attrs["supportedLDAPVersion"], vec!["3"]);

    ldap.unbind().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_writes_are_visible_to_admin_session() {
    let temp = TempDir::new().unwrap();
    let mut server = start_server(&temp, 41403, ServiceFlags::fixture()).await;
    let mut ldap = connect(&server).await;
    ldap.simple_bind("uid=admin,ou=system", "secret")
        .await
        .unwrap()
        .success()
        .unwrap();

    let carol = "uid=carol,ou=people,dc=example,dc=org";
    ldap.add(
        carol,
        vec![
            ("objectClass", HashSet::from(["top", "person"])),
            ("cn", HashSet::from(["Carol"])),
            ("sn", HashSet::from(["Initial"])),
        ],
    )
    .await
    .unwrap()
    .success()
    .unwrap();

    let session = server.directory().admin_session();
    let entry = session.lookup(carol).unwrap().unwrap();
    assert_eq!(entry.first_value("sn").as_deref(), Some("Initial"));
    assert_eq!(entry.first_value("uid").as_deref(), Some("carol"));
    assert_eq!(
        entry.first_value("creatorsName").as_deref(),
        Some("uid=admin,ou=system")
    );

    ldap.modify(
        carol,
        vec![
            Mod::Replace("sn", HashSet::from(["Changed"])),
            Mod::Add("mail", HashSet::from(["carol@example.org"])),
        ],
    )
    .await
    .unwrap()
    .success()
    .unwrap();
    let entry = session.lookup(carol).unwrap().unwrap();
    assert_eq!(entry.first_value("sn").as_deref(), Some("Changed"));
    assert_eq!(entry.first_value("mail").as_deref(), Some("carol@example.org"));

    let duplicate = ldap
        .add(carol, vec![("objectClass", HashSet::from(["person"]))])
        .await
        .unwrap();
    assert_eq!(duplicate.rc, 68);

    let non_leaf = ldap.delete("ou=people,dc=example,dc=org").await.unwrap();
    assert_eq!(non_leaf.rc, 66);

    ldap.delete(carol).await.unwrap().success().unwrap();
    assert!(!session.exists(carol).unwrap());

    ldap.unbind().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_anonymous_writes_are_refused() {
    let temp = TempDir::new().unwrap();
    let mut server = start_server(&temp, 41404, ServiceFlags::fixture()).await;
    let mut ldap = connect(&server).await;

    let result = ldap
        .add(
            "uid=eve,ou=people,dc=example,dc=org",
            vec![("objectClass", HashSet::from(["person"]))],
        )
        .await
        .unwrap();
    assert_eq!(result.rc, 50);
    assert!(!server
        .directory()
        .admin_session()
        .exists("uid=eve,ou=people,dc=example,dc=org")
        .unwrap());

    ldap.unbind().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_compare_and_who_am_i() {
    let temp = TempDir::new().unwrap();
    let mut server = start_server(&temp, 41405, ServiceFlags::fixture()).await;
    let mut ldap = connect(&server).await;
    let alice = "uid=alice,ou=people,dc=example,dc=org";

    ldap.simple_bind(alice, "alice-password")
        .await
        .unwrap()
        .success()
        .unwrap();
    let (exop, _) = ldap.extended(WhoAmI).await.unwrap().success().unwrap();
    let bound: WhoAmIResp = exop.parse();
    assert_eq!(bound.authzid, format!("dn:{}", alice));

    assert!(ldap
        .compare(alice, "sn", "Example")
        .await
        .unwrap()
        .equal()
        .unwrap());
    assert!(!ldap
        .compare(alice, "sn", "Builder")
        .await
        .unwrap()
        .equal()
        .unwrap());

    ldap.unbind().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_anonymous_access_can_be_disabled() {
    let temp = TempDir::new().unwrap();
    let flags = ServiceFlags {
        allow_anonymous_access: false,
        ..ServiceFlags::fixture()
    };
    let mut server = start_server(&temp, 41406, flags).await;
    let mut ldap = connect(&server).await;

    let result = ldap.simple_bind("", "").await.unwrap();
    assert_eq!(result.rc, 48);

    let result = ldap
        .search(ROOT_DN, Scope::Subtree, "(objectClass=*)", vec!["*"])
        .await
        .unwrap();
    assert_eq!(result.1.rc, 50);

    ldap.simple_bind("uid=admin,ou=system", "secret")
        .await
        .unwrap()
        .success()
        .unwrap();
    let (entries, _) = ldap
        .search(ROOT_DN, Scope::Subtree, "(objectClass=*)", vec!["*"])
        .await
        .unwrap()
        .success()
        .unwrap();
    assert_eq!(entries.len(), 4);

    ldap.unbind().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_closes_client_connections() {
    let temp = TempDir::new().unwrap();
    let mut server = start_server(&temp, 41407, ServiceFlags::fixture()).await;
    let mut ldap = connect(&server).await;
    ldap.simple_bind("uid=admin,ou=system", "secret")
        .await
        .unwrap()
        .success()
        .unwrap();

    server.stop().await.unwrap();

    let result = timeout(
        Duration::from_secs(5),
        ldap.search(ROOT_DN, Scope::Base, "(objectClass=*)", vec!["*"]),
    )
    .await;
    assert!(!matches!(result, Ok(Ok(_))));
}
