//! In-process LDAP directory for integration tests.
//!
//! An [`EmbeddedDirectoryServer`] owns one root partition, the directory
//! service holding it and the TCP listener in front of that service:
//!
//! ```no_run
//! # async fn run() -> embedldap::Result<()> {
//! use embedldap::EmbeddedDirectoryServer;
//!
//! let mut server = EmbeddedDirectoryServer::new("dc=example,dc=org", None, 10389)?;
//! server.start().await?;
//! server.load_ldif("file:///tmp/users.ldif").await?;
//! // point the code under test at server.ldap_url()
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{FixtureConfig, DEFAULT_WORK_DIR_NAME};
use crate::directory::{DefaultDirectoryService, DirectoryService, Dn, Partition};
use crate::ldif::LdifLoader;
use crate::server::Listener;
use crate::DirectoryError;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ROOT_PARTITION_ID: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Unstarted,
    Started,
    Stopped,
}

pub struct EmbeddedDirectoryServer {
    root_dn: Dn,
    domain_component: String,
    work_dir: PathBuf,
    port: u16,
    directory: Arc<DefaultDirectoryService>,
    listener: Listener<DefaultDirectoryService>,
    state: FixtureState,
}

impl EmbeddedDirectoryServer {
    /// Builds an unstarted server. `work_dir` defaults to `embedldap-work` in
    /// the current directory and `ldap_port` values of zero or less to 10389.
    pub fn new(root_dn: &str, work_dir: Option<PathBuf>, ldap_port: i32) -> crate::Result<Self> {
        let mut config = FixtureConfig::new(root_dn).with_port(ldap_port);
        config.work_dir = work_dir;
        Self::with_config(config)
    }

    pub fn with_config(config: FixtureConfig) -> crate::Result<Self> {
        let root_dn = Dn::parse(&config.root_dn)?;
        if root_dn.is_root() {
            return Err(DirectoryError::InvalidDn(
                "root DN cannot be empty".to_string(),
            ));
        }
        let domain_component = domain_component(&root_dn)?;
        let port = config.resolved_port()?;
        let work_dir = init_work_dir(config.work_dir.as_deref())?;

        let partition = Partition::new(ROOT_PARTITION_ID, root_dn.up_name())?;
        let directory = Arc::new(DefaultDirectoryService::new(&work_dir, config.flags));
        directory.add_partition(partition)?;

        let listener = Listener::new(
            Arc::clone(&directory),
            SocketAddr::new(config.bind_address, port),
        );

        debug!(
            "Created embedded directory for {} in {} on port {}",
            root_dn,
            work_dir.display(),
            port
        );
        Ok(Self {
            root_dn,
            domain_component,
            work_dir,
            port,
            directory,
            listener,
            state: FixtureState::Unstarted,
        })
    }

    /// Starts the directory service, binds the listener and adds the root
    /// entry. A failure leaves the server for `stop` to clean up.
    pub async fn start(&mut self) -> crate::Result<()> {
        match self.state {
            FixtureState::Unstarted => {}
            FixtureState::Started => return Err(DirectoryError::AlreadyStarted),
            FixtureState::Stopped => return Err(DirectoryError::Stopped),
        }

        self.directory.startup()?;
        let local_addr = self.listener.start().await?;

        let mut root = self.directory.new_entry(self.root_dn.clone());
        root.add_values("objectClass", &["top", "domain", "extensibleObject"]);
        root.add_values("dc", &[self.domain_component.as_str()]);
        self.directory.admin_session().add(root)?;

        self.state = FixtureState::Started;
        info!("Embedded directory {} started on {}", self.root_dn, local_addr);
        Ok(())
    }

    /// Stops the listener and the directory service, then removes the working
    /// directory whatever happened before. Returns the first shutdown error.
    pub async fn stop(&mut self) -> crate::Result<()> {
        if self.state == FixtureState::Stopped {
            return Err(DirectoryError::Stopped);
        }

        let listener_result = self.listener.stop().await;
        let directory_result = self.directory.shutdown();
        self.state = FixtureState::Stopped;

        if delete_dir(&self.work_dir) {
            info!("Embedded directory {} stopped", self.root_dn);
        }
        listener_result.and(directory_result)
    }

    /// Applies an LDIF file through the admin session and returns the number
    /// of records applied.
    pub async fn load_ldif(&self, location: &str) -> crate::Result<usize> {
        if self.state != FixtureState::Started {
            return Err(DirectoryError::NotStarted);
        }
        LdifLoader::new(self.directory.admin_session(), location)
            .execute()
            .await
    }

    pub fn state(&self) -> FixtureState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.local_addr().map_or(self.port, |addr| addr.port())
    }

    pub fn root_dn(&self) -> &Dn {
        &self.root_dn
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn directory(&self) -> &Arc<DefaultDirectoryService> {
        &self.directory
    }

    /// An `ldap://` URL clients on this host can connect to.
    pub fn ldap_url(&self) -> String {
        let host = match self.listener.bind_addr().ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => "127.0.0.1".to_string(),
            IpAddr::V6(ip) if ip.is_unspecified() => "[::1]".to_string(),
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{}]", ip),
        };
        format!("ldap://{}:{}", host, self.port())
    }
}

impl Drop for EmbeddedDirectoryServer {
    fn drop(&mut self) {
        if self.state == FixtureState::Stopped || !self.directory.flags().shutdown_hook_enabled {
            return;
        }

        debug!("Embedded directory {} dropped while running", self.root_dn);
        self.listener.signal_shutdown();
        if let Err(e) = self.directory.shutdown() {
            warn!("Failed to shut down directory service: {}", e);
        }
        delete_dir(&self.work_dir);
    }
}

/// The value of the `dc` attribute put on the root entry: the second token
/// of the DN's user-provided form split on `=` and `,`. That form already
/// drops whitespace around both separators, so `dc= example` yields `example`.
pub fn domain_component(dn: &Dn) -> crate::Result<String> {
    dn.up_name()
        .split(['=', ','])
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| {
            DirectoryError::InvalidDn(format!("cannot derive a domain component from {}", dn))
        })
}

/// Picks the working directory, substituting a fresh temporary directory
/// when the chosen path already exists.
fn init_work_dir(requested: Option<&Path>) -> crate::Result<PathBuf> {
    let dir = match requested {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?.join(DEFAULT_WORK_DIR_NAME),
    };
    if !dir.exists() {
        return Ok(dir);
    }

    let temp = tempfile::Builder::new()
        .prefix("embedldap-work-")
        .tempdir()?
        .into_path();
    debug!(
        "{} already exists, using {} instead",
        dir.display(),
        temp.display()
    );
    Ok(temp)
}

fn delete_dir(dir: &Path) -> bool {
    if !dir.exists() {
        return true;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to delete working directory {}: {}", dir.display(), e);
            false
        }
    }
}
