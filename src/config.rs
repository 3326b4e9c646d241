use crate::directory::ServiceFlags;
use crate::DirectoryError;
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_LDAP_PORT: u16 = 10389;
pub const DEFAULT_WORK_DIR_NAME: &str = "embedldap-work";

pub const DEFAULT_CLI_ROOT_DN: &str = "dc=ambari,dc=apache,dc=org";
pub const DEFAULT_CLI_PORT: i64 = 33389;
pub const DEFAULT_CLI_LDIF: &str = "resources/users.ldif";

/// Everything an embedded directory server is built from.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub root_dn: String,
    /// Absent means `<current dir>/embedldap-work`.
    pub work_dir: Option<PathBuf>,
    /// Zero or negative selects the default port.
    pub ldap_port: i32,
    pub bind_address: IpAddr,
    pub flags: ServiceFlags,
}

impl FixtureConfig {
    pub fn new(root_dn: &str) -> Self {
        Self {
            root_dn: root_dn.to_string(),
            work_dir: None,
            ldap_port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            flags: ServiceFlags::fixture(),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    pub fn with_port(mut self, port: i32) -> Self {
        self.ldap_port = port;
        self
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_flags(mut self, flags: ServiceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The TCP port to listen on after defaulting.
    pub fn resolved_port(&self) -> crate::Result<u16> {
        if self.ldap_port <= 0 {
            return Ok(DEFAULT_LDAP_PORT);
        }
        u16::try_from(self.ldap_port)
            .map_err(|_| DirectoryError::Config(format!("invalid LDAP port: {}", self.ldap_port)))
    }

    pub fn socket_addr(&self) -> crate::Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_address, self.resolved_port()?))
    }
}

#[derive(Parser, Debug, Default)]
#[command(name = "embedldap")]
#[command(about = "Runs an embedded LDAP directory server for local testing")]
#[command(version)]
pub struct CliArgs {
    /// Settings file layered under the command line flags
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Suffix DN of the root partition
    #[arg(long)]
    pub root_dn: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<i32>,

    /// Address to bind to
    #[arg(long)]
    pub bind_address: Option<String>,

    /// Working directory, removed again on shutdown
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// LDIF file or file: URL to load after start
    #[arg(long, value_name = "LOCATION")]
    pub ldif: Option<String>,

    /// Start with an empty directory
    #[arg(long, conflicts_with = "ldif")]
    pub no_ldif: bool,

    /// Refuse anonymous binds and searches
    #[arg(long)]
    pub deny_anonymous: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Set log level: debug, info, warn, error
    #[arg(long)]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// The tracing filter requested on the command line, if any.
    pub fn log_filter(&self) -> Option<String> {
        if self.verbose {
            return Some("debug".to_string());
        }
        self.log_level.as_ref().map(|level| level.to_lowercase())
    }
}

/// Settings of the `embedldap` binary after layering defaults, the optional
/// settings file, `EMBEDLDAP_*` variables and command line flags.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub root_dn: String,
    pub port: i64,
    pub bind_address: String,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub ldif: Option<String>,
    pub allow_anonymous: bool,
}

impl Settings {
    pub fn load(args: &CliArgs) -> crate::Result<Self> {
        Self::build(args).map_err(|e| DirectoryError::Config(e.to_string()))
    }

    fn build(args: &CliArgs) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("root_dn", DEFAULT_CLI_ROOT_DN)?
            .set_default("port", DEFAULT_CLI_PORT)?
            .set_default("bind_address", "0.0.0.0")?
            .set_default("ldif", DEFAULT_CLI_LDIF)?
            .set_default("allow_anonymous", true)?;

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        builder = builder
            .add_source(config::Environment::with_prefix("EMBEDLDAP").try_parsing(true))
            .set_override_option("root_dn", args.root_dn.clone())?
            .set_override_option("port", args.port.map(i64::from))?
            .set_override_option("bind_address", args.bind_address.clone())?
            .set_override_option(
                "work_dir",
                args.work_dir.as_ref().map(|p| p.display().to_string()),
            )?
            .set_override_option("ldif", args.ldif.clone())?;

        if args.deny_anonymous {
            builder = builder.set_override("allow_anonymous", false)?;
        }

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        if args.no_ldif {
            settings.ldif = None;
        }
        Ok(settings)
    }

    pub fn fixture_config(&self) -> crate::Result<FixtureConfig> {
        let bind_address: IpAddr = self.bind_address.parse().map_err(|e| {
            DirectoryError::Config(format!("Invalid bind address {}: {}", self.bind_address, e))
        })?;
        let port = i32::try_from(self.port)
            .map_err(|_| DirectoryError::Config(format!("invalid LDAP port: {}", self.port)))?;

        let mut config = FixtureConfig::new(&self.root_dn)
            .with_port(port)
            .with_bind_address(bind_address)
            .with_flags(ServiceFlags {
                allow_anonymous_access: self.allow_anonymous,
                ..ServiceFlags::fixture()
            });
        if let Some(dir) = &self.work_dir {
            config = config.with_work_dir(dir);
        }
        // Reject out of range ports before anything starts
        config.resolved_port()?;
        Ok(config)
    }
}
