use clap::Parser;
use embedldap::config::{CliArgs, Settings};
use embedldap::EmbeddedDirectoryServer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let filter = match args.log_filter() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::load(&args)?;
    let mut server = EmbeddedDirectoryServer::with_config(settings.fixture_config()?)?;
    server.start().await?;

    if let Some(location) = &settings.ldif {
        match server.load_ldif(location).await {
            Ok(applied) => info!("Loaded {} records from {}", applied, location),
            Err(e) => {
                server.stop().await?;
                return Err(anyhow::anyhow!("failed to load {}: {}", location, e));
            }
        }
    }

    info!("Directory {} ready at {}", server.root_dn(), server.ldap_url());
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down");
    server.stop().await?;
    Ok(())
}
