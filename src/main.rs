//! # hearth
//!
//! Hearth broadcast server binary: loads settings, wires the identity
//! verifier and family directory into the server, and runs until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hearth_core::logging::init_subscriber;
use hearth_server::{
    FamilyDirectory, HearthServer, InMemoryFamilyDirectory, JwtIdentityVerifier, ServerConfig,
};
use hearth_settings::HearthSettings;

/// Hearth family event broadcast server.
#[derive(Parser, Debug)]
#[command(name = "hearth", about = "Hearth family event broadcast server")]
struct Cli {
    /// Settings file (defaults to `~/.hearth/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Family membership file (overrides settings).
    #[arg(long)]
    memberships: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<HearthSettings> {
        let mut settings = match &self.settings {
            Some(path) => hearth_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings: {}", path.display()))?,
            None => hearth_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.memberships {
            settings.directory.memberships_path = Some(path.display().to_string());
        }
        Ok(settings)
    }
}

fn load_directory(path: Option<&Path>) -> Result<InMemoryFamilyDirectory> {
    match path {
        Some(path) => InMemoryFamilyDirectory::load_from_file(path)
            .with_context(|| format!("Failed to load memberships: {}", path.display())),
        None => {
            tracing::warn!("no membership file configured; every connection will be rejected");
            Ok(InMemoryFamilyDirectory::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_subscriber(&settings.logging.level, settings.logging.format);
    settings.validate().context("Invalid settings")?;

    tracing::info!("Starting Hearth server");

    let verifier = Arc::new(JwtIdentityVerifier::from_settings(&settings.auth));
    let directory: Arc<dyn FamilyDirectory> = Arc::new(load_directory(
        settings.directory.memberships_path.as_deref().map(Path::new),
    )?);
    let metrics_handle = hearth_server::metrics::install_recorder()?;

    let config = ServerConfig::from(&settings.server);
    let server = HearthServer::new(config, verifier, directory, metrics_handle);
    let (addr, handle) = server.listen().await?;
    tracing::info!(%addr, "Hearth server ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("Shutting down...");
    let report = server
        .shutdown()
        .graceful_shutdown(server.registry(), vec![handle], Some(Duration::from_secs(10)))
        .await;
    tracing::info!(
        lingering = report.lingering_connections,
        aborted = report.aborted_tasks,
        "Shutdown complete"
    );
    Ok(())
}
