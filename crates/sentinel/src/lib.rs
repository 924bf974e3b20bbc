//! # Sentinel
//!
//! Background host of the Sentinel ad blocker. Loads the configuration,
//! starts the messaging core with the Premium license controller and serves
//! UI pages over a local WebSocket bridge until a termination signal
//! arrives.

pub mod background;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod logging;
pub mod protocol;
pub mod signals;

use anyhow::Context;
use background::Background;
use bridge::Bridge;
use cli::CliArgs;
use config::AppConfig;
use sentinel_premium::{HttpLicenseTransport, JsonFilePrefsStore};
use sentinel_scheduler::{Clock, SessionArea};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Loads the configuration, applies CLI overrides and sets up logging.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.host.bind_address = bind_address;
        }
        if args.debug {
            config.logging.level = "debug".to_string();
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            anyhow::bail!("Configuration validation failed: {}", e);
        }

        logging::setup_logging(&config.logging, args.json_logs)?;
        info!(
            "🛡️ Sentinel v{} | Config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display()
        );

        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs until SIGINT/SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let prefs_store = Arc::new(
            JsonFilePrefsStore::open(&self.config.premium.prefs_path)
                .with_context(|| format!("Failed to open prefs at {}", self.config.premium.prefs_path))?,
        );
        let transport = Arc::new(HttpLicenseTransport::new(self.config.request_timeout())?);
        let background = Background::start(
            &self.config,
            prefs_store,
            transport,
            SessionArea::new(),
            Clock::new(),
        )
        .await;

        let addr: SocketAddr = self.config.host.bind_address.parse()?;
        let bridge = Bridge::bind(addr, background.clone())
            .await
            .with_context(|| format!("Failed to bind bridge on {}", addr))?;

        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
        let bridge_handle = tokio::spawn(bridge.run(shutdown_receiver));

        info!("✅ Sentinel is now running on {}", addr);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        if let Err(e) = signals::setup_signal_handlers().await {
            error!("Failed to listen for shutdown signals: {}", e);
        }

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        let _ = shutdown_sender.send(());
        if let Err(e) = bridge_handle.await {
            error!("Bridge task failed: {}", e);
        }
        background.stop();

        info!("✅ Sentinel shutdown complete");
        Ok(())
    }
}
