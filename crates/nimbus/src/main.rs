//! Nimbus node entry point.
//!
//! One binary runs every cluster role. The role, addresses and wrapper
//! launch settings come from the configuration file, with command-line
//! overrides applied on top.

mod cli;
mod config;
mod logging;
mod node;
mod signals;

use cli::CliArgs;
use config::AppConfig;
use logging::setup_logging;
use signals::setup_signal_handlers;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Main application struct.
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(role) = args.role {
            config.node.role = role;
        }
        if let Some(bind_address) = args.bind_address {
            config.network.bind_address = bind_address;
        }
        if let Some(manager_address) = args.manager_address {
            config.network.manager_address = manager_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(config::ConfigError::Invalid)?;

        setup_logging(&config.logging)?;
        display_banner();

        info!(
            "📂 Config: {} | Role: {} | Node: {}",
            args.config_path.display(),
            config.node.role,
            config.node.name
        );

        Ok(Self { config })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.network.bind_address);
        info!("  🔗 Manager address: {}", self.config.network.manager_address);
        info!(
            "  ⏱️ Request timeout: {}ms",
            self.config.network.request_timeout_ms
        );

        let (shutdown, _) = broadcast::channel(4);
        let mut node = tokio::spawn(node::run_node(self.config, shutdown.clone()));

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            finished = &mut node => {
                // The node ended on its own, e.g. its manager went away.
                return finished?;
            }
            signal = setup_signal_handlers() => signal?,
        }

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        let _ = shutdown.send(());
        node.await??;

        info!("👋 Nimbus node shutdown complete");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}

/// Display startup banner using proper logging
fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║              ☁️  NIMBUS  ☁️                ║");
    info!("║          Cluster Node v{:<18}║", version);
    info!("║                                          ║");
    info!("║  Manager · Wrapper · Proxy               ║");
    info!("╚══════════════════════════════════════════╝");
}
