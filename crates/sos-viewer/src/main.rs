//! SOS-Link viewer entry point.
//!
//! Searches the LAN for the beacon, keeps an alert stream open and logs every
//! alert and status change until Ctrl-C.
//!
//! ```text
//! main()
//!  └─ load_config()        -- viewer.toml or defaults
//!  └─ ViewerLink::start()  -- browse → connect → AlertFeed
//!  └─ status pump          -- logs ConnectionStatus changes
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sos_viewer::application::alert_feed::AlertFeed;
use sos_viewer::infrastructure::storage::config::{load_config, ViewerConfig};
use sos_viewer::infrastructure::viewer_link::ViewerLink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (ViewerConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.viewer.log_level)),
        )
        .init();

    info!("SOS-Link viewer starting");
    if let Some(e) = config_error {
        warn!("using default configuration: {e}");
    }

    let browser_config = config
        .network
        .browser_config()
        .context("invalid viewer network configuration")?;
    let feed = Arc::new(Mutex::new(AlertFeed::with_max_alerts(config.viewer.max_alerts)));
    let mut link = ViewerLink::new(browser_config, config.network.session_config(), Arc::clone(&feed));

    let mut status = link.subscribe_status();
    link.start().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(connected = current.is_connected, "{}", current.status);
            }
        }
    }

    link.stop().await;
    let received = feed.lock().await.len();
    info!(alerts = received, "SOS-Link viewer stopped");
    Ok(())
}
