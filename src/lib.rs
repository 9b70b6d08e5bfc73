//! ClipCam - timed webcam clips, made simple.
//!
//! One camera shared between a live MJPEG preview and any number of timed
//! recordings. Clients start recordings over HTTP and poll for the result.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod server;
pub mod session;
pub mod storage;
pub mod stream;
pub mod utils;

pub use config::Config;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipcam=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the server with the given configuration
pub async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting ClipCam v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Camera {} at {}x{}@{} ({:?} access), clips in {:?}",
        config.camera,
        config.width,
        config.height,
        config.fps,
        config.device_policy,
        config.clip_dir
    );
    server::serve(config).await
}
