//! ClipVault - chunked recording, clip extraction and session sync.
//!
//! This is the main library crate. It records a frame stream into bounded
//! chunk files, cuts arbitrary time ranges out of them, and uploads
//! finished sessions under a byte quota.

pub mod app;
pub mod clip;
pub mod config;
pub mod recorder;
pub mod store;
pub mod sync;
pub mod utils;

pub use app::ClipVault;
pub use config::Config;
pub use utils::error::{AppError, AppResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// Reads `RUST_LOG`, defaulting to `clipvault=debug`. Later calls are no-ops.
pub fn init_tracing() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipvault=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Starting ClipVault v{}", env!("CARGO_PKG_VERSION"));
    }
}
