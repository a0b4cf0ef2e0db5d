//! Session synchronization
//!
//! Archives the small artifacts of finished sessions, uploads everything
//! the quota allows and prunes synced sessions.

pub mod archiver;
pub mod engine;
pub mod network;
pub mod quota;
pub mod types;

pub use archiver::{ArchiveError, Archiver, ZipArchiver};
pub use engine::SyncEngine;
pub use network::{HttpNetworkClient, NetworkClient, NetworkError};
pub use quota::{
    Clock, JsonFileQuotaStore, MemoryQuotaStore, QuotaError, QuotaState, QuotaStore,
    RecordingQuota, SystemClock,
};
pub use types::{SyncError, SyncEvent, SyncReport, SyncSettings, SyncStatus};
