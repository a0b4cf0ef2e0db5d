//! Upload quota
//!
//! A persisted byte budget refilled to a fixed ceiling once per refresh
//! window. Reservations either debit the full amount or leave the state
//! untouched.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Quota errors
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Quota exceeded: requested {requested} bytes, {remaining} remaining")]
    QuotaExceeded { requested: u64, remaining: u64 },

    #[error("Quota store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted quota state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub remaining_quota: u64,
    pub last_reset_time: DateTime<Utc>,
}

/// Load/save surface for [`QuotaState`]
pub trait QuotaStore: Send + Sync {
    /// `None` when nothing has been persisted yet
    fn load(&self) -> Result<Option<QuotaState>, QuotaError>;
    fn save(&self, state: &QuotaState) -> Result<(), QuotaError>;
}

/// Time source, replaceable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// [`QuotaStore`] persisting to a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileQuotaStore {
    path: PathBuf,
}

impl JsonFileQuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QuotaStore for JsonFileQuotaStore {
    fn load(&self) -> Result<Option<QuotaState>, QuotaError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, state: &QuotaState) -> Result<(), QuotaError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let content = serde_json::to_string_pretty(state)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| QuotaError::Io(e.error))?;
        Ok(())
    }
}

/// [`QuotaStore`] kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryQuotaStore {
    state: Arc<Mutex<Option<QuotaState>>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: QuotaState) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(state))),
        }
    }

    pub fn snapshot(&self) -> Option<QuotaState> {
        *self.state.lock()
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn load(&self) -> Result<Option<QuotaState>, QuotaError> {
        Ok(*self.state.lock())
    }

    fn save(&self, state: &QuotaState) -> Result<(), QuotaError> {
        *self.state.lock() = Some(*state);
        Ok(())
    }
}

/// Byte budget gating uploads
pub struct RecordingQuota {
    ceiling: u64,
    refresh_interval: Duration,
    store: Box<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    /// Serializes load-modify-save
    lock: Mutex<()>,
}

impl RecordingQuota {
    pub fn new(ceiling: u64, refresh_interval: Duration, store: Box<dyn QuotaStore>) -> Self {
        Self::with_clock(ceiling, refresh_interval, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        ceiling: u64,
        refresh_interval: Duration,
        store: Box<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ceiling,
            refresh_interval,
            store,
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Current state after applying any due refresh
    fn current(&self) -> Result<QuotaState, QuotaError> {
        let now = self.clock.now();
        let state = match self.store.load()? {
            Some(state) => state,
            None => {
                let fresh = QuotaState {
                    remaining_quota: self.ceiling,
                    last_reset_time: now,
                };
                self.store.save(&fresh)?;
                return Ok(fresh);
            }
        };

        if now - state.last_reset_time >= self.refresh_interval {
            let refreshed = QuotaState {
                remaining_quota: self.ceiling,
                last_reset_time: now,
            };
            self.store.save(&refreshed)?;
            tracing::info!("Quota refreshed to {} bytes", self.ceiling);
            return Ok(refreshed);
        }

        Ok(state)
    }

    /// Bytes that could be reserved right now
    pub fn remaining(&self) -> Result<u64, QuotaError> {
        let _guard = self.lock.lock();
        Ok(self.current()?.remaining_quota)
    }

    /// Debit `bytes` from the budget
    ///
    /// Fails with [`QuotaError::QuotaExceeded`] without changing the
    /// remaining amount when the budget is too small.
    pub fn reserve(&self, bytes: u64) -> Result<(), QuotaError> {
        let _guard = self.lock.lock();
        let state = self.current()?;

        let remaining = state
            .remaining_quota
            .checked_sub(bytes)
            .ok_or(QuotaError::QuotaExceeded {
                requested: bytes,
                remaining: state.remaining_quota,
            })?;

        self.store.save(&QuotaState {
            remaining_quota: remaining,
            ..state
        })?;

        tracing::debug!("Reserved {} bytes, {} remaining", bytes, remaining);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    /// Clock advanced by hand
    #[derive(Clone)]
    pub(crate) struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self(Arc::new(Mutex::new(
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            )))
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.0.lock();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    fn quota(ceiling: u64, clock: &ManualClock) -> RecordingQuota {
        RecordingQuota::with_clock(
            ceiling,
            Duration::hours(24),
            Box::new(MemoryQuotaStore::new()),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn test_overdraw_fails_without_debit() {
        let clock = ManualClock::new();
        let quota = quota(100, &clock);

        quota.reserve(40).unwrap();
        let err = quota.reserve(100 - 40 + 1).unwrap_err();
        assert!(matches!(
            err,
            QuotaError::QuotaExceeded {
                requested: 61,
                remaining: 60
            }
        ));
        assert_eq!(quota.remaining().unwrap(), 60);

        quota.reserve(60).unwrap();
        assert_eq!(quota.remaining().unwrap(), 0);
    }

    #[test]
    fn test_refresh_restores_ceiling() {
        let clock = ManualClock::new();
        let quota = quota(100, &clock);

        quota.reserve(100).unwrap();
        assert!(quota.reserve(1).is_err());

        clock.advance(Duration::hours(23));
        assert!(quota.reserve(1).is_err());

        clock.advance(Duration::hours(1));
        quota.reserve(100).unwrap();
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quota.json");
        let clock = ManualClock::new();

        let first = RecordingQuota::with_clock(
            100,
            Duration::hours(24),
            Box::new(JsonFileQuotaStore::new(&path)),
            Arc::new(clock.clone()),
        );
        first.reserve(30).unwrap();
        drop(first);

        let second = RecordingQuota::with_clock(
            100,
            Duration::hours(24),
            Box::new(JsonFileQuotaStore::new(&path)),
            Arc::new(clock),
        );
        assert_eq!(second.remaining().unwrap(), 70);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["remainingQuota"], 70);
        assert!(raw["lastResetTime"].is_string());
    }
}
