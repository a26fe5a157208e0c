//! In-process counter store for single-instance deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{CounterStore, StoreError};
use crate::ratelimit::window::{WindowSnapshot, WindowState};

struct Entry {
    state: WindowState,
    window_ms: u64,
}

/// Process-local store: one mutex-guarded window record per key.
///
/// The per-key mutex is held only across the read-modify-write — never
/// across an await point or anything blocking — so contention is limited to
/// callers racing on the same identity. Expiry is lazy: a record past its
/// TTL is treated as absent on the next touch, and [`purge_expired`]
/// reclaims idle entries wholesale.
///
/// [`purge_expired`]: MemoryStore::purge_expired
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Mutex<Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }

    /// Remove every record past its TTL.
    pub fn purge_expired(&self) {
        let now_ms = Self::now_ms();
        self.entries.retain(|_, entry| {
            let entry = entry.lock();
            !entry.state.is_expired(now_ms, entry.window_ms)
        });
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all records. Primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn check_and_increment(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot, StoreError> {
        let now_ms = Self::now_ms();
        let window_ms = window.as_millis() as u64;

        let entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Entry {
                state: WindowState::new(now_ms),
                window_ms,
            })
        });

        let mut entry = entry.lock();
        if entry.state.is_expired(now_ms, entry.window_ms) {
            entry.state = WindowState::new(now_ms);
        }
        entry.window_ms = window_ms;
        Ok(entry.state.try_admit(now_ms, window_ms, limit))
    }

    async fn current_usage(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot, StoreError> {
        let now_ms = Self::now_ms();
        let window_ms = window.as_millis() as u64;

        match self.entries.get(key) {
            Some(entry) => {
                let entry = entry.lock();
                if entry.state.is_expired(now_ms, entry.window_ms) {
                    Ok(WindowState::new(now_ms).observe(now_ms, window_ms, limit))
                } else {
                    Ok(entry.state.observe(now_ms, window_ms, limit))
                }
            }
            None => Ok(WindowState::new(now_ms).observe(now_ms, window_ms, limit)),
        }
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
