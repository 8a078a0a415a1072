//! In-process watermark store.
//!
//! Each scope sits behind its own async mutex; a lease owns the guard, which
//! gives the same serialisation as the row lock in Postgres within one
//! process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{ScopeWatermark, WatermarkLease, WatermarkStore};
use crate::error::{SyncError, SyncResult};

/// Watermark store held in memory. Contents are lost on restart.
#[derive(Debug, Default, Clone)]
pub struct MemoryWatermarkStore {
    scopes: Arc<RwLock<HashMap<String, Arc<Mutex<ScopeWatermark>>>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryWatermarkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed writes across all scopes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of scope rows.
    pub async fn len(&self) -> usize {
        self.scopes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.scopes.read().await.is_empty()
    }

    async fn slot(&self, scope: &str) -> SyncResult<Arc<Mutex<ScopeWatermark>>> {
        self.scopes
            .read()
            .await
            .get(scope)
            .cloned()
            .ok_or_else(|| SyncError::unknown_scope(scope))
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn ensure_scope(&self, scope: &str) -> SyncResult<()> {
        let mut scopes = self.scopes.write().await;
        scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ScopeWatermark::new(scope))));
        Ok(())
    }

    async fn read_for_update(&self, scope: &str) -> SyncResult<Box<dyn WatermarkLease>> {
        let guard = self.slot(scope).await?.lock_owned().await;
        let current = guard.clone();
        Ok(Box::new(MemoryWatermarkLease {
            guard,
            current,
            writes: Arc::clone(&self.writes),
        }))
    }

    async fn fetch(&self, scope: &str) -> SyncResult<Option<ScopeWatermark>> {
        let slot = self.scopes.read().await.get(scope).cloned();
        match slot {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }
}

struct MemoryWatermarkLease {
    guard: OwnedMutexGuard<ScopeWatermark>,
    current: ScopeWatermark,
    writes: Arc<AtomicUsize>,
}

#[async_trait]
impl WatermarkLease for MemoryWatermarkLease {
    fn current(&self) -> &ScopeWatermark {
        &self.current
    }

    async fn write(self: Box<Self>, next: &ScopeWatermark) -> SyncResult<()> {
        let MemoryWatermarkLease {
            mut guard, writes, ..
        } = *self;
        guard.last_seen_at = next.last_seen_at;
        guard.observed_ids = next.observed_ids.clone();
        writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(self: Box<Self>) -> SyncResult<()> {
        Ok(())
    }
}
