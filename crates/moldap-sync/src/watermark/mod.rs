//! Per-scope change watermarks.
//!
//! A watermark records the newest directory change timestamp seen for one
//! search scope, together with the identifiers observed at exactly that
//! second. Directory timestamps have second granularity, so the next poll
//! filters with `>=` and the tied identifiers tell repeats apart from
//! genuinely new changes in the same second.
//!
//! Stores hand out a [`WatermarkLease`]: the scope stays locked until the
//! lease is written or released, and dropping it rolls back.

mod memory;
mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncResult;

pub use memory::MemoryWatermarkStore;
pub use postgres::PgWatermarkStore;

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch.
const SENTINEL_UNIX_SECONDS: i64 = -62_135_596_800;

/// The "beginning of time" watermark: 0001-01-01T00:00:00Z.
#[must_use]
pub fn sentinel_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(SENTINEL_UNIX_SECONDS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Durable polling position of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeWatermark {
    /// Search base this watermark belongs to.
    pub scope: String,
    /// Newest change timestamp observed, truncated to the second.
    pub last_seen_at: DateTime<Utc>,
    /// Identifiers observed exactly at `last_seen_at`.
    pub observed_ids: BTreeSet<Uuid>,
}

impl ScopeWatermark {
    /// A fresh watermark at the sentinel epoch.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            last_seen_at: sentinel_epoch(),
            observed_ids: BTreeSet::new(),
        }
    }

    /// Compute the watermark after observing changes up to `newest`.
    ///
    /// `tied_ids` are the identifiers whose change timestamp equals
    /// `newest`. The result never moves backwards: an older or absent
    /// timestamp leaves the watermark as it is, and a timestamp equal to the
    /// current one extends the tied set.
    #[must_use]
    pub fn advance(&self, newest: Option<DateTime<Utc>>, tied_ids: &BTreeSet<Uuid>) -> Self {
        match newest {
            Some(ts) if ts > self.last_seen_at => Self {
                scope: self.scope.clone(),
                last_seen_at: ts,
                observed_ids: tied_ids.clone(),
            },
            Some(ts) if ts == self.last_seen_at => Self {
                scope: self.scope.clone(),
                last_seen_at: ts,
                observed_ids: self.observed_ids.union(tied_ids).copied().collect(),
            },
            _ => self.clone(),
        }
    }

    /// Whether `id` was already recorded at `changed_at`.
    pub fn has_observed(&self, id: &Uuid, changed_at: &DateTime<Utc>) -> bool {
        *changed_at == self.last_seen_at && self.observed_ids.contains(id)
    }
}

/// Transactional storage of scope watermarks.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Create the row for `scope` at the sentinel epoch if it does not exist.
    ///
    /// Idempotent and safe under concurrent callers.
    async fn ensure_scope(&self, scope: &str) -> SyncResult<()>;

    /// Lock the row for `scope` and return its state.
    ///
    /// The lock is held until the lease is written, released or dropped.
    /// Fails with `UnknownScope` if [`ensure_scope`](Self::ensure_scope) was
    /// never called for `scope`.
    async fn read_for_update(&self, scope: &str) -> SyncResult<Box<dyn WatermarkLease>>;

    /// Read the current state without locking.
    async fn fetch(&self, scope: &str) -> SyncResult<Option<ScopeWatermark>>;
}

/// An exclusive hold on one scope's watermark.
#[async_trait]
pub trait WatermarkLease: Send {
    /// State at the time the lock was taken.
    fn current(&self) -> &ScopeWatermark;

    /// Persist `next` and release the lock.
    async fn write(self: Box<Self>, next: &ScopeWatermark) -> SyncResult<()>;

    /// Release the lock without modifying the row.
    async fn release(self: Box<Self>) -> SyncResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, secs).unwrap()
    }

    fn ids(values: &[u128]) -> BTreeSet<Uuid> {
        values.iter().map(|v| Uuid::from_u128(*v)).collect()
    }

    #[test]
    fn test_sentinel_epoch() {
        assert_eq!(
            sentinel_epoch(),
            Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap()
        );
        let fresh = ScopeWatermark::new("dc=example,dc=com");
        assert_eq!(fresh.last_seen_at, sentinel_epoch());
        assert!(fresh.observed_ids.is_empty());
    }

    #[test]
    fn test_advance_to_newer_second_replaces_ties() {
        let current = ScopeWatermark {
            scope: "s".to_string(),
            last_seen_at: at(10),
            observed_ids: ids(&[1, 2]),
        };

        let next = current.advance(Some(at(11)), &ids(&[3]));
        assert_eq!(next.last_seen_at, at(11));
        assert_eq!(next.observed_ids, ids(&[3]));
    }

    #[test]
    fn test_advance_within_same_second_merges_ties() {
        let current = ScopeWatermark {
            scope: "s".to_string(),
            last_seen_at: at(10),
            observed_ids: ids(&[1]),
        };

        let next = current.advance(Some(at(10)), &ids(&[1, 2]));
        assert_eq!(next.last_seen_at, at(10));
        assert_eq!(next.observed_ids, ids(&[1, 2]));
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let current = ScopeWatermark {
            scope: "s".to_string(),
            last_seen_at: at(10),
            observed_ids: ids(&[1]),
        };

        assert_eq!(current.advance(Some(at(9)), &ids(&[7])), current);
        assert_eq!(current.advance(None, &BTreeSet::new()), current);
    }

    #[test]
    fn test_has_observed() {
        let current = ScopeWatermark {
            scope: "s".to_string(),
            last_seen_at: at(10),
            observed_ids: ids(&[1]),
        };

        assert!(current.has_observed(&Uuid::from_u128(1), &at(10)));
        assert!(!current.has_observed(&Uuid::from_u128(1), &at(11)));
        assert!(!current.has_observed(&Uuid::from_u128(2), &at(10)));
    }
}
