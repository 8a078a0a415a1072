//! One poll-and-persist cycle for one scope.
//!
//! Order inside the scope lock: read watermark, poll, emit, write. Events
//! are published before the watermark moves, so a crash between the two
//! re-emits on the next cycle instead of losing changes.
//!
//! The `>=` filter returns entries at the watermark second again on every
//! cycle. Those already recorded in `observed_ids` for that second are not
//! published again; new identifiers in the same second are.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::emitter::EventEmitter;
use crate::error::SyncResult;
use crate::poller::ChangePoller;
use crate::watermark::WatermarkStore;

/// What a poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollCycleReport {
    pub scope: String,
    /// Distinct identifiers returned by the directory.
    pub found: usize,
    /// Messages published.
    pub emitted: usize,
    /// Identifiers already recorded at the watermark second, not published.
    pub repeated_same_second: usize,
    pub previous_watermark: DateTime<Utc>,
    pub watermark: DateTime<Utc>,
    /// Whether the stored watermark was modified.
    pub written: bool,
}

impl PollCycleReport {
    /// Whether the cycle published anything or moved the watermark.
    pub fn changed(&self) -> bool {
        self.emitted > 0 || self.written
    }
}

/// Run one cycle against `scope`.
///
/// On any error the lease is dropped, which rolls back: the stored
/// watermark is untouched and the next cycle starts from the same point.
#[instrument(skip(store, poller, emitter))]
pub async fn run_poll_cycle(
    store: &dyn WatermarkStore,
    poller: &ChangePoller,
    emitter: &EventEmitter,
    scope: &str,
) -> SyncResult<PollCycleReport> {
    store.ensure_scope(scope).await?;
    let lease = store.read_for_update(scope).await?;
    let previous = lease.current().clone();

    let outcome = poller.poll(scope, &previous.last_seen_at).await?;

    if outcome.is_empty() {
        lease.release().await?;
        debug!(scope = %scope, "No changes");
        return Ok(PollCycleReport {
            scope: scope.to_string(),
            found: 0,
            emitted: 0,
            repeated_same_second: 0,
            previous_watermark: previous.last_seen_at,
            watermark: previous.last_seen_at,
            written: false,
        });
    }

    let fresh: BTreeSet<Uuid> = outcome
        .changes
        .iter()
        .filter(|(id, changed_at)| !previous.has_observed(id, changed_at))
        .map(|(id, _)| *id)
        .collect();
    let repeated_same_second = outcome.changes.len() - fresh.len();

    let emitted = emitter.publish_all(&fresh).await?;

    let next = previous.advance(outcome.new_timestamp, &outcome.tied_ids());
    let written = next != previous;
    if written {
        lease.write(&next).await?;
    } else {
        lease.release().await?;
    }

    let report = PollCycleReport {
        scope: scope.to_string(),
        found: outcome.changes.len(),
        emitted,
        repeated_same_second,
        previous_watermark: previous.last_seen_at,
        watermark: next.last_seen_at,
        written,
    };

    if report.changed() {
        info!(
            scope = %report.scope,
            found = report.found,
            emitted = report.emitted,
            repeated_same_second = report.repeated_same_second,
            watermark = %report.watermark,
            written = report.written,
            "Poll cycle completed"
        );
    } else {
        debug!(
            scope = %report.scope,
            repeated_same_second = report.repeated_same_second,
            "Only repeats at the watermark second"
        );
    }

    Ok(report)
}
