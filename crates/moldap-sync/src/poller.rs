//! Change poller.
//!
//! One poll searches one scope for entries changed at or after the
//! watermark and folds the results into the identifiers to emit and the
//! newest change timestamp seen.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use moldap_ldap::{changed_since_filter, decode_to_utc, DirectoryEntry, DirectorySearch};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::SyncResult;

/// Attribute names the poller reads from each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerSettings {
    /// Entity identifier attribute (`entryUUID`, `objectGUID`).
    pub id_attribute: String,
    /// Change timestamp attribute (`modifyTimestamp`, `whenChanged`).
    pub timestamp_attribute: String,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            id_attribute: "entryUUID".to_string(),
            timestamp_attribute: "modifyTimestamp".to_string(),
        }
    }
}

/// A change extracted from one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub entity_id: Uuid,
    pub changed_at: DateTime<Utc>,
}

/// Result of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Latest change timestamp per identifier found.
    pub changes: BTreeMap<Uuid, DateTime<Utc>>,
    /// Newest change timestamp over all changes.
    pub new_timestamp: Option<DateTime<Utc>>,
}

impl PollOutcome {
    /// Fold change events; an identifier seen twice keeps its newest time.
    pub fn from_changes(events: impl IntoIterator<Item = ChangeEvent>) -> Self {
        let mut changes: BTreeMap<Uuid, DateTime<Utc>> = BTreeMap::new();
        for event in events {
            changes
                .entry(event.entity_id)
                .and_modify(|ts| *ts = (*ts).max(event.changed_at))
                .or_insert(event.changed_at);
        }
        let new_timestamp = changes.values().max().copied();
        Self {
            changes,
            new_timestamp,
        }
    }

    /// Every identifier found, each once.
    pub fn entity_ids(&self) -> BTreeSet<Uuid> {
        self.changes.keys().copied().collect()
    }

    /// Identifiers whose change timestamp equals `new_timestamp`.
    pub fn tied_ids(&self) -> BTreeSet<Uuid> {
        match self.new_timestamp {
            Some(newest) => self
                .changes
                .iter()
                .filter(|(_, ts)| **ts == newest)
                .map(|(id, _)| *id)
                .collect(),
            None => BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Polls one directory for changed entries.
pub struct ChangePoller {
    directory: Arc<dyn DirectorySearch>,
    settings: PollerSettings,
}

impl ChangePoller {
    pub fn new(directory: Arc<dyn DirectorySearch>, settings: PollerSettings) -> Self {
        Self {
            directory,
            settings,
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Filter selecting entries changed at or after `since`.
    pub fn filter_for(&self, since: &DateTime<Utc>) -> String {
        changed_since_filter(&self.settings.timestamp_attribute, since)
    }

    /// Search `scope` for entries changed at or after `since`.
    ///
    /// Entries lacking a usable identifier or timestamp are skipped with a
    /// warning. Directory errors propagate.
    #[instrument(skip(self))]
    pub async fn poll(&self, scope: &str, since: &DateTime<Utc>) -> SyncResult<PollOutcome> {
        let filter = self.filter_for(since);
        let attributes = [
            self.settings.id_attribute.clone(),
            self.settings.timestamp_attribute.clone(),
        ];

        let entries = self
            .directory
            .search_paged(scope, &filter, &attributes)
            .await?;

        debug!(filter = %filter, entries = entries.len(), "Change search completed");

        Ok(PollOutcome::from_changes(
            entries.iter().filter_map(|entry| self.extract(entry)),
        ))
    }

    /// Extract the change carried by one entry.
    pub fn extract(&self, entry: &DirectoryEntry) -> Option<ChangeEvent> {
        let Some(entity_id) = entry.entity_id(&self.settings.id_attribute) else {
            warn!(
                dn = %entry.dn,
                attribute = %self.settings.id_attribute,
                "Skipping entry without usable identifier"
            );
            return None;
        };

        let Some(raw) = entry.single_value(&self.settings.timestamp_attribute) else {
            warn!(
                dn = %entry.dn,
                attribute = %self.settings.timestamp_attribute,
                "Skipping entry without change timestamp"
            );
            return None;
        };

        match decode_to_utc(raw) {
            Ok(changed_at) => Some(ChangeEvent {
                entity_id,
                changed_at,
            }),
            Err(e) => {
                warn!(dn = %entry.dn, error = %e, "Skipping entry with malformed change timestamp");
                None
            }
        }
    }
}

impl std::fmt::Debug for ChangePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePoller")
            .field("settings", &self.settings)
            .finish()
    }
}
