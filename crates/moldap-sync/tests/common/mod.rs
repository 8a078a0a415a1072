//! Shared test fixtures.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use moldap_events::{ChannelSink, OutboundMessage};
use moldap_ldap::{
    decode_to_utc, encode_generalized_time, DirectoryEntry, DirectorySearch, LdapError, LdapResult,
};
use moldap_sync::{
    ChangePoller, EventEmitter, MemoryWatermarkStore, PollerSettings, DEFAULT_ROUTING_KEY,
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const SCOPE: &str = "ou=people,dc=example,dc=com";

/// In-memory directory.
///
/// Search honours the `(attr>=timestamp)` filter the poller builds, so
/// watermark behaviour can be exercised end to end.
#[derive(Default)]
pub struct FakeDirectory {
    entries: Mutex<HashMap<String, Vec<DirectoryEntry>>>,
    objects: Mutex<HashMap<String, DirectoryEntry>>,
    unavailable: Mutex<BTreeSet<String>>,
    fail_searches: AtomicBool,
    searches: AtomicUsize,
    filters: Mutex<Vec<String>>,
}

impl FakeDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a change of entity `id` in `scope` at `changed_at`, replacing
    /// any earlier entry for the same entity.
    pub fn touch(&self, scope: &str, id: Uuid, changed_at: DateTime<Utc>) {
        let entry = DirectoryEntry::new(format!("entryUUID={id},{scope}"))
            .with_value("entryUUID", id.to_string())
            .with_value("modifyTimestamp", encode_generalized_time(&changed_at));
        let mut entries = self.entries.lock().unwrap();
        let scope_entries = entries.entry(scope.to_string()).or_default();
        scope_entries.retain(|e| e.dn != entry.dn);
        scope_entries.push(entry);
    }

    /// Add a raw entry to a scope.
    pub fn add_raw(&self, scope: &str, entry: DirectoryEntry) {
        self.entries
            .lock()
            .unwrap()
            .entry(scope.to_string())
            .or_default()
            .push(entry);
    }

    /// Make an object available for base-scope reads.
    pub fn add_object(&self, entry: DirectoryEntry) {
        self.objects.lock().unwrap().insert(entry.dn.clone(), entry);
    }

    /// Make reads of `dn` fail with a connection error.
    pub fn make_unavailable(&self, dn: &str) {
        self.unavailable.lock().unwrap().insert(dn.to_string());
    }

    pub fn fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn filters(&self) -> Vec<String> {
        self.filters.lock().unwrap().clone()
    }
}

fn parse_since(filter: &str) -> (String, DateTime<Utc>) {
    let inner = filter.trim_start_matches('(').trim_end_matches(')');
    let (attr, value) = inner.split_once(">=").expect("filter of the form (attr>=value)");
    (attr.to_string(), decode_to_utc(value).expect("encoded timestamp"))
}

#[async_trait]
impl DirectorySearch for FakeDirectory {
    async fn search_paged(
        &self,
        base: &str,
        filter: &str,
        _attributes: &[String],
    ) -> LdapResult<Vec<DirectoryEntry>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.filters.lock().unwrap().push(filter.to_string());
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(LdapError::connection_failed("directory unreachable"));
        }

        let (attr, since) = parse_since(filter);
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(base)
            .map(|scope_entries| {
                scope_entries
                    .iter()
                    .filter(|entry| match entry.single_value(&attr) {
                        Some(raw) => decode_to_utc(raw).map_or(true, |ts| ts >= since),
                        // Partial entries are returned as-is.
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_object(
        &self,
        dn: &str,
        _attributes: &[String],
    ) -> LdapResult<Option<DirectoryEntry>> {
        if self.unavailable.lock().unwrap().contains(dn) {
            return Err(LdapError::connection_failed("read timed out"));
        }
        Ok(self.objects.lock().unwrap().get(dn).cloned())
    }
}

/// Everything a poll cycle needs, wired to in-memory collaborators.
pub struct Harness {
    pub directory: Arc<FakeDirectory>,
    pub store: Arc<MemoryWatermarkStore>,
    pub poller: Arc<ChangePoller>,
    pub emitter: Arc<EventEmitter>,
    pub events: mpsc::Receiver<OutboundMessage>,
}

impl Harness {
    pub fn new() -> Self {
        let directory = FakeDirectory::new();
        let (sink, events) = ChannelSink::new(1024);
        Self {
            store: Arc::new(MemoryWatermarkStore::new()),
            poller: Arc::new(ChangePoller::new(
                directory.clone(),
                PollerSettings::default(),
            )),
            emitter: Arc::new(EventEmitter::new(Arc::new(sink), DEFAULT_ROUTING_KEY)),
            directory,
            events,
        }
    }

    /// Identifiers published since the last drain.
    pub fn drain_events(&mut self) -> Vec<Uuid> {
        let mut ids = Vec::new();
        while let Ok(message) = self.events.try_recv() {
            ids.push(serde_json::from_slice(&message.payload).unwrap());
        }
        ids
    }
}

pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, hour, minute, second).unwrap()
}

pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}
