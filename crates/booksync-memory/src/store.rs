use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use booksync_core::{Guid, Instance};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Modified,
    Destroyed,
    Moved,
}

#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub seq: u64,
    pub origin: SessionId,
    pub guid: Guid,
    pub kind: EventKind,
}

/// Everything persisted under one `mem://` name.
pub(crate) struct StoreData {
    pub book_guid: Guid,
    pub book_version: i32,
    pub instances: BTreeMap<Guid, Instance>,
    pub tombstones: HashSet<Guid>,
    pub counters: HashMap<String, i64>,
    pub lock_holder: Option<SessionId>,
    /// Outstanding edit markers: the version each session saw at `begin`.
    pub intents: HashMap<Guid, HashMap<SessionId, i32>>,
    /// Events some attached session other than the origin has not seen yet.
    pub events: Vec<StoreEvent>,
    /// Last event seq each attached session has seen.
    cursors: HashMap<SessionId, u64>,
    next_event: u64,
}

impl StoreData {
    pub fn new(book_guid: Guid) -> Self {
        Self {
            book_guid,
            book_version: 0,
            instances: BTreeMap::new(),
            tombstones: HashSet::new(),
            counters: HashMap::new(),
            lock_holder: None,
            intents: HashMap::new(),
            events: Vec::new(),
            cursors: HashMap::new(),
            next_event: 1,
        }
    }

    pub fn record_event(&mut self, origin: SessionId, guid: Guid, kind: EventKind) {
        let seq = self.next_event;
        self.next_event += 1;
        self.events.push(StoreEvent { seq, origin, guid, kind });
        self.book_version += 1;
        self.trim_events();
    }

    pub fn last_event_seq(&self) -> u64 {
        self.next_event - 1
    }

    /// Starts tracking `session` from the current end of the event log.
    pub fn attach(&mut self, session: SessionId) {
        self.cursors.insert(session, self.last_event_seq());
    }

    pub fn cursor(&self, session: SessionId) -> u64 {
        self.cursors
            .get(&session)
            .copied()
            .unwrap_or_else(|| self.last_event_seq())
    }

    /// Marks every event as seen by `session`.
    pub fn advance(&mut self, session: SessionId) {
        if let Some(cursor) = self.cursors.get_mut(&session) {
            *cursor = self.next_event - 1;
        }
        self.trim_events();
    }

    // Drops events every attached session other than the origin has seen.
    fn trim_events(&mut self) {
        let cursors = &self.cursors;
        self.events
            .retain(|e| cursors.iter().any(|(session, seen)| *session != e.origin && *seen < e.seq));
    }

    pub fn release_intent(&mut self, guid: &Guid, session: SessionId) {
        if let Some(editors) = self.intents.get_mut(guid) {
            editors.remove(&session);
            if editors.is_empty() {
                self.intents.remove(guid);
            }
        }
    }

    pub fn release_session(&mut self, session: SessionId) {
        self.intents.retain(|_, editors| {
            editors.remove(&session);
            !editors.is_empty()
        });
        if self.lock_holder == Some(session) {
            self.lock_holder = None;
        }
        self.cursors.remove(&session);
        self.trim_events();
    }
}

/// Point-in-time view of a store, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    pub book_guid: Guid,
    pub book_version: i32,
    pub instances: usize,
    pub tombstones: usize,
    pub pending_edits: usize,
    pub locked: bool,
    /// Events still retained for sessions that have not seen them.
    pub events: usize,
}

/// Process-wide namespace of memory stores, shared by every backend a
/// provider creates.
#[derive(Clone, Default)]
pub struct MemoryRoot {
    stores: Arc<RwLock<BTreeMap<String, Arc<RwLock<StoreData>>>>>,
    sessions: Arc<AtomicU64>,
}

impl MemoryRoot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_session(&self) -> SessionId {
        self.sessions.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<RwLock<StoreData>>> {
        self.stores.read().unwrap().get(name).cloned()
    }

    pub(crate) fn get_or_create(&self, name: &str, create: bool) -> Option<Arc<RwLock<StoreData>>> {
        let mut stores = self.stores.write().unwrap();
        if let Some(store) = stores.get(name) {
            return Some(store.clone());
        }
        if !create {
            return None;
        }
        let store = Arc::new(RwLock::new(StoreData::new(Guid::new_v4())));
        stores.insert(name.to_string(), store.clone());
        tracing::debug!(store = name, "Memory store created");
        Some(store)
    }

    /// Inserts a fresh store; returns `None` when `name` is taken.
    pub(crate) fn create_new(&self, name: &str, data: StoreData) -> Option<Arc<RwLock<StoreData>>> {
        let mut stores = self.stores.write().unwrap();
        if stores.contains_key(name) {
            return None;
        }
        let store = Arc::new(RwLock::new(data));
        stores.insert(name.to_string(), store.clone());
        Some(store)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.read().unwrap().contains_key(name)
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.read().unwrap().keys().cloned().collect()
    }

    pub fn summary(&self, name: &str) -> Option<StoreSummary> {
        let store = self.get(name)?;
        let data = store.read().unwrap();
        Some(StoreSummary {
            book_guid: data.book_guid,
            book_version: data.book_version,
            instances: data.instances.len(),
            tombstones: data.tombstones.len(),
            pending_edits: data.intents.values().map(HashMap::len).sum(),
            locked: data.lock_holder.is_some(),
            events: data.events.len(),
        })
    }

    pub fn clear(&self) {
        self.stores.write().unwrap().clear();
    }
}
