use std::sync::{Arc, PoisonError, RwLock};

use booksync_core::{
    Backend, BackendError, BackendState, Book, CompareOp, CompiledQuery, ErrorCode, Frame, Guid, Instance, Query,
    ValueTag,
};

use crate::store::{EventKind, MemoryRoot, SessionId, StoreData};

pub const LOCATION_PREFIX: &str = "mem://";

/// Load every stored instance on `load` (1) or nothing (0).
pub const OPT_LOAD_ALL: &str = "load-all";
/// Value a counter starts from; its first call returns this plus one. Must not be negative.
pub const OPT_COUNTER_START: &str = "counter-start";
/// Reject commits, syncs and counter bumps (1).
pub const OPT_READ_ONLY: &str = "read-only";

#[derive(Debug, Clone, Copy)]
struct MemoryOptions {
    load_all: bool,
    counter_start: i64,
    read_only: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            load_all: true,
            counter_start: 0,
            read_only: false,
        }
    }
}

impl MemoryOptions {
    fn from_config(config: &Frame) -> Result<Self, BackendError> {
        let mut options = Self::default();
        for (key, value) in config.iter() {
            if !matches!(key, OPT_LOAD_ALL | OPT_COUNTER_START | OPT_READ_ONLY) {
                return Err(BackendError::new(
                    ErrorCode::UnsupportedOption,
                    format!("memory backend has no option '{}'", key),
                ));
            }
            let int = value.as_int64().ok_or_else(|| {
                BackendError::new(
                    ErrorCode::InvalidConfig,
                    format!("option '{}' expects an int64, got {}", key, value.tag()),
                )
            })?;
            match key {
                OPT_LOAD_ALL => options.load_all = int != 0,
                OPT_COUNTER_START if int < 0 => {
                    return Err(BackendError::new(
                        ErrorCode::InvalidConfig,
                        format!("option '{}' must not be negative, got {}", key, int),
                    ))
                }
                OPT_COUNTER_START => options.counter_start = int,
                _ => options.read_only = int != 0,
            }
        }
        Ok(options)
    }
}

/// Empty names are accepted; they stand for a store not created yet.
pub fn is_store_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn store_name(location: &str) -> Result<&str, BackendError> {
    location
        .strip_prefix(LOCATION_PREFIX)
        .filter(|name| is_store_name(name))
        .ok_or_else(|| BackendError::new(ErrorCode::BadUrl, format!("not a memory location: {}", location)))
}

struct MemoryQuery {
    query: Query,
}

pub struct MemoryBackend {
    state: BackendState,
    root: MemoryRoot,
    session_id: SessionId,
    store_name: Option<String>,
    store: Option<Arc<RwLock<StoreData>>>,
    partition: Option<Guid>,
}

impl MemoryBackend {
    pub fn new(root: MemoryRoot) -> Self {
        let session_id = root.next_session();
        Self {
            state: BackendState::new(),
            root,
            session_id,
            store_name: None,
            store: None,
            partition: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn store_name(&self) -> Option<&str> {
        self.store_name.as_deref()
    }

    // Options are parsed on every call so a load_config between operations takes effect.
    fn options(&self) -> Result<MemoryOptions, BackendError> {
        MemoryOptions::from_config(self.state.config())
    }

    fn store(&self) -> Result<Arc<RwLock<StoreData>>, BackendError> {
        self.store.clone().ok_or_else(BackendError::not_open)
    }

    fn writable(&self) -> Result<MemoryOptions, BackendError> {
        let options = self.options()?;
        if options.read_only {
            return Err(BackendError::new(ErrorCode::ReadOnly, "memory store opened read-only"));
        }
        Ok(options)
    }

    fn release(&mut self) {
        if let Some(store) = self.store.take() {
            // Runs from Drop, so a poisoned store must not panic again.
            store
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .release_session(self.session_id);
        }
        self.store_name = None;
        self.partition = None;
    }
}

impl Backend for MemoryBackend {
    fn state(&self) -> &BackendState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BackendState {
        &mut self.state
    }

    fn session_begin(&mut self, location: &str, ignore_lock: bool, create_if_nonexistent: bool) -> Result<(), BackendError> {
        self.release();
        let requested = store_name(location)?;
        let name = if requested.is_empty() {
            if !create_if_nonexistent {
                return Err(BackendError::not_found(format!("{} names no store", location)));
            }
            Guid::new_v4().simple().to_string()
        } else {
            requested.to_string()
        };

        let store = self
            .root
            .get_or_create(&name, create_if_nonexistent)
            .ok_or_else(|| BackendError::not_found(format!("no memory store named '{}'", name)))?;

        {
            let mut data = store.write().unwrap();
            match data.lock_holder {
                Some(holder) if holder != self.session_id => {
                    if !ignore_lock {
                        return Err(BackendError::locked(location));
                    }
                    tracing::warn!(store = %name, holder, session = self.session_id, "Breaking memory store lock");
                }
                _ => {}
            }
            data.lock_holder = Some(self.session_id);
            data.attach(self.session_id);
        }

        self.state.set_fullpath(format!("{}{}", LOCATION_PREFIX, name));
        self.store_name = Some(name);
        self.store = Some(store);
        self.state.report_progress(Some("opened"), 100.0);
        tracing::debug!(session = self.session_id, fullpath = ?self.state.fullpath(), "Memory session begun");
        Ok(())
    }

    fn session_end(&mut self) -> Result<(), BackendError> {
        self.release();
        self.state.clear_fullpath();
        tracing::debug!(session = self.session_id, "Memory session ended");
        Ok(())
    }

    fn load(&mut self, book: &mut Book) -> Result<(), BackendError> {
        let options = self.options()?;
        let store = self.store()?;
        let mut data = store.write().unwrap();
        book.guid = data.book_guid;
        book.version = data.book_version;
        data.advance(self.session_id);
        if !options.load_all {
            self.state.report_progress(Some("loaded"), 100.0);
            return Ok(());
        }

        let total = data.instances.len().max(1) as f64;
        for (i, instance) in data.instances.values().enumerate() {
            book.insert(instance.clone());
            self.state.report_progress(Some("loading"), (i + 1) as f64 * 100.0 / total);
        }
        tracing::debug!(instances = data.instances.len(), "Memory store loaded");
        Ok(())
    }

    fn begin(&mut self, instance: &Instance) -> Result<(), BackendError> {
        let store = self.store()?;
        let mut data = store.write().unwrap();
        data.intents
            .entry(instance.guid)
            .or_default()
            .entry(self.session_id)
            .or_insert(instance.version);
        tracing::debug!(guid = %instance.guid, session = self.session_id, "Edit begun");
        Ok(())
    }

    fn commit(&mut self, instance: &mut Instance) -> Result<(), BackendError> {
        self.writable()?;
        let store = self.store()?;
        let mut data = store.write().unwrap();
        let guid = instance.guid;
        let base = data
            .intents
            .get(&guid)
            .and_then(|editors| editors.get(&self.session_id))
            .copied()
            .unwrap_or(instance.version);

        if data.tombstones.contains(&guid) {
            return Err(BackendError::modify_after_destroy(guid));
        }
        let stored_version = data.instances.get(&guid).map(|s| s.version);
        match stored_version {
            Some(_) if base == 0 => {
                return Err(BackendError::new(ErrorCode::StoreExists, format!("instance {} already exists", guid)))
            }
            Some(version) if version > base => return Err(BackendError::conflict(guid)),
            None if base > 0 => {
                return Err(BackendError::not_found(format!("instance {} is no longer in this store", guid)))
            }
            _ => {}
        }

        if instance.destroying {
            data.instances.remove(&guid);
            data.tombstones.insert(guid);
            data.record_event(self.session_id, guid, EventKind::Destroyed);
        } else {
            let version = stored_version.unwrap_or(0) + 1;
            instance.version = version;
            instance.dirty = false;
            data.instances.insert(guid, instance.stored_copy(version));
            data.record_event(self.session_id, guid, EventKind::Modified);
        }
        data.release_intent(&guid, self.session_id);
        tracing::debug!(%guid, version = instance.version, destroyed = instance.destroying, "Edit committed");
        Ok(())
    }

    fn rollback(&mut self, instance: &Instance) -> Result<(), BackendError> {
        let store = self.store()?;
        let mut data = store.write().unwrap();
        data.release_intent(&instance.guid, self.session_id);
        tracing::debug!(guid = %instance.guid, session = self.session_id, "Edit rolled back");
        if data.tombstones.contains(&instance.guid) {
            return Err(BackendError::modify_after_destroy(instance.guid));
        }
        Ok(())
    }

    fn compile_query(&mut self, query: &Query) -> Result<CompiledQuery, BackendError> {
        if query.search_for.is_empty() {
            return Err(BackendError::new(ErrorCode::QueryCompile, "query names no id type"));
        }
        for term in &query.terms {
            match (&term.value, term.op.is_ordering()) {
                (None, _) if term.op != CompareOp::Exists => {
                    return Err(BackendError::new(
                        ErrorCode::QueryCompile,
                        format!("term on '{}' has no value", term.path),
                    ))
                }
                (Some(value), true) if matches!(value.tag(), ValueTag::Blob | ValueTag::List | ValueTag::Frame) => {
                    return Err(BackendError::new(
                        ErrorCode::QueryCompile,
                        format!("cannot order {} values at '{}'", value.tag(), term.path),
                    ))
                }
                _ => {}
            }
        }
        Ok(CompiledQuery::new(MemoryQuery { query: query.clone() }))
    }

    fn run_query(&mut self, book: &mut Book, query: &CompiledQuery) -> Result<(), BackendError> {
        let compiled = query
            .downcast_ref::<MemoryQuery>()
            .ok_or_else(|| BackendError::new(ErrorCode::QueryRun, "query was not compiled by the memory backend"))?;
        let store = self.store()?;
        let data = store.read().unwrap();

        let limit = compiled.query.max_results.unwrap_or(usize::MAX);
        let matches: Vec<&Instance> = data
            .instances
            .values()
            .filter(|i| compiled.query.matches(i))
            .take(limit)
            .collect();

        let total = matches.len().max(1) as f64;
        let mut fetched = 0;
        for (i, stored) in matches.iter().enumerate() {
            let stale = match book.get(&stored.guid) {
                Some(held) => !held.dirty && held.version < stored.version,
                None => true,
            };
            if stale {
                book.insert((*stored).clone());
                fetched += 1;
            }
            self.state.report_progress(Some("query"), (i + 1) as f64 * 100.0 / total);
        }
        tracing::debug!(matched = matches.len(), fetched, "Memory query run");
        Ok(())
    }

    fn sync(&mut self, book: &mut Book) -> Result<(), BackendError> {
        self.writable()?;
        let store = self.store()?;
        let mut data = store.write().unwrap();

        let guids = book.guids();
        let total = guids.len().max(1) as f64;
        let (mut pushed, mut pulled) = (0usize, 0usize);
        let mut failure: Option<BackendError> = None;
        for (i, guid) in guids.iter().enumerate() {
            self.state.report_progress(Some("sync"), (i + 1) as f64 * 100.0 / total);
            if data.tombstones.contains(guid) {
                book.remove(guid);
                pulled += 1;
                continue;
            }
            let Some(held) = book.get_mut(guid) else { continue };
            if held.destroying {
                continue;
            }

            // Local edits are never overwritten; a failed instance keeps them for the caller.
            let stored_version = data.instances.get(guid).map(|s| s.version);
            match stored_version {
                Some(version) if version > held.version && held.dirty => {
                    failure.get_or_insert_with(|| BackendError::conflict(*guid));
                }
                Some(version) if version > held.version => {
                    if let Some(stored) = data.instances.get(guid) {
                        *held = stored.clone();
                    }
                    pulled += 1;
                }
                Some(version) if held.dirty => {
                    held.version = version + 1;
                    held.dirty = false;
                    data.instances.insert(*guid, held.stored_copy(held.version));
                    data.record_event(self.session_id, *guid, EventKind::Modified);
                    pushed += 1;
                }
                None if held.version == 0 => {
                    held.version = 1;
                    held.dirty = false;
                    data.instances.insert(*guid, held.stored_copy(held.version));
                    data.record_event(self.session_id, *guid, EventKind::Modified);
                    pushed += 1;
                }
                // Stored before but gone now: moved out by a partition.
                None if held.dirty => {
                    failure.get_or_insert_with(|| {
                        BackendError::not_found(format!("instance {} is no longer in this store", guid))
                    });
                }
                None => {
                    book.remove(guid);
                    pulled += 1;
                }
                _ => {}
            }
        }
        book.version = data.book_version;
        tracing::debug!(pushed, pulled, "Memory store synced");
        match failure {
            Some(err) => {
                tracing::warn!(error = %err, "Memory sync left instances unreconciled");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn counter(&mut self, name: &str) -> Result<i64, BackendError> {
        let options = self.writable()?;
        let store = self.store()?;
        let mut data = store.write().unwrap();
        let value = data.counters.entry(name.to_string()).or_insert(options.counter_start);
        *value = value
            .checked_add(1)
            .ok_or_else(|| BackendError::new(ErrorCode::Misc, format!("counter '{}' is exhausted", name)))?;
        Ok(*value)
    }

    fn events_pending(&mut self) -> bool {
        let Some(store) = self.store.as_ref() else { return false };
        let data = store.read().unwrap();
        let seen = data.cursor(self.session_id);
        data.events
            .iter()
            .any(|e| e.seq > seen && e.origin != self.session_id)
    }

    fn process_events(&mut self, book: &mut Book) -> bool {
        let Some(store) = self.store.clone() else { return false };
        let mut data = store.write().unwrap();
        let seen = data.cursor(self.session_id);
        let mut changed = false;

        for event in data.events.iter().filter(|e| e.seq > seen && e.origin != self.session_id) {
            match event.kind {
                EventKind::Modified => {
                    let stale = match (book.get(&event.guid), data.instances.get(&event.guid)) {
                        (Some(held), Some(stored)) => !held.dirty && stored.version > held.version,
                        _ => false,
                    };
                    if stale {
                        if let Some(stored) = data.instances.get(&event.guid) {
                            book.insert(stored.clone());
                            changed = true;
                        }
                    }
                }
                EventKind::Destroyed | EventKind::Moved => {
                    if book.remove(&event.guid).is_some() {
                        changed = true;
                    }
                }
            }
        }
        data.advance(self.session_id);
        changed
    }

    fn begin_partition(&mut self, target: &Book) -> Result<(), BackendError> {
        self.store()?;
        self.partition = Some(target.guid);
        tracing::debug!(target = %target.guid, "Partition begun");
        Ok(())
    }

    fn abort_partition(&mut self, target: &Book) {
        if self.partition == Some(target.guid) {
            self.partition = None;
            tracing::debug!(target = %target.guid, "Partition aborted");
        }
    }

    fn commit_partition(&mut self, target: &Book) -> Result<Option<String>, BackendError> {
        if self.partition != Some(target.guid) {
            return Err(BackendError::new(
                ErrorCode::Misc,
                format!("no partition into book {} was begun", target.guid),
            ));
        }
        self.writable()?;
        let store = self.store()?;
        let source = self.store_name.clone().ok_or_else(BackendError::not_open)?;
        let name = format!("{}.{}", source, target.guid.simple());

        let mut split = StoreData::new(target.guid);
        for instance in target.instances() {
            split.instances.insert(instance.guid, instance.stored_copy(instance.version.max(1)));
        }
        self.root
            .create_new(&name, split)
            .ok_or_else(|| BackendError::new(ErrorCode::StoreExists, format!("memory store '{}' already exists", name)))?;

        let mut data = store.write().unwrap();
        for instance in target.instances() {
            if data.instances.remove(&instance.guid).is_some() {
                data.record_event(self.session_id, instance.guid, EventKind::Moved);
            }
            data.intents.remove(&instance.guid);
        }
        self.partition = None;
        tracing::debug!(store = %name, moved = target.len(), "Partition committed");
        Ok(Some(format!("{}{}", LOCATION_PREFIX, name)))
    }

    fn load_config(&mut self, config: &Frame) -> Result<(), BackendError> {
        let mut candidate = self.state.config().clone();
        candidate.merge(config);
        MemoryOptions::from_config(&candidate)?;
        self.state.load_config(config);
        Ok(())
    }

    fn save_may_clobber_data(&self) -> bool {
        self.store
            .as_ref()
            .map(|store| !store.read().unwrap().instances.is_empty())
            .unwrap_or(false)
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        self.release();
    }
}
