use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use crate::{
    backend::{Backend, BackendError, ErrorCode, PercentageFn},
    frame::Frame,
    models::{query::Query, Book, Instance},
    provider::{BackendProvider, ProviderRegistry, ResolveError},
    value::Guid,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Backend(#[from] BackendError),
    #[error("instance not in book: {0}")]
    UnknownInstance(Guid),
}

impl SessionError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SessionError::Backend(err) => Some(err.code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub ignore_lock: bool,
    pub create_if_nonexistent: bool,
}

impl OpenFlags {
    pub fn create() -> Self {
        Self {
            ignore_lock: false,
            create_if_nonexistent: true,
        }
    }
}

/// An open connection between one [`Book`] and one storage backend.
pub struct Session {
    backend: Box<dyn Backend>,
    provider: Arc<dyn BackendProvider>,
    location: String,
    book: Book,
    pending: HashMap<Guid, Instance>,
}

impl Session {
    pub fn open(registry: &ProviderRegistry, location: &str, flags: OpenFlags) -> Result<Self, SessionError> {
        Self::open_with(registry, location, flags, &Frame::new(), None)
    }

    /// Opens `location` with `config` injected and `progress` installed before `session_begin`.
    pub fn open_with(
        registry: &ProviderRegistry,
        location: &str,
        flags: OpenFlags,
        config: &Frame,
        progress: Option<PercentageFn>,
    ) -> Result<Self, SessionError> {
        let provider = registry.resolve(location)?;
        let mut backend = provider.new_backend();
        backend.state_mut().set_percentage(progress);
        if !config.is_empty() {
            backend.load_config(config)?;
        }
        backend.session_begin(location, flags.ignore_lock, flags.create_if_nonexistent)?;

        tracing::info!(
            provider = provider.name(),
            location,
            fullpath = backend.state().fullpath().unwrap_or(location),
            "Session opened"
        );

        Ok(Self {
            backend,
            provider,
            location: location.to_string(),
            book: Book::new(),
            pending: HashMap::new(),
        })
    }

    fn record<T>(&mut self, result: Result<T, BackendError>) -> Result<T, SessionError> {
        result.map_err(|err| {
            tracing::debug!(code = err.code.as_u16(), message = %err.message, "Backend operation failed");
            self.backend.state_mut().set_error(err.clone());
            SessionError::Backend(err)
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Location as resolved by the backend, falling back to the requested one.
    pub fn fullpath(&self) -> &str {
        self.backend.state().fullpath().unwrap_or(&self.location)
    }

    pub fn provider(&self) -> &Arc<dyn BackendProvider> {
        &self.provider
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut Book {
        &mut self.book
    }

    pub fn set_progress(&mut self, progress: Option<PercentageFn>) {
        self.backend.state_mut().set_percentage(progress);
    }

    pub fn load(&mut self) -> Result<(), SessionError> {
        let result = self.backend.load(&mut self.book);
        self.record(result)
    }

    /// Adds an engine-created instance to the book without touching storage.
    pub fn add(&mut self, instance: Instance) -> Guid {
        let guid = instance.guid;
        self.book.insert(instance);
        guid
    }

    pub fn begin_edit(&mut self, guid: Guid) -> Result<(), SessionError> {
        let instance = self.book.get(&guid).ok_or(SessionError::UnknownInstance(guid))?;
        let result = self.backend.begin(instance);
        if result.is_ok() {
            self.pending.entry(guid).or_insert_with(|| instance.clone());
        }
        self.record(result)
    }

    pub fn commit_edit(&mut self, guid: Guid) -> Result<(), SessionError> {
        let instance = self.book.get_mut(&guid).ok_or(SessionError::UnknownInstance(guid))?;
        let result = self.backend.commit(instance);
        let destroyed = instance.destroying;
        self.record(result)?;
        self.pending.remove(&guid);
        if destroyed {
            self.book.remove(&guid);
        }
        Ok(())
    }

    /// Releases the edit and restores the instance to its state at `begin_edit`.
    /// An instance destroyed in storage is dropped from the book instead.
    pub fn rollback_edit(&mut self, guid: Guid) -> Result<(), SessionError> {
        let snapshot = self.pending.remove(&guid);
        let result = match self.book.get(&guid).or(snapshot.as_ref()) {
            Some(instance) => self.backend.rollback(instance),
            None => return Err(SessionError::UnknownInstance(guid)),
        };

        match (&result, snapshot) {
            (Err(err), _) if err.code == ErrorCode::ModifyAfterDestroy => {
                self.book.remove(&guid);
            }
            (_, Some(snapshot)) => {
                self.book.insert(snapshot);
            }
            (_, None) => {}
        }
        self.record(result)
    }

    /// Marks the instance destroyed and commits the deletion.
    pub fn destroy(&mut self, guid: Guid) -> Result<(), SessionError> {
        self.begin_edit(guid)?;
        if let Some(instance) = self.book.get_mut(&guid) {
            instance.mark_destroyed();
        }
        self.commit_edit(guid)
    }

    /// Compiles, runs and frees `query`; matching records land in the book.
    pub fn run_query(&mut self, query: &Query) -> Result<(), SessionError> {
        let compiled = self.backend.compile_query(query);
        let compiled = self.record(compiled)?;
        let result = self.backend.run_query(&mut self.book, &compiled);
        self.backend.free_query(compiled);
        self.record(result)
    }

    pub fn sync(&mut self) -> Result<(), SessionError> {
        let result = self.backend.sync(&mut self.book);
        self.record(result)
    }

    /// Next value of the named counter, or -1 when it is unavailable.
    pub fn counter(&mut self, name: &str) -> i64 {
        let result = self.backend.counter(name);
        self.record(result).unwrap_or(-1)
    }

    pub fn events_pending(&mut self) -> bool {
        self.backend.events_pending()
    }

    pub fn process_events(&mut self) -> bool {
        self.backend.process_events(&mut self.book)
    }

    pub fn load_config(&mut self, config: &Frame) -> Result<(), SessionError> {
        let result = self.backend.load_config(config);
        self.record(result)
    }

    pub fn config(&self) -> &Frame {
        self.backend.get_config()
    }

    pub fn save_may_clobber_data(&self) -> bool {
        self.backend.save_may_clobber_data()
    }

    /// Moves every instance selected by `query` into `target` and persists the split.
    ///
    /// Moved instances are returned to this book if the backend rejects the
    /// partition, and a partition that fails after it began is aborted.
    pub fn partition(&mut self, query: &Query, target: &mut Book) -> Result<Option<String>, SessionError> {
        let begun = self.backend.begin_partition(target);
        self.record(begun)?;
        if let Err(err) = self.run_query(query) {
            self.backend.abort_partition(target);
            return Err(err);
        }

        let selected: Vec<Guid> = self
            .book
            .instances()
            .filter(|i| query.matches(i))
            .map(|i| i.guid)
            .collect();
        for guid in &selected {
            if let Some(instance) = self.book.remove(guid) {
                target.insert(instance);
            }
        }

        let committed = self.backend.commit_partition(target);
        match self.record(committed) {
            Ok(location) => {
                tracing::info!(moved = selected.len(), target = %target.guid, "Book partitioned");
                Ok(location)
            }
            Err(err) => {
                self.backend.abort_partition(target);
                for guid in &selected {
                    if let Some(instance) = target.remove(guid) {
                        self.book.insert(instance);
                    }
                }
                Err(err)
            }
        }
    }

    /// Pops the most recent unread backend error.
    pub fn get_error(&mut self) -> Option<BackendError> {
        self.backend.state_mut().get_error()
    }

    pub fn peek_error(&self) -> Option<&BackendError> {
        self.backend.state().peek_error()
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Closes the session and hands back the in-memory book.
    pub fn end(mut self) -> Result<Book, SessionError> {
        let result = self.backend.session_end();
        self.record(result)?;
        tracing::info!(location = %self.location, "Session closed");
        Ok(self.book)
    }
}
