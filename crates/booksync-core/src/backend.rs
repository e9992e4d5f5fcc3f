//! The contract every storage backend implements.
//!
//! The engine drives a [`Backend`] through its lifecycle: `session_begin`,
//! `load`, any number of `begin`/`commit`/`rollback` edit cycles, queries,
//! `sync`, and finally `session_end`. Methods return `Result`; the session
//! layer additionally records each failure on the backend's one-deep
//! [`ErrorStack`], where only the most recent unread error survives.

use std::{any::Any, fmt};

use thiserror::Error;

use crate::{
    frame::Frame,
    models::{query::Query, Book, Instance},
    value::Guid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connectivity,
    Existence,
    Conflict,
    Query,
    Configuration,
    Io,
    Other,
}

/// Closed set of backend failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    NoBackend = 100,
    BadUrl = 101,
    CantConnect = 102,
    ConnectionLost = 103,
    Locked = 104,
    NotOpen = 105,
    NotFound = 200,
    StoreExists = 201,
    ModifyAfterDestroy = 300,
    Conflict = 301,
    ReadOnly = 302,
    QueryCompile = 400,
    QueryRun = 401,
    UnsupportedOption = 500,
    InvalidConfig = 501,
    Unsupported = 502,
    Io = 600,
    Misc = 900,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::NoBackend
            | ErrorCode::BadUrl
            | ErrorCode::CantConnect
            | ErrorCode::ConnectionLost
            | ErrorCode::Locked
            | ErrorCode::NotOpen => ErrorCategory::Connectivity,
            ErrorCode::NotFound | ErrorCode::StoreExists => ErrorCategory::Existence,
            ErrorCode::ModifyAfterDestroy | ErrorCode::Conflict | ErrorCode::ReadOnly => ErrorCategory::Conflict,
            ErrorCode::QueryCompile | ErrorCode::QueryRun => ErrorCategory::Query,
            ErrorCode::UnsupportedOption | ErrorCode::InvalidConfig | ErrorCode::Unsupported => {
                ErrorCategory::Configuration
            }
            ErrorCode::Io => ErrorCategory::Io,
            ErrorCode::Misc => ErrorCategory::Other,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoBackend => "no backend",
            ErrorCode::BadUrl => "bad location",
            ErrorCode::CantConnect => "cannot connect",
            ErrorCode::ConnectionLost => "connection lost",
            ErrorCode::Locked => "locked",
            ErrorCode::NotOpen => "session not open",
            ErrorCode::NotFound => "not found",
            ErrorCode::StoreExists => "already exists",
            ErrorCode::ModifyAfterDestroy => "modified after destroy",
            ErrorCode::Conflict => "edit conflict",
            ErrorCode::ReadOnly => "read only",
            ErrorCode::QueryCompile => "query compile failed",
            ErrorCode::QueryRun => "query run failed",
            ErrorCode::UnsupportedOption => "unsupported option",
            ErrorCode::InvalidConfig => "invalid configuration",
            ErrorCode::Unsupported => "unsupported operation",
            ErrorCode::Io => "io error",
            ErrorCode::Misc => "backend error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn locked(location: &str) -> Self {
        Self::new(ErrorCode::Locked, format!("{} is locked by another session", location))
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, what.to_string())
    }

    pub fn not_open() -> Self {
        Self::new(ErrorCode::NotOpen, "no session is open")
    }

    pub fn modify_after_destroy(guid: Guid) -> Self {
        Self::new(ErrorCode::ModifyAfterDestroy, format!("instance {} was destroyed", guid))
    }

    pub fn conflict(guid: Guid) -> Self {
        Self::new(ErrorCode::Conflict, format!("instance {} changed since edit began", guid))
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(ErrorCode::Unsupported, format!("{} is not supported by this backend", operation))
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCode::Io, err.to_string())
    }
}

/// Holds at most one unread error; pushing replaces whatever was there.
#[derive(Debug, Default)]
pub struct ErrorStack {
    last: Option<BackendError>,
}

impl ErrorStack {
    pub fn push(&mut self, err: BackendError) {
        if let Some(dropped) = self.last.replace(err) {
            tracing::warn!(code = dropped.code.as_u16(), message = %dropped.message, "Unread backend error overwritten");
        }
    }

    /// Removes and returns the pending error.
    pub fn pop(&mut self) -> Option<BackendError> {
        self.last.take()
    }

    pub fn peek(&self) -> Option<&BackendError> {
        self.last.as_ref()
    }
}

/// Progress callback: an optional status message and a percentage in `0.0..=100.0`.
pub type PercentageFn = Box<dyn FnMut(Option<&str>, f64) + Send>;

/// Per-backend bookkeeping shared by every implementation.
#[derive(Default)]
pub struct BackendState {
    errors: ErrorStack,
    config: Frame,
    config_count: u32,
    fullpath: Option<String>,
    percentage: Option<PercentageFn>,
}

impl BackendState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error(&mut self, err: BackendError) {
        self.errors.push(err);
    }

    pub fn get_error(&mut self) -> Option<BackendError> {
        self.errors.pop()
    }

    pub fn peek_error(&self) -> Option<&BackendError> {
        self.errors.peek()
    }

    /// Merges `config` over the current options.
    pub fn load_config(&mut self, config: &Frame) {
        self.config.merge(config);
        self.config_count += 1;
    }

    pub fn config(&self) -> &Frame {
        &self.config
    }

    /// Number of `load_config` calls so far.
    pub fn config_count(&self) -> u32 {
        self.config_count
    }

    pub fn set_fullpath(&mut self, fullpath: impl Into<String>) {
        self.fullpath = Some(fullpath.into());
    }

    pub fn clear_fullpath(&mut self) {
        self.fullpath = None;
    }

    pub fn fullpath(&self) -> Option<&str> {
        self.fullpath.as_deref()
    }

    pub fn set_percentage(&mut self, percentage: Option<PercentageFn>) {
        self.percentage = percentage;
    }

    pub fn report_progress(&mut self, message: Option<&str>, percent: f64) {
        if let Some(callback) = self.percentage.as_mut() {
            callback(message, percent.clamp(0.0, 100.0));
        }
    }
}

/// Backend-specific compiled form of a [`Query`].
pub struct CompiledQuery {
    inner: Box<dyn Any + Send>,
}

impl CompiledQuery {
    pub fn new<T: Any + Send>(inner: T) -> Self {
        Self { inner: Box::new(inner) }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledQuery").finish_non_exhaustive()
    }
}

pub trait Backend: Send {
    fn state(&self) -> &BackendState;
    fn state_mut(&mut self) -> &mut BackendState;

    /// Opens `location`. Fails with `Locked` when another session holds the
    /// single-writer lock and `ignore_lock` is false, and with `NotFound` when
    /// the store is missing and `create_if_nonexistent` is false.
    fn session_begin(&mut self, location: &str, ignore_lock: bool, create_if_nonexistent: bool) -> Result<(), BackendError>;
    fn session_end(&mut self) -> Result<(), BackendError>;

    /// Loads at least enough of the store into `book` for the engine to operate.
    fn load(&mut self, book: &mut Book) -> Result<(), BackendError>;

    fn begin(&mut self, instance: &Instance) -> Result<(), BackendError>;
    /// Persists `instance` and releases its edit marker. On success the
    /// instance carries its new stored version.
    fn commit(&mut self, instance: &mut Instance) -> Result<(), BackendError>;
    /// Releases the edit marker. Must leave no marker behind even after a failed commit.
    fn rollback(&mut self, instance: &Instance) -> Result<(), BackendError>;

    fn compile_query(&mut self, query: &Query) -> Result<CompiledQuery, BackendError> {
        Ok(CompiledQuery::new(query.clone()))
    }

    /// Feeds matching records into `book`. The default assumes a fully preloaded graph.
    fn run_query(&mut self, _book: &mut Book, _query: &CompiledQuery) -> Result<(), BackendError> {
        Ok(())
    }

    fn free_query(&mut self, query: CompiledQuery) {
        drop(query);
    }

    /// Reconciles instances already in `book` with storage by version.
    fn sync(&mut self, _book: &mut Book) -> Result<(), BackendError> {
        Ok(())
    }

    /// Post-incremented value of the named counter.
    fn counter(&mut self, _name: &str) -> Result<i64, BackendError> {
        Err(BackendError::unsupported("counter"))
    }

    fn events_pending(&mut self) -> bool {
        false
    }

    /// Applies pending external events; returns whether `book` changed.
    fn process_events(&mut self, _book: &mut Book) -> bool {
        false
    }

    /// Starts moving a query-selected subset into `target`.
    fn begin_partition(&mut self, _target: &Book) -> Result<(), BackendError> {
        Ok(())
    }

    /// Abandons a partition begun on `target` that will not be committed.
    fn abort_partition(&mut self, _target: &Book) {}

    /// Persists `target` once the engine has moved instances into it. Returns
    /// the partition's location when the backend stores it separately.
    fn commit_partition(&mut self, _target: &Book) -> Result<Option<String>, BackendError> {
        Ok(None)
    }

    fn load_config(&mut self, config: &Frame) -> Result<(), BackendError> {
        self.state_mut().load_config(config);
        Ok(())
    }

    fn get_config(&self) -> &Frame {
        self.state().config()
    }

    fn save_may_clobber_data(&self) -> bool {
        false
    }
}
