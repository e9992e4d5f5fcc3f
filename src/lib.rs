//! booksync: hierarchical key-value frames and pluggable storage backends
//! for a bookkeeping engine.
//!
//! The core model lives in [`booksync_core`]; this crate wires the built-in
//! providers together with configuration, logging and the command line.

pub mod config;
pub mod error;
pub mod literal;
pub mod logging;

use std::sync::Arc;

use prettytable::{row, Table};

pub use booksync_core::{
    Backend, BackendError, BackendProvider, Book, CompareOp, ErrorCode, Frame, Guid, Instance, OpenFlags, Path,
    PercentageFn, ProviderRegistry, Query, ResolvePolicy, Session, SessionError, Value,
};
pub use booksync_memory::{MemoryProvider, MemoryRoot};

use config::Config;
use error::AppError;

/// A registry holding every provider compiled into this crate.
pub fn builtin_registry(policy: ResolvePolicy) -> ProviderRegistry {
    let registry = ProviderRegistry::with_policy(policy);
    registry.register(Arc::new(MemoryProvider::new()));
    registry
}

/// Opens the configured location with the `[backend]` options applied.
pub fn open_session(config: &Config, registry: &ProviderRegistry) -> Result<Session, AppError> {
    let flags = OpenFlags {
        ignore_lock: config.session.ignore_lock,
        create_if_nonexistent: config.session.create_if_nonexistent,
    };
    let progress: PercentageFn = Box::new(|step: Option<&str>, pct: f64| {
        tracing::trace!(step = step.unwrap_or(""), pct, "Backend progress");
    });
    let session = Session::open_with(
        registry,
        &config.session.location,
        flags,
        &config.backend_options(),
        Some(progress),
    )?;
    Ok(session)
}

/// Next counter value, surfacing the backend error behind a -1 sentinel.
pub fn draw_counter(session: &mut Session, name: &str) -> Result<i64, AppError> {
    match session.counter(name) {
        -1 => {
            let reason = session
                .get_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error recorded".to_string());
            Err(AppError::Counter {
                name: name.to_string(),
                reason,
            })
        }
        value => Ok(value),
    }
}

/// Builds a frame from `path=value` assignments, creating intermediate frames.
pub fn build_frame<S: AsRef<str>>(assignments: &[S]) -> Result<Frame, AppError> {
    let mut frame = Frame::new();
    for assignment in assignments {
        let (path, value) = literal::parse_assignment(assignment.as_ref())?;
        frame.set_path(&path, value)?;
    }
    Ok(frame)
}

pub fn providers_table(registry: &ProviderRegistry) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Provider", "Access method", "Partial book"]);
    for provider in registry.providers() {
        let partial = if provider.partial_book_supported() { "yes" } else { "no" };
        table.add_row(row![provider.name(), provider.access_method(), partial]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_resolves_memory() {
        let registry = builtin_registry(ResolvePolicy::Strict);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("mem://books").unwrap().name(), "memory");
        assert!(registry.resolve("/tmp/books.xac").is_err());
    }

    #[test]
    fn test_open_session_applies_backend_options() {
        let config = Config::from_toml(
            r#"
            [session]
            location = "mem://configured"

            [backend]
            counter-start = 41
            "#,
        )
        .unwrap();
        let registry = builtin_registry(config.registry.resolve_policy);
        let mut session = open_session(&config, &registry).unwrap();
        assert_eq!(session.fullpath(), "mem://configured");
        assert_eq!(draw_counter(&mut session, "txn").unwrap(), 42);
    }

    #[test]
    fn test_unknown_backend_option_fails_open() {
        let config = Config::from_toml("[backend]\nturbo = 1").unwrap();
        let registry = builtin_registry(ResolvePolicy::Strict);
        match open_session(&config, &registry) {
            Err(AppError::Session(err)) => assert_eq!(err.code(), Some(ErrorCode::UnsupportedOption)),
            _ => panic!("Expected unsupported option"),
        }
    }

    #[test]
    fn test_draw_counter_reports_read_only() {
        let config = Config::from_toml("[backend]\nread-only = true").unwrap();
        let registry = builtin_registry(ResolvePolicy::Strict);
        let mut session = open_session(&config, &registry).unwrap();
        match draw_counter(&mut session, "txn") {
            Err(AppError::Counter { name, reason }) => {
                assert_eq!(name, "txn");
                assert!(reason.contains("read-only"));
            }
            _ => panic!("Expected counter error"),
        }
        assert!(session.get_error().is_none());
    }

    #[test]
    fn test_build_frame() {
        let frame = build_frame(&["options/period=12", "options/name=Main", "rate=1/3"]).unwrap();
        assert_eq!(frame.get_path_str("options/period"), Some(&Value::Int64(12)));
        assert_eq!(frame.get_path_str("options/name"), Some(&Value::from("Main")));
        assert_eq!(frame.len(), 2);

        assert!(matches!(build_frame(&["a=1", "a/b=2"]), Err(AppError::Frame(_))));
    }

    #[test]
    fn test_providers_table() {
        let registry = builtin_registry(ResolvePolicy::Strict);
        let rendered = providers_table(&registry).to_string();
        assert!(rendered.contains("memory"));
        assert!(rendered.contains("mem"));
    }
}
