//! In-process storage backend registered under the `mem` access method.
//!
//! Every backend created by one [`MemoryProvider`] shares the provider's
//! [`MemoryRoot`], so several sessions can open the same `mem://name`
//! store and observe each other's commits.

pub mod backend;
pub mod store;

use booksync_core::{Backend, BackendProvider};

pub use backend::{is_store_name, MemoryBackend, LOCATION_PREFIX, OPT_COUNTER_START, OPT_LOAD_ALL, OPT_READ_ONLY};
pub use store::{EventKind, MemoryRoot, SessionId, StoreEvent, StoreSummary};

pub const PROVIDER_NAME: &str = "memory";
pub const ACCESS_METHOD: &str = "mem";

#[derive(Clone, Default)]
pub struct MemoryProvider {
    root: MemoryRoot,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: MemoryRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &MemoryRoot {
        &self.root
    }
}

impl BackendProvider for MemoryProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn access_method(&self) -> &str {
        ACCESS_METHOD
    }

    fn partial_book_supported(&self) -> bool {
        true
    }

    fn new_backend(&self) -> Box<dyn Backend> {
        Box::new(MemoryBackend::new(self.root.clone()))
    }

    fn check_data_type(&self, path: &str) -> bool {
        is_store_name(path)
    }

    fn teardown(&self) {
        tracing::debug!(stores = self.root.store_names().len(), "Dropping memory stores");
        self.root.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use booksync_core::{OpenFlags, ProviderRegistry, Session};

    use super::*;

    #[test]
    fn test_provider_identity() {
        let provider = MemoryProvider::new();
        assert_eq!(provider.name(), "memory");
        assert_eq!(provider.access_method(), "mem");
        assert!(provider.partial_book_supported());
        assert!(provider.check_data_type(""));
        assert!(provider.check_data_type("ledger-2024.main"));
        assert!(!provider.check_data_type("a/b"));
    }

    #[test]
    fn test_backends_share_root() {
        let provider = MemoryProvider::new();
        let mut first = provider.new_backend();
        first.session_begin("mem://shared", false, true).unwrap();
        assert_eq!(first.counter("n").unwrap(), 1);
        first.session_end().unwrap();

        let mut second = provider.new_backend();
        second.session_begin("mem://shared", false, false).unwrap();
        assert_eq!(second.counter("n").unwrap(), 2);
    }

    #[test]
    fn test_teardown_clears_stores() {
        let provider = Arc::new(MemoryProvider::new());
        let registry = ProviderRegistry::new();
        registry.register(provider.clone());

        let session = Session::open(&registry, "mem://gone", OpenFlags::create()).unwrap();
        session.end().unwrap();
        assert!(provider.root().contains("gone"));

        registry.shutdown();
        assert!(provider.root().store_names().is_empty());
        assert!(registry.is_empty());
    }
}
