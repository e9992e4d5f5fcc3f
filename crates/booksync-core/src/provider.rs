use std::{
    fmt,
    sync::{Arc, RwLock},
};

use serde::Deserialize;
use thiserror::Error;

use crate::backend::Backend;

/// Access method assumed for locations written without a `scheme://` prefix.
pub const DEFAULT_ACCESS_METHOD: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("malformed location: {0}")]
    BadLocation(String),
    #[error("no provider registered for access method '{access_method}'")]
    NoProvider { access_method: String },
    #[error("no provider recognizes location '{location}'")]
    Unrecognized { location: String },
}

/// Describes one backend implementation and the locations it can serve.
pub trait BackendProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Scheme without the trailing `://`, e.g. `mem` or `postgres`.
    fn access_method(&self) -> &str;

    /// Whether the backend can save a book that references entities outside it.
    fn partial_book_supported(&self) -> bool {
        false
    }

    fn new_backend(&self) -> Box<dyn Backend>;

    /// True when this provider can load and write the data at `path`, or when
    /// `path` holds nothing yet but is usable for a new store. Returning true
    /// does not guarantee this provider is chosen.
    fn check_data_type(&self, path: &str) -> bool;

    fn teardown(&self) {}
}

type Factory = Box<dyn Fn() -> Box<dyn Backend> + Send + Sync>;
type Recognizer = Box<dyn Fn(&str) -> bool + Send + Sync>;
type Teardown = Box<dyn Fn() + Send + Sync>;

/// A [`BackendProvider`] assembled from closures.
pub struct ProviderDescriptor {
    name: String,
    access_method: String,
    partial_book_supported: bool,
    factory: Factory,
    recognizer: Recognizer,
    teardown: Option<Teardown>,
}

impl ProviderDescriptor {
    /// Recognizes every location until [`ProviderDescriptor::recognizer`] says otherwise.
    pub fn new<F>(name: &str, access_method: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            access_method: access_method.to_string(),
            partial_book_supported: false,
            factory: Box::new(factory),
            recognizer: Box::new(|_: &str| true),
            teardown: None,
        }
    }

    pub fn recognizer<F>(mut self, recognizer: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.recognizer = Box::new(recognizer);
        self
    }

    pub fn partial_book_supported(mut self, supported: bool) -> Self {
        self.partial_book_supported = supported;
        self
    }

    pub fn on_teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.teardown = Some(Box::new(teardown));
        self
    }
}

impl BackendProvider for ProviderDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn access_method(&self) -> &str {
        &self.access_method
    }

    fn partial_book_supported(&self) -> bool {
        self.partial_book_supported
    }

    fn new_backend(&self) -> Box<dyn Backend> {
        (self.factory)()
    }

    fn check_data_type(&self, path: &str) -> bool {
        (self.recognizer)(path)
    }

    fn teardown(&self) {
        if let Some(teardown) = &self.teardown {
            teardown();
        }
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("access_method", &self.access_method)
            .field("partial_book_supported", &self.partial_book_supported)
            .finish_non_exhaustive()
    }
}

/// A location split into its access method and the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    pub access_method: &'a str,
    pub path: &'a str,
}

impl<'a> Location<'a> {
    pub fn parse(location: &'a str) -> Result<Self, ResolveError> {
        match location.split_once("://") {
            Some((scheme, path)) => {
                let valid = !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
                if !valid {
                    return Err(ResolveError::BadLocation(location.to_string()));
                }
                Ok(Self {
                    access_method: scheme,
                    path,
                })
            }
            None => Ok(Self {
                access_method: DEFAULT_ACCESS_METHOD,
                path: location,
            }),
        }
    }
}

/// What to do when no provider for a scheme recognizes a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvePolicy {
    /// Report the location as unresolved.
    #[default]
    Strict,
    /// Fall back to the provider when it is the only one for the scheme.
    SoleProvider,
}

/// Providers in registration order. Created at startup, shut down explicitly.
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<dyn BackendProvider>>>,
    policy: ResolvePolicy,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::with_policy(ResolvePolicy::default())
    }

    pub fn with_policy(policy: ResolvePolicy) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> ResolvePolicy {
        self.policy
    }

    pub fn register(&self, provider: Arc<dyn BackendProvider>) {
        tracing::debug!(provider = provider.name(), access_method = provider.access_method(), "Registered backend provider");
        self.providers.write().unwrap().push(provider);
    }

    pub fn providers(&self) -> Vec<Arc<dyn BackendProvider>> {
        self.providers.read().unwrap().clone()
    }

    pub fn for_access_method(&self, access_method: &str) -> Vec<Arc<dyn BackendProvider>> {
        self.providers
            .read()
            .unwrap()
            .iter()
            .filter(|p| p.access_method() == access_method)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().unwrap().is_empty()
    }

    /// Picks the first provider, in registration order, whose access method
    /// matches and whose recognizer accepts the location's path.
    pub fn resolve(&self, location: &str) -> Result<Arc<dyn BackendProvider>, ResolveError> {
        let parsed = Location::parse(location)?;
        let candidates = self.for_access_method(parsed.access_method);
        if candidates.is_empty() {
            return Err(ResolveError::NoProvider {
                access_method: parsed.access_method.to_string(),
            });
        }

        if let Some(provider) = candidates.iter().find(|p| p.check_data_type(parsed.path)) {
            tracing::debug!(provider = provider.name(), location, "Resolved backend provider");
            return Ok(provider.clone());
        }

        match (self.policy, candidates.as_slice()) {
            (ResolvePolicy::SoleProvider, [only]) => {
                tracing::debug!(provider = only.name(), location, "Falling back to sole provider");
                Ok(only.clone())
            }
            _ => Err(ResolveError::Unrecognized {
                location: location.to_string(),
            }),
        }
    }

    /// Runs every provider's teardown hook and empties the registry.
    pub fn shutdown(&self) {
        let providers = std::mem::take(&mut *self.providers.write().unwrap());
        for provider in providers {
            tracing::debug!(provider = provider.name(), "Tearing down backend provider");
            provider.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{BackendError, BackendState},
        models::{Book, Instance},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct NullBackend {
        state: BackendState,
    }

    impl Backend for NullBackend {
        fn state(&self) -> &BackendState {
            &self.state
        }
        fn state_mut(&mut self) -> &mut BackendState {
            &mut self.state
        }
        fn session_begin(&mut self, _: &str, _: bool, _: bool) -> Result<(), BackendError> {
            Ok(())
        }
        fn session_end(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
        fn load(&mut self, _: &mut Book) -> Result<(), BackendError> {
            Ok(())
        }
        fn begin(&mut self, _: &Instance) -> Result<(), BackendError> {
            Ok(())
        }
        fn commit(&mut self, _: &mut Instance) -> Result<(), BackendError> {
            Ok(())
        }
        fn rollback(&mut self, _: &Instance) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn provider(name: &str, access_method: &str, suffix: &'static str) -> Arc<dyn BackendProvider> {
        Arc::new(
            ProviderDescriptor::new(name, access_method, || Box::new(NullBackend::default()))
                .recognizer(move |path| path.ends_with(suffix)),
        )
    }

    #[test]
    fn test_location_parse() {
        let loc = Location::parse("postgres://host/db").unwrap();
        assert_eq!(loc.access_method, "postgres");
        assert_eq!(loc.path, "host/db");

        let bare = Location::parse("/home/me/books.xml").unwrap();
        assert_eq!(bare.access_method, DEFAULT_ACCESS_METHOD);
        assert!(matches!(Location::parse("://x"), Err(ResolveError::BadLocation(_))));
        assert!(matches!(Location::parse("a b://x"), Err(ResolveError::BadLocation(_))));
    }

    #[test]
    fn test_disjoint_recognizers_select_matching_provider() {
        let registry = ProviderRegistry::new();
        registry.register(provider("xml", "file", ".xml"));
        registry.register(provider("sqlite", "file", ".db"));

        assert_eq!(registry.resolve("file:///tmp/a.db").unwrap().name(), "sqlite");
        assert_eq!(registry.resolve("/tmp/a.xml").unwrap().name(), "xml");
        assert!(matches!(registry.resolve("file:///tmp/a.txt"), Err(ResolveError::Unrecognized { .. })));
        assert!(matches!(registry.resolve("http://x"), Err(ResolveError::NoProvider { .. })));
    }

    #[test]
    fn test_first_registrant_wins() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(ProviderDescriptor::new("first", "mem", || Box::new(NullBackend::default()))));
        registry.register(Arc::new(ProviderDescriptor::new("second", "mem", || Box::new(NullBackend::default()))));
        assert_eq!(registry.resolve("mem://x").unwrap().name(), "first");
    }

    #[test]
    fn test_sole_provider_policy() {
        let strict = ProviderRegistry::new();
        strict.register(provider("xml", "file", ".xml"));
        assert!(strict.resolve("file:///a.db").is_err());

        let lenient = ProviderRegistry::with_policy(ResolvePolicy::SoleProvider);
        lenient.register(provider("xml", "file", ".xml"));
        assert_eq!(lenient.resolve("file:///a.db").unwrap().name(), "xml");

        lenient.register(provider("sqlite", "file", ".sqlite"));
        assert!(lenient.resolve("file:///a.db").is_err());
    }

    #[test]
    fn test_empty_location_recognizer() {
        let registry = ProviderRegistry::new();
        registry.register(provider("xml", "file", ".xml"));
        registry.register(Arc::new(
            ProviderDescriptor::new("fresh", "file", || Box::new(NullBackend::default()))
                .recognizer(|path| path.is_empty()),
        ));
        assert_eq!(registry.resolve("file://").unwrap().name(), "fresh");
    }

    #[test]
    fn test_shutdown_runs_teardown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(
            ProviderDescriptor::new("x", "mem", || Box::new(NullBackend::default()))
                .on_teardown(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        ));
        registry.shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
