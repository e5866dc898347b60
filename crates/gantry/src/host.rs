//! The injected bundle of capabilities and process-wide caches.
//!
//! Managers never reach for hidden global state: everything they need to
//! load a namespace — the enumeration provider, the resolver, the registry
//! cache handle, and the effective search path — travels through a
//! [`PluginHost`] passed to their builders. Sharing one host across
//! managers shares its memoized record lookups.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::RegistryCache;
use crate::plugin::Resolver;
use crate::registry::{ManifestProvider, RegistrationRecord, RegistryProvider};

pub struct PluginHost {
    provider: Arc<dyn RegistryProvider>,
    resolver: Arc<dyn Resolver>,
    cache: Arc<RegistryCache>,
    search_path: Option<Vec<PathBuf>>,
    /// Per-namespace record memo. Append-only for the host's lifetime.
    records: RwLock<HashMap<String, Arc<Vec<RegistrationRecord>>>>,
}

impl PluginHost {
    pub fn new(provider: Arc<dyn RegistryProvider>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            provider,
            resolver,
            cache: Arc::new(RegistryCache::new()),
            search_path: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Host whose registrations come from `gantry.json` manifests under
    /// the given search path.
    pub fn with_manifests(search_path: Vec<PathBuf>, resolver: Arc<dyn Resolver>) -> Self {
        Self::new(
            Arc::new(ManifestProvider::new(search_path.clone())),
            resolver,
        )
        .search_path(search_path)
    }

    /// Replace the registry cache handle (e.g. with a test-scoped one).
    pub fn cache(mut self, cache: Arc<RegistryCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Pin the search path instead of using `GANTRY_PLUGIN_PATH`.
    pub fn search_path(mut self, path: Vec<PathBuf>) -> Self {
        self.search_path = Some(path);
        self
    }

    pub fn resolver(&self) -> &dyn Resolver {
        self.resolver.as_ref()
    }

    pub fn registry_cache(&self) -> &RegistryCache {
        self.cache.as_ref()
    }

    /// Ordered records for a namespace, memoized per namespace.
    pub fn records(&self, namespace: &str) -> Arc<Vec<RegistrationRecord>> {
        if let Some(records) = self.records.read().get(namespace) {
            return records.clone();
        }
        let records = Arc::new(self.cache.get_records(
            self.provider.as_ref(),
            namespace,
            self.search_path.as_deref(),
        ));
        self.records
            .write()
            .entry(namespace.to_string())
            .or_insert_with(|| records.clone())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::StaticResolver;
    use crate::registry::Groups;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl RegistryProvider for CountingProvider {
        fn enumerate_all(&self) -> Groups {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut groups = Groups::new();
            groups.insert(
                "crew".to_string(),
                vec![RegistrationRecord::new("captain", "pkg_a:Captain", "crew")],
            );
            groups
        }
    }

    #[test]
    fn test_records_memoized_per_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let host = PluginHost::new(provider.clone(), Arc::new(StaticResolver::new()))
            .cache(Arc::new(RegistryCache::with_dir(dir.path().to_path_buf())))
            .search_path(vec![]);

        let first = host.records("crew");
        let second = host.records("crew");
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
