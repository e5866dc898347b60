//! Durable cache layer in front of registry enumeration.
//!
//! Enumerating every installed package is the expensive step, so the
//! enumerated dataset is written to a platform cache directory under a
//! filename derived from an environment fingerprint: the host executable,
//! its installation prefix, and the modification times of every search-path
//! entry and every package manifest beneath them. Any change to the
//! installed set changes the fingerprint, which invalidates the file by
//! simply never finding it again.
//!
//! Every durable-store failure degrades to an in-memory rebuild; nothing
//! in this module is fatal.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::registry::{RegistrationRecord, RegistryProvider, MANIFEST_GLOB};

const CACHE_DIR_NAME: &str = "gantry";

/// Zero-byte marker file that disables the durable store for a directory.
const DISABLE_MARKER: &str = ".disable";

/// The persisted dataset for one environment fingerprint.
///
/// Only `groups` is consumed on read; the remaining fields describe the
/// environment the entry was built in. Unknown fields in the file are
/// tolerated.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    groups: BTreeMap<String, Vec<(String, String, String)>>,
    #[serde(rename = "interpreter_executable", default)]
    executable: String,
    #[serde(rename = "interpreter_prefix", default)]
    prefix: String,
    #[serde(default)]
    path_values: Vec<(String, f64)>,
}

fn mtime(path: &Path) -> f64 {
    // Missing paths hash as -1.0 so "directory removed" still changes
    // the fingerprint.
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(-1.0)
}

fn host_identity() -> (String, String) {
    let exe = env::current_exe().unwrap_or_default();
    let prefix = exe.parent().map(Path::to_path_buf).unwrap_or_default();
    (
        exe.to_string_lossy().into_owned(),
        prefix.to_string_lossy().into_owned(),
    )
}

/// Fingerprint the environment for a search path, returning the hex digest
/// and the path/mtime pairs that produced it.
fn hash_settings_for_path(search_path: &[PathBuf]) -> (String, Vec<(String, f64)>) {
    let mut hasher = Sha256::new();
    let mut values = Vec::new();

    // Tie the cache to the host binary, in case several installations
    // share one cache directory.
    let (executable, prefix) = host_identity();
    hasher.update(executable.as_bytes());
    hasher.update(prefix.as_bytes());

    for entry in search_path {
        let entry_mtime = mtime(entry);
        hasher.update(entry.to_string_lossy().as_bytes());
        hasher.update(entry_mtime.to_le_bytes());
        values.push((entry.to_string_lossy().into_owned(), entry_mtime));

        let pattern = entry.join(MANIFEST_GLOB);
        if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
            for manifest in paths.flatten() {
                let manifest_mtime = mtime(&manifest);
                hasher.update(manifest.to_string_lossy().as_bytes());
                hasher.update(manifest_mtime.to_le_bytes());
                values.push((manifest.to_string_lossy().into_owned(), manifest_mtime));
            }
        }
    }

    (hex::encode(hasher.finalize()), values)
}

/// The effective search path when the caller passes none: the
/// `GANTRY_PLUGIN_PATH` environment variable, split like `PATH`.
fn default_search_path() -> Vec<PathBuf> {
    env::var_os("GANTRY_PLUGIN_PATH")
        .map(|raw| env::split_paths(&raw).collect())
        .unwrap_or_default()
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join(CACHE_DIR_NAME)
}

/// Runs from a transient location are not worth caching and would pollute
/// the store with throwaway fingerprints.
fn running_from_temp() -> bool {
    env::current_exe()
        .map(|exe| exe.starts_with(env::temp_dir()))
        .unwrap_or(false)
}

fn build_entry(provider: &dyn RegistryProvider) -> CacheEntry {
    let mut groups = BTreeMap::new();
    for (namespace, records) in provider.enumerate_all() {
        // Exact duplicate triples occur when a package is visible twice
        // on the search path; keep the first occurrence.
        let mut seen = HashSet::new();
        let mut triples = Vec::with_capacity(records.len());
        for record in records {
            let triple = (record.name, record.locator, record.namespace);
            if seen.insert(triple.clone()) {
                triples.push(triple);
            }
        }
        groups.insert(namespace, triples);
    }
    let (executable, prefix) = host_identity();
    CacheEntry {
        groups,
        executable,
        prefix,
        path_values: Vec::new(),
    }
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let bytes = fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(entry) => {
            tracing::debug!("read cache entry {}", path.display());
            Some(entry)
        }
        Err(err) => {
            // Torn or corrupt writes read as a miss.
            tracing::debug!("discarding unreadable cache entry {}: {}", path.display(), err);
            None
        }
    }
}

fn write_entry(dir: &Path, path: &Path, entry: &CacheEntry) {
    if fs::create_dir_all(dir).is_err() {
        return;
    }
    let Ok(bytes) = serde_json::to_vec(entry) else {
        return;
    };
    if let Err(err) = fs::write(path, bytes) {
        tracing::debug!("could not write cache entry {}: {}", path.display(), err);
    }
}

/// Durable, cross-process cache of enumerated registrations.
///
/// Reads are optimistic and writes best-effort; concurrent processes may
/// race on the same fingerprint file and the loser's partial write is
/// treated as a miss by the next reader. Results are additionally memoized
/// in-process per search-path key, append-only, for the process lifetime.
pub struct RegistryCache {
    dir: PathBuf,
    disabled: bool,
    entries: RwLock<HashMap<Vec<PathBuf>, Arc<CacheEntry>>>,
}

impl RegistryCache {
    /// Cache rooted at the platform cache directory.
    pub fn new() -> Self {
        Self::with_dir(default_cache_dir())
    }

    /// Cache rooted at an explicit directory.
    ///
    /// The durable store is disabled when a `.disable` marker file exists
    /// in the directory or the host executable runs from the OS temp
    /// directory; every call then rebuilds from the provider.
    pub fn with_dir(dir: PathBuf) -> Self {
        let disabled = dir.join(DISABLE_MARKER).is_file() || running_from_temp();
        Self {
            dir,
            disabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn entry_for_path(
        &self,
        provider: &dyn RegistryProvider,
        search_path: Option<&[PathBuf]>,
    ) -> Arc<CacheEntry> {
        let key: Vec<PathBuf> = match search_path {
            Some(path) => path.to_vec(),
            None => default_search_path(),
        };
        if let Some(entry) = self.entries.read().get(&key) {
            return entry.clone();
        }

        let (digest, path_values) = hash_settings_for_path(&key);
        let filename = self.dir.join(&digest);

        let entry = if self.disabled {
            None
        } else {
            read_entry(&filename)
        };
        let entry = entry.unwrap_or_else(|| {
            let mut built = build_entry(provider);
            built.path_values = path_values;
            if !self.disabled {
                write_entry(&self.dir, &filename, &built);
            }
            built
        });

        let entry = Arc::new(entry);
        self.entries
            .write()
            .entry(key)
            .or_insert_with(|| entry.clone())
            .clone()
    }

    /// All registrations for a namespace, in discovery order.
    ///
    /// A namespace absent from the dataset yields an empty vec.
    pub fn get_records(
        &self,
        provider: &dyn RegistryProvider,
        namespace: &str,
        search_path: Option<&[PathBuf]>,
    ) -> Vec<RegistrationRecord> {
        let entry = self.entry_for_path(provider, search_path);
        entry
            .groups
            .get(namespace)
            .map(|triples| {
                triples
                    .iter()
                    .map(|(name, locator, group)| RegistrationRecord::new(name, locator, group))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first registration for each distinct name in a namespace.
    pub fn get_named_records(
        &self,
        provider: &dyn RegistryProvider,
        namespace: &str,
        search_path: Option<&[PathBuf]>,
    ) -> Vec<RegistrationRecord> {
        let mut seen = HashSet::new();
        self.get_records(provider, namespace, search_path)
            .into_iter()
            .filter(|record| seen.insert(record.name.clone()))
            .collect()
    }

    /// The first registration carrying a specific name.
    pub fn get_single(
        &self,
        provider: &dyn RegistryProvider,
        namespace: &str,
        name: &str,
        search_path: Option<&[PathBuf]>,
    ) -> Result<RegistrationRecord> {
        self.get_records(provider, namespace, search_path)
            .into_iter()
            .find(|record| record.name == name)
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }
}

impl Default for RegistryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Groups;

    struct FixedProvider(Groups);

    impl RegistryProvider for FixedProvider {
        fn enumerate_all(&self) -> Groups {
            self.0.clone()
        }
    }

    fn crew_provider() -> FixedProvider {
        let mut groups = Groups::new();
        groups.insert(
            "crew".to_string(),
            vec![
                RegistrationRecord::new("captain", "pkg_a:Captain", "crew"),
                RegistrationRecord::new("captain", "pkg_a:Captain", "crew"),
                RegistrationRecord::new("cook", "pkg_a:Cook", "crew"),
            ],
        );
        FixedProvider(groups)
    }

    #[test]
    fn test_rebuild_deduplicates_exact_triples() {
        let entry = build_entry(&crew_provider());
        assert_eq!(entry.groups["crew"].len(), 2);
    }

    #[test]
    fn test_absent_namespace_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RegistryCache::with_dir(dir.path().to_path_buf());
        let records = cache.get_records(&crew_provider(), "officers", Some(&[]));
        assert!(records.is_empty());
    }

    #[test]
    fn test_named_records_take_first_per_name() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RegistryCache::with_dir(dir.path().to_path_buf());
        let records = cache.get_named_records(&crew_provider(), "crew", Some(&[]));
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["captain", "cook"]);
    }

    #[test]
    fn test_get_single_unknown_name() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RegistryCache::with_dir(dir.path().to_path_buf());
        let err = cache
            .get_single(&crew_provider(), "crew", "navigator", Some(&[]))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownName(_)));
    }

    #[test]
    fn test_fingerprint_changes_with_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = hash_settings_for_path(&[]);
        let (b, values) = hash_settings_for_path(&[dir.path().to_path_buf()]);
        assert_ne!(a, b);
        assert_eq!(values.len(), 1);
        assert!(values[0].1 > 0.0);
    }

    #[test]
    fn test_missing_path_hashes_as_sentinel() {
        let (_, values) = hash_settings_for_path(&[PathBuf::from("/does/not/exist")]);
        assert_eq!(values[0].1, -1.0);
    }
}
