//! Registration records and the registry enumeration capability.
//!
//! The underlying package registry is external: anything that can report
//! "namespace → ordered registrations" implements [`RegistryProvider`].
//! [`ManifestProvider`] is the built-in implementation, scanning the
//! search path for per-package `gantry.json` manifests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Glob pattern, relative to a search-path entry, locating package
/// manifests. The registry cache fingerprints the same set of files.
pub(crate) const MANIFEST_GLOB: &str = "*/gantry.json";

/// One advertised plugin registration.
///
/// Identity is the full `(namespace, name, locator)` triple; several
/// records in one namespace may share a name, and conflict resolution
/// depends on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub name: String,
    pub locator: String,
    pub namespace: String,
}

impl RegistrationRecord {
    pub fn new(
        name: impl Into<String>,
        locator: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            namespace: namespace.into(),
        }
    }
}

/// Every registration in every namespace, in discovery order per namespace.
pub type Groups = BTreeMap<String, Vec<RegistrationRecord>>;

/// Enumerates advertised registrations from installed packages.
///
/// Enumeration is never fatal: providers report what they can find and
/// skip what they cannot parse. Order within a namespace must stay
/// consistent within one process run; no stronger guarantee is made.
pub trait RegistryProvider: Send + Sync {
    fn enumerate_all(&self) -> Groups;
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    locator: String,
}

/// One package's advertised registrations, as stored in `gantry.json`.
#[derive(Debug, Deserialize)]
struct PluginManifest {
    #[serde(default)]
    registrations: BTreeMap<String, Vec<ManifestEntry>>,
}

/// Scans search-path entries for `*/gantry.json` package manifests.
pub struct ManifestProvider {
    search_path: Vec<PathBuf>,
}

impl ManifestProvider {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    fn read_manifest(path: &Path) -> Option<PluginManifest> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("Skipping unreadable manifest {}: {}", path.display(), err);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                tracing::warn!("Skipping malformed manifest {}: {}", path.display(), err);
                None
            }
        }
    }
}

impl RegistryProvider for ManifestProvider {
    fn enumerate_all(&self) -> Groups {
        let mut groups = Groups::new();
        for entry in &self.search_path {
            let pattern = entry.join(MANIFEST_GLOB);
            let paths = match glob::glob(&pattern.to_string_lossy()) {
                Ok(paths) => paths,
                Err(_) => continue,
            };
            for path in paths.flatten() {
                let Some(manifest) = Self::read_manifest(&path) else {
                    continue;
                };
                tracing::debug!("found manifest {}", path.display());
                for (namespace, entries) in manifest.registrations {
                    let group = groups.entry(namespace.clone()).or_default();
                    for item in entries {
                        group.push(RegistrationRecord::new(
                            item.name,
                            item.locator,
                            namespace.clone(),
                        ));
                    }
                }
            }
        }
        groups
    }
}
