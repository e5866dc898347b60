//! Manifest scanning and the full discovery-to-invocation path.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;

use gantry::{
    ExtensionManager, InvokeArgs, ManifestProvider, Plugin, PluginError, PluginHost,
    RegistryCache, RegistryProvider, StaticResolver,
};

fn write_manifest(root: &Path, package: &str, body: &str) {
    let dir = root.join(package);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("gantry.json"), body).unwrap();
}

fn seed_packages(root: &Path) {
    write_manifest(
        root,
        "pkg_a",
        r#"{
            "name": "pkg_a",
            "registrations": {
                "crew": [
                    {"name": "captain", "locator": "pkg_a:Captain"},
                    {"name": "cook", "locator": "pkg_a:Cook"}
                ]
            }
        }"#,
    );
    write_manifest(
        root,
        "pkg_b",
        r#"{
            "name": "pkg_b",
            "registrations": {
                "crew": [{"name": "navigator", "locator": "pkg_b:Navigator"}],
                "officers": [{"name": "captain", "locator": "pkg_b:Captain"}]
            }
        }"#,
    );
}

#[test]
fn test_scan_groups_by_namespace_in_package_order() {
    let root = TempDir::new().unwrap();
    seed_packages(root.path());

    let groups = ManifestProvider::new(vec![root.path().to_path_buf()]).enumerate_all();
    let crew: Vec<_> = groups["crew"].iter().map(|r| r.locator.as_str()).collect();
    assert_eq!(crew, ["pkg_a:Captain", "pkg_a:Cook", "pkg_b:Navigator"]);
    assert_eq!(groups["officers"].len(), 1);
    assert_eq!(groups["crew"][0].namespace, "crew");
}

#[test]
fn test_malformed_manifests_are_skipped() {
    let root = TempDir::new().unwrap();
    seed_packages(root.path());
    write_manifest(root.path(), "pkg_broken", "not json at all");

    let groups = ManifestProvider::new(vec![root.path().to_path_buf()]).enumerate_all();
    assert_eq!(groups["crew"].len(), 3);
}

#[test]
fn test_missing_search_entries_yield_nothing() {
    let provider = ManifestProvider::new(vec!["/does/not/exist".into()]);
    assert!(provider.enumerate_all().is_empty());
}

#[test]
fn test_manifest_to_invocation_end_to_end() {
    struct Unit(String);

    impl Plugin for Unit {
        fn invoke(&self, method: &str, _args: &InvokeArgs) -> Result<Value, PluginError> {
            match method {
                "report" => Ok(Value::String(format!("{} ready", self.0))),
                other => Err(PluginError::MethodNotFound(other.to_string())),
            }
        }
    }

    let root = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    seed_packages(root.path());

    let resolver = StaticResolver::new();
    for locator in ["pkg_a:Captain", "pkg_a:Cook", "pkg_b:Navigator"] {
        resolver.register_fn(locator, |name, _| Ok(Box::new(Unit(name.to_string()))));
    }

    let host = PluginHost::with_manifests(vec![root.path().to_path_buf()], Arc::new(resolver))
        .cache(Arc::new(RegistryCache::with_dir(
            cache_dir.path().to_path_buf(),
        )));
    let manager = ExtensionManager::builder("crew")
        .invoke_on_load(InvokeArgs::new())
        .build(&host)
        .unwrap();

    let reports = manager.map_method("report", &InvokeArgs::new()).unwrap();
    assert_eq!(
        reports,
        vec![
            Value::String("captain ready".into()),
            Value::String("cook ready".into()),
            Value::String("navigator ready".into()),
        ]
    );
}

#[test]
fn test_installing_a_package_invalidates_the_fingerprint() {
    let root = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    seed_packages(root.path());
    let search_path = [root.path().to_path_buf()];

    let provider = ManifestProvider::new(search_path.to_vec());
    let before = RegistryCache::with_dir(cache_dir.path().to_path_buf());
    let records = before.get_records(&provider, "crew", Some(&search_path));
    assert_eq!(records.len(), 3);

    write_manifest(
        root.path(),
        "pkg_c",
        r#"{
            "name": "pkg_c",
            "registrations": {
                "crew": [{"name": "stowaway", "locator": "pkg_c:Stowaway"}]
            }
        }"#,
    );

    // The new manifest changes the fingerprint, so a fresh instance
    // rebuilds instead of serving the stale entry.
    let after = RegistryCache::with_dir(cache_dir.path().to_path_buf());
    let records = after.get_records(&provider, "crew", Some(&search_path));
    assert_eq!(records.len(), 4);
    assert_eq!(records[3].name, "stowaway");
    assert_eq!(fs::read_dir(cache_dir.path()).unwrap().count(), 2);
}
