//! Gantry: plugin discovery, loading, and invocation.
//!
//! Installed packages advertise *registrations* — `(name, locator)` pairs
//! grouped under a namespace. Gantry enumerates them (through a durable,
//! fingerprint-validated cache), resolves each locator to a factory,
//! optionally instantiates it, and exposes the surviving extensions
//! through a family of managers:
//!
//! - [`ExtensionManager`] — everything in the namespace
//! - [`EnabledManager`] — everything that passes a check function
//! - [`NamedManager`] — an explicit name list
//! - [`DriverManager`] — exactly one unambiguous name
//! - [`HookManager`] — every provider of one shared name
//! - [`DispatchManager`] / [`NameDispatchManager`] — filtered per call
//!
//! Failures are isolated per registration during load and per extension
//! during `map`, except a closed fatal set that always propagates.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gantry::{
//!     ExtensionManager, InvokeArgs, PluginHost, RegistrationRecord, RegistryCache,
//!     StaticResolver,
//! };
//! use gantry::registry::Groups;
//!
//! struct FixedProvider(Groups);
//!
//! impl gantry::RegistryProvider for FixedProvider {
//!     fn enumerate_all(&self) -> Groups {
//!         self.0.clone()
//!     }
//! }
//!
//! let mut groups = Groups::new();
//! groups.insert(
//!     "greeters".to_string(),
//!     vec![RegistrationRecord::new("hello", "builtin:hello", "greeters")],
//! );
//!
//! let resolver = StaticResolver::new();
//! resolver.register_fn("builtin:hello", |name, _args| {
//!     let name = name.to_string();
//!     struct Greeter(String);
//!     impl gantry::Plugin for Greeter {
//!         fn invoke(
//!             &self,
//!             method: &str,
//!             _args: &InvokeArgs,
//!         ) -> Result<serde_json::Value, gantry::PluginError> {
//!             match method {
//!                 "greet" => Ok(format!("hello from {}", self.0).into()),
//!                 other => Err(gantry::PluginError::MethodNotFound(other.to_string())),
//!             }
//!         }
//!     }
//!     Ok(Box::new(Greeter(name)))
//! });
//!
//! let cache_dir = std::env::temp_dir().join("gantry-doc-example");
//! let host = PluginHost::new(Arc::new(FixedProvider(groups)), Arc::new(resolver))
//!     .cache(Arc::new(RegistryCache::with_dir(cache_dir)))
//!     .search_path(vec![]);
//!
//! let manager = ExtensionManager::builder("greeters")
//!     .invoke_on_load(InvokeArgs::new())
//!     .build(&host)
//!     .unwrap();
//! let greetings = manager.map_method("greet", &InvokeArgs::new()).unwrap();
//! assert_eq!(greetings.len(), 1);
//! ```

pub mod cache;
pub mod error;
pub mod host;
pub mod manager;
pub mod plugin;
pub mod registry;

pub use cache::RegistryCache;
pub use error::{BoxError, Error, Result};
pub use host::PluginHost;
pub use manager::filtered::{
    DispatchManager, DispatchManagerBuilder, EnabledManager, EnabledManagerBuilder,
    NameDispatchManager, NameDispatchManagerBuilder,
};
pub use manager::named::{
    Driver, DriverManager, DriverManagerBuilder, HookManager, HookManagerBuilder,
    MissingNamesPolicy, NamedManager, NamedManagerBuilder, OnMissingNames,
};
pub use manager::{
    CheckFn, ConflictPolicy, Extension, ExtensionManager, ExtensionManagerBuilder, OnLoadFailure,
};
pub use plugin::{
    InvokeArgs, Loadable, Plugin, PluginError, PluginFactory, Resolver, StaticResolver,
};
pub use registry::{ManifestProvider, RegistrationRecord, RegistryProvider};
