//! Capability traits for resolving locators and invoking plugin objects.
//!
//! Dynamic code loading is deliberately outside this crate: the host
//! environment supplies a [`Resolver`] that turns a locator string into a
//! [`Loadable`] factory, and loaded objects expose their operations through
//! the [`Plugin`] trait's method-name dispatch instead of reflection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by the resolution and invocation capabilities.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The locator could not be satisfied (missing module or attribute).
    #[error("Cannot resolve locator {0:?}")]
    Resolve(String),

    /// The factory failed while building the plugin instance.
    #[error("Instantiation failed: {0}")]
    Instantiate(String),

    /// The instance does not dispatch the requested method name.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// The arguments did not match what the method expects.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The method ran and failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The extension was loaded without invoke-on-load, so it has no
    /// instance to dispatch methods on.
    #[error("Extension was loaded without an instance")]
    NoInstance,

    /// Host-interrupt equivalent. Never isolated; always propagates.
    #[error("Aborted: {0}")]
    Aborted(String),
}

impl PluginError {
    /// Whether this error belongs to the closed fatal set.
    ///
    /// Fatal errors abort whatever operation observed them instead of
    /// being isolated per-record or per-extension. Assertion failures
    /// (panics) are fatal by construction since nothing here catches
    /// unwinding.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PluginError::Aborted(_))
    }
}

/// Positional and keyword arguments for factories and plugin methods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwds: serde_json::Map<String, Value>,
}

impl InvokeArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwd(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwds.insert(key.into(), value.into());
        self
    }
}

/// A loaded plugin object.
///
/// Operations are dispatched by method name so that managers can invoke
/// them without knowing the concrete type (`map_method`). Unknown names
/// should fail with [`PluginError::MethodNotFound`].
pub trait Plugin: Send + Sync {
    fn invoke(&self, method: &str, args: &InvokeArgs) -> Result<Value, PluginError>;
}

/// Builds plugin instances from a registration's declared name and the
/// caller's invoke-on-load arguments.
pub trait PluginFactory: Send + Sync {
    fn instantiate(&self, name: &str, args: &InvokeArgs) -> Result<Box<dyn Plugin>, PluginError>;
}

struct FnFactory<F>(F);

impl<F> PluginFactory for FnFactory<F>
where
    F: Fn(&str, &InvokeArgs) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync,
{
    fn instantiate(&self, name: &str, args: &InvokeArgs) -> Result<Box<dyn Plugin>, PluginError> {
        (self.0)(name, args)
    }
}

/// The resolved form of a locator: a shared handle to the plugin factory.
#[derive(Clone)]
pub struct Loadable(Arc<dyn PluginFactory>);

impl Loadable {
    pub fn new(factory: impl PluginFactory + 'static) -> Self {
        Self(Arc::new(factory))
    }

    /// Wrap a plain function as a factory.
    pub fn from_fn<F>(factory: F) -> Self
    where
        F: Fn(&str, &InvokeArgs) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        Self(Arc::new(FnFactory(factory)))
    }

    pub fn instantiate(&self, name: &str, args: &InvokeArgs) -> Result<Box<dyn Plugin>, PluginError> {
        self.0.instantiate(name, args)
    }
}

impl fmt::Debug for Loadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Loadable")
    }
}

/// Resolves a locator string to a [`Loadable`].
///
/// This is the seam for the host environment's dynamic loading primitive.
pub trait Resolver: Send + Sync {
    fn resolve(&self, locator: &str) -> Result<Loadable, PluginError>;
}

/// In-memory locator table.
///
/// Hosts register their built-in factories under locator strings; anything
/// not registered fails with [`PluginError::Resolve`]. The table is
/// append-oriented and safe to share across threads.
#[derive(Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<String, Loadable>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a locator. A later registration for the
    /// same locator replaces the earlier one.
    pub fn register(&self, locator: impl Into<String>, loadable: Loadable) {
        self.table.write().insert(locator.into(), loadable);
    }

    /// Register a plain function as the factory for a locator.
    pub fn register_fn<F>(&self, locator: impl Into<String>, factory: F)
    where
        F: Fn(&str, &InvokeArgs) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        self.register(locator, Loadable::from_fn(factory));
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, locator: &str) -> Result<Loadable, PluginError> {
        self.table
            .read()
            .get(locator)
            .cloned()
            .ok_or_else(|| PluginError::Resolve(locator.to_string()))
    }
}
