//! Name-restricted selection: named, single-driver, and shared-name hook
//! managers.

use std::collections::BTreeSet;
use std::ops::Deref;

use crate::error::{BoxError, Error, Result};
use crate::host::PluginHost;
use crate::manager::{ConflictPolicy, Extension, ExtensionManager, ExtensionManagerBuilder};
use crate::plugin::{InvokeArgs, Loadable, Plugin, PluginError};
use crate::registry::RegistrationRecord;

/// Callback invoked with the set of wanted names that loaded nothing.
pub type OnMissingNames = Box<dyn Fn(&BTreeSet<String>) + Send + Sync>;

/// What to do when wanted names have no surviving extension. Advisory,
/// never fatal.
pub enum MissingNamesPolicy {
    /// Log a warning naming the missing set (the default).
    Warn,
    /// Stay silent. The hook manager's default: an absent hook is normal.
    Ignore,
    /// Invoke a caller-supplied callback.
    Call(OnMissingNames),
}

impl Default for MissingNamesPolicy {
    fn default() -> Self {
        MissingNamesPolicy::Warn
    }
}

/// Loads only the named extensions.
///
/// Useful for enabling an explicit plugin list from configuration. Records
/// whose name is not wanted are vetoed before their code is resolved.
#[derive(Debug)]
pub struct NamedManager {
    inner: ExtensionManager,
    names: Vec<String>,
    missing: BTreeSet<String>,
}

pub struct NamedManagerBuilder {
    inner: ExtensionManagerBuilder,
    names: Vec<String>,
    name_order: bool,
    missing_policy: MissingNamesPolicy,
}

impl NamedManager {
    pub fn builder<I, S>(namespace: impl Into<String>, names: I) -> NamedManagerBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NamedManagerBuilder {
            inner: ExtensionManager::builder(namespace),
            names: names.into_iter().map(Into::into).collect(),
            name_order: false,
            missing_policy: MissingNamesPolicy::Warn,
        }
    }

    /// The names requested at construction.
    pub fn wanted_names(&self) -> &[String] {
        &self.names
    }

    /// Wanted names for which nothing loaded.
    pub fn missing_names(&self) -> &BTreeSet<String> {
        &self.missing
    }
}

impl NamedManagerBuilder {
    pub fn invoke_on_load(mut self, args: InvokeArgs) -> Self {
        self.inner = self.inner.invoke_on_load(args);
        self
    }

    pub fn propagate_invocation_errors(mut self, propagate: bool) -> Self {
        self.inner = self.inner.propagate_invocation_errors(propagate);
        self
    }

    pub fn on_load_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &RegistrationRecord, &PluginError) + Send + Sync + 'static,
    {
        self.inner = self.inner.on_load_failure(callback);
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.inner = self.inner.conflict_policy(policy);
        self
    }

    /// Reorder the loaded collection to match the requested name order
    /// instead of discovery order. Missing names are skipped; a name
    /// requested twice keeps only its first occurrence, since each
    /// extension is owned once.
    pub fn name_order(mut self, enabled: bool) -> Self {
        self.name_order = enabled;
        self
    }

    pub fn on_missing_names<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BTreeSet<String>) + Send + Sync + 'static,
    {
        self.missing_policy = MissingNamesPolicy::Call(Box::new(callback));
        self
    }

    pub fn missing_names_policy(mut self, policy: MissingNamesPolicy) -> Self {
        self.missing_policy = policy;
        self
    }

    pub fn build(mut self, host: &PluginHost) -> Result<NamedManager> {
        self.inner.name_filter = Some(self.names.clone());
        let mut manager = self.inner.build(host)?;

        let missing: BTreeSet<String> = self
            .names
            .iter()
            .filter(|name| !manager.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            match &self.missing_policy {
                MissingNamesPolicy::Warn => {
                    let listed = missing.iter().cloned().collect::<Vec<_>>().join(", ");
                    tracing::warn!("Could not load {}", listed);
                }
                MissingNamesPolicy::Ignore => {}
                MissingNamesPolicy::Call(callback) => callback(&missing),
            }
        }

        if self.name_order {
            let mut order = Vec::new();
            {
                let index = manager.name_index()?;
                let mut seen = BTreeSet::new();
                for name in &self.names {
                    if missing.contains(name) || !seen.insert(name) {
                        continue;
                    }
                    if let Some(&position) = index.get(name.as_str()) {
                        order.push(position);
                    }
                }
            }
            manager = manager.reordered(order);
        }

        Ok(NamedManager {
            inner: manager,
            names: self.names,
            missing,
        })
    }
}

impl Deref for NamedManager {
    type Target = ExtensionManager;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The single driver selected by a [`DriverManager`].
pub enum Driver<'a> {
    /// The instantiated plugin object (invoke-on-load was requested).
    Instance(&'a dyn Plugin),
    /// The raw loadable (no instantiation was requested).
    Loadable(&'a Loadable),
}

impl<'a> Driver<'a> {
    pub fn instance(&self) -> Option<&'a dyn Plugin> {
        match self {
            Driver::Instance(plugin) => Some(*plugin),
            Driver::Loadable(_) => None,
        }
    }
}

/// Loads exactly one plugin with a given name.
///
/// A driver selection is defined to be unambiguous: zero survivors fail
/// with [`Error::NoMatches`] and more than one with
/// [`Error::MultipleMatches`], regardless of conflict policy. Load
/// failures propagate by default — a driver that cannot load is an error,
/// not a warning.
#[derive(Debug)]
pub struct DriverManager {
    inner: NamedManager,
}

pub struct DriverManagerBuilder {
    inner: NamedManagerBuilder,
    has_load_failure_callback: bool,
}

impl DriverManager {
    pub fn builder(namespace: impl Into<String>, name: impl Into<String>) -> DriverManagerBuilder {
        DriverManagerBuilder {
            inner: NamedManager::builder(namespace, [name.into()]),
            has_load_failure_callback: false,
        }
    }

    /// The name the driver was selected by.
    pub fn driver_name(&self) -> &str {
        &self.inner.names[0]
    }

    /// The driver itself: the instantiated object when invoke-on-load was
    /// requested, else the raw loadable.
    pub fn driver(&self) -> Driver<'_> {
        let extension = &self.inner.extensions()[0];
        match extension.instance() {
            Some(instance) => Driver::Instance(instance),
            None => Driver::Loadable(extension.loadable()),
        }
    }

    pub fn extension(&self) -> &Extension {
        &self.inner.extensions()[0]
    }

    /// Invoke `func` for the single loaded extension and return its
    /// result, or `None` when the continue policy swallowed a failure.
    pub fn call<R, F>(&self, func: F) -> Result<Option<R>>
    where
        F: FnMut(&Extension) -> std::result::Result<R, BoxError>,
    {
        let mut results = self.inner.map(func)?;
        if results.is_empty() {
            Ok(None)
        } else {
            Ok(Some(results.remove(0)))
        }
    }
}

impl DriverManagerBuilder {
    pub fn invoke_on_load(mut self, args: InvokeArgs) -> Self {
        self.inner = self.inner.invoke_on_load(args);
        self
    }

    pub fn propagate_invocation_errors(mut self, propagate: bool) -> Self {
        self.inner = self.inner.propagate_invocation_errors(propagate);
        self
    }

    pub fn on_load_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &RegistrationRecord, &PluginError) + Send + Sync + 'static,
    {
        self.inner = self.inner.on_load_failure(callback);
        self.has_load_failure_callback = true;
        self
    }

    pub fn on_missing_names<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BTreeSet<String>) + Send + Sync + 'static,
    {
        self.inner = self.inner.on_missing_names(callback);
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.inner = self.inner.conflict_policy(policy);
        self
    }

    pub fn build(mut self, host: &PluginHost) -> Result<DriverManager> {
        if !self.has_load_failure_callback {
            self.inner.inner.propagate_load_errors = true;
        }
        // Zero matches is reported through NoMatches below, not the
        // missing-names warning.
        self.inner = self.inner.missing_names_policy(MissingNamesPolicy::Ignore);

        let named = self.inner.build(host)?;
        match named.len() {
            0 => Err(Error::NoMatches {
                namespace: named.namespace().to_string(),
            }),
            1 => Ok(DriverManager { inner: named }),
            _ => {
                let sources = named
                    .iter()
                    .map(|e| e.record().locator.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(Error::MultipleMatches {
                    namespace: named.namespace().to_string(),
                    name: named.names[0].clone(),
                    sources,
                })
            }
        }
    }
}

impl Deref for DriverManager {
    type Target = NamedManager;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Coordinates multiple extensions sharing one logical hook name.
///
/// Unlike [`DriverManager`], multiplicity is the point: every extension
/// registered under the hook name is kept, and name-keyed lookup returns
/// them all in discovery order.
pub struct HookManager {
    inner: NamedManager,
}

pub struct HookManagerBuilder {
    inner: NamedManagerBuilder,
}

impl HookManager {
    pub fn builder(namespace: impl Into<String>, name: impl Into<String>) -> HookManagerBuilder {
        HookManagerBuilder {
            inner: NamedManager::builder(namespace, [name.into()])
                .missing_names_policy(MissingNamesPolicy::Ignore),
        }
    }

    /// The hook name.
    pub fn name(&self) -> &str {
        &self.inner.names[0]
    }

    /// Every extension registered under the hook name, in the order `map`
    /// would invoke them. Any other name is unknown.
    pub fn get(&self, name: &str) -> Result<&[Extension]> {
        if name != self.name() {
            return Err(Error::UnknownName(name.to_string()));
        }
        Ok(self.inner.extensions())
    }
}

impl HookManagerBuilder {
    pub fn invoke_on_load(mut self, args: InvokeArgs) -> Self {
        self.inner = self.inner.invoke_on_load(args);
        self
    }

    pub fn propagate_invocation_errors(mut self, propagate: bool) -> Self {
        self.inner = self.inner.propagate_invocation_errors(propagate);
        self
    }

    pub fn on_load_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &RegistrationRecord, &PluginError) + Send + Sync + 'static,
    {
        self.inner = self.inner.on_load_failure(callback);
        self
    }

    pub fn on_missing_names<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BTreeSet<String>) + Send + Sync + 'static,
    {
        self.inner = self.inner.on_missing_names(callback);
        self
    }

    pub fn build(self, host: &PluginHost) -> Result<HookManager> {
        Ok(HookManager {
            inner: self.inner.build(host)?,
        })
    }
}

impl Deref for HookManager {
    type Target = NamedManager;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
