//! Predicate-filtered selection: load-time checks and per-call dispatch.

use std::ops::Deref;

use serde_json::Value;

use crate::error::{BoxError, Result};
use crate::host::PluginHost;
use crate::manager::{ConflictPolicy, Extension, ExtensionManager, ExtensionManagerBuilder};
use crate::plugin::{InvokeArgs, PluginError};
use crate::registry::RegistrationRecord;

/// Loads only extensions that pass a check function.
///
/// The check runs after a record is resolved (and instantiated, when
/// requested) but before it joins the collection. Rejections are
/// debug-logged, not load failures.
pub struct EnabledManager {
    inner: ExtensionManager,
}

pub struct EnabledManagerBuilder {
    inner: ExtensionManagerBuilder,
}

impl EnabledManager {
    pub fn builder<C>(namespace: impl Into<String>, check: C) -> EnabledManagerBuilder
    where
        C: Fn(&Extension) -> bool + Send + Sync + 'static,
    {
        let mut inner = ExtensionManager::builder(namespace);
        inner.check = Some(Box::new(check));
        EnabledManagerBuilder { inner }
    }
}

impl EnabledManagerBuilder {
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

    pub fn build(self, host: &PluginHost) -> Result<EnabledManager> {
        Ok(EnabledManager {
            inner: self.inner.build(host)?,
        })
    }
}

impl Deref for EnabledManager {
    type Target = ExtensionManager;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Loads all checked extensions and filters again on every call.
///
/// Useful for long-running processes that route different inputs to
/// different subsets of the loaded extensions.
pub struct DispatchManager {
    inner: EnabledManager,
}

pub struct DispatchManagerBuilder {
    inner: EnabledManagerBuilder,
}

impl DispatchManager {
    pub fn builder<C>(namespace: impl Into<String>, check: C) -> DispatchManagerBuilder
    where
        C: Fn(&Extension) -> bool + Send + Sync + 'static,
    {
        DispatchManagerBuilder {
            inner: EnabledManager::builder(namespace, check),
        }
    }

    /// Invoke `func` for every extension `filter` accepts, in collection
    /// order. The filter runs fresh on each call; failures follow the
    /// manager's invocation policy. Fails with `NoMatches` when nothing is
    /// loaded at all.
    pub fn map_filtered<R, P, F>(&self, mut filter: P, mut func: F) -> Result<Vec<R>>
    where
        P: FnMut(&Extension) -> bool,
        F: FnMut(&Extension) -> std::result::Result<R, BoxError>,
    {
        if self.inner.is_empty() {
            return Err(crate::error::Error::NoMatches {
                namespace: self.inner.namespace().to_string(),
            });
        }
        let mut response = Vec::new();
        for extension in self.inner.iter() {
            if filter(extension) {
                self.inner.invoke_one(&mut response, &mut func, extension)?;
            }
        }
        Ok(response)
    }

    /// Invoke the named method on every instance `filter` accepts.
    pub fn map_method_filtered<P>(
        &self,
        filter: P,
        method: &str,
        args: &InvokeArgs,
    ) -> Result<Vec<Value>>
    where
        P: FnMut(&Extension) -> bool,
    {
        self.map_filtered(filter, |extension| {
            extension.invoke(method, args).map_err(Into::into)
        })
    }
}

impl DispatchManagerBuilder {
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

    pub fn build(self, host: &PluginHost) -> Result<DispatchManager> {
        Ok(DispatchManager {
            inner: self.inner.build(host)?,
        })
    }
}

impl Deref for DispatchManager {
    type Target = EnabledManager;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Dispatch by extension name, decided per call.
///
/// Unknown names in the per-call list are debug-logged and skipped, never
/// an error; results come back in requested-name order.
pub struct NameDispatchManager {
    inner: DispatchManager,
}

pub struct NameDispatchManagerBuilder {
    inner: DispatchManagerBuilder,
}

impl NameDispatchManager {
    pub fn builder<C>(namespace: impl Into<String>, check: C) -> NameDispatchManagerBuilder
    where
        C: Fn(&Extension) -> bool + Send + Sync + 'static,
    {
        NameDispatchManagerBuilder {
            inner: DispatchManager::builder(namespace, check),
        }
    }

    /// Invoke `func` for each extension whose name appears in `names`.
    pub fn map_names<R, I, S, F>(&self, names: I, mut func: F) -> Result<Vec<R>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&Extension) -> std::result::Result<R, BoxError>,
    {
        let mut response = Vec::new();
        for name in names {
            let name = name.as_ref();
            match self.inner.get(name) {
                Ok(extension) => {
                    self.inner.invoke_one(&mut response, &mut func, extension)?;
                }
                Err(crate::error::Error::UnknownName(_)) => {
                    tracing::debug!("Missing extension {:?} being ignored", name);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(response)
    }

    /// Invoke the named method on each instance whose name appears in
    /// `names`.
    pub fn map_method_names<I, S>(
        &self,
        names: I,
        method: &str,
        args: &InvokeArgs,
    ) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.map_names(names, |extension| {
            extension.invoke(method, args).map_err(Into::into)
        })
    }
}

impl NameDispatchManagerBuilder {
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

    pub fn build(self, host: &PluginHost) -> Result<NameDispatchManager> {
        Ok(NameDispatchManager {
            inner: self.inner.build(host)?,
        })
    }
}

impl Deref for NameDispatchManager {
    type Target = DispatchManager;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
