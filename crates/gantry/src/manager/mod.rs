//! Extension loading and the base manager.
//!
//! One configurable pipeline loads every manager variant: records are
//! fetched through the host, optionally vetoed by name before any code is
//! resolved, resolved, optionally instantiated, and optionally checked by a
//! predicate before joining the collection. The selection layers in
//! [`named`] and [`filtered`] are thin wrappers that preset those knobs
//! rather than an inheritance chain.

pub mod filtered;
pub mod named;

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::{BoxError, Error, Result};
use crate::host::PluginHost;
use crate::plugin::{InvokeArgs, Loadable, Plugin, PluginError};
use crate::registry::RegistrationRecord;

/// One successfully loaded registration.
///
/// Immutable after construction. `instance` is populated at creation time
/// iff invoke-on-load was requested; there is no lazy instantiation.
pub struct Extension {
    name: String,
    record: RegistrationRecord,
    loadable: Loadable,
    instance: Option<Box<dyn Plugin>>,
}

impl Extension {
    pub fn new(
        record: RegistrationRecord,
        loadable: Loadable,
        instance: Option<Box<dyn Plugin>>,
    ) -> Self {
        Self {
            name: record.name.clone(),
            record,
            loadable,
            instance,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self) -> &RegistrationRecord {
        &self.record
    }

    pub fn loadable(&self) -> &Loadable {
        &self.loadable
    }

    pub fn instance(&self) -> Option<&dyn Plugin> {
        self.instance.as_deref()
    }

    /// Dispatch a method on the instantiated plugin object.
    pub fn invoke(&self, method: &str, args: &InvokeArgs) -> std::result::Result<Value, PluginError> {
        self.instance
            .as_deref()
            .ok_or(PluginError::NoInstance)?
            .invoke(method, args)
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("name", &self.name)
            .field("record", &self.record)
            .field("instantiated", &self.instance.is_some())
            .finish()
    }
}

/// Policy applied when several same-namespace extensions share a name.
///
/// Conflicts are resolved when the name index is first built, never when
/// the ordered collection is built: all same-name extensions stay visible
/// to iteration and `map`.
pub enum ConflictPolicy {
    /// Keep the last discovered registration and log a warning naming all
    /// conflicting sources. This is the default; later search-path entries
    /// are conventionally higher-priority overrides. The order is whatever
    /// the provider returned — no stronger guarantee exists.
    LastWins,
    /// Fail name-keyed lookups with [`Error::MultipleMatches`].
    Reject,
    /// Pick one member: called with `(namespace, name, group)` and must
    /// return the index of the chosen member within `group`.
    Custom(Box<dyn Fn(&str, &str, &[&Extension]) -> Result<usize> + Send + Sync>),
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::LastWins => f.write_str("LastWins"),
            ConflictPolicy::Reject => f.write_str("Reject"),
            ConflictPolicy::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::LastWins
    }
}

/// Callback invoked when one registration fails to load.
pub type OnLoadFailure = Box<dyn Fn(&str, &RegistrationRecord, &PluginError) + Send + Sync>;

/// Post-resolution acceptance predicate.
pub type CheckFn = Box<dyn Fn(&Extension) -> bool + Send + Sync>;

/// Builder for [`ExtensionManager`] and, through the selection layers,
/// every manager variant.
pub struct ExtensionManagerBuilder {
    namespace: String,
    invoke: Option<InvokeArgs>,
    propagate_invocation_errors: bool,
    on_load_failure: Option<OnLoadFailure>,
    conflict: ConflictPolicy,
    // Selection-layer knobs.
    pub(crate) name_filter: Option<Vec<String>>,
    pub(crate) check: Option<CheckFn>,
    pub(crate) propagate_load_errors: bool,
}

impl ExtensionManagerBuilder {
    fn new(namespace: String) -> Self {
        Self {
            namespace,
            invoke: None,
            propagate_invocation_errors: false,
            on_load_failure: None,
            conflict: ConflictPolicy::LastWins,
            name_filter: None,
            check: None,
            propagate_load_errors: false,
        }
    }

    /// Instantiate each loadable at load time with the given arguments.
    pub fn invoke_on_load(mut self, args: InvokeArgs) -> Self {
        self.invoke = Some(args);
        self
    }

    /// Re-raise errors from caller-supplied map functions instead of
    /// logging and continuing.
    pub fn propagate_invocation_errors(mut self, propagate: bool) -> Self {
        self.propagate_invocation_errors = propagate;
        self
    }

    /// Called with `(namespace, record, error)` whenever a registration
    /// fails to resolve or instantiate; loading then continues.
    pub fn on_load_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &RegistrationRecord, &PluginError) + Send + Sync + 'static,
    {
        self.on_load_failure = Some(Box::new(callback));
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict = policy;
        self
    }

    /// Run the load pipeline.
    pub fn build(self, host: &PluginHost) -> Result<ExtensionManager> {
        let records = host.records(&self.namespace);
        let mut extensions = Vec::new();

        for record in records.iter() {
            if let Some(wanted) = &self.name_filter {
                // Cheap rejection: do not resolve code we will discard.
                if !wanted.iter().any(|name| name == &record.name) {
                    tracing::debug!("skipping {:?}, not a wanted name", record.name);
                    continue;
                }
            }
            match load_one(host, record, self.invoke.as_ref()) {
                Ok(extension) => {
                    if let Some(check) = &self.check {
                        if !check(&extension) {
                            tracing::debug!("ignoring extension {:?}", extension.name());
                            continue;
                        }
                    }
                    tracing::debug!("loaded extension {:?}", extension.name());
                    extensions.push(extension);
                }
                Err(err) if err.is_fatal() => return Err(Error::Plugin(err)),
                Err(err) => {
                    if let Some(callback) = &self.on_load_failure {
                        callback(&self.namespace, record, &err);
                    } else if self.propagate_load_errors {
                        return Err(Error::Plugin(err));
                    } else {
                        tracing::error!("Could not load {:?}: {}", record.name, err);
                    }
                }
            }
        }

        Ok(ExtensionManager {
            namespace: self.namespace,
            extensions,
            index: OnceCell::new(),
            conflict: self.conflict,
            propagate_invocation_errors: self.propagate_invocation_errors,
        })
    }
}

fn load_one(
    host: &PluginHost,
    record: &RegistrationRecord,
    invoke: Option<&InvokeArgs>,
) -> std::result::Result<Extension, PluginError> {
    let loadable = host.resolver().resolve(&record.locator)?;
    let instance = match invoke {
        Some(args) => Some(loadable.instantiate(&record.name, args)?),
        None => None,
    };
    Ok(Extension::new(record.clone(), loadable, instance))
}

/// Loads and exposes the extensions of one namespace.
///
/// The ordered collection is fixed at construction; `map`-family calls walk
/// it sequentially and never re-touch the registry. The name index is built
/// lazily on first name-keyed access and memoized, so conflict resolution
/// runs at most once per name.
pub struct ExtensionManager {
    namespace: String,
    extensions: Vec<Extension>,
    index: OnceCell<HashMap<String, usize>>,
    conflict: ConflictPolicy,
    propagate_invocation_errors: bool,
}

impl ExtensionManager {
    pub fn builder(namespace: impl Into<String>) -> ExtensionManagerBuilder {
        ExtensionManagerBuilder::new(namespace.into())
    }

    /// Construct a manager from pre-built extensions instead of loading
    /// them. Intended for tests of code that consumes managers.
    pub fn from_extensions(namespace: impl Into<String>, extensions: Vec<Extension>) -> Self {
        Self {
            namespace: namespace.into(),
            extensions,
            index: OnceCell::new(),
            conflict: ConflictPolicy::LastWins,
            propagate_invocation_errors: false,
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict = policy;
        self.index = OnceCell::new();
        self
    }

    pub fn with_propagate_invocation_errors(mut self, propagate: bool) -> Self {
        self.propagate_invocation_errors = propagate;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Names of the loaded extensions in collection order. Duplicates
    /// appear when several registrations share a name.
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(Extension::name).collect()
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extension> {
        self.extensions.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e.name() == name)
    }

    /// The conflict-resolved extension for a name.
    pub fn get(&self, name: &str) -> Result<&Extension> {
        self.name_index()?
            .get(name)
            .map(|&i| &self.extensions[i])
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    /// One `(name, extension)` pair per distinct name, conflict-resolved,
    /// ordered by the chosen extension's position in the collection.
    pub fn items(&self) -> Result<Vec<(&str, &Extension)>> {
        let index = self.name_index()?;
        let mut positions: Vec<usize> = index.values().copied().collect();
        positions.sort_unstable();
        Ok(positions
            .into_iter()
            .map(|i| {
                let extension = &self.extensions[i];
                (extension.name(), extension)
            })
            .collect())
    }

    /// Invoke `func` for every extension in collection order.
    ///
    /// Under the continue policy a failing call is logged and contributes
    /// nothing to the result; under the propagate policy the first failure
    /// aborts the remaining invocations. Fails with [`Error::NoMatches`]
    /// when the collection is empty.
    pub fn map<R, F>(&self, mut func: F) -> Result<Vec<R>>
    where
        F: FnMut(&Extension) -> std::result::Result<R, BoxError>,
    {
        if self.extensions.is_empty() {
            return Err(Error::NoMatches {
                namespace: self.namespace.clone(),
            });
        }
        let mut response = Vec::new();
        for extension in &self.extensions {
            self.invoke_one(&mut response, &mut func, extension)?;
        }
        Ok(response)
    }

    /// Invoke the named method on every extension's instance.
    pub fn map_method(&self, method: &str, args: &InvokeArgs) -> Result<Vec<Value>> {
        self.map(|extension| extension.invoke(method, args).map_err(Into::into))
    }

    pub(crate) fn invoke_one<R, F>(
        &self,
        response: &mut Vec<R>,
        func: &mut F,
        extension: &Extension,
    ) -> Result<()>
    where
        F: FnMut(&Extension) -> std::result::Result<R, BoxError>,
    {
        match func(extension) {
            Ok(value) => response.push(value),
            Err(err) => {
                let fatal = err
                    .downcast_ref::<PluginError>()
                    .is_some_and(PluginError::is_fatal);
                if self.propagate_invocation_errors || fatal {
                    return Err(Error::Invocation {
                        name: extension.name().to_string(),
                        source: err,
                    });
                }
                tracing::error!("error calling {:?}: {}", extension.name(), err);
            }
        }
        Ok(())
    }

    pub(crate) fn name_index(&self) -> Result<&HashMap<String, usize>> {
        self.index.get_or_try_init(|| self.build_index())
    }

    fn build_index(&self) -> Result<HashMap<String, usize>> {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, extension) in self.extensions.iter().enumerate() {
            by_name.entry(extension.name().to_string()).or_default().push(i);
        }

        let mut index = HashMap::with_capacity(by_name.len());
        for (name, group) in by_name {
            let chosen = if group.len() == 1 {
                group[0]
            } else {
                self.resolve_conflict(&name, &group)?
            };
            index.insert(name, chosen);
        }
        Ok(index)
    }

    fn resolve_conflict(&self, name: &str, group: &[usize]) -> Result<usize> {
        let members: Vec<&Extension> = group.iter().map(|&i| &self.extensions[i]).collect();
        let sources = members
            .iter()
            .map(|e| e.record().locator.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        match &self.conflict {
            ConflictPolicy::LastWins => {
                tracing::warn!(
                    "Multiple {:?} extensions named {:?} ({}); using the last",
                    self.namespace,
                    name,
                    sources
                );
                Ok(group[group.len() - 1])
            }
            ConflictPolicy::Reject => Err(Error::MultipleMatches {
                namespace: self.namespace.clone(),
                name: name.to_string(),
                sources,
            }),
            ConflictPolicy::Custom(resolver) => {
                let pick = resolver(&self.namespace, name, &members)?;
                group.get(pick).copied().ok_or_else(|| Error::MultipleMatches {
                    namespace: self.namespace.clone(),
                    name: name.to_string(),
                    sources,
                })
            }
        }
    }

    /// Rebuild the collection in the given index order, dropping anything
    /// not mentioned. Used by name-ordered selection.
    pub(crate) fn reordered(self, order: Vec<usize>) -> Self {
        let mut slots: Vec<Option<Extension>> = self.extensions.into_iter().map(Some).collect();
        let extensions = order
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect();
        Self {
            namespace: self.namespace,
            extensions,
            index: OnceCell::new(),
            conflict: self.conflict,
            propagate_invocation_errors: self.propagate_invocation_errors,
        }
    }
}

impl<'a> IntoIterator for &'a ExtensionManager {
    type Item = &'a Extension;
    type IntoIter = std::slice::Iter<'a, Extension>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionManager")
            .field("namespace", &self.namespace)
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{InvokeArgs, Loadable, Plugin};

    struct Tag(&'static str);

    impl Plugin for Tag {
        fn invoke(&self, method: &str, _args: &InvokeArgs) -> std::result::Result<Value, PluginError> {
            match method {
                "tag" => Ok(Value::String(self.0.to_string())),
                other => Err(PluginError::MethodNotFound(other.to_string())),
            }
        }
    }

    fn extension(name: &str, locator: &str, tag: &'static str) -> Extension {
        Extension::new(
            RegistrationRecord::new(name, locator, "crew"),
            Loadable::from_fn(move |_, _| Ok(Box::new(Tag(tag)))),
            Some(Box::new(Tag(tag))),
        )
    }

    fn crew_manager() -> ExtensionManager {
        ExtensionManager::from_extensions(
            "crew",
            vec![
                extension("captain", "pkg_a:Captain", "a"),
                extension("captain", "pkg_b:Captain", "b"),
                extension("cook", "pkg_a:Cook", "c"),
            ],
        )
    }

    #[test]
    fn test_names_keep_duplicates_in_order() {
        let manager = crew_manager();
        assert_eq!(manager.names(), ["captain", "captain", "cook"]);
    }

    #[test]
    fn test_last_wins_index_and_idempotence() {
        let manager = crew_manager();
        let first = manager.get("captain").unwrap() as *const Extension;
        let second = manager.get("captain").unwrap() as *const Extension;
        assert_eq!(first, second);
        assert_eq!(
            manager.get("captain").unwrap().record().locator,
            "pkg_b:Captain"
        );
    }

    #[test]
    fn test_reject_policy_escalates() {
        let manager = crew_manager().with_conflict_policy(ConflictPolicy::Reject);
        assert!(matches!(
            manager.get("captain"),
            Err(Error::MultipleMatches { .. })
        ));
        // The index is built as a whole, so the conflict blocks every
        // name-keyed lookup in the namespace.
        assert!(manager.get("cook").is_err());
    }

    #[test]
    fn test_custom_policy_picks_by_index() {
        let manager = crew_manager().with_conflict_policy(ConflictPolicy::Custom(Box::new(
            |_, _, group| {
                assert_eq!(group.len(), 2);
                Ok(0)
            },
        )));
        assert_eq!(
            manager.get("captain").unwrap().record().locator,
            "pkg_a:Captain"
        );
    }

    #[test]
    fn test_items_one_entry_per_name() {
        let manager = crew_manager();
        let items = manager.items().unwrap();
        let names: Vec<_> = items.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["captain", "cook"]);
    }

    #[test]
    fn test_map_visits_all_in_order() {
        let manager = crew_manager();
        let tags = manager
            .map_method("tag", &InvokeArgs::new())
            .unwrap();
        assert_eq!(tags, ["a", "b", "c"].map(|t| Value::String(t.into())));
    }

    #[test]
    fn test_map_on_empty_is_no_matches() {
        let manager = ExtensionManager::from_extensions("crew", vec![]);
        assert!(matches!(
            manager.map(|_| Ok(())),
            Err(Error::NoMatches { .. })
        ));
    }

    #[test]
    fn test_continue_policy_swallows_everything() {
        let manager = crew_manager();
        let result = manager
            .map(|_| -> std::result::Result<(), BoxError> { Err("boom".into()) })
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_propagate_policy_aborts_on_first_error() {
        let manager = crew_manager().with_propagate_invocation_errors(true);
        let mut calls = 0;
        let err = manager
            .map(|_| -> std::result::Result<(), BoxError> {
                calls += 1;
                Err("boom".into())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Invocation { .. }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_fatal_invocation_error_propagates_under_continue_policy() {
        let manager = crew_manager();
        let err = manager
            .map(|_| -> std::result::Result<(), BoxError> {
                Err(Box::new(PluginError::Aborted("interrupt".into())))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Invocation { .. }));
    }

    #[test]
    fn test_unknown_name_lookup() {
        let manager = crew_manager();
        assert!(matches!(
            manager.get("navigator"),
            Err(Error::UnknownName(_))
        ));
        assert!(!manager.contains("navigator"));
        assert!(manager.contains("cook"));
    }
}
