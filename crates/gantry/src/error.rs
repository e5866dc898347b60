//! Crate-level error taxonomy.

use thiserror::Error;

use crate::plugin::PluginError;

/// Boxed error type accepted from caller-supplied map functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by managers and name-keyed lookups.
///
/// Per-registration load failures are not represented here: they are
/// isolated during construction and reported through the load-failure
/// callback or the log. Only fatal plugin errors escalate as
/// [`Error::Plugin`].
#[derive(Debug, Error)]
pub enum Error {
    /// The manager holds no extensions, or a driver name matched nothing.
    #[error("No {namespace:?} extensions found")]
    NoMatches { namespace: String },

    /// More than one extension stands for a name that must be unambiguous.
    #[error("Multiple {namespace:?} extensions found for {name:?}: {sources}")]
    MultipleMatches {
        namespace: String,
        name: String,
        sources: String,
    },

    /// Name-keyed lookup for a name no loaded extension carries.
    #[error("No extension named {0:?}")]
    UnknownName(String),

    /// A caller-supplied function failed under the propagate policy.
    #[error("Error calling extension {name:?}: {source}")]
    Invocation {
        name: String,
        #[source]
        source: BoxError,
    },

    /// A fatal capability error that is never isolated.
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

pub type Result<T> = std::result::Result<T, Error>;
