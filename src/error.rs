use thiserror::Error;

use crate::cache::CacheError;
use crate::template::TemplateError;

/// Errors surfaced by task functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Anything that can go wrong while registering or building targets.
#[derive(Error, Debug)]
pub enum Error {
    /// The name resolves to neither an alias, a known target, nor any
    /// generator.
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// After rebuilding, an input's cache entry was still absent.
    #[error("couldn't create dependency '{input}' of target '{target}'")]
    MissingDependency { target: String, input: String },

    /// The freshness check passed but the final load came up empty.
    #[error("failed to create target '{0}'")]
    BuildFailed(String),

    /// A task function failed; the underlying error is attached.
    #[error("task for target '{target}' failed")]
    Task {
        target: String,
        #[source]
        source: BoxError,
    },

    /// An alias chain or the dependency graph loops through this name.
    #[error("dependency cycle detected at '{0}'")]
    CycleDetected(String),

    /// Persistent-store or codec failure during a required write. Read
    /// failures never surface here; they degrade to cache misses.
    #[error("cache failure")]
    Cache(#[from] CacheError),

    /// A template could not be compiled, or referenced groups its output
    /// pattern does not define.
    #[error("template failure")]
    Template(#[from] TemplateError),

    /// A parameter value could not be serialized into the target's key.
    #[error("cannot encode parameters for target '{target}': {detail}")]
    ParamEncoding { target: String, detail: String },

    /// `ephemeral` and `volatile` together would cache the value nowhere.
    #[error("flags 'ephemeral' and 'volatile' cannot be combined for target '{0}'")]
    InvalidFlags(String),
}
