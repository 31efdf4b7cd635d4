/*!
> Make-like build engine that memoizes task results in memory and on disk

Quiche lets you register named *targets* (tasks that declare which other
targets they consume and which named parameters they read) and then ask for
any target by name. The engine resolves the name, checks cached timestamps
recursively, re-runs only the tasks whose inputs or parameters went stale,
and hands back a `(timestamp, value)` pair. Results are cached twice: in a
process-local table and in a durable [sled] store, keyed by the target name
plus the bindings of every parameter that (transitively) affects it. The
same target built with different parameters therefore caches separately,
and a rebuilt process picks up where the last one left off.

```rust,no_run
use quiche::{Engine, Flags, Value, params};

fn main() -> Result<(), quiche::Error> {
    let mut engine = Engine::builder().cache_path(".quiche").build()?;

    engine.task(&[], &["value"], "base", Flags::NONE, |_, params| {
        Ok(params.get("value").cloned().unwrap_or(Value::Int(1)))
    })?;

    engine.task(&["base"], &["times"], "product", Flags::NONE, |inputs, params| {
        let base = inputs[0].as_int().unwrap_or(1);
        let times = params.get("times").and_then(Value::as_int).unwrap_or(1);
        Ok(Value::Int(base * times))
    })?;

    let (_ts, p1) = engine.create("product", &params! {"value" => 3, "times" => 5})?;
    let (_ts, p2) = engine.create("product", &params! {"value" => 5, "times" => 6})?;
    assert_eq!(p1, Value::Int(15));
    assert_eq!(p2, Value::Int(30));
    Ok(())
}
```

Beyond plain tasks there are aliases ([`Engine::add_alias`]), constant
objects ([`Engine::add_object`]), gathering targets ([`Engine::add_gather`]),
and two kinds of generated targets: template tasks, which synthesize a
concrete target whenever a requested name matches a pattern like
`"score:{model}"`, and iteration tasks, which chain targets like `"step_3"`
onto `"step_2"` down to a `"step_start"` base case.

Caching behavior is tuned per target with [`Flags`]: `ephemeral` results
stay out of the disk store, `volatile` results stay out of memory. A
*knockout* set passed to [`Engine::create_with`] forces named targets to
rebuild regardless of timestamps, and [`Engine::create_brave`] takes
whatever is cached without checking freshness at all.

Values cross the cache boundary through a codec registry: MessagePack for
ordinary [`Value`]s, a raw-blob codec for [`Value::Opaque`] payloads, and
[`Engine::register_codec`] for anything else.

The engine is single-threaded by design: registration happens up front with
`&mut`, and builds run on the caller's thread. Tasks complete before their
dependents run, in post-order of the dependency graph.

[sled]: https://docs.rs/sled
*/

#![cfg_attr(docsrs, feature(doc_cfg))]

mod cache;
pub mod codec;
mod engine;
mod error;
mod key;
mod registry;
pub mod stores;
mod template;
mod value;

pub use cache::{CacheError, Flags};
pub use codec::{CodecError, ValueCodec};
pub use engine::{Engine, EngineBuilder};
pub use error::{BoxError, Error};
pub use key::CacheKey;
pub use registry::{TaskFn, TaskSpec};
pub use stores::{DiskStore, DiskStoreBuilder, MemoryStore, StoreError, slug_filename};
pub use template::{TemplateError, TemplateMatch};
pub use value::{Params, Value};

/// Seconds since the Unix epoch, as cache entries are stamped.
pub type Timestamp = f64;

/// Which key namespace a codec's payloads are stored under.
///
/// Ordinary values live under `obj:`; externally-serialized blobs live
/// under `model:`. Lookups try the namespaces in [`Namespace::ALL`] order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Namespace {
    Obj,
    Model,
}

impl Namespace {
    /// Lookup order: `obj:` first, then `model:`.
    pub const ALL: [Namespace; 2] = [Namespace::Obj, Namespace::Model];

    #[must_use]
    pub fn prefix(self) -> &'static [u8] {
        match self {
            Namespace::Obj => b"obj:",
            Namespace::Model => b"model:",
        }
    }
}

/// A durable mapping from full target keys to `(timestamp, bytes)` entries.
///
/// The engine only requires these three operations; [`stores::DiskStore`]
/// is the stock implementation. `put` must be atomic per key with
/// last-writer-wins semantics.
pub trait PersistentStore {
    fn put(
        &self,
        key: &CacheKey,
        namespace: Namespace,
        ts: Timestamp,
        bytes: &[u8],
    ) -> Result<(), StoreError>;

    fn get(&self, key: &CacheKey) -> Result<Option<(Timestamp, Vec<u8>)>, StoreError>;

    fn mtime(&self, key: &CacheKey) -> Result<Option<Timestamp>, StoreError>;
}

/// Build a [`Params`] map from `name => value` pairs; values go through
/// [`Value::from`].
///
/// ```
/// use quiche::{Value, params};
///
/// let p = params! {"value" => 3, "label" => "alpha"};
/// assert_eq!(p.get("value"), Some(&Value::Int(3)));
/// assert_eq!(p.get("label"), Some(&Value::Str("alpha".into())));
/// ```
#[macro_export]
macro_rules! params {
    () => { $crate::Params::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Params::new();
        $( map.insert(($name).to_string(), $crate::Value::from($value)); )+
        map
    }};
}
