//! The build engine: registration, freshness checking, and creation.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, trace};

use crate::cache::{CacheError, CacheManager, Flags};
use crate::codec::ValueCodec;
use crate::error::{BoxError, Error};
use crate::key::{self, CacheKey};
use crate::registry::{FactoryFn, Generator, Registry, TaskSpec};
use crate::stores::DiskStoreBuilder;
use crate::template::{self, TemplateMatch};
use crate::value::{Params, Value};
use crate::{PersistentStore, Timestamp};

/// Configures and opens an [`Engine`].
pub struct EngineBuilder {
    path: PathBuf,
    store: Option<Box<dyn PersistentStore + Send + Sync>>,
    sync_on_write: bool,
    max_template_slots: usize,
}

impl EngineBuilder {
    fn new() -> EngineBuilder {
        EngineBuilder {
            path: PathBuf::from(".quiche"),
            store: None,
            sync_on_write: false,
            max_template_slots: template::DEFAULT_MAX_SLOTS,
        }
    }

    /// Location of the persistent store (default: `.quiche` under the
    /// current directory). Ignored when an explicit store is supplied.
    #[must_use]
    pub fn cache_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    /// Use a custom persistent store instead of the default disk store.
    #[must_use]
    pub fn store(mut self, store: Box<dyn PersistentStore + Send + Sync>) -> Self {
        self.store = Some(store);
        self
    }

    /// Flush the default disk store after every write.
    #[must_use]
    pub fn sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Ceiling on placeholder slots per output template (default 16).
    #[must_use]
    pub fn max_template_slots(mut self, limit: usize) -> Self {
        self.max_template_slots = limit;
        self
    }

    pub fn build(self) -> Result<Engine, Error> {
        let store = match self.store {
            Some(store) => store,
            None => Box::new(
                DiskStoreBuilder::open(&self.path)
                    .sync_on_write(self.sync_on_write)
                    .build()
                    .map_err(CacheError::from)?,
            ),
        };
        Ok(Engine {
            registry: Registry::new(),
            cache: CacheManager::new(store),
            max_template_slots: self.max_template_slots,
        })
    }
}

/// A make-like build engine.
///
/// Owns the target registries, the two-tier cache, and the persistent store
/// handle. Targets are registered up front; [`create`](Engine::create)
/// resolves a name on demand, rebuilds whatever is stale, and returns the
/// cached `(timestamp, value)` pair.
pub struct Engine {
    registry: Registry,
    cache: CacheManager,
    max_template_slots: usize,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Open an engine over the default `.quiche` store.
    pub fn open() -> Result<Engine, Error> {
        EngineBuilder::new().build()
    }

    fn check_flags(target: &str, flags: Flags) -> Result<(), Error> {
        if flags.unstorable() {
            return Err(Error::InvalidFlags(target.to_owned()));
        }
        Ok(())
    }

    fn owned(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    // ---- registration ------------------------------------------------

    /// Register a task producing `output` from `inputs` and the named
    /// `params`.
    pub fn task<F>(
        &mut self,
        inputs: &[&str],
        params: &[&str],
        output: &str,
        flags: Flags,
        func: F,
    ) -> Result<(), Error>
    where
        F: Fn(&[Value], &Params) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::check_flags(output, flags)?;
        self.registry.add_target(
            output,
            TaskSpec::new(Self::owned(inputs), Self::owned(params), Arc::new(func), flags),
        );
        Ok(())
    }

    /// Register a target that simply returns `value`.
    ///
    /// The value is (re-)cached immediately, so anything previously stored
    /// under the same target is overwritten.
    pub fn add_object(&mut self, target: &str, value: Value, flags: Flags) -> Result<(), Error> {
        Self::check_flags(target, flags)?;
        let full = key::mix(target, &[], &Params::new())?;
        self.cache.store(&full, value.clone(), flags)?;
        let stored = value;
        self.registry.add_target(
            target,
            TaskSpec::new(
                Vec::new(),
                Vec::new(),
                Arc::new(move |_, _| Ok(stored.clone())),
                flags,
            ),
        );
        Ok(())
    }

    /// Register a target that gathers its input values into a sequence, in
    /// declaration order.
    pub fn add_gather(&mut self, inputs: &[&str], output: &str, flags: Flags) -> Result<(), Error> {
        Self::check_flags(output, flags)?;
        self.registry.add_target(
            output,
            TaskSpec::new(
                Self::owned(inputs),
                Vec::new(),
                Arc::new(|inputs, _| Ok(Value::Seq(inputs.to_vec()))),
                flags,
            ),
        );
        Ok(())
    }

    /// Register an alias redirecting one target name to another.
    ///
    /// Aliases take priority over concrete targets, so a shadowed target
    /// becomes unreachable under its own name.
    pub fn add_alias(&mut self, alias: &str, target: &str) {
        self.registry.add_alias(alias, target);
    }

    /// Register an additional value codec; the alternates are consulted in
    /// registration order.
    pub fn register_codec(&mut self, codec: Box<dyn ValueCodec + Send + Sync>) {
        self.cache.register_codec(codec);
    }

    /// Register a template generator. `output` may contain `{}` and
    /// `{name}` placeholders; when a requested name matches, the named
    /// groups are substituted into `inputs` and `params`, and the task
    /// function receives the match as its first argument.
    pub fn template_task<F>(
        &mut self,
        inputs: &[&str],
        params: &[&str],
        output: &str,
        flags: Flags,
        func: F,
    ) -> Result<(), Error>
    where
        F: Fn(&TemplateMatch, &[Value], &Params) -> Result<Value, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self::check_flags(output, flags)?;
        let compiled = template::compile_output(output, self.max_template_slots)?;
        let inputs = Self::owned(inputs);
        let params = Self::owned(params);
        let named = compiled.named;
        let func = Arc::new(func);

        let factory: FactoryFn = Arc::new(move |caps| {
            let m = TemplateMatch::from_captures(caps, &named);
            let inputs = inputs
                .iter()
                .map(|t| template::format_with_groups(t, m.groups()))
                .collect::<Result<Vec<_>, _>>()?;
            let params = params
                .iter()
                .map(|t| template::format_with_groups(t, m.groups()))
                .collect::<Result<Vec<_>, _>>()?;
            let inner = Arc::clone(&func);
            let wrapped: Arc<dyn Fn(&[Value], &Params) -> Result<Value, BoxError> + Send + Sync> =
                Arc::new(move |ivalues, pvalues| inner(&m, ivalues, pvalues));
            Ok(TaskSpec::new(inputs, params, wrapped, flags))
        });
        self.registry.add_generator(Generator {
            pattern: compiled.regex,
            factory,
        });
        Ok(())
    }

    /// Register an iteration generator. `output` may use `{iter}` and
    /// `{next}`, which match decimal indices and derive each other when
    /// only one appears; the step before index 0 is the literal `start`.
    /// The task function receives the resolved `next` index first.
    pub fn iter_task<F>(
        &mut self,
        inputs: &[&str],
        params: &[&str],
        output: &str,
        flags: Flags,
        func: F,
    ) -> Result<(), Error>
    where
        F: Fn(u64, &[Value], &Params) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::check_flags(output, flags)?;
        let compiled = template::compile_iter_output(output)?;
        let inputs = Self::owned(inputs);
        let params = Self::owned(params);
        let func = Arc::new(func);

        let factory: FactoryFn = Arc::new(move |caps| {
            let capture = |name: &str| -> Result<Option<u64>, Error> {
                caps.name(name)
                    .map(|m| {
                        m.as_str()
                            .parse::<u64>()
                            .map_err(|_| template::TemplateError::IterRange(m.as_str().to_owned()))
                    })
                    .transpose()
                    .map_err(Error::from)
            };
            let (iter, next) = template::derive_iter(capture("iter")?, capture("next")?);
            let inputs = inputs
                .iter()
                .map(|t| template::format_iter(t, iter, next))
                .collect::<Result<Vec<_>, _>>()?;
            let params = params
                .iter()
                .map(|t| template::format_iter(t, iter, next))
                .collect::<Result<Vec<_>, _>>()?;
            let inner = Arc::clone(&func);
            let wrapped: Arc<dyn Fn(&[Value], &Params) -> Result<Value, BoxError> + Send + Sync> =
                Arc::new(move |ivalues, pvalues| inner(next, ivalues, pvalues));
            Ok(TaskSpec::new(inputs, params, wrapped, flags))
        });
        self.registry.add_generator(Generator {
            pattern: compiled.regex,
            factory,
        });
        Ok(())
    }

    // ---- resolution --------------------------------------------------

    /// Resolve `target` to its task descriptor, instantiating generated
    /// targets as needed.
    pub fn find_target(&self, target: &str) -> Result<TaskSpec, Error> {
        self.registry.resolve(target)
    }

    /// A trace of how `target` resolves, including generator failures.
    /// Useful when a target mysteriously comes up unknown.
    #[must_use]
    pub fn resolution_report(&self, target: &str) -> String {
        self.registry.resolution_report(target)
    }

    /// A recursive listing of `target`'s dependencies, with circular and
    /// unresolvable entries annotated.
    #[must_use]
    pub fn dependency_report(&self, target: &str) -> String {
        self.registry.dependency_report(target)
    }

    /// The sorted, deduplicated names of every parameter that affects
    /// `target`, directly or through any transitive input.
    pub fn relevant_params(&self, target: &str) -> Result<Vec<String>, Error> {
        self.relevant_inner(target, &mut Vec::new())
    }

    fn relevant_inner(&self, target: &str, path: &mut Vec<String>) -> Result<Vec<String>, Error> {
        if path.iter().any(|t| t == target) {
            return Err(Error::CycleDetected(target.to_owned()));
        }
        path.push(target.to_owned());
        let spec = self.registry.resolve(target)?;
        let mut relevant: Vec<String> = spec.params().to_vec();
        for input in spec.inputs() {
            for param in self.relevant_inner(input, path)? {
                if !relevant.contains(&param) {
                    relevant.push(param);
                }
            }
        }
        relevant.sort();
        path.pop();
        Ok(relevant)
    }

    fn full_key(&self, target: &str, params: &Params) -> Result<CacheKey, Error> {
        let relevant = self.relevant_params(target)?;
        key::mix(target, &relevant, params)
    }

    // ---- building ----------------------------------------------------

    /// Check that `target` and all of its prerequisites are up to date,
    /// rebuilding whatever is missing or stale, and return the timestamp
    /// `target`'s cache entry carries afterwards.
    fn check_up_to_date(
        &self,
        target: &str,
        params: &Params,
        knockout: &[&str],
        path: &mut Vec<String>,
    ) -> Result<Timestamp, Error> {
        if path.iter().any(|t| t == target) {
            return Err(Error::CycleDetected(target.to_owned()));
        }
        path.push(target.to_owned());
        let result = self.check_inner(target, params, knockout, path);
        path.pop();
        result
    }

    fn check_inner(
        &self,
        target: &str,
        params: &Params,
        knockout: &[&str],
        path: &mut Vec<String>,
    ) -> Result<Timestamp, Error> {
        let spec = self.registry.resolve(target)?;

        let mut times = Vec::with_capacity(spec.inputs().len());
        for input in spec.inputs() {
            times.push(self.check_up_to_date(input, params, knockout, path)?);
        }

        let full = self.full_key(target, params)?;
        let myts = if knockout.contains(&target) {
            debug!("'{target}' knocked out; forcing rebuild");
            None
        } else {
            self.cache.mtime(&full)
        };

        // An input stamped in the same instant as its consumer does not
        // count as newer; the comparator is strictly greater-than.
        if let Some(ts) = myts {
            if !times.iter().any(|t| *t > ts) {
                trace!("'{target}' is up to date");
                return Ok(ts);
            }
        }

        debug!("rebuilding '{target}'");
        let mut ivalues = Vec::with_capacity(spec.inputs().len());
        for input in spec.inputs() {
            let ikey = self.full_key(input, params)?;
            let (_, value) = self
                .cache
                .load(&ikey)
                .ok_or_else(|| Error::MissingDependency {
                    target: target.to_owned(),
                    input: input.clone(),
                })?;
            ivalues.push(value);
        }
        let pvalues: Params = spec
            .params()
            .iter()
            .filter_map(|pn| params.get(pn).map(|v| (pn.clone(), v.clone())))
            .collect();

        let value = spec.call(&ivalues, &pvalues).map_err(|source| Error::Task {
            target: target.to_owned(),
            source,
        })?;
        Ok(self.cache.store(&full, value, spec.flags())?)
    }

    /// Create `target`, rebuilding stale prerequisites as needed. Returns
    /// the `(timestamp, value)` pair the result was cached with.
    pub fn create(&self, target: &str, params: &Params) -> Result<(Timestamp, Value), Error> {
        self.create_with(target, params, &[])
    }

    /// Like [`create`](Engine::create), but names in `knockout` are treated
    /// as stale regardless of their timestamps.
    pub fn create_with(
        &self,
        target: &str,
        params: &Params,
        knockout: &[&str],
    ) -> Result<(Timestamp, Value), Error> {
        self.check_up_to_date(target, params, knockout, &mut Vec::new())?;
        let full = self.full_key(target, params)?;
        self.cache
            .load(&full)
            .ok_or_else(|| Error::BuildFailed(target.to_owned()))
    }

    /// Return whatever is cached for `target` without any freshness check,
    /// falling back to a full [`create`](Engine::create) on a miss. The
    /// result may be out of date.
    pub fn create_brave(&self, target: &str, params: &Params) -> Result<(Timestamp, Value), Error> {
        self.create_brave_with(target, params, &[])
    }

    /// [`create_brave`](Engine::create_brave) with a knockout set for the
    /// fallback path.
    pub fn create_brave_with(
        &self,
        target: &str,
        params: &Params,
        knockout: &[&str],
    ) -> Result<(Timestamp, Value), Error> {
        let full = self.full_key(target, params)?;
        if let Some(hit) = self.cache.load(&full) {
            return Ok(hit);
        }
        self.create_with(target, params, knockout)
    }
}
