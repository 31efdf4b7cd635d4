//! Target storage and name resolution.
//!
//! Three registries answer a lookup, in priority order: aliases (walked to
//! their end), concrete targets, then generators in registration order.
//! Generators that match but fail to produce a descriptor are skipped so the
//! search can continue; the report APIs surface those failures for
//! debugging.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use log::trace;
use regex::{Captures, Regex};

use crate::cache::Flags;
use crate::error::{BoxError, Error};
use crate::value::{Params, Value};

/// A task body. Receives the resolved input values in declaration order and
/// the parameter bindings the task declared (unbound names absent).
pub type TaskFn = Arc<dyn Fn(&[Value], &Params) -> Result<Value, BoxError> + Send + Sync>;

/// Everything the engine needs to know to build one target.
#[derive(Clone)]
pub struct TaskSpec {
    inputs: Vec<String>,
    params: Vec<String>,
    func: TaskFn,
    flags: Flags,
}

impl TaskSpec {
    pub(crate) fn new(
        inputs: Vec<String>,
        params: Vec<String>,
        func: TaskFn,
        flags: Flags,
    ) -> TaskSpec {
        TaskSpec {
            inputs,
            params,
            func,
            flags,
        }
    }

    /// Upstream target names, in declaration order.
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Parameter names this target reads directly.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub(crate) fn call(&self, inputs: &[Value], params: &Params) -> Result<Value, BoxError> {
        (self.func)(inputs, params)
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("inputs", &self.inputs)
            .field("params", &self.params)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

pub(crate) type FactoryFn = Arc<dyn Fn(&Captures<'_>) -> Result<TaskSpec, Error> + Send + Sync>;

/// A pattern plus a factory that instantiates a descriptor from a match.
pub(crate) struct Generator {
    pub(crate) pattern: Regex,
    pub(crate) factory: FactoryFn,
}

pub(crate) struct Registry {
    aliases: HashMap<String, String>,
    targets: HashMap<String, TaskSpec>,
    generators: Vec<Generator>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            aliases: HashMap::new(),
            targets: HashMap::new(),
            generators: Vec::new(),
        }
    }

    pub(crate) fn add_alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_owned(), target.to_owned());
    }

    pub(crate) fn add_target(&mut self, name: &str, spec: TaskSpec) {
        self.targets.insert(name.to_owned(), spec);
    }

    pub(crate) fn add_generator(&mut self, generator: Generator) {
        self.generators.push(generator);
    }

    /// Follow the alias chain from `name` to its end. Revisiting a name
    /// means the chain loops.
    fn unalias(&self, name: &str) -> Result<String, Error> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut cur = name;
        while let Some(next) = self.aliases.get(cur) {
            if !seen.insert(cur) {
                return Err(Error::CycleDetected(cur.to_owned()));
            }
            cur = next;
        }
        Ok(cur.to_owned())
    }

    /// Resolve `name` to a task descriptor, instantiating a generated
    /// target when no concrete one exists.
    pub(crate) fn resolve(&self, name: &str) -> Result<TaskSpec, Error> {
        let name = self.unalias(name)?;
        if let Some(spec) = self.targets.get(&name) {
            return Ok(spec.clone());
        }
        for generator in &self.generators {
            if let Some(caps) = generator.pattern.captures(&name) {
                match (generator.factory)(&caps) {
                    Ok(spec) => return Ok(spec),
                    Err(e) => {
                        trace!(
                            "generator '{}' declined '{}': {}",
                            generator.pattern.as_str(),
                            name,
                            e
                        );
                    }
                }
            }
        }
        Err(Error::UnknownTarget(name))
    }

    /// A human-readable trace of how `target` resolves (or fails to),
    /// including generator failures that [`resolve`](Self::resolve)
    /// swallows.
    pub(crate) fn resolution_report(&self, target: &str) -> String {
        let mut report = String::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut cur = target;
        while let Some(next) = self.aliases.get(cur) {
            if !seen.insert(cur) {
                let _ = writeln!(report, "alias chain loops back to '{cur}'");
                return report;
            }
            let _ = writeln!(report, "alias '{cur}' -> '{next}'");
            cur = next;
        }

        if self.targets.contains_key(cur) {
            let _ = writeln!(report, "found known target '{cur}'");
            return report;
        }

        let _ = writeln!(report, "unknown target '{cur}'; searching rule templates");
        for generator in &self.generators {
            let pattern = generator.pattern.as_str();
            if let Some(caps) = generator.pattern.captures(cur) {
                let _ = writeln!(report, "matched expression '{pattern}'");
                match (generator.factory)(&caps) {
                    Ok(spec) => {
                        let deps = spec
                            .inputs()
                            .iter()
                            .map(|d| format!("'{d}'"))
                            .collect::<Vec<_>>()
                            .join(",\n  ");
                        let _ = writeln!(report, "generated rule with dependencies:\n  {deps}");
                        return report;
                    }
                    Err(e) => {
                        let _ = writeln!(report, "rule generation failed for '{pattern}': {e}");
                    }
                }
            } else {
                let _ = writeln!(report, "didn't match expression '{pattern}'");
            }
        }
        let _ = writeln!(report, "no matching rules for '{cur}'");
        report
    }

    /// A recursive listing of `target`'s dependencies, annotating circular
    /// and unresolvable entries instead of failing on them.
    pub(crate) fn dependency_report(&self, target: &str) -> String {
        self.dependency_report_inner(target, &mut Vec::new())
    }

    fn dependency_report_inner(&self, target: &str, above: &mut Vec<String>) -> String {
        let mut report = String::new();
        above.push(target.to_owned());
        match self.resolve(target) {
            Ok(spec) if spec.inputs().is_empty() => {
                let _ = writeln!(report, "'{target}'");
            }
            Ok(spec) => {
                let _ = writeln!(report, "'{target}' depends on:");
                for dep in spec.inputs() {
                    if above.contains(dep) {
                        let _ = writeln!(report, "  '{dep}', which is a circular dependency!");
                    } else {
                        report.push_str(&indent(&self.dependency_report_inner(dep, above)));
                    }
                }
            }
            Err(_) => {
                let _ = writeln!(report, "'{target}' (could not be resolved)");
            }
        }
        above.pop();
        report
    }
}

fn indent(report: &str) -> String {
    report.lines().fold(String::new(), |mut out, line| {
        let _ = writeln!(out, "  {line}");
        out
    })
}
