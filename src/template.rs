//! Template compilation for generated targets.
//!
//! An output template like `"score:{model}"` becomes an anchored regular
//! expression; the named groups a request matches are substituted back into
//! the input and parameter templates to produce a concrete task descriptor.
//! Iteration templates use the reserved `{iter}`/`{next}` placeholders,
//! which match decimal integers and derive each other when only one side
//! appears in a name.

use std::collections::BTreeMap;
use std::fmt;

use regex::{Captures, Regex};
use thiserror::Error;

/// Default ceiling on the slot count of one output template. A safety
/// check against runaway patterns; configurable on the engine builder.
pub(crate) const DEFAULT_MAX_SLOTS: usize = 16;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unbalanced brace in template '{0}'")]
    Unbalanced(String),
    #[error("invalid placeholder name '{name}' in template '{template}'")]
    BadName { template: String, name: String },
    #[error("too many slots in template '{template}' ({count} > {limit})")]
    TooManySlots {
        template: String,
        count: usize,
        limit: usize,
    },
    #[error("template '{template}' may not use unnamed groups here")]
    PositionalNotAllowed { template: String },
    #[error("template '{template}' refers to undefined group '{name}'")]
    UndefinedGroup { template: String, name: String },
    #[error("iteration index '{0}' is out of range")]
    IterRange(String),
    #[error("template '{template}' compiled to an invalid pattern")]
    Pattern {
        template: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Positional,
    Named(String),
}

/// Split a template into literal runs and placeholder slots. `{{` and `}}`
/// are literal braces.
fn parse(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(TemplateError::Unbalanced(template.to_owned())),
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => {
                            return Err(TemplateError::Unbalanced(template.to_owned()));
                        }
                        Some(c) => name.push(c),
                    }
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                if name.is_empty() {
                    segments.push(Segment::Positional);
                } else {
                    if !valid_group_name(&name) {
                        return Err(TemplateError::BadName {
                            template: template.to_owned(),
                            name,
                        });
                    }
                    segments.push(Segment::Named(name));
                }
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn valid_group_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// An output template compiled to an anchored pattern.
pub(crate) struct CompiledTemplate {
    pub(crate) regex: Regex,
    /// Distinct named slots in first-appearance order.
    pub(crate) named: Vec<String>,
}

/// Compile a plain output template: `{}` slots match `(.+)`, `{name}` slots
/// match `(?P<name>.+)`; repeats of a name capture on first appearance only.
pub(crate) fn compile_output(
    template: &str,
    max_slots: usize,
) -> Result<CompiledTemplate, TemplateError> {
    let segments = parse(template)?;

    let mut positional = 0_usize;
    let mut named: Vec<String> = Vec::new();
    let mut pattern = String::from("^");
    for seg in &segments {
        match seg {
            Segment::Literal(lit) => pattern.push_str(&regex::escape(lit)),
            Segment::Positional => {
                positional += 1;
                pattern.push_str("(.+)");
            }
            Segment::Named(name) => {
                if named.iter().any(|n| n == name) {
                    pattern.push_str("(.+)");
                } else {
                    named.push(name.clone());
                    pattern.push_str(&format!("(?P<{name}>.+)"));
                }
            }
        }
    }
    pattern.push('$');

    let count = positional + named.len();
    if count > max_slots {
        return Err(TemplateError::TooManySlots {
            template: template.to_owned(),
            count,
            limit: max_slots,
        });
    }

    let regex = Regex::new(&pattern).map_err(|source| TemplateError::Pattern {
        template: template.to_owned(),
        source,
    })?;
    Ok(CompiledTemplate { regex, named })
}

/// Compile an iteration output template: only the `{iter}` and `{next}`
/// placeholders are allowed, each matching a decimal integer.
pub(crate) fn compile_iter_output(template: &str) -> Result<CompiledTemplate, TemplateError> {
    let segments = parse(template)?;

    let mut named: Vec<String> = Vec::new();
    let mut pattern = String::from("^");
    for seg in &segments {
        match seg {
            Segment::Literal(lit) => pattern.push_str(&regex::escape(lit)),
            Segment::Positional => {
                return Err(TemplateError::PositionalNotAllowed {
                    template: template.to_owned(),
                });
            }
            Segment::Named(name) => {
                if name != "iter" && name != "next" {
                    return Err(TemplateError::UndefinedGroup {
                        template: template.to_owned(),
                        name: name.clone(),
                    });
                }
                if named.iter().any(|n| n == name) {
                    pattern.push_str("(?:[0-9]+)");
                } else {
                    named.push(name.clone());
                    pattern.push_str(&format!("(?P<{name}>[0-9]+)"));
                }
            }
        }
    }
    pattern.push('$');

    let regex = Regex::new(&pattern).map_err(|source| TemplateError::Pattern {
        template: template.to_owned(),
        source,
    })?;
    Ok(CompiledTemplate { regex, named })
}

/// The owned match a template task receives as its first argument.
#[derive(Clone, Debug)]
pub struct TemplateMatch {
    text: String,
    groups: BTreeMap<String, String>,
}

impl TemplateMatch {
    pub(crate) fn from_captures(caps: &Captures<'_>, named: &[String]) -> TemplateMatch {
        let mut groups = BTreeMap::new();
        for name in named {
            if let Some(m) = caps.name(name) {
                groups.insert(name.clone(), m.as_str().to_owned());
            }
        }
        TemplateMatch {
            text: caps.get(0).map_or(String::new(), |m| m.as_str().to_owned()),
            groups,
        }
    }

    /// The full matched target name.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The text a named slot captured.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&str> {
        self.groups.get(name).map(String::as_str)
    }

    pub(crate) fn groups(&self) -> &BTreeMap<String, String> {
        &self.groups
    }
}

/// Instantiate an input/param template from a match's named groups.
///
/// Unnamed slots cannot be resolved here and fail, as do references to
/// groups the output template never defined.
pub(crate) fn format_with_groups(
    template: &str,
    groups: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    for seg in parse(template)? {
        match seg {
            Segment::Literal(lit) => out.push_str(&lit),
            Segment::Positional => {
                return Err(TemplateError::PositionalNotAllowed {
                    template: template.to_owned(),
                });
            }
            Segment::Named(name) => match groups.get(&name) {
                Some(text) => out.push_str(text),
                None => {
                    return Err(TemplateError::UndefinedGroup {
                        template: template.to_owned(),
                        name,
                    });
                }
            },
        }
    }
    Ok(out)
}

/// One step index in an iteration chain. The step before index 0 is the
/// literal `start`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum IterStep {
    Start,
    Num(u64),
}

impl fmt::Display for IterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterStep::Start => write!(f, "start"),
            IterStep::Num(n) => write!(f, "{n}"),
        }
    }
}

/// Derive the `(iter, next)` pair from whichever side(s) a name captured.
pub(crate) fn derive_iter(iter: Option<u64>, next: Option<u64>) -> (IterStep, u64) {
    match (iter, next) {
        (Some(i), Some(n)) => (IterStep::Num(i), n),
        (None, Some(0)) => (IterStep::Start, 0),
        (None, Some(n)) => (IterStep::Num(n - 1), n),
        (Some(i), None) => (IterStep::Num(i), i.saturating_add(1)),
        (None, None) => (IterStep::Start, 0),
    }
}

/// Instantiate an iteration input/param template with concrete step values.
pub(crate) fn format_iter(
    template: &str,
    iter: IterStep,
    next: u64,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    for seg in parse(template)? {
        match seg {
            Segment::Literal(lit) => out.push_str(&lit),
            Segment::Positional => {
                return Err(TemplateError::PositionalNotAllowed {
                    template: template.to_owned(),
                });
            }
            Segment::Named(name) => match name.as_str() {
                "iter" => out.push_str(&iter.to_string()),
                "next" => out.push_str(&next.to_string()),
                _ => {
                    return Err(TemplateError::UndefinedGroup {
                        template: template.to_owned(),
                        name,
                    });
                }
            },
        }
    }
    Ok(out)
}
