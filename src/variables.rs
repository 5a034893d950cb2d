// src/variables.rs

//! `%NAME` / `%{NAME}` substitution in action commands.
//!
//! Variables are looked up through a chain of scopes, most specific first
//! (action, service, enclosing groups, command-line defines, globals, then
//! the builtins of the action being resolved). `%%` yields a literal `%`.
//! Values are inserted as-is; they are not expanded again.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{GraphError, Result};

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%(?:(%)|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("variable pattern is valid")
});

/// Ordered lookup chain.
#[derive(Debug, Clone, Default)]
pub struct Scope<'a> {
    layers: Vec<&'a BTreeMap<String, String>>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer, consulted after every layer already in the chain.
    pub fn then(mut self, layer: &'a BTreeMap<String, String>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&'a str> {
        self.layers
            .iter()
            .find_map(|layer| layer.get(name).map(String::as_str))
    }

    /// Substitute every placeholder of `template`.
    ///
    /// `entity` only names the owner in the error of an undefined variable.
    pub fn resolve(&self, template: &str, entity: &str) -> Result<String> {
        substitute(template, entity, |name| self.lookup(name))
    }
}

/// Names referenced by `template`, in order of appearance.
pub fn referenced(template: &str) -> Vec<&str> {
    VARIABLE_RE
        .captures_iter(template)
        .filter_map(|caps| caps.get(2).or_else(|| caps.get(3)))
        .map(|m| m.as_str())
        .collect()
}

pub fn substitute<'v, F>(template: &str, entity: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<&'v str>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in VARIABLE_RE.captures_iter(template) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        out.push_str(&template[last..whole.start]);
        out.push_str(replacement(&caps, entity, &lookup)?);
        last = whole.end;
    }

    out.push_str(&template[last..]);
    Ok(out)
}

fn replacement<'v, F>(caps: &Captures<'_>, entity: &str, lookup: &F) -> Result<&'v str>
where
    F: Fn(&str) -> Option<&'v str>,
{
    if caps.get(1).is_some() {
        return Ok("%");
    }
    let name = caps
        .get(2)
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
        .unwrap_or_default();

    lookup(name).ok_or_else(|| GraphError::UndefinedVariable {
        entity: entity.to_string(),
        name: name.to_string(),
    })
}
