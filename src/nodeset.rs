// src/nodeset.rs

//! Node sets: the targets an action runs on.
//!
//! Patterns are comma separated; each item may contain bracketed ranges that
//! expand to one node per value:
//!
//! ```text
//! admin,node[1-3,7]   -> admin, node1, node2, node3, node7
//! rack[1-2]n[01-02]   -> rack1n01, rack1n02, rack2n01, rack2n02
//! ```
//!
//! A range keeps the zero padding of its lower bound. An item expanding to
//! more than [`MAX_EXPANSION`] nodes is rejected.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::{GraphError, Result};

/// Most nodes a single bracketed item may expand to.
pub const MAX_EXPANSION: usize = 65_536;

/// Ordered set of node names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodeSet {
    nodes: BTreeSet<String>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a node set pattern. An empty (or blank) pattern is the empty set.
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut nodes = BTreeSet::new();

        for item in split_top_level(pattern)? {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            for node in expand_item(item).map_err(|_| GraphError::InvalidNodeSet(pattern.to_string()))? {
                nodes.insert(node);
            }
        }

        Ok(Self { nodes })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn insert(&mut self, node: impl Into<String>) -> bool {
        self.nodes.insert(node.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|s| s.as_str())
    }

    pub fn intersection(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.intersection(&other.nodes).cloned().collect(),
        }
    }

    pub fn difference(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.difference(&other.nodes).cloned().collect(),
        }
    }

    pub fn union(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.union(&other.nodes).cloned().collect(),
        }
    }
}

impl FromStr for NodeSet {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        NodeSet::parse(s)
    }
}

impl<S: Into<String>> FromIterator<S> for NodeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for node in &self.nodes {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(node)?;
            first = false;
        }
        Ok(())
    }
}

/// Split on commas that are not inside brackets.
fn split_top_level(pattern: &str) -> Result<Vec<&str>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (idx, ch) in pattern.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| GraphError::InvalidNodeSet(pattern.to_string()))?;
            }
            ',' if depth == 0 => {
                items.push(&pattern[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(GraphError::InvalidNodeSet(pattern.to_string()));
    }

    items.push(&pattern[start..]);
    Ok(items)
}

/// Expand every bracket group of a single item, left to right.
fn expand_item(item: &str) -> std::result::Result<Vec<String>, ()> {
    let Some(open) = item.find('[') else {
        if item.contains(']') {
            return Err(());
        }
        return Ok(vec![item.to_string()]);
    };
    let close = item[open..].find(']').ok_or(())? + open;

    let prefix = &item[..open];
    let values = expand_ranges(&item[open + 1..close])?;
    let suffixes = expand_item(&item[close + 1..])?;

    let total = values.len().checked_mul(suffixes.len()).ok_or(())?;
    if total > MAX_EXPANSION {
        return Err(());
    }

    let mut out = Vec::with_capacity(total);
    for value in &values {
        for suffix in &suffixes {
            out.push(format!("{prefix}{value}{suffix}"));
        }
    }
    Ok(out)
}

/// Expand `1-3,7,05-06` into its values.
fn expand_ranges(body: &str) -> std::result::Result<Vec<String>, ()> {
    let mut values = Vec::new();

    for part in body.split(',') {
        let part = part.trim();
        match part.split_once('-') {
            Some((lo, hi)) => {
                let width = lo.len();
                let lo_n: u64 = lo.parse().map_err(|_| ())?;
                let hi_n: u64 = hi.parse().map_err(|_| ())?;
                if lo_n > hi_n || hi_n - lo_n >= MAX_EXPANSION as u64 {
                    return Err(());
                }
                for n in lo_n..=hi_n {
                    values.push(format!("{n:0width$}"));
                }
                if values.len() > MAX_EXPANSION {
                    return Err(());
                }
            }
            None => {
                if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                    return Err(());
                }
                values.push(part.to_string());
            }
        }
    }

    Ok(values)
}
