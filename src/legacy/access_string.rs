//! Node Access Strings
//!
//! A node's legacy access attribute is a comma list of clauses. Each clause is
//! either inline rule text (`{ group staff }`) or the bare name of a predefined
//! rule kept in the [`LegacyRuleLibrary`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Predefined, named legacy rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyRuleLibrary {
    rules: BTreeMap<String, String>,
}

impl LegacyRuleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, rule: impl Into<String>) {
        self.rules.insert(name.into(), rule.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.rules.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for LegacyRuleLibrary {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

/// One top-level clause of an access string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessClause {
    /// Rule text parsed in place
    Inline(String),
    /// Reference to a predefined rule by name
    Named(String),
}

/// Split an access string at top-level commas and classify each clause
pub fn split_access_string(access: &str, library: &LegacyRuleLibrary) -> Vec<AccessClause> {
    split_top_level(access)
        .into_iter()
        .map(|clause| {
            if library.contains(&clause) {
                AccessClause::Named(clause)
            } else {
                AccessClause::Inline(clause)
            }
        })
        .collect()
}

fn split_top_level(access: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;

    for c in access.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' | '{' if !in_quotes => depth += 1,
            ')' | '}' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                clauses.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    clauses.push(current);

    clauses
        .into_iter()
        .map(|clause| clause.trim().to_string())
        .filter(|clause| !clause.is_empty())
        .collect()
}
