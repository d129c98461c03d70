//! Migration Report
//!
//! Per-rule outcomes are folded into a report instead of aborting the batch.

use crate::error::AclError;
use crate::types::{AccessType, GroupId, NodeId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where a legacy rule string came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSource {
    /// Predefined rule referenced by name
    Named { name: String },
    /// Inline clauses of one node's access string
    Inline { node_id: NodeId, access_type: AccessType },
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSource::Named { name } => write!(f, "rule '{}'", name),
            RuleSource::Inline {
                node_id,
                access_type,
            } => write!(f, "node {} {}", node_id, access_type),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Parse,
    CannotRepresent,
    DnfTooLarge,
    Other,
}

impl From<&AclError> for FailureKind {
    fn from(error: &AclError) -> Self {
        match error {
            AclError::Parse { .. } => FailureKind::Parse,
            AclError::CannotRepresentRule(_) => FailureKind::CannotRepresent,
            AclError::DnfTooLarge { .. } => FailureKind::DnfTooLarge,
            _ => FailureKind::Other,
        }
    }
}

/// A rule string that could not be migrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub source: RuleSource,
    pub rule: String,
    pub kind: FailureKind,
    pub message: String,
}

/// A name the directory did not know, and what stands in for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedName {
    pub kind: String,
    pub name: String,
    /// Placeholder group id, `None` for subnet lists replaced by the loopback network
    pub placeholder: Option<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Rule strings migrated
    pub successes: usize,
    pub failures: Vec<RuleFailure>,
    pub unresolved: Vec<UnresolvedName>,
    pub nodes_migrated: usize,
    pub rules_total: usize,
    pub rulesets_total: usize,
}

impl MigrationReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            successes: 0,
            failures: Vec::new(),
            unresolved: Vec::new(),
            nodes_migrated: 0,
            rules_total: 0,
            rulesets_total: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_failure(&mut self, source: RuleSource, rule: &str, error: &AclError) {
        self.failures.push(RuleFailure {
            source,
            rule: rule.to_string(),
            kind: error.into(),
            message: error.to_string(),
        });
    }

    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &RuleFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    /// No failures and no unresolved names
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.unresolved.is_empty()
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

impl Default for MigrationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration run {}", self.run_id)?;
        writeln!(f, "  nodes migrated:   {}", self.nodes_migrated)?;
        writeln!(f, "  rules migrated:   {}", self.successes)?;
        writeln!(f, "  rules failed:     {}", self.failures.len())?;
        writeln!(f, "  unresolved names: {}", self.unresolved.len())?;
        writeln!(f, "  access rules:     {}", self.rules_total)?;
        write!(f, "  rulesets:         {}", self.rulesets_total)?;
        for failure in &self.failures {
            write!(f, "\n  ! {}: {} ({})", failure.source, failure.message, failure.rule)?;
        }
        Ok(())
    }
}
