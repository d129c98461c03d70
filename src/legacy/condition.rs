//! Parsed Legacy ACL Conditions
//!
//! A closed sum type over every condition the legacy grammar can express.
//! Leaves carry unresolved names; identity resolution happens during migration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Date format used by legacy rule strings
pub const LEGACY_DATE_FORMAT: &str = "%d.%m.%Y";

/// Condition tree produced by the legacy parser
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    True,
    False,
    Group(String),
    User(String),
    Ip { addr: Ipv4Addr, prefix_len: u8 },
    IpList(String),
    DateBefore { date: NaiveDate, inclusive: bool },
    DateAfter { date: NaiveDate, inclusive: bool },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn and(a: Condition, b: Condition) -> Self {
        Condition::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Condition, b: Condition) -> Self {
        Condition::Or(Box::new(a), Box::new(b))
    }

    pub fn not(a: Condition) -> Self {
        Condition::Not(Box::new(a))
    }

    /// Leaves are everything except the three combinators
    pub fn is_leaf(&self) -> bool {
        !matches!(
            self,
            Condition::And(..) | Condition::Or(..) | Condition::Not(..)
        )
    }

    /// Distinct non-constant leaves in left-to-right order
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.collect_leaves(out);
                b.collect_leaves(out);
            }
            Condition::Not(a) => a.collect_leaves(out),
            Condition::True | Condition::False => {}
            leaf => {
                if !out.contains(&leaf) {
                    out.push(leaf);
                }
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::True => write!(f, "TRUE"),
            Condition::False => write!(f, "FALSE"),
            Condition::Group(name) => write!(f, "group {}", name),
            Condition::User(name) => write!(f, "user {}", name),
            Condition::Ip { addr, prefix_len } => write!(f, "ip {}/{}", addr, prefix_len),
            Condition::IpList(name) => write!(f, "iplist {}", name),
            Condition::DateBefore { date, inclusive } => {
                let op = if *inclusive { "<=" } else { "<" };
                write!(f, "date {} {}", op, date.format(LEGACY_DATE_FORMAT))
            }
            Condition::DateAfter { date, inclusive } => {
                let op = if *inclusive { ">=" } else { ">" };
                write!(f, "date {} {}", op, date.format(LEGACY_DATE_FORMAT))
            }
            Condition::And(a, b) => write!(f, "({}) AND ({})", a, b),
            Condition::Or(a, b) => write!(f, "({}) OR ({})", a, b),
            Condition::Not(a) => write!(f, "NOT ({})", a),
        }
    }
}
