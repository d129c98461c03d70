//! Legacy ACL Grammar
//!
//! Condition types, the rule-string parser and access-string splitting for
//! the free-text ACL format that predates the rule/ruleset model.

pub mod access_string;
pub mod condition;
pub mod parser;

pub use access_string::{split_access_string, AccessClause, LegacyRuleLibrary};
pub use condition::{Condition, LEGACY_DATE_FORMAT};
pub use parser::{parse, LegacyAclParser};
