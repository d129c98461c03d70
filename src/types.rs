use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type NodeId = u64;
pub type GroupId = u64;
pub type RuleId = u64;
pub type RulesetId = u64;

/// Kind of access a rule association governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Read,
    Write,
    Data,
}

impl AccessType {
    pub const ALL: [AccessType; 3] = [AccessType::Read, AccessType::Write, AccessType::Data];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Read => "read",
            AccessType::Write => "write",
            AccessType::Data => "data",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = crate::error::AclError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(AccessType::Read),
            "write" => Ok(AccessType::Write),
            "data" => Ok(AccessType::Data),
            other => Err(crate::error::AclError::Config(format!(
                "unknown access type: {}",
                other
            ))),
        }
    }
}
