use thiserror::Error;

pub type Result<T> = std::result::Result<T, AclError>;

#[derive(Error, Debug)]
pub enum AclError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error in \"{input}\": {message}")]
    Parse { input: String, message: String },

    #[error("Cannot represent rule: {0}")]
    CannotRepresentRule(String),

    #[error("Unresolved {kind} reference: {name}")]
    UnresolvedReference { kind: String, name: String },

    #[error("Integrity conflict: {0}")]
    IntegrityConflict(String),

    #[error("DNF has {terms} terms, limit is {limit}")]
    DnfTooLarge { terms: usize, limit: usize },

    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AclError {
    pub(crate) fn parse(input: impl Into<String>, message: impl Into<String>) -> Self {
        AclError::Parse {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Errors that abort a migration batch rather than a single rule
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            AclError::Hierarchy(_) | AclError::Storage(_) | AclError::Io(_)
        )
    }
}
