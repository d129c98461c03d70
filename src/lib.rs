pub mod acl;
pub mod config;
pub mod directory;
pub mod error;
pub mod legacy;
pub mod logic;
pub mod migration;
pub mod types;

pub use error::{AclError, Result};
pub use config::Config;
