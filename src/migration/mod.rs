//! Legacy ACL Migration

pub mod driver;
pub mod report;

pub use driver::{
    migrate_dataset, MigratedState, MigrationContext, MigrationDataset, MigrationDriver,
    MigrationOutput, NodeAccess, UserRecord,
};
pub use report::{FailureKind, MigrationReport, RuleFailure, RuleSource, UnresolvedName};
