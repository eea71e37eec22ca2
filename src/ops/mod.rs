//! High-level operations: the exposed surface of the orchestration engine.

mod build;
mod error;
mod plan;

pub use build::{BuildOptions, build};
pub use error::OpsError;
pub use plan::{PlannedPackage, plan};
