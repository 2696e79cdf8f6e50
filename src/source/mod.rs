//! Project inputs: packaging metadata, lock file and source tree

pub mod lockfile;
pub mod metadata;
pub mod tree;
pub mod version;

pub use lockfile::{LockFile, LockFormat, LockedPackage};
pub use metadata::{normalize_name, ProjectMetadata, Requirement};
pub use tree::{BuildArtifact, SourceTree};
