pub mod cache;
pub mod error;
pub mod manifest;
pub mod options;
pub mod output;
pub mod package;
pub mod runner;
pub mod scm;

pub use error::SyncError;
pub use manifest::Manifest;
pub use options::{PatchSpec, SyncOptions};
