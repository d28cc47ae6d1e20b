//! Target framework model and compatibility resolution.
//!
//! Library items inside a component archive are grouped by the framework
//! they were built for. This module parses those framework monikers and
//! decides which groups a host framework can load.

mod moniker;
mod profile;

pub use moniker::{FrameworkFamily, FrameworkVersion, TargetFramework};
pub use profile::{CompatibilityProfile, FrameworkGroup};
