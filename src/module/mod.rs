//! Loaded modules and per-package isolated loading contexts.
//!
//! A module is the raw bytes of an entry or library item registered under an
//! identifier namespaced by its owning package, so equal module names in two
//! packages never collide.

mod context;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use context::{LinkReport, LoadContext, ModuleSource};

#[cfg(test)]
pub use context::MockModuleSource;

/// Identifier of a module inside one package's loading context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId {
    pub package: String,
    pub name: String,
}

impl ModuleId {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.package, self.name)
    }
}

/// Optional JSON header a module may carry.
///
/// Anything that does not decode as a header is an opaque leaf module.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ModuleHeader {
    /// Names of modules this module needs at load time
    pub references: Vec<String>,
    /// Component names (`route:<path>` or extension slot identifiers)
    pub components: Vec<String>,
    /// Shared dependency identifiers referenced by the package content
    pub dependencies: Vec<String>,
}

impl ModuleHeader {
    pub fn parse(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct Module {
    id: ModuleId,
    bytes: Vec<u8>,
    header: ModuleHeader,
}

impl Module {
    pub fn new(id: ModuleId, bytes: Vec<u8>) -> Self {
        let header = ModuleHeader::parse(&bytes);
        Self { id, bytes, header }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header(&self) -> &ModuleHeader {
        &self.header
    }

    pub fn references(&self) -> &[String] {
        &self.header.references
    }
}
