use anyhow::{Result, bail};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Module, ModuleId};

/// Supplies module bytes to a loading context.
///
/// Implemented by each package source; lookups are confined to that
/// package's own attached archives.
#[cfg_attr(test, mockall::automock)]
pub trait ModuleSource: Send + Sync {
    /// Bytes of the package's entry module.
    fn entry_bytes(&self) -> Result<Vec<u8>>;

    /// Bytes of a referenced module file (e.g. `Shared.Ui.dll`), if any
    /// attached source provides it.
    fn locate(&self, file_name: &str) -> Option<Vec<u8>>;
}

/// Outcome of linking a module's references.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LinkReport {
    /// Modules reachable from the linked module, in resolution order
    pub resolved: Vec<ModuleId>,
    /// Reference names no attached source could provide
    pub unresolved: Vec<String>,
}

impl LinkReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

#[derive(Default)]
struct LoadState {
    entry: Option<Arc<Module>>,
    modules: HashMap<String, Arc<Module>>,
    disposed: bool,
}

/// Isolated loading context owned by exactly one package.
///
/// Every load happens under the context's own lock, so concurrent first
/// accesses observe a single load. The lock is never shared between
/// packages.
pub struct LoadContext {
    package: String,
    extension: String,
    source: Arc<dyn ModuleSource>,
    state: Mutex<LoadState>,
}

impl LoadContext {
    pub fn new(
        package: impl Into<String>,
        extension: impl Into<String>,
        source: Arc<dyn ModuleSource>,
    ) -> Self {
        Self {
            package: package.into(),
            extension: extension.into(),
            source,
            state: Mutex::new(LoadState::default()),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    fn lock(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the entry module, once per context lifetime.
    pub fn load_entry(&self) -> Result<Arc<Module>> {
        let mut state = self.lock();
        self.load_entry_locked(&mut state)
    }

    fn load_entry_locked(&self, state: &mut LoadState) -> Result<Arc<Module>> {
        if state.disposed {
            bail!("Loading context of {} has been disposed", self.package);
        }
        if let Some(entry) = &state.entry {
            return Ok(Arc::clone(entry));
        }

        debug!("Loading entry module of {}", self.package);
        let bytes = self.source.entry_bytes()?;
        let entry = Arc::new(Module::new(
            ModuleId::new(&self.package, &self.package),
            bytes,
        ));
        state.entry = Some(Arc::clone(&entry));
        Ok(entry)
    }

    /// Resolve a referenced module by name, loading it on first request.
    pub fn resolve(&self, name: &str) -> Option<Arc<Module>> {
        let mut state = self.lock();
        self.resolve_locked(&mut state, name)
    }

    fn resolve_locked(&self, state: &mut LoadState, name: &str) -> Option<Arc<Module>> {
        if state.disposed {
            return None;
        }
        if name == self.package {
            return self.load_entry_locked(state).ok();
        }
        if let Some(module) = state.modules.get(name) {
            return Some(Arc::clone(module));
        }

        let file_name = format!("{}{}", name, self.extension);
        let Some(bytes) = self.source.locate(&file_name) else {
            debug!("Unresolved module {} in {}", file_name, self.package);
            return None;
        };

        debug!("Loaded module {} into {}", file_name, self.package);
        let module = Arc::new(Module::new(ModuleId::new(&self.package, name), bytes));
        state.modules.insert(name.to_string(), Arc::clone(&module));
        Some(module)
    }

    /// Look up an already loaded module without triggering a load.
    pub fn loaded(&self, name: &str) -> Option<Arc<Module>> {
        let state = self.lock();
        if name == self.package {
            return state.entry.clone();
        }
        state.modules.get(name).cloned()
    }

    /// Transitively resolve the references of `module`.
    ///
    /// A reference that cannot be resolved is reported and skipped; its
    /// siblings are still resolved.
    pub fn link(&self, module: &Module) -> LinkReport {
        let mut state = self.lock();
        let mut report = LinkReport::default();
        let mut pending: Vec<String> = module.references().iter().rev().cloned().collect();
        let mut seen = vec![module.id().name.clone()];

        while let Some(name) = pending.pop() {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name.clone());

            match self.resolve_locked(&mut state, &name) {
                Some(resolved) => {
                    report.resolved.push(resolved.id().clone());
                    pending.extend(resolved.references().iter().rev().cloned());
                }
                None => report.unresolved.push(name),
            }
        }

        report
    }

    /// Load the entry module and link everything it references.
    pub fn load_and_link(&self) -> Result<(Arc<Module>, LinkReport)> {
        let entry = self.load_entry()?;
        let report = self.link(&entry);
        Ok((entry, report))
    }

    /// Identifiers of every module currently held by this context.
    pub fn loaded_modules(&self) -> Vec<ModuleId> {
        let state = self.lock();
        let mut ids: Vec<ModuleId> = state
            .entry
            .iter()
            .chain(state.modules.values())
            .map(|m| m.id().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Release every cached module.
    ///
    /// Returns `true` for the call that performed the teardown; later calls
    /// are no-ops.
    pub fn dispose(&self) -> bool {
        let mut state = self.lock();
        if state.disposed {
            return false;
        }
        state.disposed = true;
        state.entry = None;
        state.modules.clear();
        debug!("Disposed loading context of {}", self.package);
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}
