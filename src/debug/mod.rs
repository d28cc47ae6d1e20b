//! Introspection surface for emulator tooling.
//!
//! Requests under `/_debug` are intercepted: `GET` reads a snapshot of the
//! repository, `POST /_debug/<area>` performs a command and then reads a
//! snapshot. Malformed commands are ignored and still answered with the
//! current snapshot.

mod events;
mod state;

use axum::http::Method;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::config::AppIdentity;
use crate::package::{PackageLocator, Repository};

#[cfg(test)]
pub use events::MockEventBus;
pub use events::{BroadcastEventBus, EventBus, GlobalEvent};
pub use state::{DebugState, EventRequest, PiletInfo, PiletMode, PiletRequest};

pub const DEBUG_PATH: &str = "/_debug";

pub struct DebugConnector {
    repository: Arc<Repository>,
    events: Arc<dyn EventBus>,
    locator: Option<Arc<dyn PackageLocator>>,
    app: AppIdentity,
    scripts: Vec<String>,
    styles: Vec<String>,
}

impl DebugConnector {
    pub fn new(repository: Arc<Repository>, events: Arc<dyn EventBus>, app: AppIdentity) -> Self {
        let scripts = vec![format!("_content/{}/debug.js", app.name)];
        Self {
            repository,
            events,
            locator: None,
            app,
            scripts,
            styles: Vec::new(),
        }
    }

    /// Where `add` commands look for packages that are not registered yet.
    pub fn with_locator(mut self, locator: Arc<dyn PackageLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Scripts a host page includes to talk to the debug surface.
    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    pub fn styles(&self) -> &[String] {
        &self.styles
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Whether `path` is `/_debug` or below it, compared per segment.
    pub fn matches(path: &str) -> bool {
        let Some(prefix) = path.get(..DEBUG_PATH.len()) else {
            return false;
        };
        prefix.eq_ignore_ascii_case(DEBUG_PATH)
            && (path.len() == DEBUG_PATH.len() || path[DEBUG_PATH.len()..].starts_with('/'))
    }

    pub fn snapshot(&self) -> DebugState {
        let packages = self.repository.packages();
        DebugState::collect(self.app.clone(), packages.iter().map(Arc::as_ref))
    }

    /// Handle a request, or return `None` to let it pass through.
    pub fn intercept(&self, method: &Method, path: &str, body: &[u8]) -> Option<DebugState> {
        if !Self::matches(path) {
            return None;
        }

        if *method == Method::POST {
            let segments: Vec<&str> = path.split('/').collect();
            if segments.len() < 3 {
                return None;
            }
            match segments[2] {
                "event" => self.handle_event(body),
                "pilet" => self.handle_pilet(body),
                area => debug!("Ignoring debug command for unknown area {:?}", area),
            }
        } else if *method != Method::GET {
            return None;
        }

        Some(self.snapshot())
    }

    fn handle_event(&self, body: &[u8]) {
        match serde_json::from_slice::<EventRequest>(body) {
            Ok(EventRequest {
                name: Some(name),
                args,
            }) => self.events.dispatch(&name, &args),
            Ok(_) => debug!("Ignoring event without a name"),
            Err(e) => debug!("Ignoring malformed event request: {}", e),
        }
    }

    fn handle_pilet(&self, body: &[u8]) {
        let request = match serde_json::from_slice::<PiletRequest>(body) {
            Ok(request) => request,
            Err(e) => {
                debug!("Ignoring malformed pilet request: {}", e);
                return;
            }
        };
        let (Some(mode), Some(name)) = (request.mode, request.name.as_deref()) else {
            debug!("Ignoring pilet request without mode or name");
            return;
        };

        match mode {
            PiletMode::Add => self.add(name, request.version.as_deref(), request.disabled),
            PiletMode::Update => {
                if !self.repository.set_disabled(name, request.disabled) {
                    debug!("Cannot update unknown package {}", name);
                }
            }
            PiletMode::Remove => {
                self.repository.delete_package(name);
            }
            PiletMode::Unknown => debug!("Ignoring unknown pilet mode for {}", name),
        }
    }

    /// Enable a registered package, or register one found by the locator.
    fn add(&self, name: &str, version: Option<&str>, disabled: bool) {
        if self.repository.get_package(name).is_some() {
            self.repository.set_disabled(name, false);
            return;
        }

        let Some(locator) = &self.locator else {
            warn!("Cannot add package {}: no package locator configured", name);
            return;
        };
        let Some(descriptor) = locator.locate(name, version.unwrap_or_default()) else {
            warn!("Cannot add package {}: not found", name);
            return;
        };

        match self.repository.add_package(descriptor) {
            Ok(package) => {
                package.set_disabled(disabled);
                info!("Registered package {} {} on request", package.name(), package.version());
            }
            Err(e) => warn!("Cannot add package {}: {:#}", name, e),
        }
    }
}
