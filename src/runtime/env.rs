//! Environment lookups used to locate the local archive cache.

use std::env;
use std::path::PathBuf;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn env_var_impl(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn home_dir_impl(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::HostConfig;
    use crate::runtime::{RealRuntime, Runtime};

    #[test]
    fn test_unset_variable_is_error() {
        assert!(
            RealRuntime
                .env_var("PILET_ORCHESTRATOR_SURELY_UNSET_VARIABLE")
                .is_err()
        );
    }

    #[test]
    fn test_archive_cache_resolves_on_real_runtime() {
        let runtime = RealRuntime;
        let cache = HostConfig::default_archive_cache(&runtime);

        // Either source may be missing in a bare container
        let from_env = runtime
            .env_var("NUGET_PACKAGES")
            .is_ok_and(|dir| !dir.is_empty());
        assert_eq!(cache.is_some(), from_env || runtime.home_dir().is_some());
    }
}
