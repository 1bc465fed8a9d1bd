use bo_sync_core::api::{DirectoryFactory, DirectoryHandle, MemoryDirectoryFactory, RestDirectoryFactory};
use bo_sync_core::config::{Backend, BoSyncConfig, Environment};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, SyncError};

pub const SOURCE: &str = "source";
pub const TARGET: &str = "target";

/// Maps logical environment names to directory handles.
///
/// `source` and `target` are matched case-insensitively; any other name
/// must be a configured alias.
#[derive(Clone)]
pub struct EnvironmentResolver {
    source: Environment,
    target: Environment,
    aliases: BTreeMap<String, Environment>,
    factory: Arc<dyn DirectoryFactory>,
}

impl EnvironmentResolver {
    pub fn new(
        source: Environment,
        target: Environment,
        aliases: BTreeMap<String, Environment>,
        factory: Arc<dyn DirectoryFactory>,
    ) -> Self {
        Self {
            source,
            target,
            aliases,
            factory,
        }
    }

    /// Builds the resolver and the transport selected by `client.backend`.
    pub fn from_config(config: &BoSyncConfig) -> Result<Self> {
        let factory: Arc<dyn DirectoryFactory> = match config.client.backend {
            Backend::Rest => Arc::new(RestDirectoryFactory::new(&config.client)?),
            Backend::Memory => Arc::new(MemoryDirectoryFactory::new()),
        };
        Ok(Self::new(
            config.source.clone(),
            config.target.clone(),
            config.environments.clone(),
            factory,
        ))
    }

    pub fn resolve(&self, name: &str) -> Result<DirectoryHandle> {
        let name = name.trim();
        if name.eq_ignore_ascii_case(SOURCE) {
            return Ok(self.factory.connect(SOURCE, &self.source)?);
        }
        if name.eq_ignore_ascii_case(TARGET) {
            return Ok(self.factory.connect(TARGET, &self.target)?);
        }
        match self.aliases.get(name) {
            Some(environment) => Ok(self.factory.connect(name, environment)?),
            None => Err(SyncError::UnknownEnvironment(name.to_string())),
        }
    }

    pub fn source(&self) -> Result<DirectoryHandle> {
        self.resolve(SOURCE)
    }

    pub fn target(&self) -> Result<DirectoryHandle> {
        self.resolve(TARGET)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = vec![SOURCE.to_string(), TARGET.to_string()];
        names.extend(self.aliases.keys().cloned());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn resolver() -> EnvironmentResolver {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "qa".to_string(),
            Environment::new("https://bo-qa.example.com", "qa", ""),
        );
        EnvironmentResolver::new(
            Environment::new("https://bo-dev.example.com", "dev", ""),
            Environment::new("https://bo-prod.example.com", "prod", ""),
            aliases,
            Arc::new(MemoryDirectoryFactory::new()),
        )
    }

    #[rstest]
    #[case("source", "source")]
    #[case("SOURCE", "source")]
    #[case(" Target ", "target")]
    #[case("qa", "qa")]
    fn test_resolve_known_names(#[case] name: &str, #[case] bound: &str) {
        let handle = resolver().resolve(name).unwrap();
        assert_eq!(handle.environment(), bound);
    }

    #[test]
    fn test_unknown_environment() {
        let err = resolver().resolve("staging").err().unwrap();
        assert!(matches!(err, SyncError::UnknownEnvironment(name) if name == "staging"));
    }

    #[test]
    fn test_names_lists_aliases() {
        assert_eq!(resolver().names(), vec!["source", "target", "qa"]);
    }
}
