//! Exchange adapter plugin loader
//!
//! Same discovery shape as the strategy loader: YAML metadata records
//! parsed without side effects, entries resolved against a registry of
//! linked-in constructors at load time only.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::{AlpacaAdapter, AlpacaCredentials, ExchangeAdapter, MockExchange};
use crate::plugins::{self, LoaderError, PluginMetadata};

/// What an adapter gets to know at construction. Credentials arrive from
/// configuration, never from the plugin metadata itself.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// Instance name, e.g. `alpaca-paper`.
    pub name: String,
    pub credentials: Option<AlpacaCredentials>,
}

pub type AdapterFactory =
    Arc<dyn Fn(&AdapterContext) -> Result<Arc<dyn ExchangeAdapter>, LoaderError> + Send + Sync>;

pub struct AdapterLoader {
    dir: Option<PathBuf>,
    registry: HashMap<String, AdapterFactory>,
    builtins: Vec<PluginMetadata>,
}

impl AdapterLoader {
    pub fn new(dir: Option<PathBuf>) -> Self {
        let mut loader = Self {
            dir,
            registry: HashMap::new(),
            builtins: Vec::new(),
        };

        loader.register_builtin(
            PluginMetadata {
                id: "alpaca".to_string(),
                name: "Alpaca Markets".to_string(),
                version: "1.0.0".to_string(),
                entry: "builtin:alpaca".to_string(),
                features: vec!["paper".to_string(), "live".to_string()],
                requires: Vec::new(),
            },
            Arc::new(|ctx: &AdapterContext| {
                let creds = ctx.credentials.clone().ok_or_else(|| {
                    LoaderError::Construction(format!("{} requires credentials", ctx.name))
                })?;
                Ok(Arc::new(AlpacaAdapter::new(&ctx.name, creds)) as Arc<dyn ExchangeAdapter>)
            }),
        );
        loader.register_builtin(
            PluginMetadata {
                id: "mock".to_string(),
                name: "Mock Exchange".to_string(),
                version: "1.0.0".to_string(),
                entry: "builtin:mock".to_string(),
                features: vec!["testing".to_string()],
                requires: Vec::new(),
            },
            Arc::new(|_ctx: &AdapterContext| {
                Ok(Arc::new(MockExchange::new()) as Arc<dyn ExchangeAdapter>)
            }),
        );

        loader
    }

    fn register_builtin(&mut self, metadata: PluginMetadata, factory: AdapterFactory) {
        self.registry.insert(metadata.entry.clone(), factory);
        self.builtins.push(metadata);
    }

    pub fn register(&mut self, entry: &str, factory: AdapterFactory) {
        self.registry.insert(entry.to_string(), factory);
    }

    /// List available adapters without instantiating anything.
    pub fn discover(&self) -> Result<Vec<PluginMetadata>, LoaderError> {
        plugins::discover(&self.builtins, self.dir.as_deref())
    }

    /// Instantiate one adapter by id.
    pub fn load(
        &self,
        id: &str,
        ctx: &AdapterContext,
    ) -> Result<Arc<dyn ExchangeAdapter>, LoaderError> {
        let metas = self.discover()?;
        let meta = metas
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| LoaderError::NotFound(id.to_string()))?;
        plugins::resolve_order(&metas)?;

        let factory = self
            .registry
            .get(&meta.entry)
            .ok_or_else(|| LoaderError::UnknownEntry {
                id: meta.id.clone(),
                entry: meta.entry.clone(),
            })?;

        debug!(adapter_id = %id, entry = %meta.entry, "Adapter loaded");
        factory(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_adapters_discoverable() {
        let loader = AdapterLoader::new(None);
        let ids: Vec<String> = loader.discover().unwrap().into_iter().map(|m| m.id).collect();
        assert!(ids.contains(&"alpaca".to_string()));
        assert!(ids.contains(&"mock".to_string()));
    }

    #[test]
    fn test_load_mock_without_credentials() {
        let loader = AdapterLoader::new(None);
        let adapter = loader
            .load(
                "mock",
                &AdapterContext {
                    name: "mock".to_string(),
                    credentials: None,
                },
            )
            .unwrap();
        assert_eq!(adapter.name(), "mock");
    }

    #[test]
    fn test_alpaca_requires_credentials() {
        let loader = AdapterLoader::new(None);
        let err = loader
            .load(
                "alpaca",
                &AdapterContext {
                    name: "alpaca-paper".to_string(),
                    credentials: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, LoaderError::Construction(_)));
    }

    #[test]
    fn test_unknown_adapter_is_typed_error() {
        let loader = AdapterLoader::new(None);
        let err = loader
            .load(
                "binance",
                &AdapterContext {
                    name: "binance".to_string(),
                    credentials: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, LoaderError::NotFound(_)));
    }
}
