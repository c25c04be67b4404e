//! Strategy plugin loader
//!
//! Discovery is side-effect-free metadata parsing (see [`crate::plugins`]);
//! instantiation happens only in [`StrategyLoader::load`], which resolves
//! the metadata `entry` against the registry of linked-in constructors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use super::builtin::{SmaCross, TickBuyer};
use super::Strategy;
use crate::clock::Timeframe;
use crate::plugins;

pub use crate::plugins::{LoaderError, PluginMetadata};

/// What a strategy gets to know about its run at construction.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
}

impl StrategyContext {
    pub fn primary_symbol(&self) -> &str {
        self.symbols.first().map(String::as_str).unwrap_or_default()
    }
}

pub type StrategyFactory = Arc<dyn Fn(&StrategyContext) -> Box<dyn Strategy> + Send + Sync>;

pub struct StrategyLoader {
    /// Optional plugin directory; builtins are available regardless.
    dir: Option<PathBuf>,
    registry: HashMap<String, StrategyFactory>,
    builtins: Vec<PluginMetadata>,
}

impl StrategyLoader {
    pub fn new(dir: Option<PathBuf>) -> Self {
        let mut loader = Self {
            dir,
            registry: HashMap::new(),
            builtins: Vec::new(),
        };

        loader.register_builtin(
            PluginMetadata {
                id: "tick_buyer".to_string(),
                name: "Tick Buyer".to_string(),
                version: "1.0.0".to_string(),
                entry: "builtin:tick_buyer".to_string(),
                features: Vec::new(),
                requires: Vec::new(),
            },
            Arc::new(|ctx: &StrategyContext| {
                Box::new(TickBuyer::new(ctx.primary_symbol(), Decimal::ONE)) as Box<dyn Strategy>
            }),
        );
        loader.register_builtin(
            PluginMetadata {
                id: "sma_cross".to_string(),
                name: "SMA Crossover".to_string(),
                version: "1.0.0".to_string(),
                entry: "builtin:sma_cross".to_string(),
                features: vec!["windowed".to_string()],
                requires: Vec::new(),
            },
            Arc::new(|ctx: &StrategyContext| {
                Box::new(SmaCross::new(ctx.primary_symbol(), Decimal::ONE, 10, 30))
                    as Box<dyn Strategy>
            }),
        );

        loader
    }

    fn register_builtin(&mut self, metadata: PluginMetadata, factory: StrategyFactory) {
        self.registry.insert(metadata.entry.clone(), factory);
        self.builtins.push(metadata);
    }

    /// Register an additional constructor under an entry locator.
    pub fn register(&mut self, entry: &str, factory: StrategyFactory) {
        self.registry.insert(entry.to_string(), factory);
    }

    /// List available strategies without instantiating anything. The file
    /// scan runs off the event loop.
    pub async fn discover(&self) -> Result<Vec<PluginMetadata>, LoaderError> {
        let builtins = self.builtins.clone();
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || plugins::discover(&builtins, dir.as_deref()))
            .await
            .map_err(|e| LoaderError::Io(e.to_string()))?
    }

    /// Instantiate one strategy by id.
    pub async fn load(
        &self,
        id: &str,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Strategy>, LoaderError> {
        let metas = self.discover().await?;
        let meta = metas
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| LoaderError::NotFound(id.to_string()))?;

        // Validates the whole dependency graph: missing deps and cycles
        // surface here as typed errors.
        plugins::resolve_order(&metas)?;

        let factory = self
            .registry
            .get(&meta.entry)
            .ok_or_else(|| LoaderError::UnknownEntry {
                id: meta.id.clone(),
                entry: meta.entry.clone(),
            })?;

        debug!(strategy_id = %id, entry = %meta.entry, "Strategy loaded");
        Ok(factory(ctx))
    }
}
