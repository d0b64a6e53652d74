use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use eyre::{eyre, Result};
use parking_lot::Mutex;

use ingest_core::{ChainIdentity, Handler, HandlerDefinition, JobDefinition, Mapper, Target};

use super::{
    JsonlTarget, LogTarget, MapAndPublishHandler, RawMapper, JSONL_TARGET, LOG_TARGET, RAW_MAPPER,
};

/// Builds the target of one handler from the handler's definition.
pub type TargetFactory =
    Box<dyn Fn(&HandlerDefinition) -> Result<Arc<dyn Target>> + Send + Sync>;

/// Mappers and targets known by name.
pub struct HandlerRegistry {
    mappers: HashMap<String, Arc<dyn Mapper>>,
    targets: HashMap<String, TargetFactory>,
}

impl Debug for HandlerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("mappers", &self.mappers.keys().collect::<Vec<_>>())
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl HandlerRegistry {
    /// A registry without any mapper or target.
    pub fn empty() -> Self {
        Self {
            mappers: HashMap::new(),
            targets: HashMap::new(),
        }
    }

    /// The `raw` mapper and the `log` and `jsonl` targets. Handlers using
    /// `jsonl` must set `path` in their config; handlers writing to the same
    /// path share one target.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_mapper(RAW_MAPPER, Arc::new(RawMapper));
        registry.register_target(
            LOG_TARGET,
            Box::new(|_: &HandlerDefinition| -> Result<Arc<dyn Target>> {
                Ok(Arc::new(LogTarget))
            }),
        );

        let files: Arc<Mutex<HashMap<PathBuf, Arc<JsonlTarget>>>> = Default::default();
        registry.register_target(
            JSONL_TARGET,
            Box::new(move |def: &HandlerDefinition| -> Result<Arc<dyn Target>> {
                let path = def
                    .config
                    .get("path")
                    .and_then(|p| p.as_str())
                    .ok_or_else(|| eyre!("Target `{JSONL_TARGET}` needs `config.path`"))?;
                let target = files
                    .lock()
                    .entry(PathBuf::from(path))
                    .or_insert_with(|| Arc::new(JsonlTarget::new(path)))
                    .clone();
                Ok(target)
            }),
        );
        registry
    }

    pub fn register_mapper(&mut self, name: impl Into<String>, mapper: Arc<dyn Mapper>) -> &mut Self {
        self.mappers.insert(name.into(), mapper);
        self
    }

    pub fn register_target(&mut self, name: impl Into<String>, factory: TargetFactory) -> &mut Self {
        self.targets.insert(name.into(), factory);
        self
    }

    pub fn has_mapper(&self, name: &str) -> bool {
        self.mappers.contains_key(name)
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Instantiate the handlers of `job`.
    pub fn build(&self, job: &JobDefinition, chain: &ChainIdentity) -> Result<Vec<Arc<dyn Handler>>> {
        job.handlers
            .iter()
            .map(|def| {
                let mapper = self
                    .mappers
                    .get(&def.mapper)
                    .ok_or_else(|| eyre!("Job {}: unknown mapper `{}`", job.id, def.mapper))?
                    .clone();
                let factory = self
                    .targets
                    .get(&def.target)
                    .ok_or_else(|| eyre!("Job {}: unknown target `{}`", job.id, def.target))?;
                let target = factory(def)?;
                let handler = MapAndPublishHandler::new(
                    format!("{}:{}", def.action, def.target),
                    job.id.clone(),
                    chain.clone(),
                    def.mapper.clone(),
                    mapper,
                    def.target.clone(),
                    target,
                    def.config.clone(),
                );
                Ok(Arc::new(handler) as Arc<dyn Handler>)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ingest_core::KnownChain;
    use serde_json::json;

    use super::*;

    fn job(handlers: serde_json::Value) -> JobDefinition {
        serde_json::from_value(json!({
            "id": "poll-solana",
            "chain": "solana",
            "source": { "action": "PollSolanaTransactions", "config": {} },
            "handlers": handlers,
        }))
        .unwrap()
    }

    #[test]
    fn builds_builtin_handlers() {
        let registry = HandlerRegistry::with_builtins();
        let job = job(json!([
            { "action": "HandleSolanaTransactions", "target": "log", "mapper": "raw" },
            { "action": "HandleSolanaTransactions", "target": "jsonl", "mapper": "raw",
              "config": { "path": "/tmp/solana.jsonl" } }
        ]));
        let handlers = registry
            .build(&job, &KnownChain::Solana.into())
            .unwrap();
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].name(), "HandleSolanaTransactions:log");
    }

    #[test]
    fn unknown_names_are_rejected() {
        let registry = HandlerRegistry::with_builtins();
        assert!(!registry.has_mapper("wormhole-vaa"));
        let job = job(json!([
            { "action": "HandleSolanaTransactions", "target": "sns", "mapper": "raw" }
        ]));
        let err = registry
            .build(&job, &KnownChain::Solana.into())
            .unwrap_err();
        assert!(err.to_string().contains("unknown target `sns`"));
    }

    #[test]
    fn jsonl_requires_path() {
        let registry = HandlerRegistry::with_builtins();
        let job = job(json!([
            { "action": "HandleSolanaTransactions", "target": "jsonl", "mapper": "raw" }
        ]));
        assert!(registry.build(&job, &KnownChain::Solana.into()).is_err());
    }
}
