use std::collections::BTreeMap;

use eyre::Result;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    prelude::*,
};

use self::fmt::{LogOutputLayer, Style};

/// Configure a `tracing_subscriber::fmt` Layer outputting to stdout
pub mod fmt;

/// Dependencies whose logs are capped unless the ingester runs at trace level.
const NOISY_TARGETS: &[(&str, Level)] = &[
    ("hyper", Level::Info),
    ("h2", Level::Info),
    ("reqwest", Level::Info),
    ("rustls", Level::Info),
    ("ethers_providers", Level::Info),
    ("rocksdb", Level::Warn),
];

/// Logging level. A "higher level" means more will be logged.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialOrd, Ord, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    Off = 0,
    Error = 1,
    Warn = 2,
    Debug = 4,
    Trace = 5,
    #[serde(other)]
    #[default]
    Info = 3,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Log output of the ingester.
///
/// `targets` overrides the level of single modules, e.g.
/// `{"ingest_ethereum": "debug"}`, and takes precedence over the caps on
/// noisy dependencies.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub(crate) fmt: Style,
    #[serde(default)]
    pub(crate) level: Level,
    #[serde(default)]
    pub(crate) targets: BTreeMap<String, Level>,
}

impl TracingConfig {
    fn filter(&self) -> Targets {
        let mut filter = Targets::new().with_default(self.level);
        if self.level < Level::Trace {
            for (target, cap) in NOISY_TARGETS {
                filter = filter.with_target(*target, (*cap).min(self.level));
            }
        }
        for (target, level) in &self.targets {
            filter = filter.with_target(target.clone(), *level);
        }
        filter
    }

    /// Register the global subscriber. Fails if one is already installed.
    pub fn start_tracing(&self) -> Result<()> {
        let fmt_layer: LogOutputLayer<_> = self.fmt.into();

        tracing_subscriber::Registry::default()
            .with(self.filter())
            .with(fmt_layer)
            .with(tracing_error::ErrorLayer::default())
            .try_init()?;
        Ok(())
    }
}
