use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use eyre::Result;
use prometheus::Registry;
use tracing::info;

use crate::{
    metrics::CoreMetrics,
    settings::{load_settings, Settings},
};

/// A long running process built from [`Settings`].
#[async_trait]
pub trait BaseAgent: Send + Sync + Debug {
    /// The agent's name, used as the metrics `agent` label
    const AGENT_NAME: &'static str;

    /// Instantiate the agent from the loaded settings
    async fn from_settings(settings: Settings, metrics: Arc<CoreMetrics>) -> Result<Self>
    where
        Self: Sized;

    /// Start running this agent. Returns once the agent has shut down.
    async fn run(self) -> Result<()>;
}

/// Call this from `main` to initialize and run the agent for its entire
/// lifecycle: error reports, settings, tracing and metrics are set up before
/// the agent is built.
pub async fn agent_main<A: BaseAgent>() -> Result<()> {
    #[cfg(feature = "color-eyre")]
    color_eyre::install()?;

    let settings = load_settings()?;
    settings.tracing.start_tracing()?;

    let metrics = Arc::new(CoreMetrics::new(
        A::AGENT_NAME,
        settings.metrics_port,
        Registry::new(),
    )?);
    let agent = A::from_settings(settings, metrics).await?;

    let res = agent.run().await;
    info!(agent = A::AGENT_NAME, "Shut down agent");
    res
}
