use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::deserialize_opt_u64_from_str_or_int;
use crate::{ChainProtocol, FinalityTag, RecordFilter};

/// Default number of blocks fetched per iteration.
pub const DEFAULT_BLOCK_BATCH_SIZE: u64 = 100;
/// Default delay between two iterations of a polling loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// One polling task: which chain to read, what to fetch and where to send it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    /// Unique id; key of the persisted cursor and of the execution lock
    pub id: String,
    /// Chain name as configured under `chains`
    pub chain: String,
    pub source: SourceDefinition,
    #[serde(default)]
    pub handlers: Vec<HandlerDefinition>,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub action: SourceAction,
    #[serde(default)]
    pub config: SourceConfig,
}

/// The kind of polling a job performs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SourceAction {
    /// `eth_getLogs` over block ranges
    #[serde(alias = "PollEvmLogs")]
    PollEvm,
    PollSolanaTransactions,
    PollSuiTransactions,
    #[serde(alias = "PollCosmosTransactions")]
    PollCosmos,
    PollNearTransactions,
    PollAlgorandTransactions,
}

/// What a source action fetches per range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecordKind {
    Logs,
    Transactions,
}

impl SourceAction {
    pub fn record_kind(self) -> RecordKind {
        match self {
            SourceAction::PollEvm => RecordKind::Logs,
            _ => RecordKind::Transactions,
        }
    }

    /// Protocol of the chains this action can poll.
    pub fn protocol(self) -> ChainProtocol {
        match self {
            SourceAction::PollEvm => ChainProtocol::Evm,
            SourceAction::PollSolanaTransactions => ChainProtocol::Solana,
            SourceAction::PollSuiTransactions => ChainProtocol::Sui,
            SourceAction::PollCosmos => ChainProtocol::Cosmos,
            SourceAction::PollNearTransactions => ChainProtocol::Near,
            SourceAction::PollAlgorandTransactions => ChainProtocol::Algorand,
        }
    }
}

/// Range and filter settings of a source. Block numbers accept JSON numbers
/// and numeric strings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_str_or_int")]
    pub from_block: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_str_or_int")]
    pub to_block: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_str_or_int")]
    pub block_batch_size: Option<u64>,
    #[serde(default)]
    pub commitment: Option<FinalityTag>,
    /// Poll interval in milliseconds
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_str_or_int")]
    pub interval: Option<u64>,
    #[serde(flatten)]
    pub filter: RecordFilter,
}

impl SourceConfig {
    pub fn batch_size(&self) -> u64 {
        self.block_batch_size.unwrap_or(DEFAULT_BLOCK_BATCH_SIZE)
    }

    pub fn interval(&self) -> Duration {
        self.interval
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn commitment(&self) -> FinalityTag {
        self.commitment.unwrap_or_default()
    }
}

/// A handler attached to a job: records are mapped by `mapper` and published
/// to `target`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerDefinition {
    pub action: String,
    pub target: String,
    pub mapper: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_job_with_string_block_numbers() {
        let job: JobDefinition = serde_json::from_value(json!({
            "id": "poll-token-bridge-ethereum",
            "chain": "ethereum",
            "source": {
                "action": "PollEvm",
                "config": {
                    "fromBlock": "10",
                    "blockBatchSize": 1,
                    "commitment": "finalized",
                    "addresses": ["0x3ee18B2214AFF97000D974cf647E7C347E8fa585"],
                    "topics": ["0x6eb224fb001ed210e379b335e35efe88672a8ce935d981a6896b27ffdf52a3b2"]
                }
            },
            "handlers": [{
                "action": "HandleEvmLogs",
                "target": "log",
                "mapper": "raw",
                "config": { "eventName": "log-message-published" }
            }]
        }))
        .unwrap();

        assert_eq!(job.source.config.from_block, Some(10));
        assert_eq!(job.source.config.to_block, None);
        assert_eq!(job.source.config.batch_size(), 1);
        assert_eq!(job.source.config.commitment(), FinalityTag::Finalized);
        assert_eq!(job.source.config.interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(job.source.config.filter.addresses.len(), 1);
        assert_eq!(job.source.action.record_kind(), RecordKind::Logs);
        assert!(!job.paused);
    }
}
