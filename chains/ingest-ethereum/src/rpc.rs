use ethers_core::types::{Block, Log, H256};
use ethers_prometheus::InstrumentedProvider;
use ethers_providers::Http;
use ingest_core::{BlockInfo, ChainCommunicationError, ChainResult, RawLog};

/// An instrumented JSON-RPC provider of an EVM chain.
pub type EvmProvider<C = Http> = InstrumentedProvider<C>;

/// `eth_getBlockByNumber`
pub const GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
/// `eth_getLogs`
pub const GET_LOGS: &str = "eth_getLogs";
/// `eth_call`
pub const CALL: &str = "eth_call";

/// The parts of a block header the ingester uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvmBlock {
    /// Block number
    pub number: u64,
    /// Block hash, 0x prefixed
    pub hash: String,
    /// Unix seconds
    pub timestamp: u64,
    /// L1 block number reported by Arbitrum nodes
    pub l1_block_number: Option<u64>,
}

impl From<EvmBlock> for BlockInfo {
    fn from(block: EvmBlock) -> Self {
        BlockInfo {
            number: block.number,
            hash: block.hash,
            timestamp: block.timestamp,
        }
    }
}

/// Turn an `eth_getBlockByNumber` answer into an [`EvmBlock`]. A missing
/// block or a block without number or hash is a parse failure of `provider`.
pub fn parse_block(
    provider: &str,
    what: &str,
    block: Option<Block<H256>>,
) -> ChainResult<EvmBlock> {
    let block =
        block.ok_or_else(|| ChainCommunicationError::parse_failure(provider, format!("block {what} is missing")))?;
    let number = block
        .number
        .ok_or_else(|| ChainCommunicationError::parse_failure(provider, format!("block {what} has no number")))?;
    let hash = block
        .hash
        .ok_or_else(|| ChainCommunicationError::parse_failure(provider, format!("block {what} has no hash")))?;
    if block.timestamp.bits() > 64 {
        return Err(ChainCommunicationError::parse_failure(
            provider,
            format!("block {what} has an invalid timestamp {}", block.timestamp),
        ));
    }
    let l1_block_number = block
        .other
        .get_deserialized::<ethers_core::types::U64>("l1BlockNumber")
        .transpose()
        .map_err(|e| ChainCommunicationError::parse_failure(provider, format!("l1BlockNumber: {e}")))?
        .map(|n| n.as_u64());

    Ok(EvmBlock {
        number: number.as_u64(),
        hash: format!("{hash:?}"),
        timestamp: block.timestamp.as_u64(),
        l1_block_number,
    })
}

/// Turn an `eth_getLogs` entry into a [`RawLog`]. Pending logs (without
/// block or index information) are parse failures.
pub fn parse_log(provider: &str, log: Log) -> ChainResult<RawLog> {
    let missing = |field: &str| {
        ChainCommunicationError::parse_failure(provider, format!("log is missing `{field}`"))
    };
    let log_index = log.log_index.ok_or_else(|| missing("logIndex"))?;
    if log_index.bits() > 64 {
        return Err(missing("logIndex"));
    }
    Ok(RawLog {
        address: format!("{:?}", log.address),
        topics: log.topics.iter().map(|t| format!("{t:?}")).collect(),
        data: log.data.to_string(),
        block_number: log.block_number.ok_or_else(|| missing("blockNumber"))?.as_u64(),
        block_hash: format!("{:?}", log.block_hash.ok_or_else(|| missing("blockHash"))?),
        transaction_hash: format!(
            "{:?}",
            log.transaction_hash
                .ok_or_else(|| missing("transactionHash"))?
        ),
        transaction_index: log
            .transaction_index
            .ok_or_else(|| missing("transactionIndex"))?
            .as_u64(),
        log_index: log_index.as_u64(),
        block_time: None,
    })
}
