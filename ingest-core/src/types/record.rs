use serde::{Deserialize, Serialize};

use crate::BlockInfo;

/// An EVM log as returned by `eth_getLogs`, with hex fields kept verbatim.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
    /// Unix seconds, attached after the block headers are fetched
    pub block_time: Option<u64>,
}

/// A transaction of an account based chain. `payload` holds the chain's own
/// JSON representation for mappers to pick apart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: String,
    pub block_number: u64,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
    pub sender: Option<String>,
    pub payload: serde_json::Value,
}

/// A record fetched by a polling iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChainRecord {
    Log(RawLog),
    Transaction(RawTransaction),
}

impl ChainRecord {
    pub fn block_number(&self) -> u64 {
        match self {
            ChainRecord::Log(log) => log.block_number,
            ChainRecord::Transaction(tx) => tx.block_number,
        }
    }

    pub fn block_hash(&self) -> Option<&str> {
        match self {
            ChainRecord::Log(log) => Some(&log.block_hash),
            ChainRecord::Transaction(tx) => tx.block_hash.as_deref(),
        }
    }

    pub fn block_time(&self) -> Option<u64> {
        match self {
            ChainRecord::Log(log) => log.block_time,
            ChainRecord::Transaction(tx) => tx.block_time,
        }
    }

    pub fn tx_hash(&self) -> &str {
        match self {
            ChainRecord::Log(log) => &log.transaction_hash,
            ChainRecord::Transaction(tx) => &tx.hash,
        }
    }

    /// Copy the header timestamp onto the record.
    pub fn attach_block(&mut self, block: &BlockInfo) {
        match self {
            ChainRecord::Log(log) => log.block_time = Some(block.timestamp),
            ChainRecord::Transaction(tx) => {
                tx.block_time = Some(block.timestamp);
                if tx.block_hash.is_none() {
                    tx.block_hash = Some(block.hash.clone());
                }
            }
        }
    }
}

impl From<RawLog> for ChainRecord {
    fn from(log: RawLog) -> Self {
        ChainRecord::Log(log)
    }
}

impl From<RawTransaction> for ChainRecord {
    fn from(tx: RawTransaction) -> Self {
        ChainRecord::Transaction(tx)
    }
}

/// Which records a job is interested in.
///
/// For EVM chains `addresses` are contract addresses and `topics` the
/// accepted values of topic0. Other chains interpret `addresses` as program
/// ids (Solana), event type or package prefixes (Sui), contract addresses
/// (Cosmos), receiver accounts (Near) or application ids (Algorand).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl RecordFilter {
    /// Case-insensitive match of an address against the filter. An empty
    /// filter matches everything.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self
                .addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(address))
    }
}
