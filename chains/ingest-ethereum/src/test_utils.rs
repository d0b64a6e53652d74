use ingest_core::rpc_clients::ProviderPool;
use ingest_core::{ChainIdentity, KnownChain};
pub use ingest_test::mocks::MockJsonRpc;
use ingest_test::mocks::mock_provider;
use serde_json::Value;

use crate::EthereumBlockRepository;

pub fn repository(
    chain: KnownChain,
    client: MockJsonRpc,
) -> EthereumBlockRepository<MockJsonRpc> {
    let chain = ChainIdentity::from(chain);
    let pool = ProviderPool::new(
        chain.name(),
        [mock_provider("https://rpc.example:8545", client)],
    );
    EthereumBlockRepository::new(chain, pool, None)
}

/// An `eth_getBlockByNumber` answer for `number`.
pub fn block_json(number: u64, timestamp: u64) -> Value {
    serde_json::json!({
        "number": format!("0x{number:x}"),
        "hash": format!("0x{number:064x}"),
        "parentHash": format!("0x{:064x}", number.saturating_sub(1)),
        "timestamp": format!("0x{timestamp:x}"),
        "transactions": []
    })
}
