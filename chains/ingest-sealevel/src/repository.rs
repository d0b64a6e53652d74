use std::collections::HashMap;

use async_trait::async_trait;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use futures::future::try_join_all;
use ingest_core::rpc_clients::ProviderPool;
use ingest_core::{
    BlockInfo, BlockRange, ChainBlockRepository, ChainCommunicationError, ChainIdentity,
    ChainResult, FinalityTag, RawTransaction, RecordFilter,
};
use itertools::Itertools;
use serde_json::{json, Value};
use tracing::{debug, instrument, trace};

use crate::{
    commitment, commitment_config, SignatureInfo, SolanaBlockHeader, SolanaProvider,
    BLOCK_NOT_AVAILABLE, GET_BLOCK, GET_SIGNATURES_FOR_ADDRESS, GET_SLOT, GET_TRANSACTION,
    LONG_TERM_STORAGE_SLOT_SKIPPED, SLOT_SKIPPED,
};

/// Default number of per-slot requests served by one provider at once
pub const DEFAULT_SOLANA_BATCH_CAP: usize = 10;
/// Page size of `getSignaturesForAddress`
pub const SIGNATURES_PAGE_LIMIT: usize = 1_000;

/// Reads slots and program transactions of Solana.
#[derive(Debug)]
pub struct SealevelBlockRepository<C = Http> {
    chain: ChainIdentity,
    pool: ProviderPool<SolanaProvider<C>>,
    batch_cap: usize,
}

impl<C> SealevelBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    /// Create a repository; `batch_cap` defaults to
    /// [`DEFAULT_SOLANA_BATCH_CAP`].
    pub fn new(
        chain: ChainIdentity,
        pool: ProviderPool<SolanaProvider<C>>,
        batch_cap: Option<usize>,
    ) -> Self {
        Self {
            chain,
            pool,
            batch_cap: batch_cap.unwrap_or(DEFAULT_SOLANA_BATCH_CAP).max(1),
        }
    }

    /// The providers of this chain
    pub fn pool(&self) -> &ProviderPool<SolanaProvider<C>> {
        &self.pool
    }

    /// Signatures of successful transactions touching `address` within
    /// `range`, oldest first. Pages backwards from the newest signature until
    /// the page reaches below the start of the range.
    async fn signatures_in_range(
        &self,
        address: &str,
        range: BlockRange,
        finality: FinalityTag,
    ) -> ChainResult<Vec<SignatureInfo>> {
        let mut before: Option<String> = None;
        let mut found = vec![];
        loop {
            let mut config = json!({
                "limit": SIGNATURES_PAGE_LIMIT,
                "commitment": commitment(finality),
            });
            if let Some(before) = &before {
                config["before"] = json!(before);
            }
            let params = json!([address, config]);
            let page: Vec<SignatureInfo> = self
                .pool
                .call(move |provider| {
                    let params = params.clone();
                    Box::pin(async move { provider.request(GET_SIGNATURES_FOR_ADDRESS, params).await })
                })
                .await?;

            let Some(last) = page.last() else {
                break;
            };
            let exhausted = last.slot < range.from() || page.len() < SIGNATURES_PAGE_LIMIT;
            before = Some(last.signature.clone());
            found.extend(
                page.into_iter()
                    .filter(|sig| range.contains(sig.slot) && sig.err.is_none()),
            );
            if exhausted {
                break;
            }
        }
        found.reverse();
        Ok(found)
    }

    async fn get_transaction_chunk(
        &self,
        signatures: Vec<SignatureInfo>,
        finality: FinalityTag,
    ) -> ChainResult<Vec<RawTransaction>> {
        self.pool
            .call(move |provider| {
                let signatures = signatures.clone();
                Box::pin(async move {
                    let config = json!({
                        "encoding": "json",
                        "maxSupportedTransactionVersion": 0,
                        "commitment": commitment(finality),
                    });
                    let requests = signatures.iter().map(|sig| {
                        provider.request::<_, Option<Value>>(
                            GET_TRANSACTION,
                            json!([sig.signature, config]),
                        )
                    });
                    let responses = try_join_all(requests).await?;
                    signatures
                        .iter()
                        .zip(responses)
                        .map(|(sig, tx)| parse_transaction(provider.host(), sig, tx))
                        .collect()
                })
            })
            .await
    }
}

/// Build a record from a `getTransaction` answer.
pub fn parse_transaction(
    provider: &str,
    signature: &SignatureInfo,
    tx: Option<Value>,
) -> ChainResult<RawTransaction> {
    let tx = tx.ok_or_else(|| {
        ChainCommunicationError::parse_failure(
            provider,
            format!("transaction {} is missing", signature.signature),
        )
    })?;
    let slot = tx["slot"].as_u64().unwrap_or(signature.slot);
    let block_time = tx["blockTime"].as_u64().or(signature.block_time);
    let sender = tx["transaction"]["message"]["accountKeys"][0]
        .as_str()
        .map(str::to_owned);
    Ok(RawTransaction {
        hash: signature.signature.clone(),
        block_number: slot,
        block_hash: None,
        block_time,
        sender,
        payload: tx,
    })
}

/// Skipped slots have no block; they are left out rather than failing.
fn skipped_slot(err: &ChainCommunicationError) -> bool {
    matches!(
        err,
        ChainCommunicationError::RpcError { code, .. }
            if *code == SLOT_SKIPPED || *code == LONG_TERM_STORAGE_SLOT_SKIPPED
    )
}

#[async_trait]
impl<C> ChainBlockRepository for SealevelBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    fn chain(&self) -> &ChainIdentity {
        &self.chain
    }

    async fn get_block_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        self.pool
            .call(move |provider| {
                Box::pin(async move {
                    provider
                        .request(GET_SLOT, [commitment_config(finality)])
                        .await
                })
            })
            .await
    }

    #[instrument(skip(self, numbers), fields(chain = %self.chain, slots = numbers.len()))]
    async fn get_blocks(
        &self,
        numbers: &[u64],
        finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>> {
        let slots = numbers.iter().copied().unique().collect::<Vec<_>>();
        let mut blocks = HashMap::with_capacity(slots.len());
        for chunk in slots.chunks(self.batch_cap) {
            let chunk = chunk.to_vec();
            let fetched = self
                .pool
                .call(move |provider| {
                    let chunk = chunk.clone();
                    Box::pin(async move {
                        let config = json!({
                            "encoding": "json",
                            "transactionDetails": "none",
                            "rewards": false,
                            "maxSupportedTransactionVersion": 0,
                            "commitment": commitment(finality),
                        });
                        let requests = chunk.iter().map(|&slot| {
                            let provider = &provider;
                            let params = json!([slot, config]);
                            async move {
                                match provider
                                    .request::<_, SolanaBlockHeader>(GET_BLOCK, params)
                                    .await
                                {
                                    Ok(header) => Ok(Some((slot, header))),
                                    Err(e) if skipped_slot(&e) => {
                                        trace!(slot, "Skipped slot");
                                        Ok(None)
                                    }
                                    Err(ChainCommunicationError::RpcError { code, message, .. })
                                        if code == BLOCK_NOT_AVAILABLE =>
                                    {
                                        Err(ChainCommunicationError::Transient(message))
                                    }
                                    Err(e) => Err(e),
                                }
                            }
                        });
                        let headers = try_join_all(requests).await?;
                        headers
                            .into_iter()
                            .flatten()
                            .map(|(slot, header)| {
                                let timestamp = header.block_time.ok_or_else(|| {
                                    ChainCommunicationError::parse_failure(
                                        provider.host(),
                                        format!("block at slot {slot} has no blockTime"),
                                    )
                                })?;
                                Ok(BlockInfo {
                                    number: slot,
                                    hash: header.blockhash,
                                    timestamp,
                                })
                            })
                            .collect::<ChainResult<Vec<_>>>()
                    })
                })
                .await?;
            blocks.extend(fetched.into_iter().map(|block| (block.hash.clone(), block)));
        }
        Ok(blocks)
    }

    #[instrument(skip(self, filter), fields(chain = %self.chain, %range))]
    async fn get_transactions(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
        finality: FinalityTag,
    ) -> ChainResult<Vec<RawTransaction>> {
        let mut signatures = vec![];
        for address in &filter.addresses {
            signatures.extend(self.signatures_in_range(address, range, finality).await?);
        }
        let signatures = signatures
            .into_iter()
            .unique_by(|sig| sig.signature.clone())
            .sorted_by_key(|sig| sig.slot)
            .collect::<Vec<_>>();

        let mut transactions = Vec::with_capacity(signatures.len());
        for chunk in signatures.chunks(self.batch_cap) {
            transactions.extend(self.get_transaction_chunk(chunk.to_vec(), finality).await?);
        }
        debug!(transactions = transactions.len(), "Fetched transactions");
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use ingest_core::rpc_clients::PoolMember;
    use ingest_core::KnownChain;
    use ingest_test::mocks::{mock_provider, MockJsonRpc};
    use serde_json::json;

    use super::*;

    fn repository(client: MockJsonRpc) -> SealevelBlockRepository<MockJsonRpc> {
        let chain = ChainIdentity::from(KnownChain::Solana);
        let pool = ProviderPool::new(
            chain.name(),
            [mock_provider("https://api.mainnet-beta.solana.com", client)],
        );
        SealevelBlockRepository::new(chain, pool, None)
    }

    fn header(slot: u64) -> Value {
        json!({
            "blockhash": format!("hash{slot}"),
            "blockTime": 1_700_000_000 + slot,
            "parentSlot": slot - 1,
            "blockHeight": slot - 10,
            "previousBlockhash": format!("hash{}", slot - 1)
        })
    }

    #[tokio::test]
    async fn height_uses_commitment() {
        let client = MockJsonRpc::default();
        client.respond(GET_SLOT, json!(250_000_000u64));
        let repo = repository(client.clone());

        let slot = repo.get_block_height(FinalityTag::Finalized).await.unwrap();
        assert_eq!(slot, 250_000_000);
        assert_eq!(
            client.requests(GET_SLOT),
            vec![json!([{ "commitment": "finalized" }])]
        );
    }

    #[tokio::test]
    async fn skipped_slots_are_omitted() {
        let client = MockJsonRpc::default();
        client
            .respond(GET_BLOCK, header(100))
            .fail(GET_BLOCK, SLOT_SKIPPED, "Slot 101 was skipped")
            .respond(GET_BLOCK, header(102));
        let repo = repository(client);

        let blocks = repo
            .get_blocks(&[100, 101, 102], FinalityTag::Latest)
            .await
            .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks["hash102"].number, 102);
        assert_eq!(blocks["hash100"].timestamp, 1_700_000_100);
    }

    #[tokio::test]
    async fn unavailable_block_is_transient() {
        let client = MockJsonRpc::default();
        client.fail(GET_BLOCK, BLOCK_NOT_AVAILABLE, "Block not available for slot 5");
        let repo = repository(client);

        let err = repo.get_blocks(&[5], FinalityTag::Latest).await.unwrap_err();
        assert!(matches!(err, ChainCommunicationError::Transient(_)));
        assert!(!repo.pool().get_all()[0].is_offline());
    }

    #[tokio::test]
    async fn transactions_page_backwards_until_range_start() {
        let client = MockJsonRpc::default();
        let first_page = (0..SIGNATURES_PAGE_LIMIT as u64)
            .map(|i| json!({ "signature": format!("sig{}", 3_000 - i), "slot": 3_000 - i, "err": null }))
            .collect::<Vec<_>>();
        let second_page = json!([
            { "signature": "sig1500", "slot": 1_500, "err": null },
            { "signature": "sig1499", "slot": 1_499, "err": { "InstructionError": [0, "Custom"] } },
            { "signature": "sig900", "slot": 900, "err": null }
        ]);
        client
            .respond(GET_SIGNATURES_FOR_ADDRESS, json!(first_page))
            .respond(GET_SIGNATURES_FOR_ADDRESS, second_page)
            .respond(
                GET_TRANSACTION,
                json!({
                    "slot": 1_500,
                    "blockTime": 1_700_000_000u64,
                    "transaction": { "message": { "accountKeys": ["payer111"] } },
                    "meta": { "err": null }
                }),
            );
        let repo = repository(client.clone());
        let filter = RecordFilter {
            addresses: vec!["wormDTUJ6AWPNvk59vGQbDvGJmqbDTdgWgAqcLBCgUb".into()],
            topics: vec![],
        };

        let txs = repo
            .get_transactions(
                BlockRange::new(1_000, 1_600).unwrap(),
                &filter,
                FinalityTag::Finalized,
            )
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].hash, "sig1500");
        assert_eq!(txs[0].sender.as_deref(), Some("payer111"));
        assert_eq!(txs[0].block_time, Some(1_700_000_000));

        let pages = client.requests(GET_SIGNATURES_FOR_ADDRESS);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1][1]["before"], "sig2001");
    }

    #[tokio::test]
    async fn missing_transaction_is_a_parse_failure() {
        let sig = SignatureInfo {
            signature: "sig".into(),
            slot: 1,
            err: None,
            block_time: None,
        };
        let err = parse_transaction("api.mainnet-beta.solana.com", &sig, None).unwrap_err();
        assert!(err.penalizes_provider());
    }
}
