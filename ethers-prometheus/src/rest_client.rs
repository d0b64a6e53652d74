use ingest_core::rpc_clients::RpcEndpoint;
use ingest_core::{ChainCommunicationError, ChainResult};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{categorize_rest_error, InstrumentedProvider, PrometheusClientMetrics};

impl InstrumentedProvider<reqwest::Client> {
    /// A REST provider for `endpoint`.
    pub fn rest(
        endpoint: RpcEndpoint,
        chain: impl Into<String>,
        metrics: PrometheusClientMetrics,
    ) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(ChainCommunicationError::from_other)?;
        Ok(Self::new(client, endpoint, chain, metrics))
    }

    /// GET `path` below the endpoint url and decode the JSON body. `method`
    /// labels the request in metrics, so it should not contain ids.
    pub async fn get_json<R>(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> ChainResult<R>
    where
        R: DeserializeOwned + Send,
    {
        let url = join_path(&self.endpoint().url, path)?;
        let chain = self.chain_name().to_owned();
        self.instrument(method, async {
            let response = self
                .inner()
                .get(url)
                .query(query)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| categorize_rest_error(self.endpoint(), &chain, method, e))?;
            response
                .json::<R>()
                .await
                .map_err(|e| categorize_rest_error(self.endpoint(), &chain, method, e))
        })
        .await
    }
}

/// Append the segments of `path` to `base`, keeping its query string.
pub fn join_path(base: &Url, path: &str) -> ChainResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ChainCommunicationError::from_other_str("endpoint url cannot be a base"))?
        .pop_if_empty()
        .extend(path.split('/').filter(|segment| !segment.is_empty()));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_below_base_path_and_keeps_query() {
        let base = Url::parse("https://algod.example/node/?token=abc").unwrap();
        let url = join_path(&base, "/v2/blocks/42/hash").unwrap();
        assert_eq!(url.as_str(), "https://algod.example/node/v2/blocks/42/hash?token=abc");

        let base = Url::parse("https://indexer.example").unwrap();
        let url = join_path(&base, "v2/transactions").unwrap();
        assert_eq!(url.as_str(), "https://indexer.example/v2/transactions");
    }
}
