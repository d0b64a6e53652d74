use std::time::Duration;

use ethers_providers::HttpClientError;
use ingest_core::rpc_clients::RpcEndpoint;
use ingest_core::ChainCommunicationError;
use tracing::{debug, warn};

/// Back-off suggested to callers when a provider answers with a rate limit
/// response that carries no hint of its own.
pub const PROVIDER_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(1);

/// Turn an http client failure into the chain error taxonomy.
///
/// Rate limit answers become `RateLimited` and do not penalize the
/// provider. Connection problems and undecodable bodies do.
pub fn categorize_client_error(
    endpoint: &RpcEndpoint,
    chain: &str,
    method: &str,
    err: HttpClientError,
) -> ChainCommunicationError {
    use HttpClientError::*;
    let host = endpoint.host();
    let provider = host.as_str();
    match err {
        ReqwestError(e) if e.status().map(|s| s.as_u16()) == Some(429) => {
            debug!(provider, method, error = %e, "Rate limited by provider");
            rate_limited(chain)
        }
        ReqwestError(e) if e.is_timeout() => ChainCommunicationError::Timeout {
            provider: provider.to_owned(),
            timeout: endpoint.timeout,
        },
        ReqwestError(e) => {
            warn!(provider, method, error = %e, "ReqwestError in http provider");
            ChainCommunicationError::Transport {
                provider: provider.to_owned(),
                message: e.to_string(),
            }
        }
        SerdeJson { err, text } => {
            if is_rate_limit_message(&text) {
                debug!(provider, method, text, "Rate limited by provider");
                rate_limited(chain)
            } else {
                warn!(provider, method, error = %err, text, "SerdeJson error in http provider");
                ChainCommunicationError::ParseFailure {
                    provider: provider.to_owned(),
                    message: format!("{err}: {}", truncate(&text, 256)),
                }
            }
        }
        JsonRpcError(e) => {
            if e.code == 429 || is_rate_limit_message(&e.message) {
                debug!(provider, method, error = %e, "Rate limited by provider");
                rate_limited(chain)
            } else {
                warn!(provider, method, code = e.code, error = %e.message, data = ?e.data, "JsonRpcError in http provider");
                let message = match e.data {
                    Some(data) => format!("{}: {data}", e.message),
                    None => e.message,
                };
                ChainCommunicationError::RpcError {
                    provider: provider.to_owned(),
                    code: e.code,
                    message,
                }
            }
        }
    }
}

/// Turn a failed REST request into the chain error taxonomy. Throttling
/// becomes `RateLimited`; unsuccessful statuses below 500 are reported as
/// `RpcError` carrying the status code.
pub fn categorize_rest_error(
    endpoint: &RpcEndpoint,
    chain: &str,
    path: &str,
    err: reqwest::Error,
) -> ChainCommunicationError {
    let host = endpoint.host();
    let provider = host.as_str();
    match err.status() {
        Some(status) if status.as_u16() == 429 => {
            debug!(provider, path, "Rate limited by provider");
            rate_limited(chain)
        }
        Some(status) if status.is_server_error() => {
            warn!(provider, path, %status, "Server error from rest provider");
            ChainCommunicationError::Transport {
                provider: provider.to_owned(),
                message: err.to_string(),
            }
        }
        Some(status) => ChainCommunicationError::RpcError {
            provider: provider.to_owned(),
            code: i64::from(status.as_u16()),
            message: err.to_string(),
        },
        None if err.is_timeout() => ChainCommunicationError::Timeout {
            provider: provider.to_owned(),
            timeout: endpoint.timeout,
        },
        None if err.is_decode() => {
            warn!(provider, path, error = %err, "Undecodable body from rest provider");
            ChainCommunicationError::parse_failure(provider, err.to_string())
        }
        None => {
            warn!(provider, path, error = %err, "ReqwestError in rest provider");
            ChainCommunicationError::Transport {
                provider: provider.to_owned(),
                message: err.to_string(),
            }
        }
    }
}

/// Whether an error message or response body says the caller is being
/// throttled.
pub fn is_rate_limit_message(text: &str) -> bool {
    let msg = text.to_ascii_lowercase().replace('_', " ");
    msg.contains("429") || msg.contains("rate limit") || msg.contains("too many requests")
}

fn rate_limited(chain: &str) -> ChainCommunicationError {
    ChainCommunicationError::RateLimited {
        chain: chain.to_owned(),
        retry_after: PROVIDER_RATE_LIMIT_BACKOFF,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use ethers_providers::JsonRpcError;
    use url::Url;

    use super::*;

    fn endpoint() -> RpcEndpoint {
        RpcEndpoint::new(Url::parse("https://rpc.example").unwrap())
    }

    fn json_rpc_error(code: i64, message: &str) -> HttpClientError {
        HttpClientError::JsonRpcError(JsonRpcError {
            code,
            message: message.to_owned(),
            data: None,
        })
    }

    fn serde_error(text: &str) -> HttpClientError {
        HttpClientError::SerdeJson {
            err: serde_json::from_str::<u64>("not json").unwrap_err(),
            text: text.to_owned(),
        }
    }

    #[test]
    fn rate_limit_responses_do_not_penalize() {
        for err in [
            json_rpc_error(429, "slow down"),
            json_rpc_error(-32005, "Too Many Requests"),
            json_rpc_error(-32000, "daily request_limit exceeded: RATE_LIMIT"),
            serde_error("<html>429 Too Many Requests</html>"),
        ] {
            let categorized = categorize_client_error(&endpoint(), "ethereum", "eth_getLogs", err);
            assert!(
                matches!(categorized, ChainCommunicationError::RateLimited { .. }),
                "{categorized:?}"
            );
            assert!(!categorized.penalizes_provider());
        }
    }

    #[test]
    fn garbage_body_is_a_parse_failure() {
        let categorized = categorize_client_error(
            &endpoint(),
            "ethereum",
            "eth_blockNumber",
            serde_error("<html>bad gateway</html>"),
        );
        assert!(matches!(
            categorized,
            ChainCommunicationError::ParseFailure { .. }
        ));
        assert!(categorized.penalizes_provider());
    }

    #[test]
    fn rpc_error_data_is_kept_in_message() {
        let categorized = categorize_client_error(
            &endpoint(),
            "near",
            "block",
            HttpClientError::JsonRpcError(JsonRpcError {
                code: -32000,
                message: "Server error".into(),
                data: Some(serde_json::json!("DB Not Found Error: BLOCK HEIGHT: 42")),
            }),
        );
        match categorized {
            ChainCommunicationError::RpcError { message, .. } => {
                assert!(message.contains("DB Not Found Error"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rpc_errors_keep_their_code() {
        let categorized = categorize_client_error(
            &endpoint(),
            "ethereum",
            "eth_getLogs",
            json_rpc_error(-32602, "invalid block range"),
        );
        assert!(matches!(
            categorized,
            ChainCommunicationError::RpcError { code: -32602, .. }
        ));
        assert!(!categorized.penalizes_provider());
    }
}
