use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers_prometheus::InstrumentedProvider;
use ethers_providers::{HttpClientError, JsonRpcClient, JsonRpcError};
use ingest_core::rpc_clients::RpcEndpoint;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone)]
enum Response {
    Ok(Value),
    Err(i64, String),
}

/// Scripted JSON-RPC client. Responses are queued per method; the last
/// queued response of a method is repeated once the queue drains.
#[derive(Debug, Clone, Default)]
pub struct MockJsonRpc {
    responses: Arc<Mutex<HashMap<String, VecDeque<Response>>>>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockJsonRpc {
    pub fn respond(&self, method: &str, value: Value) -> &Self {
        self.push(method, Response::Ok(value))
    }

    pub fn fail(&self, method: &str, code: i64, message: &str) -> &Self {
        self.push(method, Response::Err(code, message.to_owned()))
    }

    fn push(&self, method: &str, response: Response) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_owned())
            .or_default()
            .push_back(response);
        self
    }

    /// Params of every request made for `method`, in order.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl JsonRpcClient for MockJsonRpc {
    type Error = HttpClientError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_owned(), serde_json::to_value(&params).unwrap()));
        let response = {
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.entry(method.to_owned()).or_default();
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };
        match response {
            Some(Response::Ok(value)) => {
                serde_json::from_value(value.clone()).map_err(|err| HttpClientError::SerdeJson {
                    err,
                    text: value.to_string(),
                })
            }
            Some(Response::Err(code, message)) => Err(HttpClientError::JsonRpcError(JsonRpcError {
                code,
                message,
                data: None,
            })),
            None => Err(HttpClientError::JsonRpcError(JsonRpcError {
                code: -32601,
                message: format!("the method {method} does not exist"),
                data: None,
            })),
        }
    }
}

/// An instrumented provider for `url` answering from `client`.
pub fn mock_provider(url: &str, client: MockJsonRpc) -> InstrumentedProvider<MockJsonRpc> {
    InstrumentedProvider::new(
        client,
        RpcEndpoint::new(Url::parse(url).unwrap()),
        "test",
        Default::default(),
    )
}
