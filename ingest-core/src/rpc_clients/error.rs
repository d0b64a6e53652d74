use thiserror::Error;

use crate::ChainCommunicationError;

/// Errors specific to the provider pool.
#[derive(Error, Debug)]
pub enum RpcClientError {
    /// Every attempt made by `ProviderPool::call` failed
    #[error("All pool providers failed. (Errors: {0:?})")]
    AllProvidersFailed(Vec<ChainCommunicationError>),
}
