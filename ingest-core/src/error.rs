use std::any::Any;
use std::error::Error as StdError;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::time::Duration;

use crate::rpc_clients::RpcClientError;
use crate::traits::MetadataError;

/// The result of interacting with a chain.
pub type ChainResult<T> = Result<T, ChainCommunicationError>;

/// An "Any"-typed error.
pub trait IngestCustomError: StdError + Send + Sync + Any {}

impl<E: StdError + Send + Sync + Any> IngestCustomError for E {}

/// Thin wrapper around a boxed IngestCustomError; required to satisfy
/// AsDynError implementations. Basically a trait-object adaptor.
#[repr(transparent)]
pub struct IngestCustomErrorWrapper(Box<dyn IngestCustomError>);

impl Debug for IngestCustomErrorWrapper {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", AsRef::<dyn IngestCustomError>::as_ref(&self))
    }
}

impl Display for IngestCustomErrorWrapper {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", AsRef::<dyn IngestCustomError>::as_ref(&self))
    }
}

impl StdError for IngestCustomErrorWrapper {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl AsRef<dyn IngestCustomError> for IngestCustomErrorWrapper {
    fn as_ref(&self) -> &dyn IngestCustomError {
        self.0.as_ref()
    }
}

impl Deref for IngestCustomErrorWrapper {
    type Target = Box<dyn IngestCustomError>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// ChainCommunicationError contains errors returned when attempting to
/// read from a chain through one of its providers.
#[derive(Debug, thiserror::Error)]
pub enum ChainCommunicationError {
    /// The provider could not be reached or the connection broke.
    #[error("Transport error from {provider}: {message}")]
    Transport {
        /// Host of the provider which failed
        provider: String,
        /// Underlying failure
        message: String,
    },
    /// The provider did not answer within its configured timeout.
    #[error("Request to {provider} timed out after {timeout:?}")]
    Timeout {
        /// Host of the provider which timed out
        provider: String,
        /// The configured timeout
        timeout: Duration,
    },
    /// The chain-scoped rate limiter rejected the call, or the provider
    /// answered with a rate limit response.
    #[error("Rate limited on {chain}, retry after {retry_after:?}")]
    RateLimited {
        /// Chain whose quota is exhausted
        chain: String,
        /// Time until a token is available again
        retry_after: Duration,
    },
    /// The chain's circuit breaker is open; no request was issued.
    #[error("Circuit breaker open for {chain}, retry after {retry_after:?}")]
    CircuitOpen {
        /// Chain whose breaker is open
        chain: String,
        /// Time until the breaker lets a probe through
        retry_after: Duration,
    },
    /// Malformed or partial response.
    #[error("Failed to parse response from {provider}: {message}")]
    ParseFailure {
        /// Host of the provider which sent the response
        provider: String,
        /// What was wrong with it
        message: String,
    },
    /// The provider answered with a JSON-RPC error object.
    #[error("RPC error {code} from {provider}: {message}")]
    RpcError {
        /// Host of the provider
        provider: String,
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
    },
    /// Expected chain-specific condition such as a skipped slot or a block
    /// not yet available. Retried later without penalizing the provider.
    #[error("Transient chain condition: {0}")]
    Transient(String),
    /// The pool has no providers configured.
    #[error("No providers configured for {0}")]
    NoProviders(String),
    /// The repository does not implement this operation for its chain.
    #[error("Operation {operation} is not supported on {chain}")]
    Unsupported {
        /// Chain of the repository
        chain: String,
        /// Name of the unsupported operation
        operation: &'static str,
    },
    /// Metadata persistence failed
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// Errors from the provider pool
    #[error(transparent)]
    RpcClient(#[from] RpcClientError),
    /// Any other error; does not implement `From` to prevent
    /// conflicting/absorbing other errors.
    #[error(transparent)]
    Other(IngestCustomErrorWrapper),
}

impl ChainCommunicationError {
    /// Create a chain communication error from any other existing error
    pub fn from_other<E: IngestCustomError>(err: E) -> Self {
        Self::Other(IngestCustomErrorWrapper(Box::new(err)))
    }

    /// Create a chain communication error from any other existing error
    pub fn from_other_boxed<E: IngestCustomError>(err: Box<E>) -> Self {
        Self::Other(IngestCustomErrorWrapper(err))
    }

    /// Creates a chain communication error of the other error variant from a static string
    pub fn from_other_str(err: &'static str) -> Self {
        #[derive(Debug)]
        #[repr(transparent)]
        struct StringError(&'static str);
        impl Display for StringError {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.0)
            }
        }
        impl StdError for StringError {}

        Self::from_other(StringError(err))
    }

    /// Shorthand for a parse failure attributed to `provider`.
    pub fn parse_failure(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseFailure {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an unsupported operation on `chain`.
    pub fn unsupported(chain: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            chain: chain.into(),
            operation,
        }
    }

    /// Whether the provider which produced this error should be marked
    /// offline.
    pub fn penalizes_provider(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::ParseFailure { .. }
        )
    }

    /// Whether the chain's circuit breaker should count this error as a
    /// failure. Throttling and expected chain conditions do not count.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            Self::RateLimited { .. }
                | Self::CircuitOpen { .. }
                | Self::Transient(_)
                | Self::Unsupported { .. }
        )
    }

    /// Whether retrying the same call against another provider may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::ParseFailure { .. }
                | Self::Transient(_)
        )
    }

    /// How long the caller should back off before trying again, if the
    /// error says so.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

/// Failure reported by a handler for one dispatched batch.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The mapper rejected a record
    #[error("Mapper {mapper} failed: {message}")]
    Mapper {
        /// Mapper name
        mapper: String,
        /// Failure description
        message: String,
    },
    /// The target did not report success
    #[error("Target {target} rejected the batch: {reasons:?}")]
    Publish {
        /// Target name
        target: String,
        /// Reasons reported by the target
        reasons: Vec<String>,
    },
    /// Any other failure inside a handler
    #[error(transparent)]
    Other(#[from] eyre::Report),
}

/// Errors from job execution tracking.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// An execution for this job is already tracked
    #[error("Job {0} is already running")]
    AlreadyRunning(String),
    /// `stop` was called with an execution that is not tracked
    #[error("Execution {execution} of job {job_id} is not tracked")]
    UnknownExecution {
        /// Job id of the execution
        job_id: String,
        /// Execution id
        execution: uuid::Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_does_not_count_towards_breaker() {
        let rate_limited = ChainCommunicationError::RateLimited {
            chain: "ethereum".into(),
            retry_after: Duration::from_millis(10),
        };
        assert!(!rate_limited.counts_as_failure());
        assert!(!rate_limited.penalizes_provider());
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_millis(10)));

        let transient = ChainCommunicationError::Transient("skipped slot".into());
        assert!(!transient.counts_as_failure());
        assert!(!transient.penalizes_provider());
        assert!(transient.is_retryable());
    }

    #[test]
    fn transport_failures_penalize_provider() {
        let timeout = ChainCommunicationError::Timeout {
            provider: "rpc.example.com".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(timeout.penalizes_provider());
        assert!(timeout.counts_as_failure());

        let rpc = ChainCommunicationError::RpcError {
            provider: "rpc.example.com".into(),
            code: -32000,
            message: "header not found".into(),
        };
        assert!(!rpc.penalizes_provider());
        assert!(rpc.counts_as_failure());
    }
}
