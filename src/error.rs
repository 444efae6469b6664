//! Error taxonomy for platform calls and acquisition runs.
//!
//! Raw platform failures are [`ApiError`]s. The acquisition state machine
//! folds them, after retrying, into an [`AcquireError`] that tells the
//! caller one of three things: retry later (rate limit, capacity), fail
//! permanently (invalid query, no content, contract violation), or the
//! internal retries ran out (acquisition failed).

use thiserror::Error;

use crate::query::QueryError;
use crate::retry::{Classify, FailureType, RetryError};
use crate::snapshot::SnapshotError;

/// Longest response body excerpt carried in an error.
const BODY_EXCERPT_CHARS: usize = 200;

/// Body substrings that mark a rate-limit response.
const RATE_LIMIT_SIGNATURES: &[&str] = &["rate limit exceeded", "too many requests"];

/// Body substrings that mark an over-capacity response.
const CAPACITY_SIGNATURES: &[&str] = &["capacity error", "over capacity"];

/// Errors from a single platform API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure (DNS, connect, TLS, reset)
    #[error("network error calling {endpoint}: {source}")]
    Network {
        /// Endpoint that failed
        endpoint: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx response without a terminal signature
    #[error("HTTP {status} from {endpoint}: {body}")]
    HttpStatus {
        /// Endpoint that failed
        endpoint: String,
        /// HTTP status code
        status: u16,
        /// Start of the response body
        body: String,
    },

    /// A 2xx response whose body could not be understood
    #[error("malformed response from {endpoint}: {reason}")]
    Malformed {
        /// Endpoint that failed
        endpoint: String,
        /// What was wrong with it
        reason: String,
    },

    /// The service reported a rate limit
    #[error("rate limited by {endpoint}: {message}")]
    RateLimited {
        /// Endpoint that failed
        endpoint: String,
        /// Service message
        message: String,
    },

    /// The service reported it is over capacity
    #[error("{endpoint} over capacity: {message}")]
    CapacityExceeded {
        /// Endpoint that failed
        endpoint: String,
        /// Service message
        message: String,
    },

    /// The request itself broke a paginator contract
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Which contract was broken
        reason: String,
    },
}

impl ApiError {
    /// Creates a network error.
    pub fn network(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Classifies a failed response by status and body.
    ///
    /// HTTP 429 and rate-limit messages become [`ApiError::RateLimited`],
    /// capacity messages become [`ApiError::CapacityExceeded`], and
    /// everything else is a transient [`ApiError::HttpStatus`].
    pub fn from_response(endpoint: impl Into<String>, status: u16, body: &str) -> Self {
        let endpoint = endpoint.into();
        let lowered = body.to_lowercase();
        let message = excerpt(body);
        if status == 429 || RATE_LIMIT_SIGNATURES.iter().any(|s| lowered.contains(s)) {
            Self::RateLimited { endpoint, message }
        } else if CAPACITY_SIGNATURES.iter().any(|s| lowered.contains(s)) {
            Self::CapacityExceeded { endpoint, message }
        } else {
            Self::HttpStatus {
                endpoint,
                status,
                body: message,
            }
        }
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

impl Classify for ApiError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Network { .. } | Self::HttpStatus { .. } | Self::Malformed { .. } => {
                FailureType::Transient
            }
            Self::RateLimited { .. } => FailureType::RateLimited,
            Self::CapacityExceeded { .. } => FailureType::CapacityExceeded,
            Self::InvalidRequest { .. } => FailureType::Permanent,
        }
    }
}

/// Errors surfaced by an acquisition run.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The query could not be parsed
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),

    /// The service rate-limited us; retry after a long cooldown
    #[error("{source_label}: rate limited, retry later")]
    RateLimited {
        /// Log label of the entity
        source_label: String,
        /// Underlying response
        #[source]
        cause: ApiError,
    },

    /// The service is over capacity; retry after a long cooldown
    #[error("{source_label}: service over capacity, retry later")]
    CapacityExceeded {
        /// Log label of the entity
        source_label: String,
        /// Underlying response
        #[source]
        cause: ApiError,
    },

    /// Nothing was ever found for any query term
    #[error("{source_label}: no content found")]
    NoContentFound {
        /// Log label of the entity
        source_label: String,
    },

    /// Internal retries ran out
    #[error("{source_label}: acquisition failed after {attempts} attempts")]
    AcquisitionFailed {
        /// Log label of the entity
        source_label: String,
        /// Attempts made on the failing page
        attempts: u32,
        /// Last underlying cause
        #[source]
        cause: ApiError,
    },

    /// A paginator contract was violated
    #[error("{source_label}: {cause}")]
    InvalidRequest {
        /// Log label of the entity
        source_label: String,
        /// Underlying error
        #[source]
        cause: ApiError,
    },

    /// The snapshot could not be read or written
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl AcquireError {
    /// Folds a failed retry loop into the acquisition taxonomy.
    pub fn from_retry(source_label: &str, error: RetryError<ApiError>) -> Self {
        let attempts = error.attempts();
        let source_label = source_label.to_string();
        match error.into_inner() {
            cause @ ApiError::RateLimited { .. } => Self::RateLimited {
                source_label,
                cause,
            },
            cause @ ApiError::CapacityExceeded { .. } => Self::CapacityExceeded {
                source_label,
                cause,
            },
            cause @ ApiError::InvalidRequest { .. } => Self::InvalidRequest {
                source_label,
                cause,
            },
            cause => Self::AcquisitionFailed {
                source_label,
                attempts,
                cause,
            },
        }
    }

    /// Whether an external scheduler should re-invoke after a long cooldown.
    #[must_use]
    pub fn is_retry_later(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::CapacityExceeded { .. })
    }
}
