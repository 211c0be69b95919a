//! Error types for DID:BTCR resolution operations.
//!
//! Resolution failures are reported through [`ResolutionError`]. Failures of an
//! individual blockchain backend are reported through [`LookupError`] and are
//! wrapped by the resolver together with the locator or transaction id that was
//! being looked up. Both use the `thiserror` crate.

use thiserror::Error;

/// Errors that can occur during DID:BTCR resolution operations
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The method-specific identifier is malformed or carries an unknown magic character
    #[error("Invalid DID:BTCR identifier: {0}")]
    InvalidIdentifier(String),

    /// A blockchain lookup failed while resolving the given locator or transaction
    #[error("Cannot retrieve BTCR data for {target}: {source}")]
    ResolutionFailed {
        target: String,
        #[source]
        source: LookupError,
    },

    /// A transaction was reached twice while following spends
    #[error("Spend chain revisits transaction {0}")]
    SpendCycle(String),

    /// The spend chain is longer than the configured hop limit
    #[error("Spend chain exceeds {0} hops")]
    HopLimitExceeded(usize),

    /// The continuation document host did not answer with 200 OK
    #[error("Cannot retrieve DID DOCUMENT CONTINUATION from {uri}: {reason}")]
    ContinuationUnreachable { uri: String, reason: String },

    /// The continuation document is not a valid DID Document
    #[error("Invalid DID DOCUMENT CONTINUATION at {uri}: {reason}")]
    ContinuationMalformed { uri: String, reason: String },

    /// The driver configuration is incomplete or names an unknown backend
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors reported by a [`BitcoinConnection`](crate::BitcoinConnection) backend
#[derive(Error, Debug)]
pub enum LookupError {
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an unexpected HTTP status
    #[error("Backend returned HTTP {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    /// The JSON-RPC server returned an error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The backend response could not be interpreted
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// No transaction at the requested position or with the requested id
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// The requested block does not exist
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// The backend cannot answer for the requested chain or transaction
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),
}
