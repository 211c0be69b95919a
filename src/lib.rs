//! A pure resolver implementation for the DID:BTCR (Bitcoin Reference) method.
//!
//! A DID:BTCR identifier encodes the position of a Bitcoin transaction. This
//! library resolves such an identifier by following the chain of transactions
//! that spent the anchoring output to the current tip, fetching the DID
//! Document continuation the tip publishes, and merging it with the key
//! revealed on chain. It never writes to the blockchain.

mod config;
mod connection;
mod did;
mod error;
mod resolver;
mod txref;
mod types;

pub use config::DriverConfig;
pub use connection::{
    Backend, BitcoinConnection, BitcoindRpcConnection, BlockcypherApiConnection, BtcrData,
    EsploraApiConnection, TransactionRef,
};
pub use did::{BtcrDid, DID_BTCR_PREFIX};
pub use error::{LookupError, ResolutionError};
pub use resolver::{resolve_did, Resolver};
pub use txref::{decode, decode_txref, encode, encode_txref, Chain, ChainLocator};
pub use types::{
    Authentication, AuthenticationMethod, DIDDocument, MethodMetadata, PublicKey, ResolutionResult,
    ResolverOptions, Service,
};

/// Resolves a DID:BTCR identifier using the backend configured in the environment
///
/// Returns `Ok(None)` for identifiers of other DID methods.
///
/// # Example
/// ```no_run
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let result = btcr_resolver::resolve("did:btcr:xz35-jznz-q6mr-7q6").await?;
///
///     if let Some(result) = result {
///         println!("{}", result.to_json()?);
///     }
///     Ok(())
/// }
/// ```
pub async fn resolve(did: &str) -> Result<Option<ResolutionResult>, ResolutionError> {
    resolve_did(did).await
}
