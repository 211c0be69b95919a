//! Core DID resolution functionality.
//!
//! This module provides the main resolution logic for DID:BTCR identifiers:
//! locating the anchoring transaction, following spends to the current tip,
//! fetching the DID Document continuation the tip points at, and assembling
//! the DID Document together with its chain-of-custody metadata.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::connection::{BitcoinConnection, BtcrData, TransactionRef};
use crate::did::BtcrDid;
use crate::error::{LookupError, ResolutionError};
use crate::txref::ChainLocator;
use crate::types::{
    Authentication, AuthenticationMethod, DIDDocument, MethodMetadata, PublicKey, ResolutionResult,
    ResolverOptions, Service, DIDDOCUMENT_AUTHENTICATION_TYPE, DIDDOCUMENT_PUBLICKEY_TYPE,
};

const CONTINUATION_ACCEPT: &str = "application/did+ld+json, application/ld+json, application/json";

/// Resolver for DID:BTCR identifiers
///
/// A resolver holds no per-resolution state and can be shared between
/// concurrent callers, e.g. behind an `Arc`.
#[derive(Clone)]
pub struct Resolver {
    /// HTTP client for fetching continuation documents
    client: Client,
    /// Blockchain backend
    connection: Arc<dyn BitcoinConnection>,
    options: ResolverOptions,
}

/// Where following spends from the anchoring transaction ended up
#[derive(Debug)]
struct Traversal {
    initial_locator: ChainLocator,
    initial_tx: TransactionRef,
    locator: ChainLocator,
    tx: TransactionRef,
    /// BTCR data of the last transaction examined
    btcr_data: Option<BtcrData>,
    spent_in: Vec<TransactionRef>,
}

impl Resolver {
    /// Creates a resolver on top of `connection` with default options
    pub fn new(connection: Arc<dyn BitcoinConnection>) -> Result<Self, ResolutionError> {
        Self::with_options(connection, ResolverOptions::default())
    }

    /// Creates a resolver with its own HTTP client configured from `options`
    pub fn with_options(
        connection: Arc<dyn BitcoinConnection>,
        options: ResolverOptions,
    ) -> Result<Self, ResolutionError> {
        let client = build_client(&options)?;
        Ok(Self::with_client(client, connection, options))
    }

    /// Creates a resolver sharing an existing HTTP client
    pub fn with_client(
        client: Client,
        connection: Arc<dyn BitcoinConnection>,
        options: ResolverOptions,
    ) -> Self {
        Self { client, connection, options }
    }

    /// Creates a resolver and the backend named by `config`, sharing one HTTP client
    pub fn from_config(config: &DriverConfig, options: ResolverOptions) -> Result<Self, ResolutionError> {
        let client = build_client(&options)?;
        let connection = config.connect(client.clone())?;
        Ok(Self::with_client(client, connection, options))
    }

    /// Resolves a DID:BTCR identifier
    ///
    /// Returns `Ok(None)` when `did` is not a DID:BTCR identifier at all.
    ///
    /// # Example
    /// ```no_run
    /// use btcr_resolver::{DriverConfig, Resolver, ResolverOptions};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let resolver = Resolver::from_config(&DriverConfig::default(), ResolverOptions::default())?;
    ///     if let Some(result) = resolver.resolve("did:btcr:xz35-jznz-q6mr-7q6").await? {
    ///         println!("Resolved DID Document: {:?}", result.did_document);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn resolve(&self, did: &str) -> Result<Option<ResolutionResult>, ResolutionError> {
        if BtcrDid::matches(did).is_none() {
            return Ok(None);
        }
        let btcr_did = BtcrDid::parse(did)?;
        let txref = btcr_did.txref();

        let traversal = self.follow_tip(&btcr_did).await?;
        info!(
            %txref,
            txid = %traversal.tx.txid,
            chain = %traversal.locator.chain,
            hops = traversal.spent_in.len(),
            found = traversal.btcr_data.is_some(),
            "retrieved BTCR data"
        );

        let continuation_uri = traversal
            .btcr_data
            .as_ref()
            .and_then(|data| data.continuation_uri.as_deref());
        let continuation = match continuation_uri {
            Some(uri) => {
                let document = self.fetch_continuation(uri).await?;
                info!(%txref, uri, "retrieved DID DOCUMENT CONTINUATION");
                Some(document)
            }
            None => None,
        };

        Ok(Some(assemble(did, traversal, continuation)))
    }

    /// Follows "spent by" pointers from the anchoring transaction to the tip
    async fn follow_tip(&self, did: &BtcrDid) -> Result<Traversal, ResolutionError> {
        let initial_locator = did.locator;
        let initial_tx = self
            .connection
            .lookup_chain_and_txid(&initial_locator)
            .await
            .map_err(|source| failed(did.txref(), source))?;

        let mut locator = initial_locator;
        let mut tx = initial_tx;
        let mut spent_in = Vec::new();
        let mut visited = HashSet::from([initial_tx.txid]);

        let btcr_data = loop {
            let data = self
                .connection
                .get_btcr_data(&tx)
                .await
                .map_err(|source| failed(tx.to_string(), source))?;

            let Some(data) = data else {
                debug!(txid = %tx.txid, "no BTCR data");
                break None;
            };
            let Some(next) = data.spent_in else {
                break Some(data);
            };

            if !visited.insert(next.txid) {
                return Err(ResolutionError::SpendCycle(next.txid.to_string()));
            }
            if spent_in.len() >= self.options.max_hops {
                return Err(ResolutionError::HopLimitExceeded(self.options.max_hops));
            }

            debug!(from = %tx.txid, to = %next.txid, "following spend");
            spent_in.push(next);
            tx = next;
            locator = self
                .connection
                .lookup_chain_and_block_location(&tx)
                .await
                .map_err(|source| failed(tx.to_string(), source))?;
        };

        Ok(Traversal { initial_locator, initial_tx, locator, tx, btcr_data, spent_in })
    }

    /// Fetches and parses a DID Document continuation
    async fn fetch_continuation(&self, uri: &str) -> Result<DIDDocument, ResolutionError> {
        let unreachable = |reason: String| ResolutionError::ContinuationUnreachable {
            uri: uri.to_string(),
            reason,
        };
        let malformed = |reason: String| ResolutionError::ContinuationMalformed {
            uri: uri.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(uri)
            .header(ACCEPT, CONTINUATION_ACCEPT)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(unreachable(format!("HTTP {}", response.status())));
        }

        let limit = self.options.max_continuation_size;
        let too_large = || malformed(format!("body exceeds {} bytes", limit));
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| unreachable(e.to_string()))? {
            if body.len() + chunk.len() > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        let value: Value = serde_json::from_slice(&body).map_err(|e| malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(malformed("not a JSON object".to_string()));
        }

        DIDDocument::from_json_object(value).map_err(|e| malformed(e.to_string()))
    }
}

fn build_client(options: &ResolverOptions) -> Result<Client, ResolutionError> {
    Client::builder()
        .timeout(options.timeout)
        .build()
        .map_err(|e| ResolutionError::Configuration(format!("failed to build HTTP client: {}", e)))
}

fn failed(target: String, source: LookupError) -> ResolutionError {
    ResolutionError::ResolutionFailed { target, source }
}

/// Builds the DID Document and method metadata from a finished traversal
///
/// The on-chain key comes first, followed by the continuation's keys; services
/// come from the continuation only. A DID whose BTCR output was spent without
/// a continuation at the tip is revoked and has no document.
fn assemble(did: &str, traversal: Traversal, continuation: Option<DIDDocument>) -> ResolutionResult {
    let mut public_key = Vec::new();
    let mut authentication = Vec::new();

    if let Some(data) = &traversal.btcr_data {
        let key_id = format!("{}#key-1", did);
        public_key.push(PublicKey {
            id: Some(key_id.clone()),
            key_type: DIDDOCUMENT_PUBLICKEY_TYPE.to_string(),
            controller: None,
            public_key_hex: Some(hex::encode(&data.input_script_pub_key)),
            extra: Map::new(),
        });
        authentication.push(Authentication::Method(AuthenticationMethod {
            method_type: DIDDOCUMENT_AUTHENTICATION_TYPE.to_string(),
            public_key: Some(key_id),
            extra: Map::new(),
        }));
    }

    let mut service: Vec<Service> = Vec::new();
    if let Some(continuation) = &continuation {
        public_key.extend(continuation.public_key.iter().cloned());
        authentication.extend(continuation.authentication.iter().cloned());
        service = continuation.service.clone();
    }

    let mut document = DIDDocument::new(did);
    document.public_key = public_key;
    document.authentication = authentication;
    document.service = service;

    let spent = !traversal.spent_in.is_empty();
    let revoked = spent && continuation.is_none();
    let anchored = spent || traversal.btcr_data.is_some();
    let did_document = (anchored && !revoked).then_some(document);

    let method_metadata = MethodMetadata {
        input_script_pub_key: traversal
            .btcr_data
            .as_ref()
            .map(|data| hex::encode(&data.input_script_pub_key)),
        continuation_uri: traversal
            .btcr_data
            .as_ref()
            .and_then(|data| data.continuation_uri.clone()),
        continuation,
        chain: traversal.locator.chain,
        initial_block_height: traversal.initial_locator.block_height,
        initial_block_index: traversal.initial_locator.block_index,
        initial_txid: traversal.initial_tx,
        block_height: traversal.locator.block_height,
        block_index: traversal.locator.block_index,
        txid: traversal.tx,
        spent_in_chain_and_txids: traversal.spent_in,
    };

    ResolutionResult { did_document, method_metadata }
}

/// Convenience function resolving a DID with the backend configured in the environment
pub async fn resolve_did(did: &str) -> Result<Option<ResolutionResult>, ResolutionError> {
    let resolver = Resolver::from_config(&DriverConfig::from_env()?, ResolverOptions::default())?;
    resolver.resolve(did).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txref::Chain;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn tx(n: u8) -> TransactionRef {
        TransactionRef::new(Chain::Testnet, Txid::from_byte_array([n; 32]))
    }

    fn traversal(btcr_data: Option<BtcrData>, spent_in: Vec<TransactionRef>) -> Traversal {
        let initial_locator = ChainLocator::new(Chain::Testnet, 1201739, 8);
        Traversal {
            initial_locator,
            initial_tx: tx(1),
            locator: ChainLocator::new(Chain::Testnet, 1201800 + spent_in.len() as u32, 2),
            tx: spent_in.last().copied().unwrap_or_else(|| tx(1)),
            btcr_data,
            spent_in,
        }
    }

    fn data(uri: Option<&str>) -> BtcrData {
        BtcrData {
            input_script_pub_key: vec![0x02; 33],
            continuation_uri: uri.map(String::from),
            spent_in: None,
        }
    }

    #[test]
    fn test_unspent_without_continuation() {
        let result = assemble("did:btcr:x", traversal(Some(data(None)), vec![]), None);
        let document = result.did_document.unwrap();

        assert_eq!(document.id.as_deref(), Some("did:btcr:x"));
        assert_eq!(document.public_key.len(), 1);
        assert_eq!(document.public_key[0].id.as_deref(), Some("did:btcr:x#key-1"));
        assert_eq!(document.public_key[0].public_key_hex, Some(format!("02{}", "02".repeat(32))));
        assert!(document.service.is_empty());
        assert_eq!(result.method_metadata.initial_block_height, 1201739);
        assert_eq!(result.method_metadata.initial_block_index, 8);
    }

    #[test]
    fn test_spent_without_continuation_is_revoked() {
        let result = assemble("did:btcr:x", traversal(Some(data(None)), vec![tx(2), tx(3)]), None);

        assert_eq!(result.did_document, None);
        assert_eq!(result.method_metadata.spent_in_chain_and_txids, vec![tx(2), tx(3)]);
        assert_eq!(result.method_metadata.txid, tx(3));
        assert!(result.method_metadata.input_script_pub_key.is_some());
    }

    #[test]
    fn test_no_btcr_data() {
        let result = assemble("did:btcr:x", traversal(None, vec![]), None);

        assert_eq!(result.did_document, None);
        assert_eq!(result.method_metadata.input_script_pub_key, None);
        assert_eq!(result.method_metadata.initial_txid, tx(1));
    }

    #[test]
    fn test_continuation_merge_order() {
        let continuation = DIDDocument::from_json_object(serde_json::json!({
            "publicKey": [{ "id": "did:btcr:x#satoshi", "type": "EcdsaSecp256k1VerificationKey2019" }],
            "authentication": ["did:btcr:x#satoshi"],
            "service": [{ "type": "AgentService", "serviceEndpoint": "https://agent.example.com" }]
        }))
        .unwrap();

        let result = assemble(
            "did:btcr:x",
            traversal(Some(data(Some("https://example.com/ddo"))), vec![tx(2)]),
            Some(continuation.clone()),
        );
        let document = result.did_document.unwrap();

        let ids: Vec<_> = document.public_key.iter().map(|k| k.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["did:btcr:x#key-1", "did:btcr:x#satoshi"]);
        assert_eq!(document.authentication.len(), 2);
        assert_eq!(document.authentication[1], Authentication::Reference("did:btcr:x#satoshi".to_string()));
        assert_eq!(document.service, continuation.service);
        assert_eq!(result.method_metadata.continuation, Some(continuation));
        assert_eq!(result.method_metadata.continuation_uri.as_deref(), Some("https://example.com/ddo"));
    }
}
