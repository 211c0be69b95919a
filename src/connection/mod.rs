//! Access to the Bitcoin blockchain.
//!
//! The resolver only needs three questions answered by the chain: which
//! transaction sits at a position, where a transaction sits, and what BTCR data
//! a transaction carries. [`BitcoinConnection`] captures those questions; each
//! backend (full node RPC, BlockCypher, Esplora) answers them its own way.

mod bitcoind;
mod blockcypher;
mod esplora;
pub(crate) mod script;

pub use bitcoind::BitcoindRpcConnection;
pub use blockcypher::BlockcypherApiConnection;
pub use esplora::EsploraApiConnection;

use std::fmt;

use async_trait::async_trait;
use bitcoin::Txid;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::LookupError;
use crate::txref::{Chain, ChainLocator};

/// Reference to one on-chain transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionRef {
    pub chain: Chain,
    pub txid: Txid,
}

impl TransactionRef {
    pub fn new(chain: Chain, txid: Txid) -> Self {
        Self { chain, txid }
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on chain {}", self.txid, self.chain)
    }
}

/// BTCR data carried by a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcrData {
    /// Public key revealed by the transaction's spending input
    pub input_script_pub_key: Vec<u8>,
    /// URI published in an OP_RETURN output
    pub continuation_uri: Option<String>,
    /// The transaction that spent this transaction's BTCR output
    pub spent_in: Option<TransactionRef>,
}

/// A connection to the Bitcoin blockchain able to answer BTCR lookups
///
/// Implementations must be safe to share between concurrent resolutions.
#[async_trait]
pub trait BitcoinConnection: Send + Sync {
    /// Finds the transaction at a block position
    async fn lookup_chain_and_txid(
        &self,
        locator: &ChainLocator,
    ) -> Result<TransactionRef, LookupError>;

    /// Finds the block position of a transaction
    async fn lookup_chain_and_block_location(
        &self,
        tx: &TransactionRef,
    ) -> Result<ChainLocator, LookupError>;

    /// Extracts BTCR data from a transaction
    ///
    /// Returns `Ok(None)` when the transaction exists but carries nothing that
    /// looks like a BTCR transaction.
    async fn get_btcr_data(&self, tx: &TransactionRef) -> Result<Option<BtcrData>, LookupError>;
}

/// The backends a resolver can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Bitcoind,
    Btcd,
    Bitcoinj,
    BlockcypherApi,
    Esplora,
}

impl Backend {
    /// Parses a configuration discriminator such as `bitcoind` or `blockcypherapi`
    pub fn from_name(name: &str) -> Option<Backend> {
        match name {
            "bitcoind" => Some(Backend::Bitcoind),
            "btcd" => Some(Backend::Btcd),
            "bitcoinj" => Some(Backend::Bitcoinj),
            "blockcypherapi" => Some(Backend::BlockcypherApi),
            "esplora" => Some(Backend::Esplora),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Bitcoind => "bitcoind",
            Backend::Btcd => "btcd",
            Backend::Bitcoinj => "bitcoinj",
            Backend::BlockcypherApi => "blockcypherapi",
            Backend::Esplora => "esplora",
        }
    }
}

async fn checked_get(client: &Client, url: &Url) -> Result<reqwest::Response, LookupError> {
    debug!(%url, "backend request");
    let response = client.get(url.clone()).send().await?;

    if !response.status().is_success() {
        return Err(LookupError::Status {
            endpoint: url.path().to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response)
}

pub(crate) async fn get_json<T: DeserializeOwned>(client: &Client, url: &Url) -> Result<T, LookupError> {
    Ok(checked_get(client, url).await?.json::<T>().await?)
}

pub(crate) async fn get_text(client: &Client, url: &Url) -> Result<String, LookupError> {
    let text = checked_get(client, url).await?.text().await?;
    Ok(text.trim().to_string())
}

pub(crate) fn decode_hex(raw: &str) -> Result<Vec<u8>, LookupError> {
    hex::decode(raw).map_err(|e| LookupError::InvalidResponse(format!("bad hex {}: {}", raw, e)))
}

pub(crate) fn parse_txid(raw: &str) -> Result<Txid, LookupError> {
    raw.parse::<Txid>()
        .map_err(|e| LookupError::InvalidResponse(format!("bad txid {}: {}", raw, e)))
}

pub(crate) fn to_u32(value: u64, what: &str) -> Result<u32, LookupError> {
    u32::try_from(value).map_err(|_| LookupError::InvalidResponse(format!("{} {} out of range", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        for name in ["bitcoind", "btcd", "bitcoinj", "blockcypherapi", "esplora"] {
            assert_eq!(Backend::from_name(name).unwrap().name(), name);
        }
        assert_eq!(Backend::from_name("electrum"), None);
    }

    #[test]
    fn test_transaction_ref_serialization() {
        let txid = parse_txid("f8cdaff3ebd9e862ed5885f8975489090595abe1470397f79780ead1c7528107").unwrap();
        let tx = TransactionRef::new(Chain::Testnet, txid);
        assert_eq!(
            serde_json::to_value(tx).unwrap(),
            serde_json::json!({
                "chain": "TESTNET",
                "txid": "f8cdaff3ebd9e862ed5885f8975489090595abe1470397f79780ead1c7528107"
            })
        );
    }

    #[test]
    fn test_bad_txid() {
        assert!(matches!(parse_txid("xyz"), Err(LookupError::InvalidResponse(_))));
    }
}
