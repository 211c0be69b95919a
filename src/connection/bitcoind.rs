//! Full node JSON-RPC backend (bitcoind, btcd).
//!
//! Transaction lookups by id need a node running with `-txindex`. A node
//! keeps no index of which transaction spent an output, so this backend can
//! tell that a BTCR output is spent but not by whom. A spent BTCR output is
//! therefore a lookup error, never a tip.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::{decode_hex, parse_txid, script, to_u32, BitcoinConnection, BtcrData, TransactionRef};
use crate::error::LookupError;
use crate::txref::{Chain, ChainLocator};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Block {
    height: u64,
    tx: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    #[serde(default)]
    blockhash: Option<String>,
    vin: Vec<RawTxIn>,
    vout: Vec<RawTxOut>,
}

#[derive(Debug, Deserialize)]
struct RawTxIn {
    #[serde(rename = "scriptSig", default)]
    script_sig: Option<HexScript>,
    #[serde(default)]
    txinwitness: Vec<String>,
    #[serde(default)]
    coinbase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTxOut {
    n: u32,
    #[serde(rename = "scriptPubKey")]
    script_pubkey: HexScript,
}

#[derive(Debug, Deserialize)]
struct HexScript {
    hex: String,
}

/// Connection to bitcoind (or btcd) over JSON-RPC
#[derive(Debug, Clone)]
pub struct BitcoindRpcConnection {
    client: Client,
    rpc_url_mainnet: Option<Url>,
    rpc_url_testnet: Option<Url>,
}

impl BitcoindRpcConnection {
    /// Creates a connection using the given RPC endpoints
    ///
    /// Credentials are taken from the user info part of each URL.
    pub fn new(client: Client, rpc_url_mainnet: Option<Url>, rpc_url_testnet: Option<Url>) -> Self {
        Self { client, rpc_url_mainnet, rpc_url_testnet }
    }

    fn endpoint(&self, chain: Chain) -> Result<&Url, LookupError> {
        match chain {
            Chain::Mainnet => self.rpc_url_mainnet.as_ref(),
            Chain::Testnet => self.rpc_url_testnet.as_ref(),
        }
        .ok_or_else(|| LookupError::Unavailable(format!("no RPC URL configured for {}", chain)))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        chain: Chain,
        method: &str,
        params: Value,
    ) -> Result<T, LookupError> {
        let endpoint = self.endpoint(chain)?;
        let mut url = endpoint.clone();
        if url.set_username("").is_err() || url.set_password(None).is_err() {
            return Err(LookupError::Unavailable(format!("RPC URL for {} cannot carry credentials", chain)));
        }

        debug!(%chain, method, "bitcoind RPC call");
        let mut request = self.client.post(url).json(&json!({
            "jsonrpc": "1.0",
            "id": "btcr-resolver",
            "method": method,
            "params": params,
        }));
        if !endpoint.username().is_empty() {
            request = request.basic_auth(endpoint.username(), endpoint.password());
        }

        // bitcoind answers RPC errors with HTTP 500 and a JSON body
        let response = request.send().await?;
        let status = response.status();
        let body: RpcResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(LookupError::Status { endpoint: method.to_string(), status: status.as_u16() })
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(error) = body.error {
            return Err(LookupError::Rpc { code: error.code, message: error.message });
        }
        serde_json::from_value(body.result)
            .map_err(|e| LookupError::InvalidResponse(format!("{}: {}", method, e)))
    }

    async fn get_block(&self, chain: Chain, block_hash: &str) -> Result<Block, LookupError> {
        self.call(chain, "getblock", json!([block_hash, 1])).await
    }

    async fn get_raw_transaction(&self, tx: &TransactionRef) -> Result<RawTransaction, LookupError> {
        match self.call(tx.chain, "getrawtransaction", json!([tx.txid.to_string(), true])).await {
            Err(LookupError::Rpc { code: -5, .. }) => Err(LookupError::TransactionNotFound(tx.txid.to_string())),
            other => other,
        }
    }
}

#[async_trait]
impl BitcoinConnection for BitcoindRpcConnection {
    async fn lookup_chain_and_txid(
        &self,
        locator: &ChainLocator,
    ) -> Result<TransactionRef, LookupError> {
        let block_hash: String = match self.call(locator.chain, "getblockhash", json!([locator.block_height])).await {
            Err(LookupError::Rpc { code: -8, .. }) => {
                return Err(LookupError::BlockNotFound(locator.block_height.to_string()))
            }
            other => other?,
        };

        let block = self.get_block(locator.chain, &block_hash).await?;
        let txid = block
            .tx
            .get(locator.block_index as usize)
            .ok_or_else(|| LookupError::TransactionNotFound(locator.to_string()))?;

        Ok(TransactionRef::new(locator.chain, parse_txid(txid)?))
    }

    async fn lookup_chain_and_block_location(
        &self,
        tx: &TransactionRef,
    ) -> Result<ChainLocator, LookupError> {
        let raw = self.get_raw_transaction(tx).await?;
        let block_hash = raw.blockhash.ok_or_else(|| {
            LookupError::InvalidResponse(format!("transaction {} is not confirmed", tx.txid))
        })?;

        let block = self.get_block(tx.chain, &block_hash).await?;
        let wanted = tx.txid.to_string();
        let index = block
            .tx
            .iter()
            .position(|t| *t == wanted)
            .ok_or_else(|| LookupError::TransactionNotFound(wanted.clone()))?;

        Ok(ChainLocator::new(tx.chain, to_u32(block.height, "block height")?, to_u32(index as u64, "block index")?))
    }

    async fn get_btcr_data(&self, tx: &TransactionRef) -> Result<Option<BtcrData>, LookupError> {
        let raw = self.get_raw_transaction(tx).await?;

        let mut input_script_pub_key = None;
        for input in raw.vin.iter().filter(|i| i.coinbase.is_none()) {
            let script_sig = match &input.script_sig {
                Some(script) => decode_hex(&script.hex)?,
                None => Vec::new(),
            };
            let witness = input
                .txinwitness
                .iter()
                .map(|w| decode_hex(w))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(key) = script::spending_public_key(&script_sig, &witness) {
                input_script_pub_key = Some(key);
                break;
            }
        }

        let Some(input_script_pub_key) = input_script_pub_key else {
            debug!(txid = %tx.txid, "no spending public key in transaction");
            return Ok(None);
        };

        let mut continuation_uri = None;
        let mut btcr_output = None;
        for output in &raw.vout {
            let script_pubkey = decode_hex(&output.script_pubkey.hex)?;
            if script::is_null_data(&script_pubkey) {
                if continuation_uri.is_none() {
                    continuation_uri = script::continuation_uri(&script_pubkey);
                }
            } else if btcr_output.is_none() {
                btcr_output = Some(output.n);
            }
        }

        if let Some(n) = btcr_output {
            let utxo: Value = self.call(tx.chain, "gettxout", json!([tx.txid.to_string(), n])).await?;
            if utxo.is_null() {
                return Err(LookupError::Unavailable(format!(
                    "{} vout {} is spent but the node cannot report the spender",
                    tx.txid, n
                )));
            }
        }

        Ok(Some(BtcrData { input_script_pub_key, continuation_uri, spent_in: None }))
    }
}
