//! BlockCypher REST API backend.
//!
//! BlockCypher reports which transaction spent each output (`spent_by`), so
//! this backend can follow a BTCR spend chain without a local index.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{decode_hex, get_json, parse_txid, script, to_u32, BitcoinConnection, BtcrData, TransactionRef};
use crate::error::LookupError;
use crate::txref::{Chain, ChainLocator};

/// Public BlockCypher endpoint
pub const BLOCKCYPHER_API_URL: &str = "https://api.blockcypher.com/v1/btc/";

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(default)]
    txids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Tx {
    #[serde(default)]
    block_height: Option<i64>,
    #[serde(default)]
    block_index: Option<i64>,
    #[serde(default)]
    inputs: Vec<TxInput>,
    #[serde(default)]
    outputs: Vec<TxOutput>,
}

#[derive(Debug, Deserialize)]
struct TxInput {
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    witness: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TxOutput {
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    script_type: Option<String>,
    #[serde(default)]
    data_string: Option<String>,
    #[serde(default)]
    spent_by: Option<String>,
}

impl TxOutput {
    fn is_null_data(&self) -> Result<bool, LookupError> {
        if self.script_type.as_deref() == Some("null-data") {
            return Ok(true);
        }
        match &self.script {
            Some(hex) => Ok(script::is_null_data(&decode_hex(hex)?)),
            None => Ok(false),
        }
    }

    fn continuation_uri(&self) -> Result<Option<String>, LookupError> {
        if let Some(data) = &self.data_string {
            return Ok(Some(data.trim().to_string()).filter(|s| !s.is_empty()));
        }
        match &self.script {
            Some(hex) => Ok(script::continuation_uri(&decode_hex(hex)?)),
            None => Ok(None),
        }
    }
}

/// Connection backed by the BlockCypher API
#[derive(Debug, Clone)]
pub struct BlockcypherApiConnection {
    client: Client,
    base_url: Url,
}

impl BlockcypherApiConnection {
    /// Creates a connection to the public BlockCypher API
    pub fn new(client: Client) -> Result<Self, LookupError> {
        Self::with_base_url(client, BLOCKCYPHER_API_URL)
    }

    /// Creates a connection to a BlockCypher compatible API at `base_url`
    pub fn with_base_url(client: Client, base_url: &str) -> Result<Self, LookupError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Ok(Self { client, base_url })
    }

    fn network(chain: Chain) -> &'static str {
        match chain {
            Chain::Mainnet => "main",
            Chain::Testnet => "test3",
        }
    }

    fn url(&self, chain: Chain, path: &str) -> Result<Url, LookupError> {
        Ok(self.base_url.join(&format!("{}/{}", Self::network(chain), path))?)
    }

    async fn get_tx(&self, tx: &TransactionRef) -> Result<Tx, LookupError> {
        let url = self.url(tx.chain, &format!("txs/{}?limit=500", tx.txid))?;
        match get_json::<Tx>(&self.client, &url).await {
            Err(LookupError::Status { status: 404, .. }) => {
                Err(LookupError::TransactionNotFound(tx.txid.to_string()))
            }
            other => other,
        }
    }
}

#[async_trait]
impl BitcoinConnection for BlockcypherApiConnection {
    async fn lookup_chain_and_txid(
        &self,
        locator: &ChainLocator,
    ) -> Result<TransactionRef, LookupError> {
        let url = self.url(
            locator.chain,
            &format!("blocks/{}?txstart={}&limit=1", locator.block_height, locator.block_index),
        )?;
        let block: Block = match get_json(&self.client, &url).await {
            Err(LookupError::Status { status: 404, .. }) => {
                return Err(LookupError::BlockNotFound(locator.block_height.to_string()))
            }
            other => other?,
        };

        let txid = block
            .txids
            .first()
            .ok_or_else(|| LookupError::TransactionNotFound(locator.to_string()))?;
        Ok(TransactionRef::new(locator.chain, parse_txid(txid)?))
    }

    async fn lookup_chain_and_block_location(
        &self,
        tx: &TransactionRef,
    ) -> Result<ChainLocator, LookupError> {
        let found = self.get_tx(tx).await?;

        let (height, index) = match (found.block_height, found.block_index) {
            (Some(h), Some(i)) if h >= 0 && i >= 0 => (h as u64, i as u64),
            _ => {
                return Err(LookupError::InvalidResponse(format!(
                    "transaction {} is not confirmed",
                    tx.txid
                )))
            }
        };

        Ok(ChainLocator::new(tx.chain, to_u32(height, "block height")?, to_u32(index, "block index")?))
    }

    async fn get_btcr_data(&self, tx: &TransactionRef) -> Result<Option<BtcrData>, LookupError> {
        let found = self.get_tx(tx).await?;

        let mut input_script_pub_key = None;
        for input in &found.inputs {
            let script_sig = match &input.script {
                Some(hex) => decode_hex(hex)?,
                None => Vec::new(),
            };
            let witness = input
                .witness
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
        let mut spent_in = None;
        let mut seen_btcr_output = false;
        for output in &found.outputs {
            if output.is_null_data()? {
                if continuation_uri.is_none() {
                    continuation_uri = output.continuation_uri()?;
                }
            } else if !seen_btcr_output {
                seen_btcr_output = true;
                if let Some(spender) = &output.spent_by {
                    spent_in = Some(TransactionRef::new(tx.chain, parse_txid(spender)?));
                }
            }
        }

        Ok(Some(BtcrData { input_script_pub_key, continuation_uri, spent_in }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TXID: &str = "f8cdaff3ebd9e862ed5885f8975489090595abe1470397f79780ead1c7528107";
    const SPENDER: &str = "67c0ee676221d9e0e08b98a55a8bf8add9cba854f13dda393e38ffa1b982b833";
    const PUBKEY: &str = "0280e0b456b9e97eccf1ec0b4b4e6d5a5b3ae5a1c7e3f0e0fd9e8d1c8e0b2a6f17";

    fn connection(server: &MockServer) -> BlockcypherApiConnection {
        BlockcypherApiConnection::with_base_url(Client::new(), &server.uri()).unwrap()
    }

    fn tx_ref() -> TransactionRef {
        TransactionRef::new(Chain::Testnet, parse_txid(TXID).unwrap())
    }

    #[tokio::test]
    async fn test_lookup_txid_by_position() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test3/blocks/1201739"))
            .and(query_param("txstart", "8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "txids": [TXID] })))
            .mount(&server)
            .await;

        let locator = ChainLocator::new(Chain::Testnet, 1201739, 8);
        let tx = connection(&server).lookup_chain_and_txid(&locator).await.unwrap();
        assert_eq!(tx, tx_ref());
    }

    #[tokio::test]
    async fn test_lookup_block_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/test3/txs/{}", TXID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "block_height": 1201739,
                "block_index": 8
            })))
            .mount(&server)
            .await;

        let locator = connection(&server).lookup_chain_and_block_location(&tx_ref()).await.unwrap();
        assert_eq!(locator, ChainLocator::new(Chain::Testnet, 1201739, 8));
    }

    #[tokio::test]
    async fn test_extract_btcr_data() {
        let server = MockServer::start().await;
        let script_sig = format!("47{}21{}", "30".repeat(71), PUBKEY);
        Mock::given(method("GET"))
            .and(path(format!("/test3/txs/{}", TXID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "block_height": 1201739,
                "block_index": 8,
                "inputs": [{ "script": script_sig }],
                "outputs": [
                    {
                        "script": "76a914000102030405060708090a0b0c0d0e0f1011121388ac",
                        "script_type": "pay-to-pubkey-hash",
                        "spent_by": SPENDER
                    },
                    {
                        "script": "6a",
                        "script_type": "null-data",
                        "data_string": "https://pastebin.com/raw/s6GT5J5p"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let data = connection(&server).get_btcr_data(&tx_ref()).await.unwrap().unwrap();
        assert_eq!(hex::encode(&data.input_script_pub_key), PUBKEY);
        assert_eq!(data.continuation_uri.as_deref(), Some("https://pastebin.com/raw/s6GT5J5p"));
        assert_eq!(data.spent_in.unwrap().txid.to_string(), SPENDER);
    }

    #[tokio::test]
    async fn test_coinbase_has_no_btcr_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/test3/txs/{}", TXID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "inputs": [{ "script": "03a1b2c3" }],
                "outputs": [{ "script": "51" }]
            })))
            .mount(&server)
            .await;

        assert_eq!(connection(&server).get_btcr_data(&tx_ref()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = connection(&server).get_btcr_data(&tx_ref()).await.unwrap_err();
        assert!(matches!(err, LookupError::TransactionNotFound(_)));
    }
}
