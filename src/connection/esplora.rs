//! Esplora REST API backend (blockstream.info and compatible servers).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{
    decode_hex, get_json, get_text, parse_txid, script, to_u32, BitcoinConnection, BtcrData,
    TransactionRef,
};
use crate::error::LookupError;
use crate::txref::{Chain, ChainLocator};

pub const ESPLORA_MAINNET_URL: &str = "https://blockstream.info/api/";
pub const ESPLORA_TESTNET_URL: &str = "https://blockstream.info/testnet/api/";

#[derive(Debug, Deserialize)]
struct TxStatus {
    confirmed: bool,
    #[serde(default)]
    block_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tx {
    #[serde(default)]
    vin: Vec<TxIn>,
    #[serde(default)]
    vout: Vec<TxOut>,
}

#[derive(Debug, Deserialize)]
struct TxIn {
    #[serde(default)]
    scriptsig: String,
    #[serde(default)]
    witness: Vec<String>,
    #[serde(default)]
    is_coinbase: bool,
}

#[derive(Debug, Deserialize)]
struct TxOut {
    scriptpubkey: String,
}

#[derive(Debug, Deserialize)]
struct Outspend {
    spent: bool,
    #[serde(default)]
    txid: Option<String>,
}

/// Connection backed by an Esplora HTTP API
#[derive(Debug, Clone)]
pub struct EsploraApiConnection {
    client: Client,
    mainnet_url: Url,
    testnet_url: Url,
}

impl EsploraApiConnection {
    /// Creates a connection to the public blockstream.info API
    pub fn new(client: Client) -> Result<Self, LookupError> {
        Self::with_base_urls(client, ESPLORA_MAINNET_URL, ESPLORA_TESTNET_URL)
    }

    /// Creates a connection to Esplora servers at the given base URLs
    pub fn with_base_urls(client: Client, mainnet: &str, testnet: &str) -> Result<Self, LookupError> {
        Ok(Self {
            client,
            mainnet_url: directory_url(mainnet)?,
            testnet_url: directory_url(testnet)?,
        })
    }

    fn url(&self, chain: Chain, path: &str) -> Result<Url, LookupError> {
        let base = match chain {
            Chain::Mainnet => &self.mainnet_url,
            Chain::Testnet => &self.testnet_url,
        };
        Ok(base.join(path)?)
    }

    async fn block_txids(&self, chain: Chain, block_hash: &str) -> Result<Vec<String>, LookupError> {
        let url = self.url(chain, &format!("block/{}/txids", block_hash))?;
        get_json(&self.client, &url).await
    }
}

fn directory_url(raw: &str) -> Result<Url, LookupError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

fn not_found_as(err: LookupError, what: impl FnOnce() -> LookupError) -> LookupError {
    match err {
        LookupError::Status { status: 404, .. } => what(),
        other => other,
    }
}

#[async_trait]
impl BitcoinConnection for EsploraApiConnection {
    async fn lookup_chain_and_txid(
        &self,
        locator: &ChainLocator,
    ) -> Result<TransactionRef, LookupError> {
        let url = self.url(locator.chain, &format!("block-height/{}", locator.block_height))?;
        let block_hash = get_text(&self.client, &url)
            .await
            .map_err(|e| not_found_as(e, || LookupError::BlockNotFound(locator.block_height.to_string())))?;

        let url = self.url(locator.chain, &format!("block/{}/txid/{}", block_hash, locator.block_index))?;
        let txid = get_text(&self.client, &url)
            .await
            .map_err(|e| not_found_as(e, || LookupError::TransactionNotFound(locator.to_string())))?;

        Ok(TransactionRef::new(locator.chain, parse_txid(&txid)?))
    }

    async fn lookup_chain_and_block_location(
        &self,
        tx: &TransactionRef,
    ) -> Result<ChainLocator, LookupError> {
        let url = self.url(tx.chain, &format!("tx/{}/status", tx.txid))?;
        let status: TxStatus = get_json(&self.client, &url)
            .await
            .map_err(|e| not_found_as(e, || LookupError::TransactionNotFound(tx.txid.to_string())))?;

        let block_hash = match (status.confirmed, status.block_hash) {
            (true, Some(hash)) => hash,
            _ => {
                return Err(LookupError::InvalidResponse(format!(
                    "transaction {} is not confirmed",
                    tx.txid
                )))
            }
        };

        let url = self.url(tx.chain, &format!("block/{}", block_hash))?;
        let header: serde_json::Value = get_json(&self.client, &url).await?;
        let height = header
            .get("height")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| LookupError::InvalidResponse(format!("block {} without height", block_hash)))?;

        let wanted = tx.txid.to_string();
        let index = self
            .block_txids(tx.chain, &block_hash)
            .await?
            .iter()
            .position(|t| *t == wanted)
            .ok_or_else(|| LookupError::TransactionNotFound(wanted.clone()))?;

        Ok(ChainLocator::new(tx.chain, to_u32(height, "block height")?, to_u32(index as u64, "block index")?))
    }

    async fn get_btcr_data(&self, tx: &TransactionRef) -> Result<Option<BtcrData>, LookupError> {
        let url = self.url(tx.chain, &format!("tx/{}", tx.txid))?;
        let found: Tx = get_json(&self.client, &url)
            .await
            .map_err(|e| not_found_as(e, || LookupError::TransactionNotFound(tx.txid.to_string())))?;

        let mut input_script_pub_key = None;
        for input in found.vin.iter().filter(|i| !i.is_coinbase) {
            let witness = input
                .witness
                .iter()
                .map(|w| decode_hex(w))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(key) = script::spending_public_key(&decode_hex(&input.scriptsig)?, &witness) {
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
        for (vout, output) in found.vout.iter().enumerate() {
            let script_pubkey = decode_hex(&output.scriptpubkey)?;
            if script::is_null_data(&script_pubkey) {
                if continuation_uri.is_none() {
                    continuation_uri = script::continuation_uri(&script_pubkey);
                }
            } else if btcr_output.is_none() {
                btcr_output = Some(vout);
            }
        }

        let spent_in = match btcr_output {
            Some(vout) => {
                let url = self.url(tx.chain, &format!("tx/{}/outspend/{}", tx.txid, vout))?;
                let outspend: Outspend = get_json(&self.client, &url).await?;
                match (outspend.spent, outspend.txid) {
                    (true, Some(spender)) => Some(TransactionRef::new(tx.chain, parse_txid(&spender)?)),
                    _ => None,
                }
            }
            None => None,
        };

        Ok(Some(BtcrData { input_script_pub_key, continuation_uri, spent_in }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TXID: &str = "f8cdaff3ebd9e862ed5885f8975489090595abe1470397f79780ead1c7528107";
    const OTHER: &str = "67c0ee676221d9e0e08b98a55a8bf8add9cba854f13dda393e38ffa1b982b833";
    const BLOCK: &str = "000000000000003b1c2a4f2a1ff1b3c2e6c1e26f04fe1d3f6b5aab2bd60e0d35";
    const PUBKEY: &str = "0280e0b456b9e97eccf1ec0b4b4e6d5a5b3ae5a1c7e3f0e0fd9e8d1c8e0b2a6f17";

    fn connection(server: &MockServer) -> EsploraApiConnection {
        let testnet = format!("{}/testnet/api", server.uri());
        EsploraApiConnection::with_base_urls(Client::new(), &server.uri(), &testnet).unwrap()
    }

    fn tx_ref() -> TransactionRef {
        TransactionRef::new(Chain::Testnet, parse_txid(TXID).unwrap())
    }

    async fn mount(server: &MockServer, at: String, body: ResponseTemplate) {
        Mock::given(method("GET")).and(path(at)).respond_with(body).mount(server).await;
    }

    #[tokio::test]
    async fn test_lookup_txid_by_position() {
        let server = MockServer::start().await;
        mount(&server, "/testnet/api/block-height/1201739".into(), ResponseTemplate::new(200).set_body_string(BLOCK)).await;
        mount(&server, format!("/testnet/api/block/{}/txid/8", BLOCK), ResponseTemplate::new(200).set_body_string(TXID)).await;

        let locator = ChainLocator::new(Chain::Testnet, 1201739, 8);
        assert_eq!(connection(&server).lookup_chain_and_txid(&locator).await.unwrap(), tx_ref());
    }

    #[tokio::test]
    async fn test_lookup_block_location() {
        let server = MockServer::start().await;
        mount(
            &server,
            format!("/testnet/api/tx/{}/status", TXID),
            ResponseTemplate::new(200).set_body_json(json!({ "confirmed": true, "block_hash": BLOCK })),
        )
        .await;
        mount(
            &server,
            format!("/testnet/api/block/{}", BLOCK),
            ResponseTemplate::new(200).set_body_json(json!({ "id": BLOCK, "height": 1201739 })),
        )
        .await;
        mount(
            &server,
            format!("/testnet/api/block/{}/txids", BLOCK),
            ResponseTemplate::new(200).set_body_json(json!([OTHER, TXID])),
        )
        .await;

        let locator = connection(&server).lookup_chain_and_block_location(&tx_ref()).await.unwrap();
        assert_eq!(locator, ChainLocator::new(Chain::Testnet, 1201739, 1));
    }

    #[tokio::test]
    async fn test_extract_btcr_data_with_witness_spend() {
        let server = MockServer::start().await;
        let uri_hex = hex::encode("https://example.com/ddo.jsonld");
        mount(
            &server,
            format!("/testnet/api/tx/{}", TXID),
            ResponseTemplate::new(200).set_body_json(json!({
                "vin": [{ "scriptsig": "", "witness": ["30".repeat(71), PUBKEY], "is_coinbase": false }],
                "vout": [
                    { "scriptpubkey": "0014000102030405060708090a0b0c0d0e0f10111213" },
                    { "scriptpubkey": format!("6a1e{}", uri_hex) }
                ]
            })),
        )
        .await;
        mount(
            &server,
            format!("/testnet/api/tx/{}/outspend/0", TXID),
            ResponseTemplate::new(200).set_body_json(json!({ "spent": true, "txid": OTHER, "vin": 0 })),
        )
        .await;

        let data = connection(&server).get_btcr_data(&tx_ref()).await.unwrap().unwrap();
        assert_eq!(hex::encode(&data.input_script_pub_key), PUBKEY);
        assert_eq!(data.continuation_uri.as_deref(), Some("https://example.com/ddo.jsonld"));
        assert_eq!(data.spent_in.unwrap().txid.to_string(), OTHER);
    }

    #[tokio::test]
    async fn test_unspent_tip() {
        let server = MockServer::start().await;
        mount(
            &server,
            format!("/testnet/api/tx/{}", TXID),
            ResponseTemplate::new(200).set_body_json(json!({
                "vin": [{ "scriptsig": format!("21{}", PUBKEY), "witness": [] }],
                "vout": [{ "scriptpubkey": "0014000102030405060708090a0b0c0d0e0f10111213" }]
            })),
        )
        .await;
        mount(
            &server,
            format!("/testnet/api/tx/{}/outspend/0", TXID),
            ResponseTemplate::new(200).set_body_json(json!({ "spent": false })),
        )
        .await;

        let data = connection(&server).get_btcr_data(&tx_ref()).await.unwrap().unwrap();
        assert_eq!(data.continuation_uri, None);
        assert_eq!(data.spent_in, None);
    }
}
