//! Transaction position references (BIP-136 "txref").
//!
//! A DID:BTCR method-specific identifier is the data part of a bech32 encoded
//! txref: a magic character selecting the chain, followed by the block height,
//! the transaction position inside the block and, for extended txrefs, the
//! index of a transaction output. This module converts between that textual
//! form and a [`ChainLocator`].

use bech32::{u5, Variant};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ResolutionError;

/// Human-readable part of mainnet txrefs
pub const TXREF_BECH32_HRP_MAINNET: &str = "tx";
/// Human-readable part of testnet txrefs
pub const TXREF_BECH32_HRP_TESTNET: &str = "txtest";

pub const MAGIC_BTC_MAINNET: u8 = 0x03;
pub const MAGIC_BTC_MAINNET_EXTENDED: u8 = 0x04;
pub const MAGIC_BTC_TESTNET: u8 = 0x06;
pub const MAGIC_BTC_TESTNET_EXTENDED: u8 = 0x07;

pub const MAGIC_BTC_MAINNET_CHAR: char = 'r';
pub const MAGIC_BTC_MAINNET_EXTENDED_CHAR: char = 'y';
pub const MAGIC_BTC_TESTNET_CHAR: char = 'x';
pub const MAGIC_BTC_TESTNET_EXTENDED_CHAR: char = '8';

const DATA_LEN: usize = 9;
const EXTENDED_DATA_LEN: usize = 12;

const MAX_BLOCK_HEIGHT: u32 = (1 << 24) - 1;
const MAX_INDEX: u32 = (1 << 15) - 1;

/// The Bitcoin chain a txref points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Mainnet,
    Testnet,
}

impl Chain {
    /// Bech32 human-readable part used for this chain's txrefs
    pub fn hrp(self) -> &'static str {
        match self {
            Chain::Mainnet => TXREF_BECH32_HRP_MAINNET,
            Chain::Testnet => TXREF_BECH32_HRP_TESTNET,
        }
    }

    fn magic(self, extended: bool) -> u8 {
        match (self, extended) {
            (Chain::Mainnet, false) => MAGIC_BTC_MAINNET,
            (Chain::Mainnet, true) => MAGIC_BTC_MAINNET_EXTENDED,
            (Chain::Testnet, false) => MAGIC_BTC_TESTNET,
            (Chain::Testnet, true) => MAGIC_BTC_TESTNET_EXTENDED,
        }
    }

    /// Selects the chain from the leading magic character of a txref data part
    pub fn from_magic_char(c: char) -> Option<Chain> {
        match c.to_ascii_lowercase() {
            MAGIC_BTC_MAINNET_CHAR | MAGIC_BTC_MAINNET_EXTENDED_CHAR => Some(Chain::Mainnet),
            MAGIC_BTC_TESTNET_CHAR | MAGIC_BTC_TESTNET_EXTENDED_CHAR => Some(Chain::Testnet),
            _ => None,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Mainnet => f.write_str("MAINNET"),
            Chain::Testnet => f.write_str("TESTNET"),
        }
    }
}

/// A position in a specific blockchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLocator {
    pub chain: Chain,
    pub block_height: u32,
    /// Position of the transaction inside its block
    pub block_index: u32,
    /// Transaction output index, only carried by extended txrefs
    pub txo_index: u32,
}

impl ChainLocator {
    pub fn new(chain: Chain, block_height: u32, block_index: u32) -> Self {
        Self { chain, block_height, block_index, txo_index: 0 }
    }

    pub fn with_txo_index(mut self, txo_index: u32) -> Self {
        self.txo_index = txo_index;
        self
    }

    fn is_extended(&self) -> bool {
        self.txo_index != 0
    }
}

impl fmt::Display for ChainLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.chain, self.block_height, self.block_index)?;
        if self.is_extended() {
            write!(f, ":{}", self.txo_index)?;
        }
        Ok(())
    }
}

/// Decodes a DID:BTCR method-specific identifier into a [`ChainLocator`]
///
/// The first character must be one of the four magic characters; it selects
/// the human-readable part the rest of the suffix is checked against.
pub fn decode(suffix: &str) -> Result<ChainLocator, ResolutionError> {
    let first = suffix
        .chars()
        .next()
        .ok_or_else(|| ResolutionError::InvalidIdentifier("empty identifier".to_string()))?;

    let chain = Chain::from_magic_char(first).ok_or_else(|| {
        ResolutionError::InvalidIdentifier(format!("Invalid magic byte in {}", suffix))
    })?;

    // bech32 forbids mixed case, so the prefix follows the suffix's case
    let hrp = if suffix.chars().any(|c| c.is_ascii_lowercase()) {
        chain.hrp().to_string()
    } else {
        chain.hrp().to_ascii_uppercase()
    };
    decode_txref(&format!("{}1{}", hrp, suffix))
}

/// Encodes a [`ChainLocator`] as a DID:BTCR method-specific identifier
///
/// The result is the hyphen-grouped txref data part, e.g. `rqqq-qqqq-qmhu-qhp`.
pub fn encode(locator: &ChainLocator) -> Result<String, ResolutionError> {
    let txref = encode_compact(locator)?;
    let hrp_len = locator.chain.hrp().len() + 1;
    Ok(group(&txref[hrp_len..]))
}

/// Encodes a [`ChainLocator`] as a full txref, e.g. `tx1:rqqq-qqqq-qmhu-qhp`
pub fn encode_txref(locator: &ChainLocator) -> Result<String, ResolutionError> {
    let txref = encode_compact(locator)?;
    let hrp_len = locator.chain.hrp().len() + 1;
    Ok(format!("{}:{}", &txref[..hrp_len], group(&txref[hrp_len..])))
}

/// Decodes a full txref such as `tx1:rqqq-qqqq-qmhu-qhp`
///
/// Hyphens and the colon after the separator are ignored.
pub fn decode_txref(txref: &str) -> Result<ChainLocator, ResolutionError> {
    let compact: String = txref.chars().filter(|c| *c != '-' && *c != ':').collect();
    if compact != compact.to_ascii_lowercase() && compact != compact.to_ascii_uppercase() {
        return Err(ResolutionError::InvalidIdentifier(format!("{}: mixed case", txref)));
    }
    let compact = compact.to_ascii_lowercase();

    let (hrp, data, _variant) = bech32::decode(&compact)
        .map_err(|e| ResolutionError::InvalidIdentifier(format!("{}: {}", txref, e)))?;

    let data: Vec<u32> = data.iter().map(|v| u32::from(v.to_u8())).collect();
    let extended = match data.len() {
        DATA_LEN => false,
        EXTENDED_DATA_LEN => true,
        n => {
            return Err(ResolutionError::InvalidIdentifier(format!(
                "{}: unexpected data length {}",
                txref, n
            )))
        }
    };

    let chain = match data[0] as u8 {
        MAGIC_BTC_MAINNET if !extended => Chain::Mainnet,
        MAGIC_BTC_MAINNET_EXTENDED if extended => Chain::Mainnet,
        MAGIC_BTC_TESTNET if !extended => Chain::Testnet,
        MAGIC_BTC_TESTNET_EXTENDED if extended => Chain::Testnet,
        magic => {
            return Err(ResolutionError::InvalidIdentifier(format!(
                "{}: magic {} does not match a {} txref",
                txref,
                magic,
                if extended { "extended" } else { "standard" }
            )))
        }
    };

    if hrp != chain.hrp() {
        return Err(ResolutionError::InvalidIdentifier(format!(
            "{}: prefix {} does not match chain {}",
            txref, hrp, chain
        )));
    }

    let block_height = (data[1] >> 1)
        | (data[2] << 4)
        | (data[3] << 9)
        | (data[4] << 14)
        | (data[5] << 19);
    let block_index = data[6] | (data[7] << 5) | (data[8] << 10);
    let txo_index = if extended {
        data[9] | (data[10] << 5) | (data[11] << 10)
    } else {
        0
    };

    Ok(ChainLocator { chain, block_height, block_index, txo_index })
}

fn encode_compact(locator: &ChainLocator) -> Result<String, ResolutionError> {
    if locator.block_height > MAX_BLOCK_HEIGHT {
        return Err(ResolutionError::InvalidIdentifier(format!(
            "block height {} out of range",
            locator.block_height
        )));
    }
    if locator.block_index > MAX_INDEX || locator.txo_index > MAX_INDEX {
        return Err(ResolutionError::InvalidIdentifier(format!(
            "index out of range in {}",
            locator
        )));
    }

    let extended = locator.is_extended();
    let height = locator.block_height;
    let position = locator.block_index;

    let mut words = vec![
        u32::from(locator.chain.magic(extended)),
        (height & 0xF) << 1,
        (height >> 4) & 0x1F,
        (height >> 9) & 0x1F,
        (height >> 14) & 0x1F,
        (height >> 19) & 0x1F,
        position & 0x1F,
        (position >> 5) & 0x1F,
        (position >> 10) & 0x1F,
    ];
    if extended {
        let txo = locator.txo_index;
        words.extend([txo & 0x1F, (txo >> 5) & 0x1F, (txo >> 10) & 0x1F]);
    }

    let data = words
        .into_iter()
        .map(|w| u5::try_from_u8(w as u8))
        .collect::<Result<Vec<u5>, _>>()
        .map_err(|e| ResolutionError::InvalidIdentifier(e.to_string()))?;

    bech32::encode(locator.chain.hrp(), data, Variant::Bech32)
        .map_err(|e| ResolutionError::InvalidIdentifier(e.to_string()))
}

fn group(data_part: &str) -> String {
    data_part
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}
