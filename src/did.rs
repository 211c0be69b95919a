//! DID parsing for the BTCR method.
//!
//! This module recognises `did:btcr:` identifiers and turns their
//! method-specific part into the [`ChainLocator`] of the transaction that
//! anchors the DID.

use std::fmt;

use crate::error::ResolutionError;
use crate::txref::{self, ChainLocator};

/// Prefix shared by every DID:BTCR identifier
pub const DID_BTCR_PREFIX: &str = "did:btcr:";

/// Represents a parsed DID:BTCR identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcrDid {
    /// The method-specific identifier, a txref data part
    pub suffix: String,
    /// The position of the anchoring transaction
    pub locator: ChainLocator,
}

impl BtcrDid {
    /// Returns the method-specific suffix if `did` belongs to this method
    ///
    /// Identifiers of other methods, or containing whitespace, are not ours and
    /// yield `None` rather than an error.
    pub fn matches(did: &str) -> Option<&str> {
        let suffix = did.strip_prefix(DID_BTCR_PREFIX)?;
        if suffix.chars().any(char::is_whitespace) {
            return None;
        }
        Some(suffix)
    }

    /// Parses and validates a DID:BTCR string
    pub fn parse(did: &str) -> Result<Self, ResolutionError> {
        let suffix = Self::matches(did).ok_or_else(|| {
            ResolutionError::InvalidIdentifier(format!("{} is not a did:btcr identifier", did))
        })?;
        let locator = txref::decode(suffix)?;

        Ok(Self { suffix: suffix.to_string(), locator })
    }

    /// Builds the canonical DID for a chain position
    pub fn from_locator(locator: ChainLocator) -> Result<Self, ResolutionError> {
        let suffix = txref::encode(&locator)?;
        Ok(Self { suffix, locator })
    }

    /// The full txref this DID refers to, e.g. `txtest1:xkyt-fzgq-qq87-xnh`
    pub fn txref(&self) -> String {
        format!("{}1:{}", self.locator.chain.hrp(), self.suffix)
    }
}

impl fmt::Display for BtcrDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", DID_BTCR_PREFIX, self.suffix)
    }
}
