//! Core types for DID:BTCR resolution.
//!
//! This module provides the DID Document value model, the resolution result
//! and the method metadata that records how the result was reached on chain.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::connection::TransactionRef;
use crate::txref::Chain;

/// Default JSON-LD context of a DID Document
pub const DID_CONTEXT: &str = "https://w3id.org/did/v0.11";

/// Type tag of the public key derived from the spending transaction
pub const DIDDOCUMENT_PUBLICKEY_TYPE: &str = "EcdsaSecp256k1VerificationKey2019";

/// Type tag of the authentication entry referring to the on-chain key
pub const DIDDOCUMENT_AUTHENTICATION_TYPE: &str = "EcdsaSecp256k1SignatureAuthentication2019";

/// A DID Document
///
/// Continuation documents are parsed into the same type. Properties this
/// model does not know are kept in `extra` so they survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DIDDocument {
    /// The context of the DID Document
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// The DID itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Public keys associated with this DID
    #[serde(rename = "publicKey", alias = "verificationMethod", default)]
    pub public_key: Vec<PublicKey>,

    /// Authentication methods
    #[serde(default)]
    pub authentication: Vec<Authentication>,

    /// Services associated with this DID
    #[serde(default)]
    pub service: Vec<Service>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DIDDocument {
    /// Creates an empty document for `id`
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            context: Some(Value::String(DID_CONTEXT.to_string())),
            id: Some(id.into()),
            public_key: Vec::new(),
            authentication: Vec::new(),
            service: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Parses a DID Document from a JSON object, unwrapping a `didDocument` envelope
    pub fn from_json_object(mut value: Value) -> Result<Self, serde_json::Error> {
        if let Some(inner) = value.as_object_mut().and_then(|o| o.remove("didDocument")) {
            value = inner;
        }
        serde_json::from_value(value)
    }
}

/// A public key in a DID Document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The type of the key
    #[serde(rename = "type")]
    pub key_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,

    /// Hex encoded key material
    #[serde(rename = "publicKeyHex", default, skip_serializing_if = "Option::is_none")]
    pub public_key_hex: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An authentication entry, either a bare key reference or an embedded method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Authentication {
    Reference(String),
    Method(AuthenticationMethod),
}

/// An authentication method pointing at a public key of the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationMethod {
    #[serde(rename = "type")]
    pub method_type: String,

    /// The id of the public key used for authentication
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A service endpoint in a DID Document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The type of the service
    #[serde(rename = "type")]
    pub service_type: String,

    /// The endpoint URL or object
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: Value,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Resolution result containing the DID Document and method metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    /// The resolved DID Document, absent when the DID is revoked
    pub did_document: Option<DIDDocument>,

    /// How the document was found on chain
    pub method_metadata: MethodMetadata,
}

impl ResolutionResult {
    /// Renders the result as `{ "didDocument": .., "methodMetadata": .. }`
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Chain-of-custody metadata of a resolution
///
/// Present even when the DID Document is absent, so callers can see why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodMetadata {
    /// Hex encoded public key recovered from the spending input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_script_pub_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_uri: Option<String>,

    /// The continuation document as fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<DIDDocument>,

    pub chain: Chain,
    pub initial_block_height: u32,
    pub initial_block_index: u32,
    pub initial_txid: TransactionRef,
    pub block_height: u32,
    pub block_index: u32,
    pub txid: TransactionRef,

    /// Every "spent by" transaction followed, in order
    pub spent_in_chain_and_txids: Vec<TransactionRef>,
}

/// Options for a [`Resolver`](crate::Resolver)
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Timeout applied to every HTTP request the resolver issues
    pub timeout: Duration,

    /// Maximum number of spends followed before giving up
    pub max_hops: usize,

    /// Largest continuation document body accepted, in bytes
    pub max_continuation_size: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_hops: 1000,
            max_continuation_size: 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_continuation() {
        let doc = DIDDocument::from_json_object(json!({
            "didDocument": {
                "@context": "https://w3id.org/did/v1",
                "publicKey": [{
                    "id": "did:btcr:xyz#satoshi",
                    "type": "EcdsaSecp256k1VerificationKey2019",
                    "publicKeyBase58": "owh12LgGtDq6ZWqTx2JhA3e95Yz5THnvhhMx1RaXrQvP"
                }],
                "authentication": ["did:btcr:xyz#satoshi"],
                "service": [{
                    "type": "BlockcoreService",
                    "serviceEndpoint": "https://example.com/endpoint"
                }]
            }
        }))
        .unwrap();

        assert_eq!(doc.public_key.len(), 1);
        assert_eq!(doc.public_key[0].extra["publicKeyBase58"], "owh12LgGtDq6ZWqTx2JhA3e95Yz5THnvhhMx1RaXrQvP");
        assert_eq!(doc.authentication, vec![Authentication::Reference("did:btcr:xyz#satoshi".to_string())]);
        assert_eq!(doc.service[0].service_type, "BlockcoreService");
    }

    #[test]
    fn test_verification_method_alias() {
        let doc = DIDDocument::from_json_object(json!({
            "verificationMethod": [{
                "id": "#key-2",
                "type": "EcdsaSecp256k1VerificationKey2019",
                "controller": "did:btcr:xyz",
                "publicKeyHex": "02b97c30de767f084ce3080168ee293053ba33b235d7116a3263d29f1450936b71"
            }]
        }))
        .unwrap();

        assert_eq!(doc.public_key[0].controller.as_deref(), Some("did:btcr:xyz"));
        assert!(doc.authentication.is_empty());
        assert!(doc.service.is_empty());
    }

    #[test]
    fn test_malformed_document() {
        assert!(DIDDocument::from_json_object(json!({ "publicKey": "not-a-list" })).is_err());
        assert!(DIDDocument::from_json_object(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_embedded_authentication_serialization() {
        let auth = Authentication::Method(AuthenticationMethod {
            method_type: DIDDOCUMENT_AUTHENTICATION_TYPE.to_string(),
            public_key: Some("did:btcr:xyz#key-1".to_string()),
            extra: Map::new(),
        });
        assert_eq!(
            serde_json::to_value(&auth).unwrap(),
            json!({
                "type": "EcdsaSecp256k1SignatureAuthentication2019",
                "publicKey": "did:btcr:xyz#key-1"
            })
        );
    }
}
