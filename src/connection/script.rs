//! Script inspection shared by all backends.

use bitcoin::script::{Instruction, Script};

const COMPRESSED_KEY_LEN: usize = 33;
const UNCOMPRESSED_KEY_LEN: usize = 65;

fn is_public_key(bytes: &[u8]) -> bool {
    match bytes.len() {
        COMPRESSED_KEY_LEN => bytes[0] == 0x02 || bytes[0] == 0x03,
        UNCOMPRESSED_KEY_LEN => bytes[0] == 0x04,
        _ => false,
    }
}

/// Recovers the public key revealed by a spending input
///
/// Segwit spends carry the key as the last witness element, legacy P2PKH
/// spends as the last push of the scriptSig.
pub fn spending_public_key(script_sig: &[u8], witness: &[Vec<u8>]) -> Option<Vec<u8>> {
    if let Some(last) = witness.last() {
        if is_public_key(last) {
            return Some(last.clone());
        }
    }

    let last_push = Script::from_bytes(script_sig)
        .instructions()
        .filter_map(|ins| match ins {
            Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes()),
            _ => None,
        })
        .last()?;

    is_public_key(last_push).then(|| last_push.to_vec())
}

/// Whether an output script is an OP_RETURN data carrier
pub fn is_null_data(script_pubkey: &[u8]) -> bool {
    Script::from_bytes(script_pubkey).is_op_return()
}

/// Reads a continuation URI published in an OP_RETURN output
pub fn continuation_uri(script_pubkey: &[u8]) -> Option<String> {
    if !is_null_data(script_pubkey) {
        return None;
    }

    let data: Vec<u8> = Script::from_bytes(script_pubkey)
        .instructions()
        .filter_map(|ins| match ins {
            Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes().to_vec()),
            _ => None,
        })
        .flatten()
        .collect();

    let uri = String::from_utf8(data).ok()?;
    let uri = uri.trim();
    (!uri.is_empty()).then(|| uri.to_string())
}
