//! Binary encoding of pool keys for the LMDB backend.
//!
//! `EncodedPoolKey` is the only way the LMDB backend addresses a record, so
//! every read and write is scoped to exactly one pool.

use coinpool_core::TokenPoolKey;

/// Leading byte of every encoded pool key. Bumped if the layout changes.
const KEY_TAG: u8 = 0x01;

/// A pool key encoded for byte-ordered storage.
///
/// # Binary Format
///
/// - Byte 0: key tag (0x01)
/// - Then four length-prefixed fields, each `[len: u32 BE][utf-8 bytes]`,
///   in the order holder id, token type, issuer hash, symbol
///
/// The holder comes first so all pools of one holder share a key prefix
/// and sort together; length prefixes keep `("ab", "c")` and `("a", "bc")`
/// distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedPoolKey {
    bytes: Vec<u8>,
}

impl EncodedPoolKey {
    pub fn new(key: &TokenPoolKey) -> Self {
        let fields = [
            key.holder_id.as_str(),
            key.token_type.as_str(),
            key.issuer_hash.as_str(),
            key.symbol.as_str(),
        ];
        let len = 1 + fields.iter().map(|f| 4 + f.len()).sum::<usize>();
        let mut bytes = Vec::with_capacity(len);
        bytes.push(KEY_TAG);
        for field in fields {
            push_field(&mut bytes, field);
        }
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the tag is wrong, a length runs past the end, a
    /// field is not UTF-8, or bytes are left over.
    pub fn decode(bytes: &[u8]) -> Option<TokenPoolKey> {
        let (&tag, mut rest) = bytes.split_first()?;
        if tag != KEY_TAG {
            return None;
        }

        let mut fields = Vec::with_capacity(4);
        for _ in 0..4 {
            let (field, remaining) = take_field(rest)?;
            fields.push(field);
            rest = remaining;
        }
        if !rest.is_empty() {
            return None;
        }

        let symbol = fields.pop()?;
        let issuer_hash = fields.pop()?;
        let token_type = fields.pop()?;
        let holder_id = fields.pop()?;
        Some(TokenPoolKey::new(holder_id, token_type, issuer_hash, symbol))
    }

    /// Prefix shared by every pool of one holder.
    pub fn holder_prefix(holder_id: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + holder_id.len());
        bytes.push(KEY_TAG);
        push_field(&mut bytes, holder_id);
        bytes
    }
}

fn push_field(bytes: &mut Vec<u8>, field: &str) {
    // Pool key fields are identifiers and hashes; u32 lengths are ample.
    bytes.extend_from_slice(&(field.len() as u32).to_be_bytes());
    bytes.extend_from_slice(field.as_bytes());
}

fn take_field(bytes: &[u8]) -> Option<(String, &[u8])> {
    if bytes.len() < 4 {
        return None;
    }
    let (len_bytes, rest) = bytes.split_at(4);
    let len = u32::from_be_bytes(len_bytes.try_into().ok()?) as usize;
    if rest.len() < len {
        return None;
    }
    let (field, rest) = rest.split_at(len);
    let field = std::str::from_utf8(field).ok()?.to_string();
    Some((field, rest))
}
