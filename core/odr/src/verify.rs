//! Proof checks for light server replies.
//!
//! Everything in here is pure: a reply is checked against a root the caller already
//! trusts (a state root, the receipts root of a known header, or a CHT / bloom trie root
//! published by an indexer). An `Err` always means the reply is wrong, data that provably
//! does not exist is an `Ok(None)`.

use alloy_rlp::RlpEncodable;
use alloy_trie::proof::verify_proof;
use alloy_trie::{HashBuilder, Nibbles, EMPTY_ROOT_HASH};
use lxs_types::{keccak256, BlockNumber, Bytes, OdrReply, RequestKind, VerifyError, B256, U256};

/// A canonical header proven through the canonical-hash trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderProof {
    /// RLP of the header.
    pub header: Bytes,
    pub hash: B256,
    /// Total difficulty of the chain up to and including this header.
    pub td: U256,
}

/// Leaf stored in the canonical-hash trie for every block number.
#[derive(RlpEncodable)]
struct ChtNode {
    hash: B256,
    td: U256,
}

/// Encoded CHT leaf for a block with the given hash and total difficulty.
pub fn cht_leaf(hash: B256, td: U256) -> Vec<u8> {
    alloy_rlp::encode(ChtNode { hash, td })
}

/// Key of `number` in the canonical-hash trie.
pub fn cht_key(number: BlockNumber) -> [u8; 8] {
    number.to_be_bytes()
}

/// Key of the bloom bits vector `bit` of `section` in the bloom trie.
pub fn bloom_trie_key(bit: u16, section: u64) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[..2].copy_from_slice(&bit.to_be_bytes());
    key[2..].copy_from_slice(&section.to_be_bytes());
    key
}

pub(crate) fn unexpected(expected: RequestKind, reply: &OdrReply) -> VerifyError {
    VerifyError::UnexpectedReply {
        expected,
        got: reply.kind(),
    }
}

fn check_proof(
    root: B256,
    key: &[u8],
    value: Option<Vec<u8>>,
    proof: &[Bytes],
) -> Result<(), VerifyError> {
    verify_proof(root, Nibbles::unpack(key), value, proof)
        .map_err(|e| VerifyError::InvalidProof(e.to_string()))
}

/// Check that `proof` shows `key` holding `value` (or nothing) in the trie at `root`.
pub fn verify_trie_proof(
    root: B256,
    key: B256,
    value: Option<Bytes>,
    proof: &[Bytes],
) -> Result<Option<Bytes>, VerifyError> {
    check_proof(root, key.as_slice(), value.as_ref().map(|v| v.to_vec()), proof)?;
    Ok(value)
}

/// Root of the trie keyed by the RLP of each receipt's index.
pub fn receipts_root(receipts: &[Bytes]) -> B256 {
    if receipts.is_empty() {
        return EMPTY_ROOT_HASH;
    }

    // Leaves have to be added in key order.
    let mut leaves: Vec<(Vec<u8>, &Bytes)> = receipts
        .iter()
        .enumerate()
        .map(|(index, receipt)| (alloy_rlp::encode(index), receipt))
        .collect();
    leaves.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut builder = HashBuilder::default();
    for (key, receipt) in leaves {
        builder.add_leaf(Nibbles::unpack(&key), receipt);
    }
    builder.root()
}

pub fn verify_receipts(expected: B256, receipts: &[Bytes]) -> Result<(), VerifyError> {
    let got = receipts_root(receipts);
    if got != expected {
        return Err(VerifyError::HashMismatch { expected, got });
    }
    Ok(())
}

pub fn verify_code(code_hash: B256, code: &[u8]) -> Result<(), VerifyError> {
    let got = keccak256(code);
    if got != code_hash {
        return Err(VerifyError::HashMismatch {
            expected: code_hash,
            got,
        });
    }
    Ok(())
}

/// Check a bloom bits vector against the bloom trie root.
pub fn verify_bloom_bits(
    root: B256,
    bit: u16,
    section: u64,
    bits: &Bytes,
    proof: &[Bytes],
) -> Result<(), VerifyError> {
    if bits.is_empty() {
        return Err(VerifyError::Malformed("empty bloom bits".into()));
    }
    check_proof(root, &bloom_trie_key(bit, section), Some(bits.to_vec()), proof)
}

/// Check a header against the canonical-hash trie root. The proof has to show that the
/// hash of `header` together with `td` is the leaf stored under `number`.
pub fn verify_header(
    root: B256,
    number: BlockNumber,
    header: &Bytes,
    td: U256,
    proof: &[Bytes],
) -> Result<HeaderProof, VerifyError> {
    if header.is_empty() {
        return Err(VerifyError::Malformed("empty header".into()));
    }
    let hash = keccak256(header);
    check_proof(root, &cht_key(number), Some(cht_leaf(hash, td)), proof)?;
    Ok(HeaderProof {
        header: header.clone(),
        hash,
        td,
    })
}

#[cfg(test)]
mod tests {
    use lxs_test_utils::proof::single_leaf_trie;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_trie_proof_of_present_value() {
        let key = B256::repeat_byte(0x11);
        let value = Bytes::from_static(b"account");
        let (root, proof) = single_leaf_trie(key.as_slice(), &value);

        assert_eq!(
            verify_trie_proof(root, key, Some(value.clone()), &proof),
            Ok(Some(value))
        );
    }

    #[test]
    fn test_trie_proof_rejects_wrong_value() {
        let key = B256::repeat_byte(0x11);
        let (root, proof) = single_leaf_trie(key.as_slice(), b"account");

        let err = verify_trie_proof(root, key, Some(Bytes::from_static(b"forged")), &proof);
        assert!(matches!(err, Err(VerifyError::InvalidProof(_))));
    }

    #[test]
    fn test_trie_proof_rejects_other_root() {
        let key = B256::repeat_byte(0x11);
        let value = Bytes::from_static(b"account");
        let (_, proof) = single_leaf_trie(key.as_slice(), &value);

        let err = verify_trie_proof(B256::repeat_byte(9), key, Some(value), &proof);
        assert!(matches!(err, Err(VerifyError::InvalidProof(_))));
    }

    #[test]
    fn test_absent_value_in_empty_trie() {
        let key = B256::repeat_byte(0x22);
        assert_eq!(verify_trie_proof(EMPTY_ROOT_HASH, key, None, &[]), Ok(None));
    }

    #[test]
    fn test_receipts_root() {
        assert_eq!(receipts_root(&[]), EMPTY_ROOT_HASH);

        let receipts = vec![
            Bytes::from_static(b"first receipt"),
            Bytes::from_static(b"second receipt"),
        ];
        let root = receipts_root(&receipts);
        assert!(verify_receipts(root, &receipts).is_ok());

        let swapped = vec![receipts[1].clone(), receipts[0].clone()];
        assert_eq!(
            verify_receipts(root, &swapped),
            Err(VerifyError::HashMismatch {
                expected: root,
                got: receipts_root(&swapped),
            })
        );
    }

    #[test]
    fn test_code_hash() {
        let code = b"\x60\x80\x60\x40";
        assert!(verify_code(keccak256(code), code).is_ok());
        assert!(matches!(
            verify_code(keccak256(code), b"\x00"),
            Err(VerifyError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_header_through_cht() {
        let header = Bytes::from_static(b"header rlp");
        let td = U256::from(131_072u64);
        let leaf = cht_leaf(keccak256(&header), td);
        let (root, proof) = single_leaf_trie(&cht_key(4242), &leaf);

        let proven = verify_header(root, 4242, &header, td, &proof).unwrap();
        assert_eq!(proven.hash, keccak256(&header));
        assert_eq!(proven.td, td);

        // Same proof, claimed for another block or another difficulty.
        assert!(verify_header(root, 4243, &header, td, &proof).is_err());
        assert!(verify_header(root, 4242, &header, U256::from(1u64), &proof).is_err());
    }

    #[test]
    fn test_bloom_trie_key_layout() {
        assert_eq!(
            bloom_trie_key(0x0102, 3),
            [1, 2, 0, 0, 0, 0, 0, 0, 0, 3]
        );
    }

    #[test]
    fn test_bloom_bits_proof() {
        let bits = Bytes::from(vec![0xa5; 40]);
        let (root, proof) = single_leaf_trie(&bloom_trie_key(7, 3), &bits);

        assert!(verify_bloom_bits(root, 7, 3, &bits, &proof).is_ok());
        assert!(verify_bloom_bits(root, 8, 3, &bits, &proof).is_err());
        assert_eq!(
            verify_bloom_bits(root, 7, 3, &Bytes::new(), &proof),
            Err(VerifyError::Malformed("empty bloom bits".into()))
        );
    }
}
