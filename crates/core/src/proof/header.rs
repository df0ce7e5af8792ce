//! Block header RLP.

use alloy::consensus::Header;
use alloy::primitives::keccak256;
use keeper_chain::BlockHeader;

use super::ProofError;

fn to_consensus(header: &BlockHeader) -> Header {
    Header {
        parent_hash: header.parent_hash,
        ommers_hash: header.ommers_hash,
        beneficiary: header.beneficiary,
        state_root: header.state_root,
        transactions_root: header.transactions_root,
        receipts_root: header.receipts_root,
        logs_bloom: header.logs_bloom,
        difficulty: header.difficulty,
        number: header.number,
        gas_limit: header.gas_limit,
        gas_used: header.gas_used,
        timestamp: header.timestamp,
        extra_data: header.extra_data.clone(),
        mix_hash: header.mix_hash.unwrap_or_default(),
        nonce: header.nonce.unwrap_or_default(),
        base_fee_per_gas: header.base_fee_per_gas,
        withdrawals_root: header.withdrawals_root,
        blob_gas_used: header.blob_gas_used,
        excess_blob_gas: header.excess_blob_gas,
        parent_beacon_block_root: header.parent_beacon_block_root,
        requests_hash: header.requests_hash,
    }
}

/// RLP of a header in consensus field order.
///
/// Post-fork fields are appended only when present, so the result hashes to
/// the block hash for headers from any era.
pub fn encode_header(header: &BlockHeader) -> Vec<u8> {
    alloy::rlp::encode(to_consensus(header))
}

/// Encode and check the result against the header's own hash.
pub fn encode_verified(header: &BlockHeader) -> Result<Vec<u8>, ProofError> {
    let encoded = encode_header(header);
    let computed = keccak256(&encoded);
    if computed != header.hash {
        return Err(ProofError::HeaderHashMismatch {
            block: header.number,
            expected: header.hash,
            computed,
        });
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::RlpItem;
    use alloy::primitives::{Address, Bloom, Bytes, B256, B64, U256};

    fn sample() -> (BlockHeader, Header) {
        let ours = BlockHeader {
            hash: B256::ZERO,
            parent_hash: B256::repeat_byte(1),
            ommers_hash: B256::repeat_byte(2),
            beneficiary: Address::repeat_byte(3),
            state_root: B256::repeat_byte(4),
            transactions_root: B256::repeat_byte(5),
            receipts_root: B256::repeat_byte(6),
            logs_bloom: Bloom::repeat_byte(7),
            difficulty: U256::ZERO,
            number: 19_000_000,
            gas_limit: 30_000_000,
            gas_used: 12_345_678,
            timestamp: 1_705_000_000,
            extra_data: Bytes::from_static(b"builder"),
            mix_hash: Some(B256::repeat_byte(8)),
            nonce: Some(B64::ZERO),
            base_fee_per_gas: Some(25_000_000_000),
            withdrawals_root: Some(B256::repeat_byte(9)),
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_block_root: None,
            requests_hash: None,
        };

        let reference = Header {
            parent_hash: ours.parent_hash,
            ommers_hash: ours.ommers_hash,
            beneficiary: ours.beneficiary,
            state_root: ours.state_root,
            transactions_root: ours.transactions_root,
            receipts_root: ours.receipts_root,
            logs_bloom: ours.logs_bloom,
            difficulty: U256::ZERO,
            number: 19_000_000,
            gas_limit: 30_000_000,
            gas_used: 12_345_678,
            timestamp: 1_705_000_000,
            extra_data: ours.extra_data.clone(),
            mix_hash: B256::repeat_byte(8),
            nonce: B64::ZERO,
            base_fee_per_gas: Some(25_000_000_000),
            withdrawals_root: Some(B256::repeat_byte(9)),
            ..Default::default()
        };

        (ours, reference)
    }

    #[test]
    fn test_matches_consensus_encoding() {
        let (mut ours, reference) = sample();
        ours.hash = reference.hash_slow();
        let encoded = encode_verified(&ours).unwrap();
        assert_eq!(keccak256(&encoded), reference.hash_slow());
    }

    #[test]
    fn test_cancun_fields() {
        let (mut ours, mut reference) = sample();
        ours.blob_gas_used = Some(131_072);
        ours.excess_blob_gas = Some(0);
        ours.parent_beacon_block_root = Some(B256::repeat_byte(0xbe));
        reference.blob_gas_used = Some(131_072);
        reference.excess_blob_gas = Some(0);
        reference.parent_beacon_block_root = Some(B256::repeat_byte(0xbe));

        ours.hash = reference.hash_slow();
        assert!(encode_verified(&ours).is_ok());
    }

    #[test]
    fn test_hash_mismatch() {
        let (mut ours, _) = sample();
        ours.hash = B256::repeat_byte(0xff);
        assert!(matches!(
            encode_verified(&ours),
            Err(ProofError::HeaderHashMismatch { block: 19_000_000, .. })
        ));
    }

    fn field_count(encoded: &[u8]) -> usize {
        match RlpItem::decode_exact(encoded).unwrap() {
            RlpItem::List(fields) => fields.len(),
            other => panic!("header is not a list: {other:?}"),
        }
    }

    #[test]
    fn test_optional_fields_follow_fork() {
        let (mut ours, _) = sample();
        assert_eq!(field_count(&encode_header(&ours)), 17);

        ours.base_fee_per_gas = None;
        ours.withdrawals_root = None;
        assert_eq!(field_count(&encode_header(&ours)), 15);

        ours.base_fee_per_gas = Some(7);
        ours.withdrawals_root = Some(B256::repeat_byte(9));
        ours.blob_gas_used = Some(0);
        ours.excess_blob_gas = Some(0);
        ours.parent_beacon_block_root = Some(B256::ZERO);
        ours.requests_hash = Some(B256::ZERO);
        assert_eq!(field_count(&encode_header(&ours)), 21);
    }
}
