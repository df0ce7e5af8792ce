//! Untyped RLP values for proof node lists.
//!
//! Decoding goes through [`alloy::rlp::Header`], which rejects non-canonical
//! lengths. Proof nodes are passed through decode/encode so that whatever
//! the node returned comes out canonical.

use alloy::rlp::{self, length_of_length, BufMut, Decodable, Encodable, Header};

/// A decoded RLP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(data.into())
    }

    /// Decode exactly one item spanning all of `data`.
    pub fn decode_exact(data: &[u8]) -> rlp::Result<Self> {
        let mut buf = data;
        let item = Self::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(rlp::Error::UnexpectedLength);
        }
        Ok(item)
    }

    fn payload_length(items: &[RlpItem]) -> usize {
        items.iter().map(Encodable::length).sum()
    }
}

impl Encodable for RlpItem {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Bytes(data) => data.as_slice().encode(out),
            Self::List(items) => {
                Header {
                    list: true,
                    payload_length: Self::payload_length(items),
                }
                .encode(out);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Bytes(data) => data.as_slice().length(),
            Self::List(items) => {
                let payload = Self::payload_length(items);
                payload + length_of_length(payload)
            }
        }
    }
}

impl Decodable for RlpItem {
    fn decode(buf: &mut &[u8]) -> rlp::Result<Self> {
        let header = Header::decode(buf)?;
        let data: &[u8] = *buf;
        if data.len() < header.payload_length {
            return Err(rlp::Error::InputTooShort);
        }
        let (payload, rest) = data.split_at(header.payload_length);
        *buf = rest;

        if !header.list {
            return Ok(Self::Bytes(payload.to_vec()));
        }

        let mut items = Vec::new();
        let mut payload = payload;
        while !payload.is_empty() {
            items.push(Self::decode(&mut payload)?);
        }
        Ok(Self::List(items))
    }
}

/// Re-encode a list of raw proof nodes as one canonical RLP list.
pub fn encode_proof_nodes<T: AsRef<[u8]>>(nodes: &[T]) -> rlp::Result<Vec<u8>> {
    let items = nodes
        .iter()
        .map(|node| RlpItem::decode_exact(node.as_ref()))
        .collect::<rlp::Result<Vec<_>>>()?;
    Ok(rlp::encode(RlpItem::List(items)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enc(item: &RlpItem) -> Vec<u8> {
        rlp::encode(item)
    }

    #[test]
    fn test_encode_reference_vectors() {
        assert_eq!(enc(&RlpItem::bytes(b"dog".to_vec())), vec![0x83, b'd', b'o', b'g']);
        assert_eq!(enc(&RlpItem::bytes(vec![])), vec![0x80]);
        assert_eq!(enc(&RlpItem::bytes(vec![0x0f])), vec![0x0f]);
        assert_eq!(enc(&RlpItem::bytes(vec![0x80])), vec![0x81, 0x80]);
        assert_eq!(enc(&RlpItem::List(vec![])), vec![0xc0]);

        let cat_dog = RlpItem::List(vec![
            RlpItem::bytes(b"cat".to_vec()),
            RlpItem::bytes(b"dog".to_vec()),
        ]);
        assert_eq!(
            enc(&cat_dog),
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );

        // "Lorem ipsum dolor sit amet, consectetur adipisicing elit" is 56 bytes
        let lorem = b"Lorem ipsum dolor sit amet, consectetur adipisicing elit".to_vec();
        let encoded = enc(&RlpItem::bytes(lorem.clone()));
        assert_eq!(&encoded[..2], &[0xb8, 0x38]);
        assert_eq!(&encoded[2..], lorem.as_slice());
    }

    #[test]
    fn test_round_trip_nested() {
        let item = RlpItem::List(vec![
            RlpItem::List(vec![]),
            RlpItem::List(vec![RlpItem::List(vec![])]),
            RlpItem::bytes(vec![0u8; 60]),
            RlpItem::bytes(vec![0x7f]),
            RlpItem::List(vec![RlpItem::bytes(vec![0xaa; 300]); 3]),
        ]);
        let encoded = enc(&item);
        assert_eq!(encoded[0], 0xf9);
        assert_eq!(encoded.len(), item.length());
        assert_eq!(RlpItem::decode_exact(&encoded).unwrap(), item);
    }

    #[test]
    fn test_rejects_single_byte_in_string_form() {
        assert_eq!(
            RlpItem::decode_exact(&[0x81, 0x05]),
            Err(rlp::Error::NonCanonicalSingleByte)
        );
        // 0x80 and above legitimately need the prefix
        assert_eq!(
            RlpItem::decode_exact(&[0x81, 0x80]).unwrap(),
            RlpItem::bytes(vec![0x80])
        );
    }

    #[test]
    fn test_rejects_long_form_for_short_lengths() {
        assert_eq!(
            RlpItem::decode_exact(&[0xb8, 0x03, 1, 2, 3]),
            Err(rlp::Error::NonCanonicalSize)
        );
        assert_eq!(
            RlpItem::decode_exact(&[0xf8, 0x01, 0x80]),
            Err(rlp::Error::NonCanonicalSize)
        );
        assert_eq!(
            RlpItem::decode_exact(&[0xb9, 0x00, 0x40]),
            Err(rlp::Error::LeadingZero)
        );
    }

    #[test]
    fn test_rejects_malformed_framing() {
        assert_eq!(RlpItem::decode_exact(&[]), Err(rlp::Error::InputTooShort));
        assert_eq!(
            RlpItem::decode_exact(&[0x83, b'd', b'o']),
            Err(rlp::Error::InputTooShort)
        );
        assert_eq!(
            RlpItem::decode_exact(&[0x0f, 0x01]),
            Err(rlp::Error::UnexpectedLength)
        );
        // List claims 2 payload bytes but its only item needs 3
        assert!(RlpItem::decode_exact(&[0xc2, 0x82, 0x80]).is_err());
    }

    #[test]
    fn test_proof_nodes_are_canonicalized() {
        let node_a = RlpItem::List(vec![RlpItem::bytes(vec![0x20]), RlpItem::bytes(vec![1; 32])]);
        let node_b = RlpItem::bytes(vec![0xde, 0xad]);
        let encoded = encode_proof_nodes(&[enc(&node_a), enc(&node_b)]).unwrap();
        assert_eq!(
            RlpItem::decode_exact(&encoded).unwrap(),
            RlpItem::List(vec![node_a, node_b])
        );

        assert!(encode_proof_nodes(&[vec![0x81, 0x01]]).is_err());
    }

    fn arb_item() -> impl Strategy<Value = RlpItem> {
        let leaf = prop::collection::vec(any::<u8>(), 0..80).prop_map(RlpItem::Bytes);
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop::collection::vec(inner, 0..8).prop_map(RlpItem::List)
        })
    }

    proptest! {
        #[test]
        fn test_round_trip_arbitrary(item in arb_item()) {
            let encoded = enc(&item);
            prop_assert_eq!(encoded.len(), item.length());
            prop_assert_eq!(RlpItem::decode_exact(&encoded).unwrap(), item.clone());
            prop_assert_eq!(encode_proof_nodes(&[encoded.clone()]).unwrap(), enc(&RlpItem::List(vec![item])));
        }

        #[test]
        fn test_truncated_input_never_decodes(item in arb_item(), cut in 1usize..16) {
            let encoded = enc(&item);
            let keep = encoded.len().saturating_sub(cut);
            prop_assert!(RlpItem::decode_exact(&encoded[..keep]).is_err());
        }
    }
}
