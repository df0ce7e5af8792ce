//! Constant-product pool addressing and storage layout.

use alloy::primitives::{keccak256, Address, B256, U256};

use crate::config::DexConfig;

/// `totalSupply` of the pool's LP token.
pub const TOTAL_SUPPLY_SLOT: u64 = 0;
pub const TOKEN0_SLOT: u64 = 6;
pub const TOKEN1_SLOT: u64 = 7;
/// Packed `reserve0 | reserve1 | blockTimestampLast`.
pub const RESERVES_SLOT: u64 = 8;
pub const PRICE0_CUMULATIVE_SLOT: u64 = 9;
pub const PRICE1_CUMULATIVE_SLOT: u64 = 10;

/// Tokens in pool order.
pub fn sort_tokens(a: Address, b: Address) -> (Address, Address) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// CREATE2 address of the `(a, b)` pool of `dex`.
pub fn pair_address(dex: &DexConfig, a: Address, b: Address) -> Address {
    let (token0, token1) = sort_tokens(a, b);
    let mut packed = [0u8; 40];
    packed[..20].copy_from_slice(token0.as_slice());
    packed[20..].copy_from_slice(token1.as_slice());
    let salt = keccak256(packed);
    dex.factory.create2(salt, dex.init_code_hash)
}

/// Storage slot number as a proof key.
pub fn slot_key(slot: u64) -> B256 {
    B256::from(U256::from(slot))
}

/// Address held in the low 20 bytes of a storage word.
pub fn word_to_address(word: U256) -> Address {
    Address::from_word(B256::from(word))
}

/// Unpacked reserves slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserves {
    pub reserve0: U256,
    pub reserve1: U256,
    pub timestamp: u64,
}

impl Reserves {
    pub fn from_word(word: U256) -> Self {
        let mask112 = (U256::from(1u8) << 112usize) - U256::from(1u8);
        Self {
            reserve0: word & mask112,
            reserve1: (word >> 112usize) & mask112,
            timestamp: (word >> 224usize).saturating_to::<u64>(),
        }
    }
}
