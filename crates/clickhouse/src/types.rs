use alloy::primitives::{Address, B256, U256};
use derive_more::Deref;
use serde::{Deserialize, Serialize};

/// `FixedString(20)` address column.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Deref,
)]
pub struct AddressBytes(pub [u8; 20]);

impl From<Address> for AddressBytes {
    fn from(value: Address) -> Self {
        Self(value.into_array())
    }
}

impl From<AddressBytes> for Address {
    fn from(value: AddressBytes) -> Self {
        Self::from(value.0)
    }
}

/// `FixedString(32)` hash column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, Deref)]
pub struct HashBytes(pub [u8; 32]);

impl From<B256> for HashBytes {
    fn from(value: B256) -> Self {
        Self(value.0)
    }
}

impl From<HashBytes> for B256 {
    fn from(value: HashBytes) -> Self {
        Self::from(value.0)
    }
}

/// `UInt256` column, which RowBinary encodes as 32 little endian bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct U256Bytes(pub [u8; 32]);

impl From<U256> for U256Bytes {
    fn from(value: U256) -> Self {
        Self(value.to_le_bytes())
    }
}

impl From<U256Bytes> for U256 {
    fn from(value: U256Bytes) -> Self {
        Self::from_le_bytes(value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_is_little_endian() {
        let bytes = U256Bytes::from(U256::from(0x0102u64));
        assert_eq!(bytes.0[0], 0x02);
        assert_eq!(bytes.0[1], 0x01);
        assert!(bytes.0[2..].iter().all(|byte| *byte == 0));
        assert_eq!(<U256 as From<_>>::from(bytes), U256::from(0x0102u64));
    }
}
