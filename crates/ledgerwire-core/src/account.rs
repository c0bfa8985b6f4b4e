//! Classic account addresses.
//!
//! Address format: base58 (ledger alphabet) over
//! `version(0x00) || account_id(20 bytes) || checksum(4 bytes)`, where the
//! checksum is the first four bytes of a double SHA-256 over the first 21.
//!
//! Only decoding is needed client-side: signer entries of a multisigned
//! transaction are ordered by their numeric account id.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const ALPHABET: &[u8; 58] = b"rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";
const ACCOUNT_VERSION: u8 = 0x00;
const PAYLOAD_LEN: usize = 25;

/// A 160-bit account id decoded from a classic address.
///
/// Ordering is numeric (big-endian byte order), which is the order the
/// ledger requires for signer lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId([u8; 20]);

impl AccountId {
    /// Wrap raw account id bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The raw 20 account id bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AccountIdError::Empty);
        }

        let payload = decode_base58(s)?;
        if payload.len() != PAYLOAD_LEN {
            return Err(AccountIdError::Length(payload.len()));
        }
        if payload[0] != ACCOUNT_VERSION {
            return Err(AccountIdError::Version(payload[0]));
        }

        let (body, checksum) = payload.split_at(21);
        let digest = Sha256::digest(Sha256::digest(body));
        if digest[..4] != *checksum {
            return Err(AccountIdError::Checksum(s.to_string()));
        }

        let mut id = [0u8; 20];
        id.copy_from_slice(&body[1..]);
        Ok(Self(id))
    }
}

fn decode_base58(s: &str) -> Result<Vec<u8>, AccountIdError> {
    // Little-endian base-256 accumulator.
    let mut bytes: Vec<u8> = Vec::with_capacity(PAYLOAD_LEN);
    for c in s.chars() {
        let digit = ALPHABET
            .iter()
            .position(|&a| char::from(a) == c)
            .ok_or(AccountIdError::InvalidCharacter(c))?;

        let mut carry = digit as u32;
        for byte in bytes.iter_mut() {
            carry += u32::from(*byte) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    // Each leading zero digit stands for one leading zero byte.
    let zero = char::from(ALPHABET[0]);
    let leading = s.chars().take_while(|&c| c == zero).count();
    bytes.extend(std::iter::repeat_n(0u8, leading));
    bytes.reverse();
    Ok(bytes)
}

/// Error decoding a classic address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountIdError {
    #[error("address cannot be empty")]
    Empty,
    #[error("invalid base58 character {0:?}")]
    InvalidCharacter(char),
    #[error("decoded address has {0} bytes, expected 25")]
    Length(usize),
    #[error("unexpected address version byte {0:#04x}")]
    Version(u8),
    #[error("checksum mismatch for address {0}")]
    Checksum(String),
}
