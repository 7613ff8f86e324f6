//! Base58Check decoding for chain version bytes.
//!
//! A Base58Check string encodes `version byte || payload || checksum`, where
//! the checksum is the first four bytes of a double SHA-256 over everything
//! before it. Public addresses and WIF private keys share the layout and
//! differ only in the version byte, which is the part the dashboard needs.

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::types::VersionBytePair;

/// Version byte + four checksum bytes.
const MIN_DECODED_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid base58: {0}")]
    Base58(#[from] bs58::decode::Error),
    #[error("decoded payload too short ({length} bytes)")]
    TooShort { length: usize },
    #[error("base58check checksum mismatch")]
    ChecksumMismatch,
}

/// Decode the version byte of a Base58Check address or WIF key,
/// verifying the checksum.
pub fn version_byte(encoded: &str) -> Result<u8, AddressError> {
    let decoded = bs58::decode(encoded).into_vec()?;
    if decoded.len() < MIN_DECODED_LEN {
        return Err(AddressError::TooShort {
            length: decoded.len(),
        });
    }

    let (body, checksum) = decoded.split_at(decoded.len() - 4);
    let digest = Sha256::digest(Sha256::digest(body));
    if digest[..4] != *checksum {
        return Err(AddressError::ChecksumMismatch);
    }

    Ok(body[0])
}

/// Derive the version byte pair of one chain from a public address and the
/// WIF private key the daemon revealed for it.
pub fn version_byte_pair(address: &str, wif: &str) -> Result<VersionBytePair, AddressError> {
    Ok(VersionBytePair {
        public: version_byte(address)?,
        private: version_byte(wif)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Base58Check-encode `version || payload` the way a wallet would.
    fn encode(version: u8, payload: &[u8]) -> String {
        let mut body = vec![version];
        body.extend_from_slice(payload);
        let digest = Sha256::digest(Sha256::digest(&body));
        body.extend_from_slice(&digest[..4]);
        bs58::encode(body).into_string()
    }

    #[test]
    fn decodes_version_byte_from_valid_encoding() {
        let address = encode(0x30, &[0xAB; 20]);
        assert_eq!(version_byte(&address).expect("valid address"), 0x30);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut body = vec![0x30u8];
        body.extend_from_slice(&[0xAB; 20]);
        body.extend_from_slice(&[0, 0, 0, 0]);
        let bad = bs58::encode(body).into_string();
        assert!(matches!(
            version_byte(&bad),
            Err(AddressError::ChecksumMismatch)
        ));
    }

    #[test]
    fn rejects_non_base58_input() {
        assert!(matches!(
            version_byte("0OIl not base58"),
            Err(AddressError::Base58(_))
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let short = bs58::encode([0x30u8, 1, 2]).into_string();
        assert!(matches!(
            version_byte(&short),
            Err(AddressError::TooShort { length: 3 })
        ));
    }

    #[test]
    fn pairs_address_and_wif_bytes() {
        let address = encode(0x1E, &[0x11; 20]);
        let wif = encode(0x9E, &[0x22; 32]);
        let pair = version_byte_pair(&address, &wif).expect("valid pair");
        assert_eq!(pair.public, 0x1E);
        assert_eq!(pair.private, 0x9E);
    }
}
