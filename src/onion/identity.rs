//! Ephemeral onion service identity.
//!
//! A fresh Ed25519 key is generated for every run. The v3 onion address is
//! derived from the public key as
//! `base32(pubkey || checksum[..2] || version)` with
//! `checksum = SHA3-256(".onion checksum" || pubkey || version)`.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use sha3::Sha3_256;

/// Onion address version byte for v3 services.
const VERSION: u8 = 3;

/// Domain separator for the address checksum.
const CHECKSUM_PREFIX: &[u8] = b".onion checksum";

/// Decoded length: public key, two checksum bytes, version.
const DECODED_LENGTH: usize = 32 + 2 + 1;

/// Key type prefix understood by `ADD_ONION`.
const KEY_BLOB_PREFIX: &str = "ED25519-V3:";

/// A v3 onion address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OnionAddress {
    public_key: [u8; 32],
}

impl OnionAddress {
    /// Derive the address for an Ed25519 public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Self {
            public_key: public_key.to_bytes(),
        }
    }

    /// Address without the `.onion` suffix, as the control port reports it
    pub fn service_id(&self) -> String {
        let mut bytes = Vec::with_capacity(DECODED_LENGTH);
        bytes.extend_from_slice(&self.public_key);
        bytes.extend_from_slice(&checksum(&self.public_key));
        bytes.push(VERSION);
        data_encoding::BASE32_NOPAD.encode(&bytes).to_lowercase()
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.onion", self.service_id())
    }
}

fn checksum(public_key: &[u8; 32]) -> [u8; 2] {
    let mut hasher = Sha3_256::new();
    hasher.update(CHECKSUM_PREFIX);
    hasher.update(public_key);
    hasher.update([VERSION]);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

/// Key pair and derived address of the onion service for this run.
pub struct ServiceIdentity {
    signing_key: SigningKey,
    address: OnionAddress,
}

impl ServiceIdentity {
    /// Generate a new identity from the operating system RNG
    pub fn generate() -> Result<Self, rand::Error> {
        let mut seed = [0u8; 32];
        OsRng.try_fill_bytes(&mut seed)?;
        Ok(Self::from_seed(seed))
    }

    /// Build an identity from a 32-byte Ed25519 seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let address = OnionAddress::from_public_key(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// The onion address visitors use
    pub fn address(&self) -> &OnionAddress {
        &self.address
    }

    /// Expanded secret key: SHA-512 of the seed with the scalar clamped.
    ///
    /// This is the form Tor stores and accepts for v3 service keys.
    pub fn expanded_secret_key(&self) -> [u8; 64] {
        let digest = Sha512::digest(self.signing_key.to_bytes());
        let mut expanded = [0u8; 64];
        expanded.copy_from_slice(&digest);
        expanded[0] &= 248;
        expanded[31] &= 63;
        expanded[31] |= 64;
        expanded
    }

    /// Key argument for `ADD_ONION`
    pub fn control_key_blob(&self) -> String {
        format!(
            "{}{}",
            KEY_BLOB_PREFIX,
            STANDARD.encode(self.expanded_secret_key())
        )
    }
}

impl fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_ADDRESS: &str = "duckduckgogg42xjoc72x3sjasowoarfbgcmvfimaftt6twagswzczad.onion";

    /// Decode a hostname back into an address, checking version and checksum.
    fn parse(hostname: &str) -> Result<OnionAddress, &'static str> {
        let service_id = hostname.strip_suffix(".onion").unwrap_or(hostname);
        let bytes = data_encoding::BASE32_NOPAD
            .decode(service_id.to_ascii_uppercase().as_bytes())
            .map_err(|_| "encoding")?;

        if bytes.len() != DECODED_LENGTH {
            return Err("length");
        }
        if bytes[34] != VERSION {
            return Err("version");
        }

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&bytes[..32]);
        if checksum(&public_key) != bytes[32..34] {
            return Err("checksum");
        }
        Ok(OnionAddress { public_key })
    }

    #[test]
    fn test_known_address_round_trips() {
        let address = parse(KNOWN_ADDRESS).unwrap();
        let key = VerifyingKey::from_bytes(&address.public_key).unwrap();
        assert_eq!(
            OnionAddress::from_public_key(&key).to_string(),
            KNOWN_ADDRESS
        );
        assert_eq!(
            address.service_id(),
            KNOWN_ADDRESS.trim_end_matches(".onion")
        );
    }

    #[test]
    fn test_checksum_detects_tampering() {
        let tampered = KNOWN_ADDRESS.replacen("duck", "duca", 1);
        assert_eq!(parse(&tampered), Err("checksum"));
    }

    #[test]
    fn test_derived_address_shape() {
        let identity = ServiceIdentity::generate().unwrap();
        let service_id = identity.address().service_id();

        assert_eq!(service_id.len(), 56);
        assert!(service_id.ends_with('d'));
        assert!(service_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
        assert_eq!(
            parse(&identity.address().to_string()).unwrap(),
            *identity.address()
        );
    }

    #[test]
    fn test_address_is_deterministic_for_key() {
        let a = ServiceIdentity::from_seed([42u8; 32]);
        let b = ServiceIdentity::from_seed([42u8; 32]);
        assert_eq!(a.address(), b.address());
        assert_eq!(
            *a.address(),
            OnionAddress::from_public_key(&a.signing_key.verifying_key())
        );
    }

    #[test]
    fn test_fresh_identities_differ() {
        let a = ServiceIdentity::generate().unwrap();
        let b = ServiceIdentity::generate().unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_expanded_key_is_clamped() {
        let identity = ServiceIdentity::from_seed([9u8; 32]);
        let expanded = identity.expanded_secret_key();
        assert_eq!(expanded[0] & 7, 0);
        assert_eq!(expanded[31] & 128, 0);
        assert_eq!(expanded[31] & 64, 64);
    }

    #[test]
    fn test_control_key_blob_format() {
        let identity = ServiceIdentity::from_seed([9u8; 32]);
        let blob = identity.control_key_blob();
        let encoded = blob.strip_prefix("ED25519-V3:").unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap().len(), 64);
    }

    #[test]
    fn test_debug_hides_key_material() {
        let identity = ServiceIdentity::from_seed([9u8; 32]);
        let debug = format!("{:?}", identity);
        assert!(debug.contains(&identity.address().service_id()));
        assert!(!debug.contains("signing_key"));
    }
}
