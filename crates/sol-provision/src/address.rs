//! Ledger addresses and deterministic address derivation.
//!
//! An address is a 32-byte value rendered as Base58. Wallet addresses are
//! Ed25519 public keys; derived addresses are SHA-256 outputs computed from a
//! base address, a seed, and an owning program id. There is no hashing step
//! for wallet addresses: the public key bytes ARE the address bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::SolError;

/// Maximum seed length accepted by the ledger, in bytes.
pub const MAX_SEED_LEN: usize = 32;

/// Maximum number of seeds for a program-derived address.
pub const MAX_SEEDS: usize = 16;

/// The string appended to PDA derivation: "ProgramDerivedAddress".
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// A 32-byte ledger address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as a Base58 string.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Decode a Base58 address string.
    ///
    /// Returns an error if the string is not valid Base58 or does not decode
    /// to exactly 32 bytes.
    pub fn from_base58(address: &str) -> Result<Self, SolError> {
        let bytes = bs58::decode(address)
            .into_vec()
            .map_err(|e| SolError::InvalidAddress(format!("base58 decode failed: {e}")))?;

        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            SolError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
        })?;

        Ok(Self(arr))
    }

    /// Derive the address of an account created with a seed.
    ///
    /// `SHA-256(base || seed || owner)`, exactly as the ledger computes it when
    /// validating `CreateAccountWithSeed`, so the relationship is recognized
    /// without the client ever submitting the derivation itself.
    pub fn derive_with_seed(base: &Address, seed: &str, owner: &Address) -> Result<Self, SolError> {
        if seed.len() > MAX_SEED_LEN {
            return Err(SolError::InvalidSeedLength {
                len: seed.len(),
                max: MAX_SEED_LEN,
            });
        }

        if owner.0.ends_with(PDA_MARKER) {
            return Err(SolError::IllegalOwner);
        }

        let mut hasher = Sha256::new();
        hasher.update(base.0);
        hasher.update(seed.as_bytes());
        hasher.update(owner.0);
        Ok(Self(hasher.finalize().into()))
    }

    /// Check if the address is a valid Ed25519 curve point, i.e. whether a
    /// private key could ever exist for it.
    ///
    /// Uses `curve25519-dalek` to attempt decompression. If it succeeds, the
    /// point is on the curve.
    pub fn is_on_curve(&self) -> bool {
        curve25519_dalek::edwards::CompressedEdwardsY(self.0)
            .decompress()
            .is_some()
    }

    /// Find a valid Program Derived Address (PDA) for the given seeds and program.
    ///
    /// Iterates bump seeds from 255 down to 0, computing
    /// `SHA-256(seed_0 || seed_1 || ... || bump || program_id || "ProgramDerivedAddress")`
    /// and returning the first result that is NOT a valid Ed25519 point.
    pub fn find_program_address(
        seeds: &[&[u8]],
        program_id: &Address,
    ) -> Result<(Self, u8), SolError> {
        if seeds.len() >= MAX_SEEDS {
            return Err(SolError::InvalidAddress(format!(
                "at most {} seeds allowed before the bump, got {}",
                MAX_SEEDS - 1,
                seeds.len()
            )));
        }

        for bump in (0u8..=255).rev() {
            match Self::create_program_address(seeds, &[bump], program_id) {
                Ok(address) => return Ok((address, bump)),
                Err(SolError::InvalidAddress(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(SolError::InvalidAddress(
            "could not find valid PDA bump seed".into(),
        ))
    }

    /// Create a PDA from seeds + bump + program_id.
    ///
    /// Fails with `InvalidAddress` if the derived point falls on the curve.
    pub fn create_program_address(
        seeds: &[&[u8]],
        bump_seed: &[u8],
        program_id: &Address,
    ) -> Result<Self, SolError> {
        if seeds.len() + 1 > MAX_SEEDS {
            return Err(SolError::InvalidAddress(format!(
                "at most {MAX_SEEDS} seeds allowed, got {}",
                seeds.len() + 1
            )));
        }

        let mut hasher = Sha256::new();
        for seed in seeds {
            if seed.len() > MAX_SEED_LEN {
                return Err(SolError::InvalidSeedLength {
                    len: seed.len(),
                    max: MAX_SEED_LEN,
                });
            }
            hasher.update(seed);
        }
        hasher.update(bump_seed);
        hasher.update(program_id.0);
        hasher.update(PDA_MARKER);

        let address = Self(hasher.finalize().into());

        // A valid PDA must NOT be on the Ed25519 curve.
        if address.is_on_curve() {
            return Err(SolError::InvalidAddress(
                "derived address lies on the ed25519 curve".into(),
            ));
        }

        Ok(address)
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl FromStr for Address {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_instruction::SYSTEM_PROGRAM_ID;

    /// The System Program address is 32 zero bytes, which encodes to
    /// "11111111111111111111111111111111" in Base58.
    #[test]
    fn system_program_address() {
        assert_eq!(
            Address::new([0u8; 32]).to_base58(),
            "11111111111111111111111111111111"
        );
    }

    #[test]
    fn roundtrip_encode_decode() {
        let address = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
        let parsed: Address = address.parse().unwrap();
        assert_eq!(parsed.to_string(), address);
    }

    #[test]
    fn garbage_returns_error() {
        assert!(Address::from_base58("not-a-valid-address!!!").is_err());
    }

    #[test]
    fn too_short_returns_error() {
        // "1" decodes to a single zero byte, which is not 32 bytes.
        let err = Address::from_base58("1").unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn serde_uses_base58_strings() {
        let address = Address::new([0xAA; 32]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", address.to_base58()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    // -- Seed derivation ----------------------------------------------------

    #[test]
    fn derive_with_seed_is_deterministic() {
        let base = Address::new([0x11; 32]);
        let a = Address::derive_with_seed(&base, "hello", &SYSTEM_PROGRAM_ID).unwrap();
        let b = Address::derive_with_seed(&base, "hello", &SYSTEM_PROGRAM_ID).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_with_seed_matches_plain_sha256() {
        let base = Address::new([0x11; 32]);
        let owner = Address::new([0x22; 32]);
        let derived = Address::derive_with_seed(&base, "seed", &owner).unwrap();

        let mut preimage = Vec::new();
        preimage.extend_from_slice(&[0x11; 32]);
        preimage.extend_from_slice(b"seed");
        preimage.extend_from_slice(&[0x22; 32]);
        let expected: [u8; 32] = Sha256::digest(&preimage).into();
        assert_eq!(derived.to_bytes(), expected);
    }

    #[test]
    fn different_seeds_give_different_addresses() {
        let base = Address::new([0x11; 32]);
        let a = Address::derive_with_seed(&base, "hello", &SYSTEM_PROGRAM_ID).unwrap();
        let b = Address::derive_with_seed(&base, "rogue1", &SYSTEM_PROGRAM_ID).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn max_length_seed_is_accepted() {
        let base = Address::new([0x11; 32]);
        let seed = "x".repeat(MAX_SEED_LEN);
        assert!(Address::derive_with_seed(&base, &seed, &SYSTEM_PROGRAM_ID).is_ok());
    }

    #[test]
    fn oversized_seed_fails() {
        let base = Address::new([0x11; 32]);
        let seed = "x".repeat(MAX_SEED_LEN + 1);
        let err = Address::derive_with_seed(&base, &seed, &SYSTEM_PROGRAM_ID).unwrap_err();
        assert!(matches!(err, SolError::InvalidSeedLength { len: 33, max: 32 }));
    }

    #[test]
    fn owner_with_pda_marker_is_illegal() {
        let mut owner = [0u8; 32];
        owner[32 - PDA_MARKER.len()..].copy_from_slice(PDA_MARKER);
        let err = Address::derive_with_seed(&Address::default(), "s", &Address::new(owner))
            .unwrap_err();
        assert!(matches!(err, SolError::IllegalOwner));
    }

    // -- Curve classification ----------------------------------------------

    #[test]
    fn basepoint_is_on_curve() {
        // The Ed25519 basepoint (compressed form).
        let mut basepoint = [0x66u8; 32];
        basepoint[0] = 0x58;
        assert!(Address::new(basepoint).is_on_curve());
    }

    #[test]
    fn off_curve_bytes() {
        // y = 0x020202...02 has no matching x coordinate.
        assert!(!Address::new([0x02; 32]).is_on_curve());
    }

    #[test]
    fn wallet_public_keys_are_on_curve() {
        let key = crate::keypair::Keypair::from_seed(&[7u8; 32]);
        assert!(key.address().is_on_curve());
    }

    // -- Program-derived addresses -----------------------------------------

    #[test]
    fn pda_is_not_on_curve() {
        let program = Address::new([0x33; 32]);
        let (pda, _bump) = Address::find_program_address(&[b"vault"], &program).unwrap();
        assert!(!pda.is_on_curve());
    }

    #[test]
    fn pda_bump_recreates_same_address() {
        let program = Address::new([0x33; 32]);
        let (pda, bump) = Address::find_program_address(&[b"vault"], &program).unwrap();
        let again = Address::create_program_address(&[b"vault"], &[bump], &program).unwrap();
        assert_eq!(pda, again);
    }

    #[test]
    fn pda_rejects_oversized_seed() {
        let program = Address::new([0x33; 32]);
        let seed = [0u8; MAX_SEED_LEN + 1];
        assert!(matches!(
            Address::find_program_address(&[&seed], &program),
            Err(SolError::InvalidSeedLength { .. })
        ));
    }
}
