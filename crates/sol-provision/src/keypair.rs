//! Ed25519 key pairs used to sign transactions.
//!
//! The secret half lives inside `ed25519_dalek::SigningKey`, which zeroizes
//! itself on drop. Intermediate copies of secret bytes are zeroized by hand.
//! Loading key files is left to the caller.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::address::Address;
use crate::error::SolError;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// A wallet key pair: public address plus private signing capability.
///
/// Cloning copies the secret by value; no two submissions ever share a
/// reference to the same signing state.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random key pair from the OS entropy source.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a key pair from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut seed = *seed;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Self { signing_key }
    }

    /// Build a key pair from the 64-byte `secret || public` layout used by
    /// keypair files.
    ///
    /// Fails if the embedded public key does not belong to the secret.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SolError> {
        let mut keypair_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            SolError::InvalidPrivateKey(format!("expected 64 bytes, got {}", bytes.len()))
        })?;

        let result = SigningKey::from_keypair_bytes(&keypair_bytes)
            .map_err(|e| SolError::InvalidPrivateKey(format!("public key mismatch: {e}")));
        keypair_bytes.zeroize();

        Ok(Self {
            signing_key: result?,
        })
    }

    /// Decode a Base58-encoded 64-byte secret key string.
    pub fn from_base58_string(secret: &str) -> Result<Self, SolError> {
        let mut bytes = bs58::decode(secret)
            .into_vec()
            .map_err(|e| SolError::InvalidPrivateKey(format!("base58 decode failed: {e}")))?;
        let result = Self::from_bytes(&bytes);
        bytes.zeroize();
        result
    }

    /// The 64-byte `secret || public` representation.
    ///
    /// The caller owns the returned secret and is responsible for wiping it.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.signing_key.to_keypair_bytes()
    }

    pub fn address(&self) -> Address {
        Address::new(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign an arbitrary message, returning the 64-byte detached signature.
    ///
    /// Ed25519 signing is deterministic and holds no state, so one key may
    /// sign any number of messages concurrently.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Verify a detached signature against a wallet address.
///
/// Returns `Ok(false)` for a well-formed but wrong signature and an error
/// if the address is not a valid Ed25519 public key.
pub fn verify_signature(
    address: &Address,
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<bool, SolError> {
    let key = VerifyingKey::from_bytes(address.as_bytes())
        .map_err(|e| SolError::InvalidPublicKey(format!("{address}: {e}")))?;
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    Ok(key.verify_strict(message, &signature).is_ok())
}
