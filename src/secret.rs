//! Identity to field-element mapping.

use crate::error::{MembershipError, MembershipResult};
use crate::field::FieldElement;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Length in bytes of a freshly generated organization salt.
pub const SALT_BYTES: usize = 16;

/// Derives a member's secret from their email and the organization salt.
///
/// Computes `SHA-256(email || org_salt)`, reads the digest as a big-endian
/// integer and reduces it modulo the field order. Inputs are hashed exactly as
/// given; swapping or re-casing them yields a different secret.
///
/// # Errors
///
/// Returns `InvalidSecretParameters` if either input is empty or blank.
///
/// # Examples
///
/// ```
/// use zkp_batch_membership::secret::derive_secret;
///
/// let a = derive_secret("alice@example.com", "salt").unwrap();
/// let b = derive_secret("alice@example.com", "salt").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn derive_secret(email: &str, org_salt: &str) -> MembershipResult<FieldElement> {
    if email.trim().is_empty() {
        return Err(MembershipError::invalid_parameters(
            "email is required to derive a user secret",
        ));
    }
    if org_salt.trim().is_empty() {
        return Err(MembershipError::invalid_parameters(
            "organization salt is required to derive a user secret",
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(org_salt.as_bytes());
    let digest = hasher.finalize();

    Ok(FieldElement::from_be_bytes(&digest))
}

/// Generates a random organization salt, hex encoded.
#[must_use]
pub fn generate_org_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Keccak-256 of a plain-text payment reference, hex encoded with `0x`.
///
/// Matches the bytes32 memo hash an on-chain transfer carries for the same
/// reference.
#[must_use]
pub fn reference_hash(reference: &str) -> String {
    let digest = Keccak256::digest(reference.as_bytes());
    format!("0x{}", hex::encode(digest))
}
