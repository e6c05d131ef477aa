//! Detached Ed25519 verification for callback payloads.

use solana_sdk::signature::Signature;

use crate::wire::{PUBKEY_LEN, SIGNATURE_LEN};

/// Returns `true` only if `signature` is a valid Ed25519 signature by `public_key` over
/// exactly `message`. Malformed keys or signatures verify as `false`, never as an error.
pub fn verify_detached(
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
    public_key: &[u8; PUBKEY_LEN],
) -> bool {
    Signature::from(*signature).verify(public_key, message)
}
