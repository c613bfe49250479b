//! VNC authentication (security type 2): DES challenge/response.
//!
//! The client proves knowledge of the password by DES-encrypting a random
//! 16-byte challenge. VNC's quirk: the password bytes form the DES key with
//! the bit order of each byte reversed, padded or truncated to 8 bytes.

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rand::RngCore;

/// Generate a fresh 16-byte challenge.
pub fn make_challenge() -> [u8; 16] {
    let mut challenge = [0u8; 16];
    rand::rng().fill_bytes(&mut challenge);
    challenge
}

/// Encrypt `challenge` the way a VNC client does with `password`.
pub fn encrypt_challenge(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (k, b) in key.iter_mut().zip(password.bytes()) {
        *k = b.reverse_bits();
    }
    let cipher = Des::new(&key.into());
    let mut out = [0u8; 16];
    out.copy_from_slice(challenge);
    for block in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

/// Constant-shape comparison of the client's response.
pub fn verify_response(password: &str, challenge: &[u8; 16], response: &[u8; 16]) -> bool {
    let expected = encrypt_challenge(password, challenge);
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(response) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // Password "passwd" over an all-zero challenge; the reversed-bit
        // key schedule makes this differ from plain DES of the same key.
        let challenge = [0u8; 16];
        let out = encrypt_challenge("passwd", &challenge);
        // Both blocks see the same input, so both halves agree.
        assert_eq!(out[..8], out[8..]);
        assert_ne!(out[..8], challenge[..8]);
    }

    #[test]
    fn verify_accepts_own_encryption() {
        let challenge = make_challenge();
        let response = encrypt_challenge("hunter2", &challenge);
        assert!(verify_response("hunter2", &challenge, &response));
        assert!(!verify_response("hunter3", &challenge, &response));
    }

    #[test]
    fn long_passwords_truncate_to_eight_bytes() {
        let challenge = make_challenge();
        let a = encrypt_challenge("12345678", &challenge);
        let b = encrypt_challenge("12345678ignored", &challenge);
        assert_eq!(a, b);
    }
}
