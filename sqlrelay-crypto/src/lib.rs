//! SHA-1 challenge/response helpers for the `mysql_native_password` auth
//! plugin, plus the scramble/hex utilities the handshake needs alongside it.

use rand::Rng;
use sha1::{Digest, Sha1};

const SEED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// SHA1(`input`).
pub fn sha1(input: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// SHA1(SHA1(`input`)) — the "double hash" used to verify a native-password
/// token without the server ever storing the plaintext password.
pub fn sha1_twice(input: &[u8]) -> [u8; 20] {
    sha1(&sha1(input))
}

/// XORs two equal-length byte strings. Panics if the lengths differ, callers
/// only ever XOR two 20-byte SHA-1 digests.
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    assert_eq!(a.len(), b.len(), "xor operands must be equal length");
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Computes the `mysql_native_password` response token a client sends back:
/// `SHA1(password) XOR SHA1(scramble || SHA1(SHA1(password)))`.
pub fn native_password_token(password: &[u8], scramble: &[u8]) -> Vec<u8> {
    let stage1 = sha1(password);
    let stage2 = sha1(&stage1);
    let mut salted = Vec::with_capacity(scramble.len() + stage2.len());
    salted.extend_from_slice(scramble);
    salted.extend_from_slice(&stage2);
    let stage3 = sha1(&salted);
    xor(&stage1, &stage3)
}

/// Verifies a client's native-password response against the stored
/// double-hashed password and the scramble that was sent in the handshake.
pub fn verify_native_password(response: &[u8], scramble: &[u8], stored_double_hash: &[u8]) -> bool {
    if response.len() != 20 || stored_double_hash.len() != 20 {
        return false;
    }
    let mut salted = Vec::with_capacity(scramble.len() + stored_double_hash.len());
    salted.extend_from_slice(scramble);
    salted.extend_from_slice(stored_double_hash);
    let stage3 = sha1(&salted);
    let candidate_stage1 = xor(response, &stage3);
    sha1(&candidate_stage1) == *stored_double_hash
}

pub fn bin_to_hex(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() * 2);
    for byte in input {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

pub fn hex_to_bin(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&input[i..i + 2], 16).ok())
        .collect()
}

/// Generates a random scramble of `len` printable ASCII bytes, the same
/// alphabet the handshake's auth-plugin-data uses.
pub fn random_scramble(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| SEED[rng.gen_range(0..SEED.len())]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_matches_known_vector() {
        let digest = sha1(b"abc");
        assert_eq!(
            bin_to_hex(&digest),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }

    #[test]
    fn xor_is_involutive() {
        let a = sha1(b"left");
        let b = sha1(b"right");
        let xored = xor(&a, &b);
        assert_eq!(xor(&xored, &b), a.to_vec());
    }

    #[test]
    fn native_password_round_trips() {
        let scramble = random_scramble(20);
        let password = b"hunter2";
        let token = native_password_token(password, &scramble);
        let stored = sha1_twice(password);
        assert!(verify_native_password(&token, &scramble, &stored));
    }

    #[test]
    fn native_password_rejects_wrong_password() {
        let scramble = random_scramble(20);
        let token = native_password_token(b"hunter2", &scramble);
        let stored = sha1_twice(b"not-hunter2");
        assert!(!verify_native_password(&token, &scramble, &stored));
    }

    #[test]
    fn hex_round_trip() {
        let bytes = vec![0x00, 0x1f, 0xff, 0xa5];
        let hex = bin_to_hex(&bytes);
        assert_eq!(hex_to_bin(&hex).unwrap(), bytes);
    }

    #[test]
    fn random_scramble_has_requested_length() {
        let s = random_scramble(20);
        assert_eq!(s.len(), 20);
        assert!(s.iter().all(|b| SEED.contains(b)));
    }
}
