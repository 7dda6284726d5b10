pub mod jws;
pub mod keys;

pub const SHA256_LENGTH: usize = 32;

/// Computes the SHA2-256 digest over the provided byte slice.
pub fn sha256(input: &[u8]) -> [u8; SHA256_LENGTH] {
    use sha2::{Digest, Sha256};
    Sha256::digest(input).into()
}
