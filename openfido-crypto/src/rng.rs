//! Random number generation backed by the platform entropy source

use rand::RngCore;
use rand::rngs::OsRng;

/// Fill `buf` with cryptographically secure random bytes
pub fn fill(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Return `N` fresh random bytes
pub fn bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    fill(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; 32] = bytes();
        let b: [u8; 32] = bytes();
        assert_ne!(a, b);
    }
}
