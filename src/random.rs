//! Generalized over the rand Library so there's no hard dependencies.
use rand::RngCore;

/// Types that can be filled from a cryptographically secure random source (keys, labels).
pub trait Randomizable: Sized {
    fn random_secure() -> Self;
}

pub fn secure_random_fill_bytes(bytes: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(bytes);
}

#[must_use]
pub fn rand_16_bytes() -> [u8; 16] {
    let mut out = [0_u8; 16];
    secure_random_fill_bytes(&mut out);
    out
}
