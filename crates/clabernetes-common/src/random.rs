//! Random lowercase identifiers
//!
//! Not suitable for anything security sensitive; these only need to be
//! distinguishable, e.g. to tell leader election candidates apart.

use rand::Rng;

const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Return a string of `length` random lowercase ascii letters
pub fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
