//! Opaque record identifiers
//!
//! Ids are random tokens over a 62-character alphanumeric alphabet, drawn
//! from the operating system CSPRNG. They carry no information about the
//! record they identify.

use rand::{distributions::Uniform, rngs::OsRng, Rng};

/// Characters an id may contain.
pub const ID_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length used for every record id created by this crate.
pub const DEFAULT_ID_LENGTH: usize = 32;

/// Generate a random id of `length` characters.
///
/// Each character is sampled uniformly from [`ID_ALPHABET`]; `Uniform`
/// rejects out-of-range draws so there is no modulo bias.
pub fn generate_id(length: usize) -> String {
    let dist = Uniform::new(0, ID_ALPHABET.len());
    let mut rng = OsRng;
    (0..length)
        .map(|_| ID_ALPHABET[rng.sample(dist)] as char)
        .collect()
}

/// Generate an id of [`DEFAULT_ID_LENGTH`] characters.
pub fn new_id() -> String {
    generate_id(DEFAULT_ID_LENGTH)
}
