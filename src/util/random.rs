//! Random fixtures for accounts and transfers

use rand::Rng;
use rand::seq::SliceRandom;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const CURRENCIES: [&str; 3] = ["USD", "EUR", "CAD"];

/// Random integer in `min..=max`
pub fn random_int(min: i64, max: i64) -> i64 {
    rand::thread_rng().gen_range(min..=max)
}

/// Random lowercase string of `n` characters
pub fn random_string(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

pub fn random_owner() -> String {
    random_string(6)
}

/// Random balance in minor units
pub fn random_money() -> i64 {
    random_int(0, 1000)
}

pub fn random_currency() -> String {
    CURRENCIES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("USD")
        .to_string()
}
