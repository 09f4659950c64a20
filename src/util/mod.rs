pub mod random;

pub use random::{random_currency, random_int, random_money, random_owner, random_string};
