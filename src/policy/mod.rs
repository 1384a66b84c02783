pub mod sized_lru;

pub use sized_lru::{Evicted, SizedLru};
