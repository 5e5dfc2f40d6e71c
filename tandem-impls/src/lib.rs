//! In-process implementations of the store and player contracts.

mod players;
mod stores;

pub use players::*;
pub use stores::*;
