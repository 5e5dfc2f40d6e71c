mod memory_store;
mod tree;

pub use memory_store::*;
