mod id;
mod tasks;

pub use id::*;
pub use tasks::*;
