pub mod format;
pub mod hash;

pub use format::*;
pub use hash::*;
