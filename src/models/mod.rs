pub mod document;
pub mod draft;
pub mod enums;
pub mod field;

pub use document::*;
pub use draft::*;
pub use field::*;
