pub mod definition;
pub mod field;

pub use definition::*;
pub use field::*;
