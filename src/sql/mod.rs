//! Statement templates and parameter binding. Identifiers come from definitions only, values as parameters.

pub mod params;
mod template;
pub use params::*;
pub use template::*;
