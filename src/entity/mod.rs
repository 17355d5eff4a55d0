pub mod deployment;
pub mod tool;

pub mod prelude;

pub use prelude::*;
