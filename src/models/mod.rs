pub mod deployment;
pub mod tool;

pub use deployment::*;
pub use tool::*;
