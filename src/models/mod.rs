pub mod link;
pub mod task;

pub use link::*;
pub use task::*;
