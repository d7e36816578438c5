pub mod commands;
pub mod init;
pub mod status;
pub mod task;
pub mod timer;

pub use commands::*;
