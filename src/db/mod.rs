pub mod connection;
pub mod link_repo;
pub mod migrations;
pub mod task_repo;

pub use connection::*;
