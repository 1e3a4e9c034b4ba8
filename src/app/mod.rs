pub mod cli;
pub mod ipc;
