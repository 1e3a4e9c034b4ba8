//! A local task-queue daemon: queue shell commands, run a bounded number of
//! them in the background and inspect their state and output over a Unix
//! socket.

pub mod app;
pub mod error;
pub mod manager;
pub mod models;
pub mod worker;
