pub mod message;
pub mod settings;
pub mod signal;
pub mod task;
