pub mod daemon;
pub mod dispatch;
pub mod queue;
