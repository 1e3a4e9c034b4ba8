pub mod output;
pub mod supervisor;
