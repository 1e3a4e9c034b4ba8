use std::path::PathBuf;

use crate::models::task::TaskStatus;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the queue, the supervisor and the IPC layer.
///
/// Local faults (undecodable output, missing working directories) never show
/// up here: they are recorded on the task itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no task with id {0}")]
    TaskNotFound(usize),

    #[error("task {id} is {status}, expected {expected}")]
    InvalidState {
        id: usize,
        status: TaskStatus,
        expected: &'static str,
    },

    #[error("no running process for task {0}")]
    NoLiveProcess(usize),

    #[error("failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
