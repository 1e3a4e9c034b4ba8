use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: usize,
    pub command: String,
    pub working_directory: PathBuf,
    pub status: TaskStatus,
    pub return_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Stashed,
    Running,
    Paused,
    Done,
    Failed,
}

impl Task {
    pub fn new(id: usize, command: String, working_directory: PathBuf) -> Self {
        Self {
            id,
            command,
            working_directory,
            status: TaskStatus::Queued,
            return_code: None,
            stdout: String::new(),
            stderr: String::new(),
            start_time: String::new(),
            end_time: String::new(),
        }
    }

    /// Running or paused: the task owns an OS process.
    pub fn is_live(&self) -> bool {
        matches!(self.status, TaskStatus::Running | TaskStatus::Paused)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Done | TaskStatus::Failed)
    }

    /// Queued or stashed tasks may still be edited, switched or started.
    pub fn is_waiting(&self) -> bool {
        matches!(self.status, TaskStatus::Queued | TaskStatus::Stashed)
    }

    /// Puts the task back into a waiting state and forgets the last run.
    pub fn reset_run(&mut self, status: TaskStatus) {
        self.status = status;
        self.return_code = None;
        self.start_time.clear();
        self.end_time.clear();
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Stashed => "stashed",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_queued_and_empty() {
        let task = Task::new(3, "ls -al".into(), PathBuf::from("/tmp"));
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.return_code.is_none());
        assert!(task.start_time.is_empty() && task.end_time.is_empty());
        assert!(task.is_waiting());
        assert!(!task.is_live());
    }

    #[test]
    fn reset_run_clears_times() {
        let mut task = Task::new(0, "true".into(), PathBuf::from("/tmp"));
        task.status = TaskStatus::Running;
        task.start_time = "10:00".into();
        task.end_time = "10:01".into();
        task.reset_run(TaskStatus::Stashed);
        assert_eq!(task.status, TaskStatus::Stashed);
        assert!(task.start_time.is_empty());
        assert!(task.end_time.is_empty());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }
}
