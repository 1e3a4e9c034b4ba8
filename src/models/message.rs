//! Wire schema between clients and the daemon.
//!
//! Every frame is JSON. Requests travel inside a [`RequestFrame`] that
//! carries the protocol version; responses carry it themselves.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::signal::Signal;
use super::task::{Task, TaskStatus};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub version: u32,
    pub request: Request,
}

impl RequestFrame {
    pub fn new(request: Request) -> Self {
        RequestFrame {
            version: PROTOCOL_VERSION,
            request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Request {
    Status,
    Show {
        #[serde(default)]
        key: Option<usize>,
    },
    Add {
        command: String,
        working_directory: PathBuf,
    },
    Edit {
        key: usize,
        command: String,
    },
    Remove {
        keys: Vec<usize>,
    },
    Switch {
        first: usize,
        second: usize,
    },
    Send {
        key: usize,
        input: String,
    },
    Reset,
    Clear,
    Pause {
        #[serde(default)]
        keys: Vec<usize>,
        /// Pause the daemon but let running processes finish.
        #[serde(default)]
        wait: bool,
    },
    Start {
        #[serde(default)]
        keys: Vec<usize>,
    },
    Restart {
        keys: Vec<usize>,
    },
    Stash {
        keys: Vec<usize>,
    },
    Enqueue {
        keys: Vec<usize>,
    },
    Kill {
        #[serde(default)]
        keys: Vec<usize>,
        #[serde(default)]
        signal: Signal,
        /// Signal the shell as well as its children.
        #[serde(default)]
        all: bool,
        /// Delete the task once its process is gone.
        #[serde(default)]
        remove: bool,
        /// Stash the task once its process is gone.
        #[serde(default)]
        stash: bool,
    },
    Config {
        option: ConfigOption,
    },
    StopDaemon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "option", content = "value", rename_all = "camelCase")]
pub enum ConfigOption {
    MaxProcesses(usize),
    CustomShell(String),
    TimeFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub version: u32,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    None,
    Status(StatusReport),
    Output(TaskOutput),
    Added {
        key: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Running,
    Paused,
}

/// Queue overview in id order; tasks are sent without their captured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub daemon: DaemonState,
    pub tasks: Vec<Task>,
}

impl StatusReport {
    pub fn task(&self, id: usize) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub key: usize,
    pub status: TaskStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Response {
            version: PROTOCOL_VERSION,
            status: ResponseStatus::Success,
            message: Some(message.into()),
            data: Payload::None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response {
            version: PROTOCOL_VERSION,
            status: ResponseStatus::Error,
            message: Some(message.into()),
            data: Payload::None,
        }
    }

    pub fn data(data: Payload) -> Self {
        Response {
            version: PROTOCOL_VERSION,
            status: ResponseStatus::Success,
            message: None,
            data,
        }
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_tagged_by_mode() {
        let frame = RequestFrame::new(Request::Add {
            command: "sleep 1".into(),
            working_directory: PathBuf::from("/tmp"),
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["request"]["mode"], "add");
        assert_eq!(json["request"]["working_directory"], "/tmp");
    }

    #[test]
    fn optional_fields_default() {
        let request: Request = serde_json::from_str(r#"{"mode":"kill","keys":[2]}"#).unwrap();
        assert_eq!(
            request,
            Request::Kill {
                keys: vec![2],
                signal: Signal::Sigint,
                all: false,
                remove: false,
                stash: false,
            }
        );
        let request: Request = serde_json::from_str(r#"{"mode":"pause"}"#).unwrap();
        assert_eq!(request, Request::Pause { keys: vec![], wait: false });
    }

    #[test]
    fn config_option_shape() {
        let request = Request::Config {
            option: ConfigOption::MaxProcesses(3),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"mode":"config","option":{"option":"maxProcesses","value":3}}"#);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"mode":"explode"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"command":"ls"}"#).is_err());
    }

    #[test]
    fn response_without_data_decodes() {
        let response: Response =
            serde_json::from_str(r#"{"version":1,"status":"error","message":"nope"}"#).unwrap();
        assert!(!response.is_success());
        assert_eq!(response.data, Payload::None);
    }

    #[test]
    fn status_payload_keeps_task_ids() {
        let response = Response::data(Payload::Status(StatusReport {
            daemon: DaemonState::Paused,
            tasks: vec![Task::new(7, "ls".into(), PathBuf::from("/tmp"))],
        }));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""kind":"status""#));
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
        match back.data {
            Payload::Status(report) => assert_eq!(report.task(7).unwrap().command, "ls"),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
