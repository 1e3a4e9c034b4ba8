use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{error, warn};

use crate::error::{Error, Result};

/// File-backed stdout/stderr sinks of one live task.
///
/// Created fresh at spawn, removed once drained or discarded at reap.
#[derive(Debug)]
pub struct OutputFiles {
    id: usize,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    stdout: File,
    stderr: File,
}

impl OutputFiles {
    pub fn create(dir: &Path, id: usize) -> Result<Self> {
        let stdout_path = dir.join(format!("task_{}.stdout", id));
        let stderr_path = dir.join(format!("task_{}.stderr", id));
        let stdout = open_fresh(&stdout_path)?;
        let stderr = open_fresh(&stderr_path)?;
        Ok(OutputFiles {
            id,
            stdout_path,
            stderr_path,
            stdout,
            stderr,
        })
    }

    /// Handles for the child's stdout and stderr.
    pub fn stdio(&self) -> Result<(Stdio, Stdio)> {
        let stdout = self
            .stdout
            .try_clone()
            .map_err(|e| Error::io("cannot duplicate", &self.stdout_path, e))?;
        let stderr = self
            .stderr
            .try_clone()
            .map_err(|e| Error::io("cannot duplicate", &self.stderr_path, e))?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    /// Current contents without consuming the files.
    pub fn peek(&self, command: &str) -> (String, String) {
        (
            read_lines(&self.stdout_path, self.id, command),
            read_lines(&self.stderr_path, self.id, command),
        )
    }

    /// Reads everything the process wrote and deletes the files.
    pub fn drain(self, command: &str) -> (String, String) {
        let output = self.peek(command);
        self.discard();
        output
    }

    pub fn discard(self) {
        for path in [&self.stdout_path, &self.stderr_path] {
            if let Err(e) = fs::remove_file(path) {
                warn!("Could not remove output file {}: {}", path.display(), e);
            }
        }
    }
}

fn open_fresh(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::io("cannot create", path, e))
}

/// Reads a capture file line by line.
///
/// A line that is not valid UTF-8 is replaced by a marker naming the task, so
/// the valid rest of the output survives.
fn read_lines(path: &Path, id: usize, command: &str) -> String {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Could not open output file {}: {}", path.display(), e);
            return String::new();
        }
    };

    let mut reader = BufReader::new(file);
    let mut text = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => match std::str::from_utf8(&line) {
                Ok(valid) => text.push_str(valid),
                Err(_) => {
                    let message = decode_error_marker(id);
                    error!("{} with command {}", message, command);
                    text.push_str(&message);
                    text.push('\n');
                }
            },
            Err(e) => {
                error!("Reading {} failed: {}", path.display(), e);
                break;
            }
        }
    }
    indent(&text)
}

fn decode_error_marker(id: usize) -> String {
    format!("Error while decoding output of task {}", id)
}

/// Continuation lines are indented for display under the task header.
pub fn indent(text: &str) -> String {
    text.replace('\n', "\n    ")
}
