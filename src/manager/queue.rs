use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::task::{Task, TaskStatus};

const QUEUE_FORMAT_VERSION: u32 = 1;

/// On-disk representation of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: u32,
    pub next_id: usize,
    pub tasks: Vec<Task>,
}

/// Ordered, durable mapping of task id to task.
///
/// Id order is scheduling order. Every mutation rewrites the whole file
/// (temp file + rename), so the file always holds one complete state. When a
/// write fails the in-memory queue stays authoritative and is flagged dirty
/// until a later `write` succeeds.
pub struct TaskQueue {
    tasks: BTreeMap<usize, Task>,
    next_id: usize,
    path: PathBuf,
    dirty: bool,
}

impl TaskQueue {
    /// Empty queue persisting to `path`. Nothing is written until the first mutation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TaskQueue {
            tasks: BTreeMap::new(),
            next_id: 0,
            path: path.into(),
            dirty: false,
        }
    }

    /// Loads the daemon's own queue.
    ///
    /// A corrupted file is moved aside and replaced by an empty queue. Tasks
    /// that were live when the previous daemon died are queued again.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut queue = TaskQueue::new(path);
        if !queue.path.exists() {
            return Ok(queue);
        }

        let snapshot = fs::read(&queue.path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<QueueSnapshot>(&bytes).map_err(|e| e.to_string()));
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let aside = queue.path.with_extension("json.corrupt");
                warn!("Queue file {} is corrupted ({}), moving it to {}", queue.path.display(), e, aside.display());
                fs::rename(&queue.path, &aside).map_err(|e| Error::io("cannot move", aside, e))?;
                return Ok(queue);
            }
        };

        let mut recovered = false;
        for mut task in snapshot.tasks {
            if task.is_live() {
                warn!("Task {} was {} when the daemon stopped, queueing it again.", task.id, task.status);
                task.reset_run(TaskStatus::Queued);
                recovered = true;
            }
            queue.tasks.insert(task.id, task);
        }
        let max_id = queue.tasks.keys().next_back().map(|id| id + 1).unwrap_or(0);
        queue.next_id = snapshot.next_id.max(max_id);
        info!("Loaded {} tasks from {}", queue.tasks.len(), queue.path.display());

        if recovered {
            queue.write()?;
        }
        Ok(queue)
    }

    /// Read-only load for clients. A missing or unreadable file means "no data".
    pub fn snapshot(path: &Path) -> Option<QueueSnapshot> {
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert(&mut self, command: String, working_directory: PathBuf) -> Result<usize> {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(id, Task::new(id, command, working_directory));
        if let Err(e) = self.write() {
            // Unacknowledged tasks must never run.
            self.tasks.remove(&id);
            self.next_id = id;
            return Err(e);
        }
        info!("Task {} added.", id);
        Ok(id)
    }

    pub fn get(&self, id: usize) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Applies `change` to task `id` and persists.
    pub fn update<F>(&mut self, id: usize, change: F) -> Result<()>
    where
        F: FnOnce(&mut Task),
    {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        change(task);
        self.write()
    }

    pub fn delete(&mut self, id: usize) -> Result<Task> {
        let task = self.tasks.remove(&id).ok_or(Error::TaskNotFound(id))?;
        info!("Task {} removed.", id);
        self.write()?;
        Ok(task)
    }

    /// Smallest queued id that `is_owned` does not claim.
    pub fn next_runnable<F>(&self, is_owned: F) -> Option<usize>
    where
        F: Fn(usize) -> bool,
    {
        self.tasks
            .values()
            .find(|task| task.status == TaskStatus::Queued && !is_owned(task.id))
            .map(|task| task.id)
    }

    /// Swaps the contents of two waiting tasks. Ids stay where they are.
    pub fn switch(&mut self, first: usize, second: usize) -> Result<()> {
        if first == second {
            return Err(Error::InvalidState {
                id: first,
                status: self.status_of(first)?,
                expected: "a different task to switch with",
            });
        }
        for id in [first, second] {
            let status = self.status_of(id)?;
            if !matches!(status, TaskStatus::Queued | TaskStatus::Stashed) {
                return Err(Error::InvalidState {
                    id,
                    status,
                    expected: "queued or stashed",
                });
            }
        }

        let mut a = self.tasks.remove(&first).ok_or(Error::TaskNotFound(first))?;
        let mut b = self.tasks.remove(&second).ok_or(Error::TaskNotFound(second))?;
        std::mem::swap(&mut a.id, &mut b.id);
        self.tasks.insert(a.id, a);
        self.tasks.insert(b.id, b);
        info!("Tasks {} and {} switched.", first, second);
        self.write()
    }

    /// Queues a fresh copy of a finished task and returns the new id.
    pub fn restart(&mut self, id: usize) -> Result<usize> {
        let task = self.tasks.get(&id).ok_or(Error::TaskNotFound(id))?;
        if !task.is_finished() {
            return Err(Error::InvalidState {
                id,
                status: task.status,
                expected: "done or failed",
            });
        }
        let (command, working_directory) = (task.command.clone(), task.working_directory.clone());
        self.insert(command, working_directory)
    }

    /// Drops every done or failed task.
    pub fn clear_finished(&mut self) -> Result<usize> {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !task.is_finished());
        let removed = before - self.tasks.len();
        info!("Cleared {} finished tasks.", removed);
        self.write()?;
        Ok(removed)
    }

    /// Empties the queue and restarts ids at zero.
    pub fn reset(&mut self) -> Result<()> {
        self.tasks.clear();
        self.next_id = 0;
        info!("Queue reset.");
        self.write()
    }

    /// Any task still waiting to run.
    pub fn has_pending(&self) -> bool {
        self.tasks.values().any(Task::is_waiting)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> Vec<usize> {
        self.tasks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Atomically rewrites the queue file with the current state.
    pub fn write(&mut self) -> Result<()> {
        self.dirty = true;
        let snapshot = QueueSnapshot {
            version: QUEUE_FORMAT_VERSION,
            next_id: self.next_id,
            tasks: self.tasks.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let tmp_path = self.path.with_extension("json.tmp");
        write_synced(&tmp_path, &json)
            .and_then(|_| fs::rename(&tmp_path, &self.path))
            .map_err(|source| {
                error!("Failed to write queue to {}: {}", self.path.display(), source);
                Error::Persistence {
                    path: self.path.clone(),
                    source,
                }
            })?;
        self.dirty = false;
        Ok(())
    }

    /// Retries a failed write; no-op when the file is current.
    pub fn flush_if_dirty(&mut self) -> Result<()> {
        if self.dirty {
            self.write()?;
        }
        Ok(())
    }

    fn status_of(&self, id: usize) -> Result<TaskStatus> {
        self.tasks.get(&id).map(|task| task.status).ok_or(Error::TaskNotFound(id))
    }
}

/// The data must be on disk before the rename makes it visible.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
