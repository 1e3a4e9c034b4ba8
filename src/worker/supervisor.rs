//! Process supervisor: owns every live child of the daemon.
//!
//! Children run in their own process group so that pause, resume and kill
//! reach the whole subtree a shell may have started. Exit detection is
//! polling only; nothing here blocks except [`ProcessSupervisor::wait_for_finish`].

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use chrono::Local;
use log::{debug, error, info, warn};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::{Error, Result};
use crate::manager::queue::TaskQueue;
use crate::models::settings::{Settings, DEFAULT_SHELL};
use crate::models::signal::Signal;
use crate::models::task::TaskStatus;
use crate::worker::output::OutputFiles;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What to do with a task once the process we told to stop has exited.
///
/// An entry in the pending map is what marks a task as "stopping"; an exit
/// observed without one is a natural exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitIntent {
    /// Back to `Queued`.
    Requeue,
    /// Back to `Stashed`.
    Stash,
    /// Delete the task.
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shell {
    /// `sh -c <command>`
    Default,
    /// `<path> -i -c <command>`
    Custom(PathBuf),
}

impl Shell {
    pub fn from_setting(value: &str) -> Shell {
        if value == DEFAULT_SHELL {
            Shell::Default
        } else {
            Shell::Custom(PathBuf::from(value))
        }
    }

    fn command(&self, line: &str) -> Command {
        match self {
            Shell::Default => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(line);
                command
            }
            Shell::Custom(path) => {
                let mut command = Command::new(path);
                command.arg("-i").arg("-c").arg(line);
                command
            }
        }
    }
}

struct LiveProcess {
    child: Child,
    output: OutputFiles,
}

pub struct ProcessSupervisor {
    output_dir: PathBuf,
    max_processes: usize,
    shell: Shell,
    time_format: String,
    processes: BTreeMap<usize, LiveProcess>,
    paused: BTreeSet<usize>,
    pending: BTreeMap<usize, ExitIntent>,
}

impl ProcessSupervisor {
    pub fn new(output_dir: impl Into<PathBuf>, settings: &Settings) -> Self {
        ProcessSupervisor {
            output_dir: output_dir.into(),
            max_processes: settings.max_processes,
            shell: Shell::from_setting(&settings.custom_shell),
            time_format: settings.time_format.clone(),
            processes: BTreeMap::new(),
            paused: BTreeSet::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn set_max(&mut self, amount: usize) {
        self.max_processes = amount;
    }

    pub fn set_shell(&mut self, shell: Shell) {
        self.shell = shell;
    }

    pub fn set_time_format(&mut self, format: &str) {
        self.time_format = format.to_string();
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    pub fn is_running(&self, id: usize) -> bool {
        self.processes.contains_key(&id)
    }

    pub fn is_paused(&self, id: usize) -> bool {
        self.paused.contains(&id)
    }

    pub fn all_finished(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.processes.len()
    }

    pub fn live_ids(&self) -> Vec<usize> {
        self.processes.keys().copied().collect()
    }

    /// Records how the next observed exit of `id` must be handled.
    pub fn mark_stopping(&mut self, id: usize, intent: ExitIntent) {
        self.pending.insert(id, intent);
    }

    pub fn is_stopping(&self, id: usize) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn intent(&self, id: usize) -> Option<ExitIntent> {
        self.pending.get(&id).copied()
    }

    pub fn forget_intent(&mut self, id: usize) {
        self.pending.remove(&id);
    }

    fn now(&self) -> String {
        Local::now().format(&self.time_format).to_string()
    }

    /// Launches task `id`.
    ///
    /// A vanished working directory or a refused spawn fails the task instead
    /// of returning an error; only persistence problems are propagated.
    pub fn spawn(&mut self, id: usize, queue: &mut TaskQueue) -> Result<()> {
        let task = queue.get(id).ok_or(Error::TaskNotFound(id))?;
        if !task.is_waiting() || self.is_running(id) {
            return Err(Error::InvalidState {
                id,
                status: task.status,
                expected: "queued or stashed",
            });
        }
        let command = task.command.clone();
        let working_directory = task.working_directory.clone();

        if !working_directory.is_dir() {
            let message = format!(
                "The directory for this command doesn't exist anymore: {}",
                working_directory.display()
            );
            error!("Task {}: {}", id, message);
            let end_time = self.now();
            return queue.update(id, |task| {
                task.status = TaskStatus::Failed;
                task.stdout.clear();
                task.stderr = message;
                task.end_time = end_time;
            });
        }

        match self.launch(id, &command, &working_directory) {
            Ok(process) => {
                info!("Task {} started (pid {}): {}", id, process.child.id(), command);
                self.processes.insert(id, process);
                let start_time = self.now();
                queue.update(id, |task| {
                    task.status = TaskStatus::Running;
                    task.return_code = None;
                    task.start_time = start_time;
                    task.end_time.clear();
                })
            }
            Err(e) => {
                error!("Task {} could not be started: {}", id, e);
                let end_time = self.now();
                queue.update(id, |task| {
                    task.status = TaskStatus::Failed;
                    task.stdout.clear();
                    task.stderr = e.to_string();
                    task.end_time = end_time;
                })
            }
        }
    }

    fn launch(&self, id: usize, line: &str, working_directory: &Path) -> Result<LiveProcess> {
        let output = OutputFiles::create(&self.output_dir, id)?;
        let (stdout, stderr) = output.stdio()?;

        let mut command = self.shell.command(line);
        command
            .current_dir(working_directory)
            .stdin(Stdio::piped())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0);

        match command.spawn() {
            Ok(child) => Ok(LiveProcess { child, output }),
            Err(e) => {
                output.discard();
                Err(Error::io("cannot spawn a shell in", working_directory, e))
            }
        }
    }

    /// Reaps every exited child. Returns whether any task changed.
    ///
    /// All exited children are handled even when a write fails; the first
    /// persistence error is returned afterwards.
    pub fn check_finished(&mut self, queue: &mut TaskQueue) -> Result<bool> {
        let mut changed = false;
        let mut first_error = None;

        for id in self.live_ids() {
            let exit = match self.processes.get_mut(&id) {
                Some(process) => match process.child.try_wait() {
                    Ok(Some(status)) => status,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Polling task {} failed: {}", id, e);
                        continue;
                    }
                },
                None => continue,
            };

            let Some(process) = self.processes.remove(&id) else {
                continue;
            };
            self.paused.remove(&id);

            let result = match self.pending.remove(&id) {
                None => self.finish(id, exit, process, queue),
                Some(intent) => {
                    process.output.discard();
                    Self::settle_stopped(id, intent, queue)
                }
            };
            changed = true;
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    fn finish(&self, id: usize, exit: ExitStatus, process: LiveProcess, queue: &mut TaskQueue) -> Result<()> {
        let command = queue.get(id).map(|task| task.command.clone()).unwrap_or_default();
        let (stdout, stderr) = process.output.drain(&command);
        let code = exit_code(exit);
        let status = if code == 0 {
            TaskStatus::Done
        } else {
            TaskStatus::Failed
        };
        info!("Task {} finished with exit code {}.", id, code);

        let end_time = self.now();
        queue.update(id, |task| {
            task.status = status;
            task.return_code = Some(code);
            task.stdout = stdout;
            task.stderr = stderr;
            task.end_time = end_time;
        })
    }

    fn settle_stopped(id: usize, intent: ExitIntent, queue: &mut TaskQueue) -> Result<()> {
        info!("Task {} stopped, applying {:?}.", id, intent);
        match intent {
            ExitIntent::Remove => queue.delete(id).map(|_| ()),
            ExitIntent::Stash => queue.update(id, |task| task.reset_run(TaskStatus::Stashed)),
            ExitIntent::Requeue => queue.update(id, |task| task.reset_run(TaskStatus::Queued)),
        }
    }

    /// Fills free slots with the lowest queued ids.
    pub fn check_for_new(&mut self, queue: &mut TaskQueue) -> Result<()> {
        let free_slots = self.max_processes.saturating_sub(self.processes.len());
        for _ in 0..free_slots {
            let next = queue.next_runnable(|id| self.processes.contains_key(&id));
            match next {
                Some(id) => self.spawn(id, queue)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Resumes a paused task, or spawns a waiting one if a slot is free.
    pub fn start_process(&mut self, id: usize, queue: &mut TaskQueue) -> Result<bool> {
        if let Some(process) = self.processes.get(&id) {
            if !self.paused.contains(&id) {
                return Ok(false);
            }
            signal_group(process.child.id(), libc::SIGCONT)?;
            self.paused.remove(&id);
            info!("Task {} resumed.", id);
            queue.update(id, |task| task.status = TaskStatus::Running)?;
            return Ok(true);
        }

        let waiting = queue.get(id).map(|task| task.is_waiting()).unwrap_or(false);
        if waiting && self.processes.len() < self.max_processes {
            self.spawn(id, queue)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn pause_process(&mut self, id: usize, queue: &mut TaskQueue) -> Result<bool> {
        let Some(process) = self.processes.get(&id) else {
            return Ok(false);
        };
        if self.paused.contains(&id) {
            return Ok(false);
        }
        signal_group(process.child.id(), libc::SIGSTOP)?;
        self.paused.insert(id);
        info!("Task {} paused.", id);
        queue.update(id, |task| task.status = TaskStatus::Paused)?;
        Ok(true)
    }

    /// Sends `signal` to the task's shell and/or its direct children.
    ///
    /// Only delivers the signal; the exit is handled on a later reap.
    /// Register an intent with [`Self::mark_stopping`] first if the exit must
    /// not count as a failure. A paused task is resumed so the signal arrives,
    /// and is `Running` again from then on.
    pub fn kill_process(&mut self, id: usize, signal: Signal, kill_shell: bool, queue: &mut TaskQueue) -> Result<bool> {
        let Some(process) = self.processes.get_mut(&id) else {
            return Ok(false);
        };
        if !matches!(process.child.try_wait(), Ok(None)) {
            return Ok(false);
        }

        let shell_pid = process.child.id();
        let children = child_pids(shell_pid);
        if kill_shell || children.is_empty() {
            signal_pid(shell_pid, signal.as_raw())?;
        }
        for child in &children {
            if let Err(e) = signal_pid(*child, signal.as_raw()) {
                // The child may have exited between listing and signalling.
                debug!("Task {}: {}", id, e);
            }
        }

        info!("Sent {} to task {}.", signal, id);

        // A stopped group would hold the signal until resumed.
        if self.paused.contains(&id) && signal != Signal::Sigstop {
            signal_group(shell_pid, libc::SIGCONT)?;
            self.paused.remove(&id);
            info!("Task {} resumed to receive {}.", id, signal);
            // The signal is out; a failed write is retried by the dirty flag.
            if let Err(e) = queue.update(id, |task| task.status = TaskStatus::Running) {
                error!("Task {}: {}", id, e);
            }
        }
        Ok(true)
    }

    pub fn send_to_process(&mut self, message: &str, id: usize) -> Result<()> {
        let process = self.processes.get_mut(&id).ok_or(Error::NoLiveProcess(id))?;
        let stdin = process.child.stdin.as_mut().ok_or(Error::NoLiveProcess(id))?;
        stdin
            .write_all(message.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|e| Error::io("cannot write to stdin of task", id.to_string(), e))
    }

    /// Output captured so far by a live task.
    pub fn peek_output(&self, id: usize, command: &str) -> Option<(String, String)> {
        self.processes.get(&id).map(|process| process.output.peek(command))
    }

    pub fn start_all(&mut self, queue: &mut TaskQueue) -> Result<()> {
        for id in self.live_ids() {
            self.start_process(id, queue)?;
        }
        Ok(())
    }

    pub fn pause_all(&mut self, queue: &mut TaskQueue) -> Result<()> {
        for id in self.live_ids() {
            self.pause_process(id, queue)?;
        }
        Ok(())
    }

    pub fn kill_all(&mut self, signal: Signal, kill_shell: bool, queue: &mut TaskQueue) -> Result<()> {
        for id in self.live_ids() {
            self.kill_process(id, signal, kill_shell, queue)?;
        }
        Ok(())
    }

    /// Blocks until every child has been reaped. Shutdown path only.
    pub fn wait_for_finish(&mut self, queue: &mut TaskQueue) {
        while !self.all_finished() {
            if let Err(e) = self.check_finished(queue) {
                error!("Error while reaping processes: {}", e);
            }
            if !self.all_finished() {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Exit code, or 128 + signal number for signal deaths.
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

fn signal_pid(pid: u32, signal: libc::c_int) -> Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == -1 {
        return Err(Error::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Children are spawned as group leaders, so the group id is the shell's pid.
fn signal_group(pid: u32, signal: libc::c_int) -> Result<()> {
    let result = unsafe { libc::killpg(pid as libc::pid_t, signal) };
    if result == -1 {
        return Err(Error::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Direct children of `pid`.
fn child_pids(pid: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
    let parent = Pid::from_u32(pid);
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.parent() == Some(parent))
        .map(|(child, _)| child.as_u32())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Fixture {
        _dir: tempfile::TempDir,
        queue: TaskQueue,
        supervisor: ProcessSupervisor,
    }

    fn fixture(max_processes: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("output");
        std::fs::create_dir(&output_dir).unwrap();
        let settings = Settings {
            max_processes,
            ..Settings::default()
        };
        Fixture {
            queue: TaskQueue::new(dir.path().join("queue.json")),
            supervisor: ProcessSupervisor::new(output_dir, &settings),
            _dir: dir,
        }
    }

    impl Fixture {
        fn add(&mut self, command: &str) -> usize {
            self.queue.insert(command.into(), PathBuf::from("/tmp")).unwrap()
        }

        fn status(&self, id: usize) -> TaskStatus {
            self.queue.get(id).unwrap().status
        }

        /// Ticks until `done` holds or ten seconds pass.
        fn tick_until<F: Fn(&Fixture) -> bool>(&mut self, done: F) {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !done(self) {
                assert!(Instant::now() < deadline, "condition not reached in time");
                self.supervisor.check_finished(&mut self.queue).unwrap();
                self.supervisor.check_for_new(&mut self.queue).unwrap();
                thread::sleep(Duration::from_millis(50));
            }
        }

        fn assert_live_invariant(&self) {
            for task in self.queue.iter() {
                assert_eq!(task.is_live(), self.supervisor.is_running(task.id), "task {}", task.id);
            }
        }
    }

    #[test]
    fn successful_command_is_done_with_output() {
        let mut f = fixture(1);
        let id = f.add("echo hello; echo oops >&2");
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        assert_eq!(f.status(id), TaskStatus::Running);
        f.assert_live_invariant();

        f.tick_until(|f| f.status(id) == TaskStatus::Done);
        let task = f.queue.get(id).unwrap();
        assert_eq!(task.return_code, Some(0));
        assert_eq!(task.stdout, "hello\n    ");
        assert_eq!(task.stderr, "oops\n    ");
        assert!(!task.start_time.is_empty());
        assert!(!task.end_time.is_empty());
        f.assert_live_invariant();
    }

    #[test]
    fn failing_command_keeps_exit_code() {
        let mut f = fixture(1);
        let id = f.add("exit 3");
        f.tick_until(|f| f.status(id) == TaskStatus::Failed);
        assert_eq!(f.queue.get(id).unwrap().return_code, Some(3));
    }

    #[test]
    fn missing_directory_fails_without_running() {
        let mut f = fixture(1);
        let id = f
            .queue
            .insert("true".into(), PathBuf::from("/nonexistent/taskq/dir"))
            .unwrap();
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        let task = f.queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.stderr.contains("doesn't exist anymore"));
        assert!(task.start_time.is_empty());
        assert!(!task.end_time.is_empty());
        assert!(f.supervisor.all_finished());
    }

    #[test]
    fn fifo_with_single_slot() {
        let mut f = fixture(1);
        let first = f.add("sleep 0.3");
        let second = f.add("true");
        let third = f.add("true");

        f.supervisor.check_for_new(&mut f.queue).unwrap();
        assert_eq!(f.status(first), TaskStatus::Running);
        assert_eq!(f.status(second), TaskStatus::Queued);
        assert_eq!(f.status(third), TaskStatus::Queued);

        f.tick_until(|f| f.status(second) != TaskStatus::Queued);
        assert_eq!(f.status(first), TaskStatus::Done);
        f.tick_until(|f| f.status(third) == TaskStatus::Done);
    }

    #[test]
    fn check_for_new_respects_max_processes() {
        let mut f = fixture(2);
        for _ in 0..3 {
            f.add("sleep 5");
        }
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        assert_eq!(f.supervisor.live_count(), 2);
        assert_eq!(f.status(2), TaskStatus::Queued);
        f.assert_live_invariant();
        f.supervisor.kill_all(Signal::Sigkill, true, &mut f.queue).unwrap();
        f.supervisor.wait_for_finish(&mut f.queue);
    }

    #[test]
    fn killed_task_with_intent_is_requeued() {
        let mut f = fixture(1);
        let id = f.add("sleep 30");
        f.supervisor.check_for_new(&mut f.queue).unwrap();

        f.supervisor.mark_stopping(id, ExitIntent::Requeue);
        assert!(f.supervisor.kill_process(id, Signal::Sigterm, true, &mut f.queue).unwrap());
        assert!(f.supervisor.is_stopping(id));
        // The state only changes once the exit is observed.
        assert_eq!(f.status(id), TaskStatus::Running);

        let deadline = Instant::now() + Duration::from_secs(10);
        while f.supervisor.is_running(id) {
            assert!(Instant::now() < deadline);
            f.supervisor.check_finished(&mut f.queue).unwrap();
            thread::sleep(Duration::from_millis(50));
        }
        let task = f.queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.start_time.is_empty() && task.end_time.is_empty());
        assert!(task.return_code.is_none());
        assert!(!f.supervisor.is_stopping(id));
    }

    #[test]
    fn kill_without_intent_fails_the_task() {
        let mut f = fixture(1);
        let id = f.add("sleep 30");
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        f.supervisor.kill_process(id, Signal::Sigkill, true, &mut f.queue).unwrap();
        f.tick_until(|f| f.status(id) == TaskStatus::Failed);
        assert_eq!(f.queue.get(id).unwrap().return_code, Some(128 + libc::SIGKILL));
    }

    #[test]
    fn stash_and_remove_intents() {
        let mut f = fixture(2);
        let stashed = f.add("sleep 30");
        let removed = f.add("sleep 30");
        f.supervisor.check_for_new(&mut f.queue).unwrap();

        f.supervisor.mark_stopping(stashed, ExitIntent::Stash);
        f.supervisor.mark_stopping(removed, ExitIntent::Remove);
        f.supervisor.kill_all(Signal::Sigkill, true, &mut f.queue).unwrap();
        f.supervisor.wait_for_finish(&mut f.queue);

        assert_eq!(f.status(stashed), TaskStatus::Stashed);
        assert!(!f.queue.contains(removed));
        f.assert_live_invariant();
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let mut f = fixture(1);
        let id = f.add("sleep 0.5; exit 4");
        f.supervisor.check_for_new(&mut f.queue).unwrap();

        assert!(f.supervisor.pause_process(id, &mut f.queue).unwrap());
        assert_eq!(f.status(id), TaskStatus::Paused);
        assert!(!f.supervisor.pause_process(id, &mut f.queue).unwrap());
        f.assert_live_invariant();

        thread::sleep(Duration::from_millis(800));
        f.supervisor.check_finished(&mut f.queue).unwrap();
        assert_eq!(f.status(id), TaskStatus::Paused);

        assert!(f.supervisor.start_process(id, &mut f.queue).unwrap());
        assert_eq!(f.status(id), TaskStatus::Running);
        f.tick_until(|f| f.status(id) == TaskStatus::Failed);
        assert_eq!(f.queue.get(id).unwrap().return_code, Some(4));
    }

    #[test]
    fn killing_a_paused_task_still_delivers() {
        let mut f = fixture(1);
        let id = f.add("sleep 30");
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        f.supervisor.pause_process(id, &mut f.queue).unwrap();
        f.supervisor.mark_stopping(id, ExitIntent::Requeue);
        f.supervisor.kill_process(id, Signal::Sigterm, true, &mut f.queue).unwrap();
        f.supervisor.wait_for_finish(&mut f.queue);
        assert_eq!(f.status(id), TaskStatus::Queued);
        assert!(!f.supervisor.is_paused(id));
    }

    #[test]
    fn kill_of_a_paused_task_marks_it_running_again() {
        let mut f = fixture(1);
        let id = f.add("trap '' TERM; sleep 1; exit 0");
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        // Give the shell time to install its trap.
        thread::sleep(Duration::from_millis(200));
        f.supervisor.pause_process(id, &mut f.queue).unwrap();
        assert_eq!(f.status(id), TaskStatus::Paused);

        f.supervisor.mark_stopping(id, ExitIntent::Requeue);
        assert!(f.supervisor.kill_process(id, Signal::Sigterm, false, &mut f.queue).unwrap());
        assert!(!f.supervisor.is_paused(id));
        assert_eq!(f.status(id), TaskStatus::Running);

        f.supervisor.wait_for_finish(&mut f.queue);
        assert_eq!(f.status(id), TaskStatus::Queued);
    }

    #[test]
    fn explicit_start_needs_a_free_slot() {
        let mut f = fixture(1);
        let running = f.add("sleep 30");
        let waiting = f.add("true");
        f.queue.update(waiting, |task| task.status = TaskStatus::Stashed).unwrap();
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        assert!(f.supervisor.is_running(running));

        assert!(!f.supervisor.start_process(waiting, &mut f.queue).unwrap());
        assert_eq!(f.status(waiting), TaskStatus::Stashed);

        f.supervisor.set_max(2);
        assert!(f.supervisor.start_process(waiting, &mut f.queue).unwrap());
        f.tick_until(|f| f.status(waiting) == TaskStatus::Done);

        f.supervisor.kill_all(Signal::Sigkill, true, &mut f.queue).unwrap();
        f.supervisor.wait_for_finish(&mut f.queue);
    }

    #[test]
    fn send_writes_to_stdin() {
        let mut f = fixture(1);
        let id = f.add("read line; echo got $line");
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        f.supervisor.send_to_process("ping\n", id).unwrap();
        f.tick_until(|f| f.status(id) == TaskStatus::Done);
        assert_eq!(f.queue.get(id).unwrap().stdout, "got ping\n    ");
        assert!(matches!(
            f.supervisor.send_to_process("x", id),
            Err(Error::NoLiveProcess(_))
        ));
    }

    #[test]
    fn custom_shell_is_used() {
        use std::os::unix::fs::PermissionsExt;

        let mut f = fixture(1);
        // Drops the `-i` flag so no job control is attempted.
        let shell = f._dir.path().join("wrapper.sh");
        std::fs::write(&shell, "#!/bin/sh\nshift\nexec /bin/sh \"$@\"\n").unwrap();
        std::fs::set_permissions(&shell, std::fs::Permissions::from_mode(0o755)).unwrap();
        f.supervisor.set_shell(Shell::Custom(shell));
        let id = f.add("echo custom");
        f.tick_until(|f| f.status(id) == TaskStatus::Done);
        assert!(f.queue.get(id).unwrap().stdout.starts_with("custom"));
    }

    #[test]
    fn refused_spawn_fails_the_task() {
        let mut f = fixture(1);
        f.supervisor.set_shell(Shell::Custom(PathBuf::from("/nonexistent/shell")));
        let id = f.add("true");
        f.supervisor.check_for_new(&mut f.queue).unwrap();
        assert_eq!(f.status(id), TaskStatus::Failed);
        assert!(f.supervisor.all_finished());
    }
}
