//! Request handlers. Every handler runs on the control-loop thread between ticks.

use std::path::PathBuf;

use log::{debug, error, info};

use crate::error::Result;
use crate::manager::daemon::Daemon;
use crate::models::message::{ConfigOption, Payload, Request, Response, StatusReport, TaskOutput};
use crate::models::settings::{validate_max_processes, validate_shell, validate_time_format};
use crate::models::signal::Signal;
use crate::models::task::TaskStatus;
use crate::worker::supervisor::{ExitIntent, Shell};

/// Builds the answer of a handler that acts on several keys.
fn report(succeeded: &[usize], failed: &[usize], success: &str, failure: &str) -> Response {
    if succeeded.is_empty() && failed.is_empty() {
        return Response::error("No keys given.");
    }
    let join = |keys: &[usize]| keys.iter().map(usize::to_string).collect::<Vec<_>>().join(", ");

    let mut message = String::new();
    if !succeeded.is_empty() {
        message.push_str(&format!("{}: {}.", success, join(succeeded)));
    }
    if !failed.is_empty() {
        if !message.is_empty() {
            message.push('\n');
        }
        message.push_str(&format!("{}: {}.", failure, join(failed)));
        return Response::error(message);
    }
    Response::success(message)
}

impl Daemon {
    pub fn handle(&mut self, request: Request) -> Response {
        debug!("Handling {:?}", request);
        let result = match request {
            Request::Status => Ok(self.status()),
            Request::Show { key } => Ok(self.show(key)),
            Request::Add {
                command,
                working_directory,
            } => self.add(command, working_directory),
            Request::Edit { key, command } => self.edit(key, command),
            Request::Remove { keys } => self.remove(&keys),
            Request::Switch { first, second } => Ok(self.switch(first, second)),
            Request::Send { key, input } => self.send(key, &input),
            Request::Reset => self.reset(),
            Request::Clear => self.clear(),
            Request::Pause { keys, wait } => self.pause(&keys, wait),
            Request::Start { keys } => self.start(&keys),
            Request::Restart { keys } => self.restart(&keys),
            Request::Stash { keys } => self.move_waiting(&keys, TaskStatus::Queued, TaskStatus::Stashed),
            Request::Enqueue { keys } => self.move_waiting(&keys, TaskStatus::Stashed, TaskStatus::Queued),
            Request::Kill {
                keys,
                signal,
                all,
                remove,
                stash,
            } => self.kill(&keys, signal, all, remove, stash),
            Request::Config { option } => self.config(option),
            Request::StopDaemon => self.stop_daemon(),
        };
        result.unwrap_or_else(|e| {
            error!("Request failed: {}", e);
            Response::error(e.to_string())
        })
    }

    fn status(&self) -> Response {
        let tasks = self
            .queue
            .iter()
            .map(|task| {
                let mut task = task.clone();
                task.stdout.clear();
                task.stderr.clear();
                task
            })
            .collect();
        Response::data(Payload::Status(StatusReport {
            daemon: self.state(),
            tasks,
        }))
    }

    /// Output of `key`, or of the newest live task when no key is given.
    fn show(&self, key: Option<usize>) -> Response {
        let key = match key.or_else(|| self.supervisor.live_ids().last().copied()) {
            Some(key) => key,
            None => return Response::error("No running process."),
        };
        let Some(task) = self.queue.get(key) else {
            return Response::error("No entry with this key");
        };

        let (stdout, stderr) = if let Some(output) = self.supervisor.peek_output(key, &task.command) {
            output
        } else if task.is_finished() {
            (task.stdout.clone(), task.stderr.clone())
        } else {
            return Response::error(format!("Task {} has not produced any output yet.", key));
        };
        Response::data(Payload::Output(TaskOutput {
            key,
            status: task.status,
            stdout,
            stderr,
        }))
    }

    fn add(&mut self, command: String, working_directory: PathBuf) -> Result<Response> {
        if !working_directory.is_absolute() {
            return Ok(Response::error("The working directory must be an absolute path."));
        }
        let key = self.queue.insert(command, working_directory)?;
        Ok(Response::success("Entry added").with_data(Payload::Added { key }))
    }

    fn edit(&mut self, key: usize, command: String) -> Result<Response> {
        let Some(task) = self.queue.get(key) else {
            return Ok(Response::error("No entry with this key"));
        };
        if !task.is_waiting() {
            return Ok(Response::error("Entry is not 'queued' or 'stashed'"));
        }
        self.queue.update(key, |task| task.command = command)?;
        Ok(Response::success("Command updated"))
    }

    fn remove(&mut self, keys: &[usize]) -> Result<Response> {
        let (mut succeeded, mut failed) = (Vec::new(), Vec::new());
        for &key in keys {
            let removable = self.queue.get(key).map(|task| !task.is_live()).unwrap_or(false);
            if removable && !self.supervisor.is_running(key) {
                self.queue.delete(key)?;
                succeeded.push(key);
            } else {
                failed.push(key);
            }
        }
        Ok(report(&succeeded, &failed, "Removed entries", "Running or non-existing entry for keys"))
    }

    fn switch(&mut self, first: usize, second: usize) -> Response {
        if self.supervisor.is_running(first) || self.supervisor.is_running(second) {
            return Response::error("Can't switch running processes, please stop the processes before switching them.");
        }
        match self.queue.switch(first, second) {
            Ok(()) => Response::success(format!("Entries #{} and #{} switched", first, second)),
            Err(e) => {
                debug!("Switch rejected: {}", e);
                Response::error("One or both entries do not exist or are not queued/stashed.")
            }
        }
    }

    fn send(&mut self, key: usize, input: &str) -> Result<Response> {
        if !self.supervisor.is_running(key) {
            return Ok(Response::error("No running process for this key"));
        }
        self.supervisor.send_to_process(input, key)?;
        Ok(Response::success("Message sent"))
    }

    /// Kills everything; the queue itself is wiped by a later tick.
    fn reset(&mut self) -> Result<Response> {
        for id in self.supervisor.live_ids() {
            self.supervisor.mark_stopping(id, ExitIntent::Remove);
        }
        self.supervisor.kill_all(Signal::Sigkill, true, &mut self.queue)?;
        self.reset_pending = true;
        info!("Reset requested.");
        Ok(Response::success("Resetting current queue"))
    }

    fn clear(&mut self) -> Result<Response> {
        self.queue.clear_finished()?;
        Ok(Response::success("Finished entries have been removed."))
    }

    fn pause(&mut self, keys: &[usize], wait: bool) -> Result<Response> {
        if !keys.is_empty() {
            let (mut succeeded, mut failed) = (Vec::new(), Vec::new());
            for &key in keys {
                if self.supervisor.pause_process(key, &mut self.queue)? {
                    succeeded.push(key);
                } else {
                    failed.push(key);
                }
            }
            return Ok(report(&succeeded, &failed, "Paused processes", "No running process for keys"));
        }

        if wait {
            self.paused = true;
            return Ok(Response::success("Pausing daemon, but waiting for processes to finish."));
        }
        self.supervisor.pause_all(&mut self.queue)?;
        if self.paused {
            Ok(Response::success("Daemon already paused, pausing all processes anyway."))
        } else {
            self.paused = true;
            info!("Daemon paused.");
            Ok(Response::success("Daemon and all processes paused."))
        }
    }

    fn start(&mut self, keys: &[usize]) -> Result<Response> {
        if !keys.is_empty() {
            let (mut succeeded, mut failed) = (Vec::new(), Vec::new());
            for &key in keys {
                if self.supervisor.start_process(key, &mut self.queue)? {
                    succeeded.push(key);
                } else {
                    failed.push(key);
                }
            }
            return Ok(report(
                &succeeded,
                &failed,
                "Started processes",
                "No paused, queued or stashed process for keys",
            ));
        }

        self.supervisor.start_all(&mut self.queue)?;
        if self.paused {
            self.paused = false;
            info!("Daemon resumed.");
            Ok(Response::success("Daemon and all processes started."))
        } else {
            Ok(Response::success("Daemon already running, starting all processes."))
        }
    }

    fn restart(&mut self, keys: &[usize]) -> Result<Response> {
        let (mut succeeded, mut failed) = (Vec::new(), Vec::new());
        for &key in keys {
            let finished = self.queue.get(key).map(|task| task.is_finished()).unwrap_or(false);
            if finished {
                self.queue.restart(key)?;
                succeeded.push(key);
            } else {
                failed.push(key);
            }
        }
        Ok(report(&succeeded, &failed, "Restarted entries", "No finished entry for keys"))
    }

    /// Moves waiting tasks between `Queued` and `Stashed`.
    fn move_waiting(&mut self, keys: &[usize], from: TaskStatus, to: TaskStatus) -> Result<Response> {
        let (mut succeeded, mut failed) = (Vec::new(), Vec::new());
        for &key in keys {
            if self.queue.get(key).map(|task| task.status) == Some(from) {
                self.queue.update(key, |task| task.status = to)?;
                succeeded.push(key);
            } else {
                failed.push(key);
            }
        }
        let (success, failure) = match to {
            TaskStatus::Stashed => ("Stashed entries", "No queued entry for keys"),
            _ => ("Enqueued entries", "No stashed entry for keys"),
        };
        Ok(report(&succeeded, &failed, success, failure))
    }

    fn kill(&mut self, keys: &[usize], signal: Signal, all: bool, remove: bool, stash: bool) -> Result<Response> {
        let intent = if remove {
            ExitIntent::Remove
        } else if stash {
            ExitIntent::Stash
        } else {
            ExitIntent::Requeue
        };

        if !keys.is_empty() {
            let (mut succeeded, mut failed) = (Vec::new(), Vec::new());
            for &key in keys {
                // The intent must exist before the exit can be observed.
                let registered = signal.terminates() && !self.supervisor.is_stopping(key);
                if registered {
                    self.supervisor.mark_stopping(key, intent);
                }
                let sent = match self.supervisor.kill_process(key, signal, all, &mut self.queue) {
                    Ok(sent) => sent,
                    Err(e) => {
                        error!("Failed to signal task {}: {}", key, e);
                        false
                    }
                };
                if sent {
                    succeeded.push(key);
                } else {
                    if registered {
                        self.supervisor.forget_intent(key);
                    }
                    failed.push(key);
                }
            }
            return Ok(report(
                &succeeded,
                &failed,
                &format!("Signal '{}' sent to processes", signal),
                "No running process for keys",
            ));
        }

        if signal.terminates() {
            for id in self.supervisor.live_ids() {
                if !self.supervisor.is_stopping(id) {
                    self.supervisor.mark_stopping(id, intent);
                }
            }
        }
        self.supervisor.kill_all(signal, all, &mut self.queue)?;
        if signal.pauses_daemon() {
            self.paused = true;
        }
        Ok(Response::success("Signal send to all processes."))
    }

    fn config(&mut self, option: ConfigOption) -> Result<Response> {
        match option {
            ConfigOption::MaxProcesses(amount) => {
                validate_max_processes(amount)?;
                self.supervisor.set_max(amount);
                self.settings.max_processes = amount;
            }
            ConfigOption::CustomShell(shell) => {
                validate_shell(&shell)?;
                self.supervisor.set_shell(Shell::from_setting(&shell));
                self.settings.custom_shell = shell;
            }
            ConfigOption::TimeFormat(format) => {
                validate_time_format(&format)?;
                self.supervisor.set_time_format(&format);
                self.settings.time_format = format;
            }
        }
        self.settings.save(&self.paths.settings_file())?;
        info!("Configuration updated: {:?}", self.settings);
        Ok(Response::success("Configuration successfully updated."))
    }

    /// Kills every process and ends the control loop after this request.
    fn stop_daemon(&mut self) -> Result<Response> {
        for id in self.supervisor.live_ids() {
            self.supervisor.mark_stopping(id, ExitIntent::Requeue);
        }
        self.supervisor.kill_all(Signal::Sigkill, true, &mut self.queue)?;
        self.running = false;
        Ok(Response::success("Daemon shutting down"))
    }
}
