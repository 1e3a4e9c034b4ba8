use crossbeam_channel::{select, tick, unbounded, Receiver};
use log::{error, info, warn};

use crate::app::ipc::{Incoming, IpcServer};
use crate::error::Result;
use crate::manager::queue::TaskQueue;
use crate::models::message::DaemonState;
use crate::models::settings::{DaemonPaths, Settings};
use crate::models::signal::Signal;
use crate::worker::supervisor::{ExitIntent, ProcessSupervisor, POLL_INTERVAL};

/// Everything the daemon mutates, owned by the control-loop thread.
pub struct Daemon {
    pub(crate) paths: DaemonPaths,
    pub(crate) settings: Settings,
    pub(crate) queue: TaskQueue,
    pub(crate) supervisor: ProcessSupervisor,
    /// No new tasks are spawned while set.
    pub(crate) paused: bool,
    /// Queue is wiped once every process has exited.
    pub(crate) reset_pending: bool,
    pub(crate) running: bool,
}

impl Daemon {
    pub fn new(paths: DaemonPaths) -> Result<Daemon> {
        paths.create_dirs()?;
        let settings = Settings::load_or_create(&paths.settings_file())?;
        let mut queue = TaskQueue::open(paths.queue_file())?;

        // Finished history of a previous session is dropped unless work remains.
        if !queue.has_pending() {
            queue.reset()?;
        }
        let paused = !queue.is_empty() && !settings.resume_after_start;
        if paused {
            info!("{} tasks left from the last session, starting paused.", queue.len());
        }

        let supervisor = ProcessSupervisor::new(paths.output_dir(), &settings);
        Ok(Daemon {
            paths,
            settings,
            queue,
            supervisor,
            paused,
            reset_pending: false,
            running: true,
        })
    }

    pub fn state(&self) -> DaemonState {
        if self.paused {
            DaemonState::Paused
        } else {
            DaemonState::Running
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// One scheduling step: reap first, then fill free slots.
    pub fn tick(&mut self) {
        if let Err(e) = self.queue.flush_if_dirty() {
            error!("Queue is still not persisted: {}", e);
        }
        if let Err(e) = self.supervisor.check_finished(&mut self.queue) {
            error!("Error while reaping processes: {}", e);
        }

        if self.reset_pending && self.supervisor.all_finished() {
            match self.queue.reset() {
                Ok(()) => self.reset_pending = false,
                Err(e) => error!("Reset failed, retrying: {}", e),
            }
        }

        if !self.paused && !self.reset_pending && self.running {
            if let Err(e) = self.supervisor.check_for_new(&mut self.queue) {
                error!("Error while starting new tasks: {}", e);
            }
        }
    }

    /// Alternates ticks and requests until a stop request or until every
    /// sender is gone.
    pub fn run(&mut self, requests: Receiver<Incoming>) {
        let ticker = tick(POLL_INTERVAL);
        while self.running {
            select! {
                recv(ticker) -> _ => self.tick(),
                recv(requests) -> incoming => match incoming {
                    Ok(Incoming { request, reply }) => {
                        let response = self.handle(request);
                        if reply.send(response).is_err() {
                            warn!("Client disconnected before the response was sent.");
                        }
                    }
                    Err(_) => {
                        warn!("Request channel closed, stopping.");
                        self.running = false;
                    }
                },
            }
        }
    }

    /// Kills what is left and waits for it. Killed tasks are queued again.
    pub fn shutdown(&mut self) {
        info!("Shutting down, {} processes left.", self.supervisor.live_count());
        for id in self.supervisor.live_ids() {
            self.supervisor.mark_stopping(id, ExitIntent::Requeue);
        }
        if let Err(e) = self.supervisor.kill_all(Signal::Sigkill, true, &mut self.queue) {
            error!("Failed to kill remaining processes: {}", e);
        }
        self.supervisor.wait_for_finish(&mut self.queue);
        if let Err(e) = self.queue.flush_if_dirty() {
            error!("Queue could not be saved on shutdown: {}", e);
        }
    }
}

/// Runs the daemon in the foreground until it is told to stop.
pub fn run_daemon(paths: DaemonPaths) -> Result<()> {
    let mut daemon = Daemon::new(paths.clone())?;
    let socket = paths.socket();
    let server = IpcServer::bind(&socket)?;
    let (sender, receiver) = unbounded();
    let listener = server.spawn(sender)?;
    info!("Daemon started in {}", paths.root.display());

    daemon.run(receiver);
    // The stop request is answered by the listener; wait until it is written.
    if listener.join().is_err() {
        error!("Listener thread panicked.");
    }
    daemon.shutdown();
    IpcServer::cleanup(&socket);
    info!("Daemon stopped.");
    Ok(())
}
