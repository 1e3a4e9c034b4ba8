use std::env;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crossterm::style::{StyledContent, Stylize};
use crossterm::terminal;

use crate::app::ipc::send_request;
use crate::error::{Error, Result};
use crate::manager::daemon::run_daemon;
use crate::manager::queue::TaskQueue;
use crate::models::message::{ConfigOption, DaemonState, Payload, Request, Response, StatusReport, TaskOutput};
use crate::models::settings::DaemonPaths;
use crate::models::signal::Signal;
use crate::models::task::{Task, TaskStatus};

#[derive(Parser, Debug)]
#[command(author, version, about = "Queue shell commands and run them in the background")]
pub struct Cli {
    /// Directory holding the socket, the queue and the settings
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: SubCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum SubCommand {
    /// Run the daemon in the foreground
    Daemon,
    /// Kill all processes and stop the daemon
    StopDaemon,
    /// Show the queue
    Status,
    /// Change a daemon setting
    Config {
        #[command(subcommand)]
        option: ConfigCommand,
    },
    /// Show the output of a task, by default the newest running one
    Show {
        #[arg(short, long)]
        key: Option<usize>,
    },
    /// Show the output of finished tasks
    Log {
        #[arg(short, long, num_args = 1..)]
        keys: Vec<usize>,
    },
    /// Queue a command, run in the current directory
    Add {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    Remove {
        #[arg(required = true)]
        keys: Vec<usize>,
    },
    /// Replace the command of a queued or stashed task
    Edit {
        key: usize,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Swap two waiting tasks
    Switch { first: usize, second: usize },
    /// Write to the stdin of a running task
    Send { input: String, key: usize },
    /// Kill everything and empty the queue
    Reset,
    /// Remove finished tasks
    Clear,
    /// Pause the daemon, or only the given tasks
    Pause {
        /// Let running tasks finish
        #[arg(short, long)]
        wait: bool,
        keys: Vec<usize>,
    },
    /// Resume the daemon, or start the given tasks
    Start { keys: Vec<usize> },
    /// Queue finished tasks again
    Restart {
        #[arg(required = true)]
        keys: Vec<usize>,
    },
    Stash {
        #[arg(required = true)]
        keys: Vec<usize>,
    },
    Enqueue {
        #[arg(required = true)]
        keys: Vec<usize>,
    },
    /// Signal running tasks, all of them when no keys are given
    Kill {
        #[arg(short, long, default_value = "sigint", value_parser = parse_signal)]
        signal: Signal,
        /// Signal the shell as well as the processes it started
        #[arg(short, long)]
        all: bool,
        /// Delete the tasks once they have stopped
        #[arg(long)]
        remove: bool,
        /// Stash the tasks once they have stopped
        #[arg(long, conflicts_with = "remove")]
        stash: bool,
        keys: Vec<usize>,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigCommand {
    MaxProcesses { value: usize },
    /// Path of an executable shell, or `default`
    CustomShell { value: String },
    /// strftime pattern for start and end times
    TimeFormat { value: String },
}

fn parse_signal(value: &str) -> std::result::Result<Signal, String> {
    value.parse()
}

impl SubCommand {
    /// The request sent to the daemon. `daemon` and `log` never reach the socket.
    pub fn into_request(self, cwd: PathBuf) -> Option<Request> {
        let request = match self {
            SubCommand::Daemon | SubCommand::Log { .. } => return None,
            SubCommand::StopDaemon => Request::StopDaemon,
            SubCommand::Status => Request::Status,
            SubCommand::Config { option } => Request::Config {
                option: match option {
                    ConfigCommand::MaxProcesses { value } => ConfigOption::MaxProcesses(value),
                    ConfigCommand::CustomShell { value } => ConfigOption::CustomShell(value),
                    ConfigCommand::TimeFormat { value } => ConfigOption::TimeFormat(value),
                },
            },
            SubCommand::Show { key } => Request::Show { key },
            SubCommand::Add { command } => Request::Add {
                command: command.join(" "),
                working_directory: cwd,
            },
            SubCommand::Remove { keys } => Request::Remove { keys },
            SubCommand::Edit { key, command } => Request::Edit {
                key,
                command: command.join(" "),
            },
            SubCommand::Switch { first, second } => Request::Switch { first, second },
            SubCommand::Send { input, key } => Request::Send { key, input },
            SubCommand::Reset => Request::Reset,
            SubCommand::Clear => Request::Clear,
            SubCommand::Pause { wait, keys } => Request::Pause { keys, wait },
            SubCommand::Start { keys } => Request::Start { keys },
            SubCommand::Restart { keys } => Request::Restart { keys },
            SubCommand::Stash { keys } => Request::Stash { keys },
            SubCommand::Enqueue { keys } => Request::Enqueue { keys },
            SubCommand::Kill {
                signal,
                all,
                remove,
                stash,
                keys,
            } => Request::Kill {
                keys,
                signal,
                all,
                remove,
                stash,
            },
        };
        Some(request)
    }
}

/// Runs one CLI invocation. Returns false when the daemon answered with an error.
pub fn run(cli: Cli) -> Result<bool> {
    let paths = DaemonPaths::new(cli.root)?;
    match cli.command {
        SubCommand::Daemon => {
            run_daemon(paths)?;
            Ok(true)
        }
        SubCommand::Log { keys } => Ok(print_log(&paths, &keys)),
        command => {
            let cwd = env::current_dir().map_err(|e| Error::io("cannot read", ".", e))?;
            let Some(request) = command.into_request(cwd) else {
                return Ok(true);
            };
            let response = send_request(&paths.socket(), request)?;
            print_response(&response);
            Ok(response.is_success())
        }
    }
}

fn print_response(response: &Response) {
    if let Some(message) = &response.message {
        if response.is_success() {
            println!("{}", message);
        } else {
            eprintln!("{}", message.as_str().red());
        }
    }
    match &response.data {
        Payload::None => {}
        Payload::Added { key } => println!("New task: {}", key),
        Payload::Status(report) => print_status(report),
        Payload::Output(output) => print_output(output),
    }
}

fn styled_status(status: TaskStatus, width: usize) -> StyledContent<String> {
    let text = format!("{:<width$}", status.to_string(), width = width);
    match status {
        TaskStatus::Running => text.green(),
        TaskStatus::Paused | TaskStatus::Stashed => text.yellow(),
        TaskStatus::Done => text.green().bold(),
        TaskStatus::Failed => text.red().bold(),
        TaskStatus::Queued => text.stylize(),
    }
}

fn print_status(report: &StatusReport) {
    let daemon = match report.daemon {
        DaemonState::Running => "running".green(),
        DaemonState::Paused => "paused".yellow(),
    };
    println!("Daemon status: {}", daemon);
    if report.tasks.is_empty() {
        println!("Queue is empty");
        return;
    }

    let width = terminal::size().map(|(columns, _)| columns as usize).unwrap_or(120);
    // Everything but the command column.
    let fixed = 6 + 9 + 6 + 8 + 8 + 2;
    let command_width = width.saturating_sub(fixed).max(20);

    println!(
        "{}",
        format!(
            "{:<6}{:<9}{:<6}{:<cw$}{:<8}{:<8}",
            "Index",
            "Status",
            "Code",
            "Command",
            "Start",
            "End",
            cw = command_width + 2
        )
        .bold()
    );
    for task in &report.tasks {
        let code = task.return_code.map(|code| code.to_string()).unwrap_or_default();
        println!(
            "{:<6}{}{:<6}{:<cw$}{:<8}{:<8}",
            task.id,
            styled_status(task.status, 9),
            code,
            truncate(&task.command, command_width),
            task.start_time,
            task.end_time,
            cw = command_width + 2
        );
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut short: String = text.chars().take(width.saturating_sub(3)).collect();
    short.push_str("...");
    short
}

fn print_output(output: &TaskOutput) {
    println!("Task {} ({}):", output.key, styled_status(output.status, 0));
    if !output.stdout.is_empty() {
        println!("{}", "stdout:".green().bold());
        println!("    {}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        println!("{}", "stderr:".red().bold());
        println!("    {}", output.stderr.trim_end());
    }
}

fn print_task_log(task: &Task) {
    println!("{}", format!("Task {}: {}", task.id, task.command).bold());
    println!("    Path: {}", task.working_directory.display());
    println!("    Status: {}", styled_status(task.status, 0));
    if let Some(code) = task.return_code {
        println!("    Return code: {}", code);
    }
    println!("    Start: {}  End: {}", task.start_time, task.end_time);
    if !task.stdout.is_empty() {
        println!("{}", "  stdout:".green());
        println!("    {}", task.stdout.trim_end());
    }
    if !task.stderr.is_empty() {
        println!("{}", "  stderr:".red());
        println!("    {}", task.stderr.trim_end());
    }
    println!();
}

/// Prints finished tasks from the queue file without asking the daemon.
fn print_log(paths: &DaemonPaths, keys: &[usize]) -> bool {
    let Some(snapshot) = TaskQueue::snapshot(&paths.queue_file()) else {
        eprintln!("{}", "No queue data found.".red());
        return false;
    };
    let tasks: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|task| task.is_finished())
        .filter(|task| keys.is_empty() || keys.contains(&task.id))
        .collect();
    if tasks.is_empty() {
        println!("No finished tasks.");
    }
    for task in tasks {
        print_task_log(task);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> SubCommand {
        let mut argv = vec!["taskq"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn add_joins_trailing_words() {
        let request = parse(&["add", "ls", "-la", "/tmp"]).into_request(PathBuf::from("/home")).unwrap();
        assert_eq!(
            request,
            Request::Add {
                command: "ls -la /tmp".into(),
                working_directory: PathBuf::from("/home"),
            }
        );
    }

    #[test]
    fn kill_flags_translate() {
        let request = parse(&["kill", "-s", "TERM", "--stash", "1", "2"])
            .into_request(PathBuf::from("/"))
            .unwrap();
        assert_eq!(
            request,
            Request::Kill {
                keys: vec![1, 2],
                signal: Signal::Sigterm,
                all: false,
                remove: false,
                stash: true,
            }
        );
        match parse(&["kill"]) {
            SubCommand::Kill { signal, keys, .. } => {
                assert_eq!(signal, Signal::Sigint);
                assert!(keys.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_input_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["taskq", "kill", "-s", "SIGFOO"]).is_err());
        assert!(Cli::try_parse_from(["taskq", "kill", "--remove", "--stash", "1"]).is_err());
        assert!(Cli::try_parse_from(["taskq", "remove"]).is_err());
        assert!(Cli::try_parse_from(["taskq", "switch", "1"]).is_err());
        assert!(Cli::try_parse_from(["taskq", "config", "max-processes", "many"]).is_err());
    }

    #[test]
    fn config_and_send_translate() {
        assert_eq!(
            parse(&["config", "max-processes", "4"]).into_request(PathBuf::from("/")),
            Some(Request::Config {
                option: ConfigOption::MaxProcesses(4)
            })
        );
        assert_eq!(
            parse(&["send", "yes\n", "3"]).into_request(PathBuf::from("/")),
            Some(Request::Send {
                key: 3,
                input: "yes\n".into()
            })
        );
        assert_eq!(
            parse(&["pause", "-w"]).into_request(PathBuf::from("/")),
            Some(Request::Pause { keys: vec![], wait: true })
        );
    }

    #[test]
    fn local_commands_have_no_request() {
        assert_eq!(parse(&["daemon"]).into_request(PathBuf::from("/")), None);
        assert_eq!(parse(&["log", "-k", "1", "2"]).into_request(PathBuf::from("/")), None);
    }

    #[test]
    fn root_is_global() {
        let cli = Cli::try_parse_from(["taskq", "status", "--root", "/tmp/q"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/q")));
    }

    #[test]
    fn long_commands_are_shortened() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long command line", 10), "a very ...");
    }
}
