use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Signals a client may ask the daemon to deliver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Sighup,
    #[default]
    Sigint,
    Sigquit,
    Sigkill,
    Sigusr1,
    Sigusr2,
    Sigterm,
    Sigcont,
    Sigstop,
}

impl Signal {
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Sighup => libc::SIGHUP,
            Signal::Sigint => libc::SIGINT,
            Signal::Sigquit => libc::SIGQUIT,
            Signal::Sigkill => libc::SIGKILL,
            Signal::Sigusr1 => libc::SIGUSR1,
            Signal::Sigusr2 => libc::SIGUSR2,
            Signal::Sigterm => libc::SIGTERM,
            Signal::Sigcont => libc::SIGCONT,
            Signal::Sigstop => libc::SIGSTOP,
        }
    }

    /// Whether the default disposition of this signal ends the process.
    /// Only `SIGCONT` and `SIGSTOP` leave it alive.
    pub fn terminates(self) -> bool {
        !matches!(self, Signal::Sigcont | Signal::Sigstop)
    }

    /// Signals after which a daemon-wide kill also pauses the queue.
    pub fn pauses_daemon(self) -> bool {
        matches!(self, Signal::Sigint | Signal::Sigterm | Signal::Sigkill)
    }
}

impl FromStr for Signal {
    type Err = String;

    /// Accepts `sigterm`, `SIGTERM`, `term`, or the number for the portable ones.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_prefix("sig").unwrap_or(&lower);
        let signal = match name {
            "hup" | "1" => Signal::Sighup,
            "int" | "2" => Signal::Sigint,
            "quit" | "3" => Signal::Sigquit,
            "kill" | "9" => Signal::Sigkill,
            "usr1" => Signal::Sigusr1,
            "usr2" => Signal::Sigusr2,
            "term" | "15" => Signal::Sigterm,
            "cont" => Signal::Sigcont,
            "stop" => Signal::Sigstop,
            _ => return Err(format!("unknown signal '{}'", s)),
        };
        Ok(signal)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Sighup => "SIGHUP",
            Signal::Sigint => "SIGINT",
            Signal::Sigquit => "SIGQUIT",
            Signal::Sigkill => "SIGKILL",
            Signal::Sigusr1 => "SIGUSR1",
            Signal::Sigusr2 => "SIGUSR2",
            Signal::Sigterm => "SIGTERM",
            Signal::Sigcont => "SIGCONT",
            Signal::Sigstop => "SIGSTOP",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_numbers() {
        assert_eq!("sigkill".parse::<Signal>().unwrap(), Signal::Sigkill);
        assert_eq!("SIGTERM".parse::<Signal>().unwrap(), Signal::Sigterm);
        assert_eq!("int".parse::<Signal>().unwrap(), Signal::Sigint);
        assert_eq!("9".parse::<Signal>().unwrap(), Signal::Sigkill);
        assert!("sigfoo".parse::<Signal>().is_err());
    }

    #[test]
    fn only_fatal_signals_terminate() {
        assert!(Signal::Sigterm.terminates());
        assert!(Signal::Sigusr1.terminates());
        assert!(Signal::Sigusr2.terminates());
        assert!(!Signal::Sigcont.terminates());
        assert!(!Signal::Sigstop.terminates());
        assert!(!Signal::Sighup.pauses_daemon());
    }
}
