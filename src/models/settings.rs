use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Daemon configuration, stored as `config.yml` under the root directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Start processing a non-empty queue right away after a daemon restart.
    pub resume_after_start: bool,
    pub max_processes: usize,
    /// `default` for `sh -c`, otherwise the path of an executable shell.
    pub custom_shell: String,
    pub time_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            resume_after_start: false,
            max_processes: 1,
            custom_shell: DEFAULT_SHELL.to_string(),
            time_format: "%H:%M".to_string(),
        }
    }
}

pub const DEFAULT_SHELL: &str = "default";

impl Settings {
    /// Reads the settings file, writing defaults when it is absent or unreadable.
    pub fn load_or_create(path: &Path) -> Result<Settings> {
        if path.exists() {
            match fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_yaml::from_str::<Settings>(&content).map_err(|e| e.to_string()))
            {
                Ok(settings) => return Ok(settings),
                Err(e) => warn!("Error while parsing {}: {}. Writing defaults.", path.display(), e),
            }
        }

        let settings = Settings::default();
        settings.save(path)?;
        info!("Created default settings at {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| Error::io("cannot write", path, e))
    }
}

pub fn validate_max_processes(amount: usize) -> Result<()> {
    if amount == 0 {
        return Err(Error::Config("maxProcesses must be at least 1".into()));
    }
    Ok(())
}

/// A custom shell must be an executable file; `default` is always accepted.
pub fn validate_shell(shell: &str) -> Result<()> {
    if shell == DEFAULT_SHELL {
        return Ok(());
    }
    let executable = fs::metadata(shell)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false);
    if executable {
        Ok(())
    } else {
        Err(Error::Config("File in path doesn't exist or is not executable.".into()))
    }
}

/// Rejects strftime patterns chrono cannot render.
pub fn validate_time_format(format: &str) -> Result<()> {
    if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(Error::Config(format!("invalid time format '{}'", format)));
    }
    Ok(())
}

/// Everything the daemon keeps on disk lives below one root directory.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub root: PathBuf,
}

impl DaemonPaths {
    /// Uses `root` when given, `$HOME/.config/taskq` otherwise.
    pub fn new(root: Option<PathBuf>) -> Result<DaemonPaths> {
        let root = match root {
            Some(root) => root,
            None => dirs::home_dir()
                .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
                .join(".config")
                .join("taskq"),
        };
        Ok(DaemonPaths { root })
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.root, &self.output_dir()] {
            fs::create_dir_all(dir).map_err(|e| Error::io("cannot create", dir.as_path(), e))?;
        }
        Ok(())
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("config.yml")
    }

    pub fn queue_file(&self) -> PathBuf {
        self.root.join("queue.json")
    }

    pub fn socket(&self) -> PathBuf {
        self.root.join("taskq.sock")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }
}
