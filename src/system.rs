// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Capability interface to the host machine.
//!
//! Steps never spawn processes or touch the network themselves. They describe
//! what they want done as a [`Cmd`], and hand it to a [`System`]. The host
//! implementation shells out, while tests substitute a recorder that answers
//! from a scripted table.
//!
//! Filesystem reads and writes under the home directory are not routed
//! through here. Those are cheap to fake with a scratch directory.

pub mod clone;

use crate::env::Environment;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

/// External command description.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub privileged: bool,
}

impl Cmd {
    /// Construct new command for target program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Run arbitrary script through `sh -c`.
    pub fn script(script: impl Into<String>) -> Self {
        Self::new("sh").args(["-c".to_string(), script.into()])
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Mark command as needing superuser rights.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

impl Display for Cmd {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.privileged {
            fmt.write_str("sudo ")?;
        }
        fmt.write_str(&self.program)?;
        for arg in &self.args {
            write!(fmt, " {arg}")?;
        }

        Ok(())
    }
}

/// Opaque installer actions available to convergence steps.
pub trait System {
    /// Locate program on the search path.
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Check that a fixed filesystem location holds an executable.
    fn is_executable(&self, path: &Path) -> bool;

    /// Run command to completion, capturing its output.
    ///
    /// # Errors
    ///
    /// - Return [`SysError::NotFound`] if the program does not exist.
    /// - Return [`SysError::Failed`] if the command exits unsuccessfully.
    fn run(&self, cmd: &Cmd) -> Result<String>;

    /// Clone remote repository into target directory.
    ///
    /// # Errors
    ///
    /// - Return [`SysError::Clone`] if the clone fails for any reason.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
}

/// System access through real processes.
#[derive(Debug, Clone)]
pub struct HostSystem {
    search_dirs: Vec<PathBuf>,
    is_root: bool,
}

impl HostSystem {
    /// Construct new host system bound to an environment snapshot.
    pub fn new(env: &Environment) -> Self {
        Self {
            search_dirs: env.search_dirs(),
            is_root: env.is_root(),
        }
    }

    fn command(&self, cmd: &Cmd) -> Command {
        // INVARIANT: Only escalate when we are not root and sudo exists at all.
        //   - Minimal containers run as root without sudo installed.
        //   - Sudo resets the environment, so variables go through env(1) instead.
        let mut command = if cmd.privileged && !self.is_root && self.which("sudo").is_some() {
            let mut command = Command::new("sudo");
            if !cmd.envs.is_empty() {
                command.arg("env");
                command.args(cmd.envs.iter().map(|(key, value)| format!("{key}={value}")));
            }
            command.arg(&cmd.program);
            command
        } else {
            let mut command = Command::new(&cmd.program);
            command.envs(cmd.envs.iter().map(|(key, value)| (key, value)));
            command
        };
        command.args(&cmd.args);
        command
    }

    /// Hand the current terminal over to a command until it exits.
    ///
    /// # Errors
    ///
    /// - Return [`SysError::Failed`] if the command exits unsuccessfully.
    pub fn run_interactive(&self, cmd: &Cmd) -> Result<()> {
        let status = self
            .command(cmd)
            .spawn()
            .map_err(|err| spawn_error(cmd, err))?
            .wait()?;
        if !status.success() {
            return Err(SysError::Failed {
                command: cmd.to_string(),
                code: status.code(),
                message: String::new(),
            });
        }

        Ok(())
    }
}

impl System for HostSystem {
    fn which(&self, program: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(program))
            .find(|candidate| self.is_executable(candidate))
    }

    fn is_executable(&self, path: &Path) -> bool {
        is_executable_file(path)
    }

    #[instrument(skip(self, cmd), fields(command = %cmd), level = "debug")]
    fn run(&self, cmd: &Cmd) -> Result<String> {
        let output = self
            .command(cmd)
            .output()
            .map_err(|err| spawn_error(cmd, err))?;
        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

        if !output.status.success() {
            let mut message = stdout;
            message.push_str(&stderr);
            return Err(SysError::Failed {
                command: cmd.to_string(),
                code: output.status.code(),
                message: chomp(message),
            });
        }

        let stdout = chomp(stdout);
        debug!("{stdout}");

        Ok(stdout)
    }

    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        clone::clone_with_progress(url, dest).map_err(|err| SysError::Clone {
            url: url.to_string(),
            source: Box::new(err),
        })
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

fn spawn_error(cmd: &Cmd, err: std::io::Error) -> SysError {
    match err.kind() {
        std::io::ErrorKind::NotFound => SysError::NotFound(cmd.program.clone()),
        _ => SysError::Io(err),
    }
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message.trim_end_matches(['\r', '\n']).to_string()
}

/// All possible error types for host interaction.
#[derive(Debug, thiserror::Error)]
pub enum SysError {
    /// Program is not installed.
    #[error("program {0:?} not found")]
    NotFound(String),

    /// Program ran but reported failure.
    #[error("command `{command}` failed with exit code {code:?}: {message}")]
    Failed {
        command: String,
        code: Option<i32>,
        message: String,
    },

    /// Repository clone failed.
    #[error("failed to clone {url}")]
    Clone {
        url: String,
        #[source]
        source: Box<clone::CloneError>,
    },

    /// Process could not be spawned or waited on.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = SysError> = std::result::Result<T, E>;
