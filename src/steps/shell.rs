// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Zsh presence and login shell steps.

use crate::{
    env::Platform,
    step::{Applied, Context, ErrorKind, Probe, RecoveryPolicy, Result, Step, StepError},
    steps::packages::PackageManager,
    system::{Cmd, SysError},
};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Locate zsh, trying `PATH` first and fixed locations after.
pub fn resolve_zsh(ctx: &Context<'_>, fallbacks: &[PathBuf]) -> Option<PathBuf> {
    ctx.system.which("zsh").or_else(|| {
        fallbacks
            .iter()
            .find(|path| ctx.system.is_executable(path))
            .cloned()
    })
}

/// Zsh interpreter is installed.
#[derive(Debug, Clone)]
pub struct ZshPresence {
    fallbacks: Vec<PathBuf>,
}

impl ZshPresence {
    pub fn new(fallbacks: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            fallbacks: fallbacks.into_iter().collect(),
        }
    }
}

impl Step for ZshPresence {
    fn name(&self) -> &str {
        "zsh"
    }

    fn description(&self) -> String {
        "install zsh".into()
    }

    fn probe(&self, ctx: &Context<'_>) -> Result<Probe> {
        Ok(match resolve_zsh(ctx, &self.fallbacks) {
            Some(path) => Probe::satisfied().with_detail(path.display().to_string()),
            None => Probe::unsatisfied(),
        })
    }

    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        let manager = PackageManager::require(ctx)?;
        manager.refresh(ctx)?;
        manager.install(ctx, "zsh")?;

        Ok(Applied::single())
    }
}

/// Zsh is the user's login shell.
///
/// Changing the login shell is often refused in containers and CI runners,
/// where there is no password to give `chsh`. That refusal is tolerated: the
/// rest of the setup works the same whichever shell launches it.
#[derive(Debug, Clone)]
pub struct DefaultShell {
    fallbacks: Vec<PathBuf>,
    passwd: PathBuf,
}

impl DefaultShell {
    pub fn new(fallbacks: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            fallbacks: fallbacks.into_iter().collect(),
            passwd: PathBuf::from("/etc/passwd"),
        }
    }

    /// Use different passwd database for the generic lookup fallback.
    pub fn with_passwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.passwd = path.into();
        self
    }

    /// Current login shell of the user.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::UnexpectedOutput`] if no shell can be found for
    ///   the user.
    pub fn login_shell(&self, ctx: &Context<'_>) -> Result<PathBuf> {
        let user = ctx.env.user();
        let shell = match ctx.env.platform() {
            Platform::MacOs => {
                let output = ctx.system.run(&Cmd::new("dscl").args([
                    ".".to_string(),
                    "-read".into(),
                    format!("/Users/{user}"),
                    "UserShell".into(),
                ]))?;
                output
                    .lines()
                    .find_map(|line| line.strip_prefix("UserShell:"))
                    .map(|shell| shell.trim().to_string())
                    .ok_or_else(|| StepError::UnexpectedOutput {
                        program: "dscl".into(),
                        output: output.clone(),
                    })?
            }
            Platform::Generic => self.passwd_entry_shell(ctx, user)?,
        };

        Ok(PathBuf::from(shell))
    }

    fn passwd_entry_shell(&self, ctx: &Context<'_>, user: &str) -> Result<String> {
        let cmd = Cmd::new("getent").args(["passwd", user]);
        match ctx.system.run(&cmd) {
            Ok(entry) => passwd_shell(&entry, user).ok_or(StepError::UnexpectedOutput {
                program: "getent".into(),
                output: entry,
            }),
            Err(err) => {
                debug!(
                    "getent lookup failed, reading {:?}: {err}",
                    self.passwd.display()
                );
                let database = fs::read_to_string(&self.passwd)
                    .map_err(StepError::io("read", &self.passwd))?;
                passwd_shell(&database, user).ok_or_else(|| StepError::UnexpectedOutput {
                    program: self.passwd.display().to_string(),
                    output: format!("no entry for {user}"),
                })
            }
        }
    }
}

impl Step for DefaultShell {
    fn name(&self) -> &str {
        "default-shell"
    }

    fn description(&self) -> String {
        "make zsh the login shell".into()
    }

    fn probe(&self, ctx: &Context<'_>) -> Result<Probe> {
        let zsh = resolve_zsh(ctx, &self.fallbacks)
            .ok_or_else(|| StepError::MissingProgram("zsh".into()))?;
        let current = self.login_shell(ctx)?;

        let detail = current.display().to_string();
        Ok(Probe::from_bool(same_file(&current, &zsh)).with_detail(detail))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        let zsh = resolve_zsh(ctx, &self.fallbacks)
            .ok_or_else(|| StepError::Prerequisite("zsh is not installed".into()))?;
        let cmd = Cmd::new("chsh")
            .args([
                "-s".to_string(),
                zsh.display().to_string(),
                ctx.env.user().to_string(),
            ])
            .privileged();

        match ctx.system.run(&cmd) {
            Ok(_) => Ok(Applied::single()),
            Err(SysError::Failed { message, .. }) if !message.is_empty() => {
                Err(StepError::PrivilegeDenied(message))
            }
            Err(SysError::Failed { code, .. }) => Err(StepError::PrivilegeDenied(format!(
                "chsh exited with {code:?}"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    fn policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::strict().tolerate(ErrorKind::PrivilegeDenied)
    }
}

fn passwd_shell(database: &str, user: &str) -> Option<String> {
    database
        .lines()
        .map(|line| line.split(':').collect::<Vec<_>>())
        .find(|fields| fields.len() >= 7 && fields[0] == user)
        .map(|fields| fields[6].trim().to_string())
        .filter(|shell| !shell.is_empty())
}

// INVARIANT: Merged-usr systems link /bin into /usr/bin, so compare targets.
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }

    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
