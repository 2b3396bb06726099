// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::system::{clone::CloneError, Cmd, SysError, System};

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

/// Scripted stand-in for the host.
///
/// Commands are answered by the first registered prefix of their rendered
/// command line. Anything unscripted exits with code 1.
#[derive(Debug, Default)]
pub(crate) struct FakeSystem {
    binaries: HashMap<String, PathBuf>,
    executables: HashSet<PathBuf>,
    responses: Vec<(String, Result<String, String>)>,
    broken_remotes: HashMap<String, bool>,
    calls: RefCell<Vec<Cmd>>,
    clones: RefCell<Vec<(String, PathBuf)>>,
}

impl FakeSystem {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_binary(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.executables.insert(path.clone());
        self.binaries.insert(name.into(), path);
        self
    }

    pub(crate) fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executables.insert(path.into());
        self
    }

    pub(crate) fn respond(mut self, prefix: &str, output: &str) -> Self {
        self.responses.push((prefix.into(), Ok(output.into())));
        self
    }

    pub(crate) fn fail(mut self, prefix: &str, message: &str) -> Self {
        self.responses.push((prefix.into(), Err(message.into())));
        self
    }

    /// Make cloning a remote fail, optionally leaving a partial checkout.
    pub(crate) fn with_broken_remote(mut self, url: &str, leaves_checkout: bool) -> Self {
        self.broken_remotes.insert(url.into(), leaves_checkout);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }

    pub(crate) fn clones(&self) -> Vec<(String, PathBuf)> {
        self.clones.borrow().clone()
    }
}

impl System for FakeSystem {
    fn which(&self, program: &str) -> Option<PathBuf> {
        self.binaries.get(program).cloned()
    }

    fn is_executable(&self, path: &Path) -> bool {
        self.executables.contains(path)
    }

    fn run(&self, cmd: &Cmd) -> crate::system::Result<String> {
        self.calls.borrow_mut().push(cmd.clone());
        let line = cmd.to_string();
        let response = self
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Err(String::new()));

        response.map_err(|message| SysError::Failed {
            command: line,
            code: Some(1),
            message,
        })
    }

    fn clone_repo(&self, url: &str, dest: &Path) -> crate::system::Result<()> {
        self.clones.borrow_mut().push((url.into(), dest.to_path_buf()));
        match self.broken_remotes.get(url) {
            Some(leaves_checkout) => {
                if *leaves_checkout {
                    std::fs::create_dir_all(dest)?;
                }
                Err(SysError::Clone {
                    url: url.into(),
                    source: Box::new(CloneError::Git2(git2::Error::from_str(
                        "remote hung up unexpectedly",
                    ))),
                })
            }
            None => {
                std::fs::create_dir_all(dest)?;
                Ok(())
            }
        }
    }
}
