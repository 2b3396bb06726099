// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Immutable execution context.
//!
//! Everything a step needs to know about the machine it converges, captured
//! once at startup. Steps never read the process environment directly, they
//! only ever see an [`Environment`]. This keeps probes reproducible in tests,
//! where a scratch directory stands in for the home directory.

use crate::path::{home_dir, NoWayHome};

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Operating system family that changes how certain facts are looked up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Login shells live in the Directory Services record store.
    MacOs,

    /// Anything with a passwd database.
    #[default]
    Generic,
}

impl Platform {
    /// Platform of the running process.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Generic
        }
    }
}

/// Snapshot of the operator's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    home: PathBuf,
    user: String,
    platform: Platform,
    search_path: Option<OsString>,
    nvm_dir: PathBuf,
}

impl Environment {
    /// Construct environment rooted at a given home directory.
    ///
    /// The version manager root defaults to `<home>/.nvm`, no `PATH` is set.
    pub fn new(home: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        let home = home.into();
        let nvm_dir = home.join(".nvm");
        Self {
            home,
            user: user.into(),
            platform: Platform::default(),
            search_path: None,
            nvm_dir,
        }
    }

    /// Capture environment of the current process.
    ///
    /// Reads `HOME` (through [`dirs`]), `USER`, `PATH`, and the `NVM_DIR`
    /// override.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if home directory path cannot be determined.
    pub fn from_process() -> Result<Self, NoWayHome> {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_default();
        let mut env = Self::new(home_dir()?, user).with_platform(Platform::current());
        if let Some(path) = std::env::var_os("PATH") {
            env = env.with_search_path(path);
        }
        if let Some(nvm_dir) = std::env::var_os("NVM_DIR").filter(|dir| !dir.is_empty()) {
            env = env.with_nvm_dir(PathBuf::from(nvm_dir));
        }

        Ok(env)
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn with_nvm_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.nvm_dir = dir.into();
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Root directory of the Node version manager.
    pub fn nvm_dir(&self) -> &Path {
        &self.nvm_dir
    }

    /// Directories listed in `PATH`, in lookup order.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        self.search_path
            .as_ref()
            .map(|path| std::env::split_paths(path).collect())
            .unwrap_or_default()
    }

    /// Whether privileged commands can run without `sudo`.
    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [
        ("HOME", "/home/blah"),
        ("USER", "blah"),
        ("PATH", "/usr/local/bin:/usr/bin"),
        ("NVM_DIR", "/opt/nvm"),
    ])]
    fn from_process_reads_overrides() {
        let env = Environment::from_process().unwrap();
        assert_eq!(env.home(), Path::new("/home/blah"));
        assert_eq!(env.user(), "blah");
        assert_eq!(env.nvm_dir(), Path::new("/opt/nvm"));
        assert_eq!(
            env.search_dirs(),
            vec![PathBuf::from("/usr/local/bin"), PathBuf::from("/usr/bin")]
        );
        assert!(!env.is_root());
    }

    #[sealed_test(env = [("HOME", "/home/blah"), ("USER", "root"), ("NVM_DIR", "")])]
    fn from_process_defaults_nvm_dir_under_home() {
        let env = Environment::from_process().unwrap();
        assert_eq!(env.nvm_dir(), Path::new("/home/blah/.nvm"));
        assert!(env.is_root());
    }
}
