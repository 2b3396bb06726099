// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Node.js runtime through nvm.
//!
//! nvm is a shell function, not a binary. Every interaction with it goes
//! through a `bash -c` that sources `$NVM_DIR/nvm.sh` first. A Node.js that
//! nvm manages is therefore visible to us even when it is not on our own
//! `PATH`.

use crate::{
    step::{Applied, Context, Probe, Result, Step, StepError, Tally},
    system::Cmd,
};

use std::{fs, path::PathBuf};
use tracing::{info, instrument};

/// Build a bash command with nvm loaded.
pub fn nvm_shell(ctx: &Context<'_>, script: impl AsRef<str>) -> Cmd {
    Cmd::new("bash")
        .args([
            "-c".to_string(),
            format!(r#". "$NVM_DIR/nvm.sh" && {}"#, script.as_ref()),
        ])
        .env("NVM_DIR", ctx.env.nvm_dir().display().to_string())
}

fn nvm_script(ctx: &Context<'_>) -> PathBuf {
    ctx.env.nvm_dir().join("nvm.sh")
}

/// Parse major version out of `node --version` output.
pub fn parse_major(version: &str) -> Option<u32> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()?
        .parse()
        .ok()
}

/// nvm is installed.
#[derive(Debug, Clone)]
pub struct VersionManager {
    installer: String,
}

impl VersionManager {
    pub fn new(installer: impl Into<String>) -> Self {
        Self {
            installer: installer.into(),
        }
    }
}

impl Step for VersionManager {
    fn name(&self) -> &str {
        "nvm"
    }

    fn description(&self) -> String {
        "install nvm".into()
    }

    fn probe(&self, ctx: &Context<'_>) -> Result<Probe> {
        Ok(Probe::from_bool(nvm_script(ctx).is_file()))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        if ctx.system.which("curl").is_none() {
            return Err(StepError::MissingProgram("curl".into()));
        }

        // INVARIANT: The installer refuses to run if NVM_DIR is set but missing.
        let nvm_dir = ctx.env.nvm_dir();
        fs::create_dir_all(nvm_dir).map_err(StepError::io("create", nvm_dir))?;

        // INVARIANT: Leave shell profiles alone, the managed zshrc loads nvm.
        let installer = &self.installer;
        let cmd = Cmd::new("bash")
            .args(["-c".to_string(), format!("curl -fsSL {installer} | bash")])
            .env("NVM_DIR", nvm_dir.display().to_string())
            .env("PROFILE", "/dev/null");
        ctx.system.run(&cmd)?;

        Ok(Applied::single())
    }
}

/// Active Node.js has at least the minimum major version.
///
/// An older runtime counts as missing. Upgrading goes through nvm, which is
/// converged first if it is not there yet.
#[derive(Debug, Clone)]
pub struct NodeRuntime {
    minimum_major: u32,
    nvm: VersionManager,
}

impl NodeRuntime {
    pub fn new(minimum_major: u32, nvm: VersionManager) -> Self {
        Self { minimum_major, nvm }
    }

    /// Version string of the active runtime.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::System`] if no runtime answers.
    pub fn active_version(&self, ctx: &Context<'_>) -> Result<String> {
        let query = if nvm_script(ctx).is_file() {
            nvm_shell(ctx, "node --version")
        } else {
            Cmd::new("node").arg("--version")
        };

        Ok(ctx.system.run(&query)?.trim().to_string())
    }
}

impl Step for NodeRuntime {
    fn name(&self) -> &str {
        "node"
    }

    fn description(&self) -> String {
        format!("install Node.js {} or newer", self.minimum_major)
    }

    fn probe(&self, ctx: &Context<'_>) -> Result<Probe> {
        let version = self.active_version(ctx)?;
        let major = parse_major(&version).ok_or_else(|| StepError::UnexpectedOutput {
            program: "node".into(),
            output: version.clone(),
        })?;

        let satisfied = major >= self.minimum_major;
        Ok(Probe::from_bool(satisfied).with_detail(version))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        let mut tally = Tally::default();
        if self.nvm.probe(ctx)?.satisfied {
            tally.present += 1;
        } else {
            info!("nvm is required first");
            self.nvm.apply(ctx)?;
            tally.installed += 1;
        }

        let major = self.minimum_major;
        ctx.system.run(&nvm_shell(
            ctx,
            format!("nvm install {major} && nvm alias default {major}"),
        ))?;
        tally.installed += 1;

        Ok(Applied::with_tally(tally))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{env::Environment, steps::fake::FakeSystem};

    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("v22.11.0", Some(22); "current")]
    #[test_case("v18.19.1\n", Some(18); "trailing newline")]
    #[test_case("20.0.0", Some(20); "no prefix")]
    #[test_case("node: command not found", None; "garbage")]
    #[test]
    fn parse_major_versions(version: &str, expect: Option<u32>) {
        pretty_assertions::assert_eq!(parse_major(version), expect);
    }

    fn node_step() -> NodeRuntime {
        NodeRuntime::new(22, VersionManager::new("https://blah.org/nvm/install.sh"))
    }

    #[test_case("v18.19.1", false; "older major")]
    #[test_case("v22.0.0", true; "exact major")]
    #[test_case("v23.1.0", true; "newer major")]
    #[test]
    fn node_probe_compares_major(version: &str, satisfied: bool) {
        let env = Environment::new("/nonexistent/blah", "blah");
        let system = FakeSystem::new().respond("node --version", version);
        let ctx = Context::new(&env, &system);

        let probe = node_step().probe(&ctx).unwrap();
        pretty_assertions::assert_eq!(probe.satisfied, satisfied);
        pretty_assertions::assert_eq!(probe.detail.as_deref(), Some(version));
    }

    #[test]
    fn missing_node_is_probe_error() {
        let env = Environment::new("/nonexistent/blah", "blah");
        let system = FakeSystem::new();
        let ctx = Context::new(&env, &system);

        assert!(node_step().probe(&ctx).is_err());
    }

    #[test]
    fn node_upgrade_installs_nvm_first() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let env = Environment::new(home.path(), "blah");
        let system = FakeSystem::new()
            .with_binary("curl", "/usr/bin/curl")
            .respond("bash -c curl", "")
            .respond("bash -c . \"$NVM_DIR/nvm.sh\" && nvm install 22", "");
        let ctx = Context::new(&env, &system);

        let applied = node_step().apply(&ctx)?;
        assert_eq!(applied.tally.installed, 2);
        assert!(env.nvm_dir().is_dir());
        let calls = system.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("nvm/install.sh"));
        assert!(calls[1].ends_with("nvm alias default 22"));

        Ok(())
    }

    #[test]
    fn node_upgrade_reuses_existing_nvm() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let env = Environment::new(home.path(), "blah");
        fs::create_dir_all(env.nvm_dir())?;
        fs::write(env.nvm_dir().join("nvm.sh"), "nvm() { :; }\n")?;
        let system = FakeSystem::new()
            .respond(
                "bash -c . \"$NVM_DIR/nvm.sh\" && node --version",
                "v18.20.4",
            )
            .respond("bash -c . \"$NVM_DIR/nvm.sh\" && nvm install 22", "");
        let ctx = Context::new(&env, &system);
        let step = node_step();

        assert!(!step.probe(&ctx)?.satisfied);
        let applied = step.apply(&ctx)?;
        assert_eq!(applied.tally.present, 1);
        assert_eq!(applied.tally.installed, 1);

        Ok(())
    }
}
