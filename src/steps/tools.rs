// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Standalone tools installed by script.

use crate::{
    config::ToolSettings,
    step::{Applied, Context, Probe, Result, Step, StepError},
    steps::runtime::nvm_shell,
    system::Cmd,
};

use tracing::instrument;

/// Binary provided by an install script.
///
/// Scripts install into `~/.local/bin` more often than not, which may not be
/// on `PATH` yet during the very first run. That location is checked too.
/// Tools that ship through npm are looked up inside an nvm shell instead.
#[derive(Debug, Clone)]
pub struct ScriptedTool {
    settings: ToolSettings,
}

impl ScriptedTool {
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }
}

impl Step for ScriptedTool {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn description(&self) -> String {
        format!("install {}", self.settings.binary)
    }

    fn probe(&self, ctx: &Context<'_>) -> Result<Probe> {
        let binary = &self.settings.binary;
        if let Some(path) = ctx.system.which(binary) {
            return Ok(Probe::satisfied().with_detail(path.display().to_string()));
        }

        let local = ctx.env.home().join(".local").join("bin").join(binary);
        if ctx.system.is_executable(&local) {
            return Ok(Probe::satisfied().with_detail(local.display().to_string()));
        }

        if self.settings.needs_node && ctx.env.nvm_dir().join("nvm.sh").is_file() {
            let lookup = nvm_shell(ctx, format!("command -v {binary}"));
            if let Ok(path) = ctx.system.run(&lookup) {
                return Ok(Probe::satisfied().with_detail(path));
            }
        }

        Ok(Probe::unsatisfied())
    }

    #[instrument(skip(self, ctx), fields(tool = %self.settings.name), level = "debug")]
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        let cmd = if self.settings.needs_node {
            if !ctx.env.nvm_dir().join("nvm.sh").is_file() {
                return Err(StepError::Prerequisite("node is not installed".into()));
            }
            nvm_shell(ctx, &self.settings.script)
        } else {
            Cmd::new("bash")
                .args(["-c", self.settings.script.as_str()])
                .env("NVM_DIR", ctx.env.nvm_dir().display().to_string())
        };
        let home = ctx.env.home().display().to_string();
        ctx.system.run(&cmd.env("HOME", home))?;

        Ok(Applied::single())
    }
}
