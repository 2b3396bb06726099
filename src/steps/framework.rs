// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Oh My Zsh and its community add-ons.
//!
//! The framework itself comes from its upstream installer. Plugins and themes
//! are plain repositories cloned under `$ZSH/custom/plugins` and
//! `$ZSH/custom/themes` respectively, each checked on its own. One add-on
//! failing to clone never stops the others from being tried.

use crate::{
    config::RemoteAddon,
    step::{Applied, Context, Probe, Result, Step, StepError},
    system::Cmd,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Oh My Zsh root directory exists.
#[derive(Debug, Clone)]
pub struct Framework {
    root: PathBuf,
    installer: String,
}

impl Framework {
    pub fn new(root: impl Into<PathBuf>, installer: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            installer: installer.into(),
        }
    }
}

impl Step for Framework {
    fn name(&self) -> &str {
        "oh-my-zsh"
    }

    fn description(&self) -> String {
        format!("install Oh My Zsh into {:?}", self.root.display())
    }

    fn probe(&self, _ctx: &Context<'_>) -> Result<Probe> {
        Ok(Probe::from_bool(self.root.is_dir()))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        if ctx.system.which("curl").is_none() {
            return Err(StepError::MissingProgram("curl".into()));
        }

        // INVARIANT: Installer must neither switch shells nor touch ~/.zshrc.
        //   - The login shell and the run-control file are separate steps.
        let installer = &self.installer;
        let script = format!(r#"sh -c "$(curl -fsSL {installer})" "" --unattended"#);
        let cmd = Cmd::script(script)
            .env("ZSH", self.root.display().to_string())
            .env("RUNZSH", "no")
            .env("CHSH", "no")
            .env("KEEP_ZSHRC", "yes");
        ctx.system.run(&cmd)?;

        Ok(Applied::single())
    }
}

/// Kind of framework add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddonKind {
    Plugin,
    Theme,
}

impl AddonKind {
    fn directory(&self) -> &'static str {
        match self {
            Self::Plugin => "plugins",
            Self::Theme => "themes",
        }
    }
}

impl Display for AddonKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.directory())
    }
}

/// Every listed add-on is checked out under the framework's custom directory.
#[derive(Debug, Clone)]
pub struct Addons {
    name: String,
    kind: AddonKind,
    root: PathBuf,
    addons: Vec<RemoteAddon>,
}

impl Addons {
    pub fn new(
        kind: AddonKind,
        root: impl Into<PathBuf>,
        addons: impl IntoIterator<Item = RemoteAddon>,
    ) -> Self {
        Self {
            name: format!("zsh-{kind}"),
            kind,
            root: root.into(),
            addons: addons.into_iter().collect(),
        }
    }

    fn target(&self, addon: &RemoteAddon) -> PathBuf {
        self.root
            .join("custom")
            .join(self.kind.directory())
            .join(&addon.name)
    }
}

impl Step for Addons {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("clone {} Oh My Zsh {}", self.addons.len(), self.kind)
    }

    fn probe(&self, _ctx: &Context<'_>) -> Result<Probe> {
        let present = self
            .addons
            .iter()
            .filter(|addon| self.target(addon).is_dir())
            .count();

        Ok(Probe::from_bool(present == self.addons.len())
            .with_detail(format!("{present} of {} present", self.addons.len())))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        // INVARIANT: Never create the framework root ourselves.
        //   - An empty root would look like a finished framework install.
        if !self.root.is_dir() {
            return Err(StepError::Prerequisite(format!(
                "Oh My Zsh is not installed at {:?}",
                self.root.display()
            )));
        }

        let mut applied = Applied::default();
        for addon in &self.addons {
            let target = self.target(addon);
            if target.is_dir() {
                applied.tally.present += 1;
                continue;
            }

            applied.tally.installed += 1;
            if let Err(err) = clone_addon(ctx, &addon.url, &target) {
                // INVARIANT: A failed clone that left a checkout behind still counts.
                if target.is_dir() {
                    warn!("{} reported failure but exists: {err}", addon.name);
                    applied = applied.with_warning(format!("{}: {err}", addon.name));
                } else {
                    warn!("failed to clone {}: {err}", addon.name);
                    applied.tally.failed.push(format!("{}: {err}", addon.name));
                }
            } else {
                info!("cloned {} {}", self.kind, addon.name);
            }
        }

        if applied.tally.is_partial() {
            return Err(StepError::Partial {
                tally: applied.tally,
            });
        }

        Ok(applied)
    }
}

fn clone_addon(ctx: &Context<'_>, url: &str, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(StepError::io("create", parent))?;
    }
    ctx.system.clone_repo(url, target)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{env::Environment, step::ErrorKind, steps::fake::FakeSystem};

    use pretty_assertions::assert_eq;

    fn addon(name: &str) -> RemoteAddon {
        RemoteAddon::new(name, format!("https://blah.org/{name}"))
    }

    fn addons() -> Vec<RemoteAddon> {
        vec![
            addon("zsh-autosuggestions"),
            addon("zsh-syntax-highlighting"),
            addon("zsh-completions"),
        ]
    }

    #[test]
    fn framework_installer_runs_unattended() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let env = Environment::new(home.path(), "blah");
        let system = FakeSystem::new()
            .with_binary("curl", "/usr/bin/curl")
            .respond("sh -c", "");
        let ctx = Context::new(&env, &system);
        let root = home.path().join(".oh-my-zsh");
        let step = Framework::new(root, "https://blah.org/install.sh");

        assert!(!step.probe(&ctx)?.satisfied);
        step.apply(&ctx)?;
        let calls = system.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("--unattended"));

        Ok(())
    }

    #[test]
    fn addons_clone_only_missing() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let root = home.path().join(".oh-my-zsh");
        fs::create_dir_all(root.join("custom/plugins/zsh-completions"))?;
        let env = Environment::new(home.path(), "blah");
        let system = FakeSystem::new();
        let ctx = Context::new(&env, &system);
        let step = Addons::new(AddonKind::Plugin, &root, addons());

        assert_eq!(step.name(), "zsh-plugins");
        assert_eq!(step.probe(&ctx)?.detail.as_deref(), Some("1 of 3 present"));

        let applied = step.apply(&ctx)?;
        assert_eq!(applied.tally.installed, 2);
        assert_eq!(applied.tally.present, 1);
        assert_eq!(system.clones().len(), 2);
        assert!(step.probe(&ctx)?.satisfied);

        Ok(())
    }

    #[test]
    fn partial_checkout_counts_as_present() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let root = home.path().join(".oh-my-zsh");
        fs::create_dir_all(&root)?;
        let env = Environment::new(home.path(), "blah");
        let url = "https://blah.org/zsh-completions";
        let system = FakeSystem::new().with_broken_remote(url, true);
        let ctx = Context::new(&env, &system);

        let applied = Addons::new(AddonKind::Plugin, &root, addons()).apply(&ctx)?;
        assert!(applied.tally.failed.is_empty());
        assert_eq!(applied.warnings.len(), 1);

        Ok(())
    }

    #[test]
    fn failed_clone_keeps_trying_siblings() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let root = home.path().join(".oh-my-zsh");
        fs::create_dir_all(&root)?;
        let env = Environment::new(home.path(), "blah");
        let url = "https://blah.org/zsh-autosuggestions";
        let system = FakeSystem::new().with_broken_remote(url, false);
        let ctx = Context::new(&env, &system);

        let err = Addons::new(AddonKind::Theme, &root, addons())
            .apply(&ctx)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Partial);
        assert_eq!(system.clones().len(), 3);
        assert!(root.join("custom/themes/zsh-completions").is_dir());

        Ok(())
    }

    #[test]
    fn addons_need_framework_root() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let env = Environment::new(home.path(), "blah");
        let system = FakeSystem::new();
        let ctx = Context::new(&env, &system);

        let err = Addons::new(AddonKind::Plugin, home.path().join(".oh-my-zsh"), addons())
            .apply(&ctx)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCapability);
        assert!(system.clones().is_empty());

        Ok(())
    }
}
