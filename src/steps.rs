// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Concrete convergence steps of a zsh workstation.
//!
//! Each submodule covers one area of the machine. [`default_registry`] wires
//! them together in dependency order from loaded [`Settings`]: zsh before the
//! login shell switch, system packages before anything that downloads, the
//! framework before its add-ons, nvm before Node.js before npm-based tools,
//! and the run-control file last so it can reference all of the above.

pub mod framework;
pub mod packages;
pub mod rcfile;
pub mod repo;
pub mod runtime;
pub mod shell;
pub mod tools;

#[cfg(test)]
pub(crate) mod fake;

use crate::{
    backup::BackupRotator,
    config::Settings,
    env::Environment,
    path::rebase_home,
    step::{RegistryError, StepRegistry},
};

use framework::{AddonKind, Addons, Framework};
use packages::PackageSet;
use rcfile::{ManagedRcFile, RcTemplate};
use repo::AuxRepo;
use runtime::{NodeRuntime, VersionManager};
use shell::{DefaultShell, ZshPresence};
use tools::ScriptedTool;

/// Build the managed run-control file step from settings.
pub fn managed_rcfile(settings: &Settings, env: &Environment) -> ManagedRcFile {
    let home = env.home();
    let framework = &settings.framework;
    let plugins = framework
        .builtin_plugins
        .iter()
        .cloned()
        .chain(framework.plugins.iter().map(|plugin| plugin.name.clone()))
        .collect();
    let aliases = match &settings.rcfile.aliases {
        Some(path) => rebase_home(path, home),
        None => home.join(".aliases"),
    };

    let template = RcTemplate {
        framework_root: rebase_home(&framework.root, home),
        plugins,
        theme: framework.themes.first().map(|theme| theme.name.clone()),
        starship: settings.tools.iter().any(|tool| tool.binary == "starship"),
        aliases,
        nvm_dir: env.nvm_dir().to_path_buf(),
    };

    ManagedRcFile::new(
        rebase_home(&settings.rcfile.path, home),
        template,
        BackupRotator::new(settings.rcfile.keep_backups),
    )
}

/// Declare every step of the workstation in convergence order.
///
/// # Errors
///
/// - Return [`RegistryError::DuplicateStep`] if a configured tool shares its
///   name with another step.
pub fn default_registry(
    settings: &Settings,
    env: &Environment,
) -> Result<StepRegistry, RegistryError> {
    let home = env.home();
    let fallbacks = settings
        .shell
        .fallbacks
        .iter()
        .map(|path| rebase_home(path, home))
        .collect::<Vec<_>>();
    let framework_root = rebase_home(&settings.framework.root, home);
    let nvm = VersionManager::new(&settings.runtime.nvm_installer);

    let mut registry = StepRegistry::new();
    registry.register(ZshPresence::new(fallbacks.clone()))?;
    registry.register(DefaultShell::new(fallbacks))?;
    registry.register(PackageSet::new(settings.packages.list.clone()))?;
    let installer = &settings.framework.installer;
    registry.register(Framework::new(&framework_root, installer))?;
    registry.register(Addons::new(
        AddonKind::Plugin,
        &framework_root,
        settings.framework.plugins.clone(),
    ))?;
    registry.register(Addons::new(
        AddonKind::Theme,
        &framework_root,
        settings.framework.themes.clone(),
    ))?;
    registry.register(nvm.clone())?;
    registry.register(NodeRuntime::new(settings.runtime.minimum_major, nvm))?;
    for tool in &settings.tools {
        registry.register(ScriptedTool::new(tool.clone()))?;
    }
    if let Some(repo) = &settings.repo {
        registry.register(AuxRepo::new(
            &repo.name,
            &repo.url,
            repo.parents.iter().map(|parent| rebase_home(parent, home)),
        ))?;
    }
    registry.register(managed_rcfile(settings, env))?;

    Ok(registry)
}
