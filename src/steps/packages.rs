// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! System package manager dispatch and the package set step.

use crate::{
    config::PackageSpec,
    step::{Applied, Context, Probe, Result, Step, StepError, Tally},
    system::Cmd,
};

use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{debug, info, instrument, warn};

/// Supported system package managers, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Yum,
    Brew,
}

impl PackageManager {
    const PRIORITY: [Self; 3] = [Self::Apt, Self::Yum, Self::Brew];

    /// Pick first package manager available on the host.
    pub fn detect(ctx: &Context<'_>) -> Option<Self> {
        Self::PRIORITY
            .into_iter()
            .find(|manager| ctx.system.which(manager.program()).is_some())
    }

    /// Like [`detect`](Self::detect) but missing managers are an error.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::NoPackageManager`] if none is available.
    pub fn require(ctx: &Context<'_>) -> Result<Self> {
        Self::detect(ctx).ok_or(StepError::NoPackageManager)
    }

    pub fn program(&self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Yum => "yum",
            Self::Brew => "brew",
        }
    }

    /// Name of a package as this manager knows it, if it has one.
    pub fn package_name<'s>(&self, spec: &'s PackageSpec) -> Option<&'s str> {
        let name = match spec {
            PackageSpec::Plain(name) => name.as_str(),
            PackageSpec::Detailed {
                name,
                apt,
                yum,
                brew,
            } => {
                let alias = match self {
                    Self::Apt => apt,
                    Self::Yum => yum,
                    Self::Brew => brew,
                };
                alias.as_deref().unwrap_or(name)
            }
        };

        (!name.is_empty()).then_some(name)
    }

    /// Ask package database whether a package is installed.
    pub fn is_installed(&self, ctx: &Context<'_>, package: &str) -> bool {
        let query = match self {
            Self::Apt => Cmd::new("dpkg").args(["-s", package]),
            Self::Yum => Cmd::new("rpm").args(["-q", package]),
            Self::Brew => Cmd::new("brew").args(["list", "--versions", package]),
        };

        match ctx.system.run(&query) {
            // INVARIANT: brew exits successfully with empty output for unknown formulae.
            Ok(output) => !matches!(self, Self::Brew) || !output.trim().is_empty(),
            Err(err) => {
                debug!("{package} not installed: {err}");
                false
            }
        }
    }

    /// Refresh package index when the manager needs it before installing.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::System`] if the refresh fails.
    pub fn refresh(&self, ctx: &Context<'_>) -> Result<()> {
        if let Self::Apt = self {
            ctx.system.run(
                &Cmd::new("apt-get")
                    .args(["update", "-qq"])
                    .env("DEBIAN_FRONTEND", "noninteractive")
                    .privileged(),
            )?;
        }

        Ok(())
    }

    /// Install a single package.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::System`] if the install command fails.
    pub fn install(&self, ctx: &Context<'_>, package: &str) -> Result<()> {
        let cmd = match self {
            Self::Apt => Cmd::new("apt-get")
                .args(["install", "-y", "-qq", package])
                .env("DEBIAN_FRONTEND", "noninteractive")
                .privileged(),
            Self::Yum => Cmd::new("yum").args(["install", "-y", package]).privileged(),
            Self::Brew => Cmd::new("brew").args(["install", package]),
        };
        info!("install {package} through {self}");
        ctx.system.run(&cmd)?;

        Ok(())
    }
}

impl Display for PackageManager {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.program())
    }
}

/// Desired list of system packages.
///
/// Packages are checked and installed one at a time in list order. A package
/// that fails to install is recorded and the rest of the list carries on.
#[derive(Debug, Clone)]
pub struct PackageSet {
    packages: Vec<PackageSpec>,
}

impl PackageSet {
    pub fn new(packages: impl IntoIterator<Item = PackageSpec>) -> Self {
        Self {
            packages: packages.into_iter().collect(),
        }
    }

    fn names<'s>(&'s self, manager: PackageManager) -> impl Iterator<Item = &'s str> {
        self.packages
            .iter()
            .filter_map(move |spec| manager.package_name(spec))
    }
}

impl Step for PackageSet {
    fn name(&self) -> &str {
        "packages"
    }

    fn description(&self) -> String {
        format!("install {} system packages", self.packages.len())
    }

    fn probe(&self, ctx: &Context<'_>) -> Result<Probe> {
        let manager = PackageManager::require(ctx)?;
        let total = self.names(manager).count();
        let present = self
            .names(manager)
            .filter(|name| manager.is_installed(ctx, name))
            .count();

        let detail = format!("{present} of {total} present");
        Ok(Probe::from_bool(present == total).with_detail(detail))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        let manager = PackageManager::require(ctx)?;
        let mut tally = Tally::default();
        let mut missing = Vec::new();
        for name in self.names(manager) {
            if manager.is_installed(ctx, name) {
                tally.present += 1;
            } else {
                missing.push(name);
            }
        }

        let mut applied = Applied::default();
        if !missing.is_empty() {
            if let Err(err) = manager.refresh(ctx) {
                warn!("cannot refresh {manager} index: {err}");
                applied = applied.with_warning(format!("index refresh failed: {err}"));
            }
        }

        for name in missing {
            tally.installed += 1;
            if let Err(err) = manager.install(ctx, name) {
                warn!("failed to install {name}: {err}");
                tally.failed.push(format!("{name}: {err}"));
            }
        }
        applied.tally = tally;

        Ok(applied)
    }
}
