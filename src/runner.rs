// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Convergence runner and run report.
//!
//! The runner visits every step of a [`StepRegistry`] exactly once, in
//! registration order. A step is probed first. Only an unsatisfied step is
//! applied. Whatever happens, the runner moves on to the next step: most
//! steps describe independent facts about the machine, so one failure must
//! never hold the others hostage.
//!
//! There are no retries. Running the whole thing again is the retry, which is
//! safe because satisfied steps are left untouched.

use crate::step::{Applied, Context, Step, StepRegistry};

use colored::Colorize;
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, error, info, instrument, warn};

/// What happened to a single step during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Step was unsatisfied and has been applied.
    Installed(Applied),

    /// Step already held, nothing was done.
    AlreadySatisfied(Option<String>),

    /// Apply failed.
    Failed(String),

    /// Step was not visited.
    Skipped(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::AlreadySatisfied(_))
    }
}

/// Single report line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub step: String,
    pub outcome: Outcome,
}

/// Ordered outcomes of a whole run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    entries: Vec<Entry>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append outcome of next step.
    pub fn record(&mut self, step: impl Into<String>, outcome: Outcome) {
        self.entries.push(Entry {
            step: step.into(),
            outcome,
        });
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn outcome(&self, step: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|entry| entry.step == step)
            .map(|entry| &entry.outcome)
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for entry in &self.entries {
            match &entry.outcome {
                Outcome::Installed(applied) => {
                    summary.installed += 1;
                    summary.warnings += applied.warnings.len();
                }
                Outcome::AlreadySatisfied(_) => summary.satisfied += 1,
                Outcome::Failed(_) => summary.failed += 1,
                Outcome::Skipped(_) => summary.skipped += 1,
            }
        }

        summary
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|entry| entry.outcome.is_failed())
    }
}

impl Display for Report {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let width = self
            .entries
            .iter()
            .map(|entry| entry.step.len())
            .max()
            .unwrap_or_default();

        for entry in &self.entries {
            let step = format!("{:<width$}", entry.step);
            match &entry.outcome {
                Outcome::Installed(applied) => {
                    let tally = &applied.tally;
                    writeln!(fmt, "{} {step}  {tally}", "installed".green().bold())?;
                    for warning in &applied.warnings {
                        writeln!(fmt, "{:>9} {step}  {warning}", "warning".yellow())?;
                    }
                    for failure in &applied.tally.failed {
                        writeln!(fmt, "{:>9} {step}  {failure}", "failed".red())?;
                    }
                }
                Outcome::AlreadySatisfied(detail) => {
                    write!(fmt, "{:>9} {step}", "ok".blue().bold())?;
                    if let Some(detail) = detail {
                        write!(fmt, "  {detail}")?;
                    }
                    writeln!(fmt)?;
                }
                Outcome::Failed(reason) => {
                    writeln!(fmt, "{:>9} {step}  {reason}", "failed".red().bold())?;
                }
                Outcome::Skipped(reason) => {
                    writeln!(fmt, "{:>9} {step}  {reason}", "skipped".yellow().bold())?;
                }
            }
        }

        write!(fmt, "{}", self.summary())
    }
}

/// Per-outcome step counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub installed: usize,
    pub satisfied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warnings: usize,
}

impl Display for Summary {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} installed, {} already satisfied, {} skipped, {} failed",
            self.installed, self.satisfied, self.skipped, self.failed
        )?;
        if self.warnings > 0 {
            write!(fmt, " ({} warnings)", self.warnings)?;
        }

        Ok(())
    }
}

/// Which steps a run should visit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Selection {
    only: HashSet<String>,
    skip: HashSet<String>,
}

impl Selection {
    /// Select every step.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict run to named steps. Empty means everything.
    pub fn only(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.only.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn skip(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.skip.extend(names.into_iter().map(Into::into));
        self
    }

    fn reason_to_skip(&self, name: &str) -> Option<&'static str> {
        if self.skip.contains(name) {
            Some("excluded by selection")
        } else if !self.only.is_empty() && !self.only.contains(name) {
            Some("not selected")
        } else {
            None
        }
    }
}

/// Drives a step registry to convergence.
pub struct ConvergenceRunner<'a> {
    ctx: Context<'a>,
    selection: Selection,
}

impl<'a> ConvergenceRunner<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self {
            ctx,
            selection: Selection::all(),
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Probe and apply every selected step.
    ///
    /// Never fails. Every registered step gets exactly one report entry.
    #[instrument(skip(self, registry), level = "debug")]
    pub fn run(&self, registry: &StepRegistry) -> Report {
        let mut report = Report::new();
        for step in registry.steps() {
            let outcome = match self.selection.reason_to_skip(step.name()) {
                Some(reason) => Outcome::Skipped(reason.into()),
                None => self.converge(step),
            };
            report.record(step.name(), outcome);
        }

        report
    }

    /// Probe every selected step without applying anything.
    pub fn status(&self, registry: &StepRegistry) -> Report {
        let mut report = Report::new();
        for step in registry.steps() {
            let outcome = match self.selection.reason_to_skip(step.name()) {
                Some(reason) => Outcome::Skipped(reason.into()),
                None => match step.probe(&self.ctx) {
                    Ok(probe) if probe.satisfied => Outcome::AlreadySatisfied(probe.detail),
                    Ok(probe) => Outcome::Skipped(match probe.detail {
                        Some(detail) => format!("pending ({detail})"),
                        None => "pending".into(),
                    }),
                    Err(err) => Outcome::Skipped(format!("pending ({err})")),
                },
            };
            report.record(step.name(), outcome);
        }

        report
    }

    fn converge(&self, step: &dyn Step) -> Outcome {
        match step.probe(&self.ctx) {
            Ok(probe) if probe.satisfied => {
                info!("{}: already satisfied", step.name());
                return Outcome::AlreadySatisfied(probe.detail);
            }
            Ok(probe) => {
                debug!("{}: unsatisfied {:?}", step.name(), probe.detail);
            }
            // INVARIANT: Undeterminable state means not satisfied.
            Err(err) => {
                debug!("{}: probe failed, assuming unsatisfied: {err}", step.name());
            }
        }

        info!("{}: {}", step.name(), step.description());
        match step.apply(&self.ctx) {
            Ok(applied) => {
                for warning in &applied.warnings {
                    warn!("{}: {warning}", step.name());
                }
                info!("{}: done ({})", step.name(), applied.tally);
                Outcome::Installed(applied)
            }
            Err(err) if step.policy().tolerates(err.kind()) => {
                warn!("{}: {err}", step.name());
                Outcome::Installed(Applied::single().with_warning(err.to_string()))
            }
            Err(err) => {
                error!("{}: {err}", step.name());
                Outcome::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::Environment,
        step::{ErrorKind, FnStep, Probe, RecoveryPolicy, StepError, Tally},
        system::{Cmd, System},
    };

    use pretty_assertions::assert_eq;
    use std::{
        cell::Cell,
        path::{Path, PathBuf},
        rc::Rc,
    };

    struct NoSystem;

    impl System for NoSystem {
        fn which(&self, _: &str) -> Option<PathBuf> {
            None
        }

        fn is_executable(&self, _: &Path) -> bool {
            false
        }

        fn run(&self, cmd: &Cmd) -> crate::system::Result<String> {
            Err(crate::system::SysError::NotFound(cmd.program.clone()))
        }

        fn clone_repo(&self, _: &str, _: &Path) -> crate::system::Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn satisfied_step_is_never_applied() -> anyhow::Result<()> {
        let env = Environment::new("/home/blah", "blah");
        let applied = Rc::new(Cell::new(0));
        let counter = applied.clone();
        let mut registry = StepRegistry::new();
        registry.register_fn(
            "zsh",
            "install zsh",
            |_| Ok(Probe::satisfied()),
            move |_| {
                counter.set(counter.get() + 1);
                Ok(Applied::single())
            },
        )?;

        let ctx = Context::new(&env, &NoSystem);
        let report = ConvergenceRunner::new(ctx).run(&registry);
        assert_eq!(applied.get(), 0);
        assert_eq!(
            report.outcome("zsh"),
            Some(&Outcome::AlreadySatisfied(None))
        );

        Ok(())
    }

    #[test]
    fn failure_does_not_stop_later_steps() -> anyhow::Result<()> {
        let env = Environment::new("/home/blah", "blah");
        let mut registry = StepRegistry::new();
        registry.register_fn(
            "packages",
            "install packages",
            |_| Ok(Probe::unsatisfied()),
            |_| Err(StepError::NoPackageManager),
        )?;
        registry.register_fn(
            "zshrc",
            "write zshrc",
            |_| Ok(Probe::unsatisfied()),
            |_| Ok(Applied::single()),
        )?;

        let ctx = Context::new(&env, &NoSystem);
        let report = ConvergenceRunner::new(ctx).run(&registry);
        let steps = report
            .entries()
            .iter()
            .map(|entry| entry.step.as_str())
            .collect::<Vec<_>>();
        assert_eq!(steps, vec!["packages", "zshrc"]);
        assert!(report.outcome("packages").is_some_and(Outcome::is_failed));
        assert_eq!(
            report.outcome("zshrc"),
            Some(&Outcome::Installed(Applied::single()))
        );
        assert_eq!(report.summary().failed, 1);

        Ok(())
    }

    #[test]
    fn probe_error_leads_to_apply() -> anyhow::Result<()> {
        let env = Environment::new("/home/blah", "blah");
        let mut registry = StepRegistry::new();
        registry.register_fn(
            "node",
            "install node",
            |ctx| {
                let output = ctx.system.run(&Cmd::new("node").arg("--version"))?;
                Ok(Probe::from_bool(!output.is_empty()))
            },
            |_| Ok(Applied::single()),
        )?;

        let ctx = Context::new(&env, &NoSystem);
        let report = ConvergenceRunner::new(ctx).run(&registry);
        assert_eq!(
            report.outcome("node"),
            Some(&Outcome::Installed(Applied::single()))
        );

        Ok(())
    }

    #[test]
    fn tolerated_error_becomes_warning() -> anyhow::Result<()> {
        let env = Environment::new("/home/blah", "blah");
        let mut registry = StepRegistry::new();
        registry.register(
            FnStep::new(
                "default-shell",
                "change login shell",
                |_| Ok(Probe::unsatisfied()),
                |_| Err(StepError::PrivilegeDenied("chsh: PAM authentication failed".into())),
            )
            .with_policy(RecoveryPolicy::strict().tolerate(ErrorKind::PrivilegeDenied)),
        )?;

        let ctx = Context::new(&env, &NoSystem);
        let report = ConvergenceRunner::new(ctx).run(&registry);
        let summary = report.summary();
        assert_eq!(summary.installed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.warnings, 1);

        Ok(())
    }

    #[test]
    fn selection_skips_but_still_reports() -> anyhow::Result<()> {
        let env = Environment::new("/home/blah", "blah");
        let mut registry = StepRegistry::new();
        for name in ["zsh", "packages", "zshrc"] {
            registry.register_fn(
                name,
                name,
                |_| Ok(Probe::satisfied()),
                |_| Ok(Applied::single()),
            )?;
        }

        let selection = Selection::all().only(["zsh", "zshrc"]).skip(["zshrc"]);
        let report = ConvergenceRunner::new(Context::new(&env, &NoSystem))
            .with_selection(selection)
            .run(&registry);

        assert_eq!(
            report.outcome("zsh"),
            Some(&Outcome::AlreadySatisfied(None))
        );
        assert_eq!(
            report.outcome("packages"),
            Some(&Outcome::Skipped("not selected".into()))
        );
        assert_eq!(
            report.outcome("zshrc"),
            Some(&Outcome::Skipped("excluded by selection".into()))
        );

        Ok(())
    }

    #[test]
    fn status_never_applies() -> anyhow::Result<()> {
        let env = Environment::new("/home/blah", "blah");
        let mut registry = StepRegistry::new();
        registry.register_fn(
            "zsh",
            "install zsh",
            |_| Ok(Probe::unsatisfied()),
            |_| panic!("status must not apply"),
        )?;

        let ctx = Context::new(&env, &NoSystem);
        let report = ConvergenceRunner::new(ctx).status(&registry);
        assert_eq!(
            report.outcome("zsh"),
            Some(&Outcome::Skipped("pending".into()))
        );

        Ok(())
    }

    #[test]
    fn status_keeps_detail_as_pending() -> anyhow::Result<()> {
        let env = Environment::new("/home/blah", "blah");
        let mut registry = StepRegistry::new();
        registry.register_fn(
            "node",
            "install node",
            |_| Ok(Probe::unsatisfied().with_detail("v18.19.1")),
            |_| panic!("status must not apply"),
        )?;

        let ctx = Context::new(&env, &NoSystem);
        let report = ConvergenceRunner::new(ctx).status(&registry);
        assert_eq!(
            report.outcome("node"),
            Some(&Outcome::Skipped("pending (v18.19.1)".into()))
        );

        Ok(())
    }

    #[test]
    fn report_display_lists_failures() {
        colored::control::set_override(false);
        let mut report = Report::new();
        report.record(
            "zsh",
            Outcome::AlreadySatisfied(Some("/usr/bin/zsh".into())),
        );
        report.record(
            "packages",
            Outcome::Installed(Applied::with_tally(Tally {
                installed: 2,
                present: 1,
                failed: vec!["nmap: exit code 100".into()],
            })),
        );
        report.record("zsh-plugins", Outcome::Failed("1 of 3 items failed".into()));
        report.record("aux-repo", Outcome::Skipped("excluded by selection".into()));

        let result = report.to_string();
        let expect = [
            "       ok zsh          /usr/bin/zsh",
            "installed packages     2 installed, 1 present, 1 failed",
            "   failed packages     nmap: exit code 100",
            "   failed zsh-plugins  1 of 3 items failed",
            "  skipped aux-repo     excluded by selection",
            "1 installed, 1 already satisfied, 1 skipped, 1 failed",
        ]
        .join("\n");
        assert_eq!(result, expect);
    }
}
