// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Convergence steps and their registry.
//!
//! A __convergence step__ is one fact about the machine that should hold,
//! e.g., "zsh is installed" or "`~/.zshrc` sources Oh My Zsh". Every step
//! knows how to answer two questions:
//!
//! 1. Does the fact already hold? This is the __probe__, and it must never
//!    change anything.
//! 2. What is the least amount of work that makes it hold? This is the
//!    __apply__, and it may fail or only partially succeed.
//!
//! Steps are declared once into a [`StepRegistry`], whose order is the order
//! in which the [`runner`](crate::runner) visits them.

use crate::{env::Environment, system::System};

use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Everything a step may look at or act through.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub env: &'a Environment,
    pub system: &'a dyn System,
}

impl<'a> Context<'a> {
    pub fn new(env: &'a Environment, system: &'a dyn System) -> Self {
        Self { env, system }
    }
}

/// Answer of a probe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Probe {
    pub satisfied: bool,
    pub detail: Option<String>,
}

impl Probe {
    pub fn satisfied() -> Self {
        Self {
            satisfied: true,
            detail: None,
        }
    }

    pub fn unsatisfied() -> Self {
        Self::default()
    }

    pub fn from_bool(satisfied: bool) -> Self {
        Self {
            satisfied,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Sub-item counts of a step that manages several things at once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tally {
    /// Items the step attempted to install.
    pub installed: usize,

    /// Items that were already present.
    pub present: usize,

    /// Items whose installation failed, with reasons.
    pub failed: Vec<String>,
}

impl Tally {
    /// Tally of a step that converged a single item.
    pub fn single() -> Self {
        Self {
            installed: 1,
            ..Default::default()
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl Display for Tally {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let (installed, present) = (self.installed, self.present);
        write!(fmt, "{installed} installed, {present} present")?;
        if !self.failed.is_empty() {
            write!(fmt, ", {} failed", self.failed.len())?;
        }

        Ok(())
    }
}

/// Result of a successful apply.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Applied {
    pub tally: Tally,

    /// Soft problems that did not stop the step from counting as done.
    pub warnings: Vec<String>,
}

impl Applied {
    pub fn single() -> Self {
        Self {
            tally: Tally::single(),
            warnings: Vec::new(),
        }
    }

    pub fn with_tally(tally: Tally) -> Self {
        Self {
            tally,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Coarse classification of step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No installer mechanism exists on this platform.
    MissingCapability,

    /// Privileged operation was rejected.
    PrivilegeDenied,

    /// Clone or download failed.
    Remote,

    /// Some sub-items failed, others did not.
    Partial,

    /// External command reported failure.
    Command,

    /// Local filesystem operation failed.
    Io,
}

/// Error kinds a step downgrades to warnings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    tolerated: HashSet<ErrorKind>,
}

impl RecoveryPolicy {
    /// Policy that tolerates nothing.
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn tolerate(mut self, kind: ErrorKind) -> Self {
        self.tolerated.insert(kind);
        self
    }

    pub fn tolerates(&self, kind: ErrorKind) -> bool {
        self.tolerated.contains(&kind)
    }
}

/// A unit of desired system state.
pub trait Step {
    /// Unique name of step.
    fn name(&self) -> &str;

    /// Human-readable description of the desired state.
    fn description(&self) -> String;

    /// Check whether desired state already holds without side effects.
    ///
    /// # Errors
    ///
    /// An error means the state could not be determined. The runner treats
    /// it the same as "not satisfied".
    fn probe(&self, ctx: &Context<'_>) -> Result<Probe>;

    /// Perform the minimal action that makes the desired state hold.
    ///
    /// # Errors
    ///
    /// - Return [`StepError`] classified by [`ErrorKind`].
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied>;

    /// Error kinds that should not count as failure.
    fn policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::strict()
    }
}

type ProbeFn = dyn Fn(&Context<'_>) -> Result<Probe>;
type ApplyFn = dyn Fn(&Context<'_>) -> Result<Applied>;

/// Step assembled from closures.
pub struct FnStep {
    name: String,
    description: String,
    prober: Box<ProbeFn>,
    applier: Box<ApplyFn>,
    policy: RecoveryPolicy,
}

impl FnStep {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        prober: impl Fn(&Context<'_>) -> Result<Probe> + 'static,
        applier: impl Fn(&Context<'_>) -> Result<Applied> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prober: Box::new(prober),
            applier: Box::new(applier),
            policy: RecoveryPolicy::strict(),
        }
    }

    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn probe(&self, ctx: &Context<'_>) -> Result<Probe> {
        (self.prober)(ctx)
    }

    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        (self.applier)(ctx)
    }

    fn policy(&self) -> RecoveryPolicy {
        self.policy.clone()
    }
}

/// Ordered declarations of convergence steps.
///
/// # Invariant
///
/// - Step names are unique.
/// - Iteration order is registration order.
#[derive(Default)]
pub struct StepRegistry {
    steps: Vec<Box<dyn Step>>,
}

impl StepRegistry {
    /// Construct new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step at the end of the registry.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::DuplicateStep`] if the name is taken.
    pub fn register(&mut self, step: impl Step + 'static) -> Result<(), RegistryError> {
        if self.get(step.name()).is_some() {
            return Err(RegistryError::DuplicateStep(step.name().to_string()));
        }

        self.steps.push(Box::new(step));
        Ok(())
    }

    /// Register a step assembled from closures.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::DuplicateStep`] if the name is taken.
    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        prober: impl Fn(&Context<'_>) -> Result<Probe> + 'static,
        applier: impl Fn(&Context<'_>) -> Result<Applied> + 'static,
    ) -> Result<(), RegistryError> {
        self.register(FnStep::new(name, description, prober, applier))
    }

    /// Steps in registration order.
    pub fn steps(&self) -> impl Iterator<Item = &(dyn Step + 'static)> {
        self.steps.iter().map(|step| &**step)
    }

    pub fn get(&self, name: &str) -> Option<&(dyn Step + 'static)> {
        self.steps().find(|step| step.name() == name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Registry error types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("step {0:?} is already registered")]
    DuplicateStep(String),
}

/// Step error types.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// No supported package manager exists.
    #[error("no supported package manager found (tried apt-get, yum, brew)")]
    NoPackageManager,

    /// Required program for this step is missing.
    #[error("required program {0:?} is not available")]
    MissingProgram(String),

    /// Another step has to converge first.
    #[error("prerequisite missing: {0}")]
    Prerequisite(String),

    /// Privileged operation was rejected.
    #[error("privileged operation rejected: {0}")]
    PrivilegeDenied(String),

    /// Some sub-items failed.
    #[error(
        "{} of {} items failed: {}",
        .tally.failed.len(),
        .tally.installed + .tally.present,
        .tally.failed.join("; ")
    )]
    Partial { tally: Tally },

    /// External command failed.
    #[error(transparent)]
    System(#[from] crate::system::SysError),

    /// Backup rotation failed.
    #[error(transparent)]
    Backup(#[from] crate::backup::BackupError),

    /// Filesystem operation failed.
    #[error("failed to {action} {:?}", .path.display())]
    Io {
        action: &'static str,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Probe output could not be understood.
    #[error("unexpected output from {program}: {output:?}")]
    UnexpectedOutput { program: String, output: String },
}

impl StepError {
    /// Classify error for recovery decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoPackageManager | Self::MissingProgram(_) | Self::Prerequisite(_) => {
                ErrorKind::MissingCapability
            }
            Self::PrivilegeDenied(_) => ErrorKind::PrivilegeDenied,
            Self::Partial { .. } => ErrorKind::Partial,
            Self::System(crate::system::SysError::Clone { .. }) => ErrorKind::Remote,
            Self::System(crate::system::SysError::NotFound(_)) => ErrorKind::MissingCapability,
            Self::System(_) | Self::UnexpectedOutput { .. } => ErrorKind::Command,
            Self::Backup(_) | Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(
        action: &'static str,
        path: impl Into<std::path::PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = StepError> = std::result::Result<T, E>;
