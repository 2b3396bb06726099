// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent bootstrap of a zsh workstation.
//!
//! Converge declares the desired end state of a user's shell environment as
//! an ordered list of [`Step`]s, then drives the machine towards it: zsh as
//! login shell, a set of system packages, Oh My Zsh with community plugins
//! and themes, nvm with a recent Node.js, a handful of standalone tools, an
//! auxiliary checkout, and a generated `~/.zshrc`.
//!
//! Every step checks before it acts, so running converge twice in a row does
//! nothing the second time. A failing step is reported and the run carries
//! on with the rest.
//!
//! All interaction with the host goes through the [`System`] trait, and all
//! knowledge about the user comes from an immutable [`Environment`]. Both can
//! be swapped for test doubles or a scratch home directory.

pub mod backup;
pub mod config;
pub mod env;
pub mod path;
pub mod runner;
pub mod step;
pub mod steps;
pub mod system;

pub use crate::{
    env::Environment,
    runner::{ConvergenceRunner, Outcome, Report, Selection},
    step::{Context, Step, StepRegistry},
    system::{HostSystem, System},
};
