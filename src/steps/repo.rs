// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Auxiliary repository checkout.

use crate::step::{Applied, Context, Probe, Result, Step, StepError};

use std::{fs, path::PathBuf};
use tracing::{info, instrument};

/// Repository is checked out under one of several candidate parents.
///
/// People keep their projects in different places, so a checkout found under
/// any candidate counts. A fresh clone goes into the first candidate that
/// exists, or into the first candidate created from scratch.
#[derive(Debug, Clone)]
pub struct AuxRepo {
    name: String,
    url: String,
    parents: Vec<PathBuf>,
}

impl AuxRepo {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        parents: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            parents: parents.into_iter().collect(),
        }
    }

    /// Existing checkout, if any.
    pub fn locate(&self) -> Option<PathBuf> {
        self.parents
            .iter()
            .map(|parent| parent.join(&self.name))
            .find(|path| path.is_dir())
    }

    /// Where a fresh clone would go.
    pub fn destination(&self) -> Option<PathBuf> {
        self.parents
            .iter()
            .find(|parent| parent.is_dir())
            .or_else(|| self.parents.first())
            .map(|parent| parent.join(&self.name))
    }
}

impl Step for AuxRepo {
    fn name(&self) -> &str {
        "aux-repo"
    }

    fn description(&self) -> String {
        format!("clone {} repository", self.name)
    }

    fn probe(&self, _ctx: &Context<'_>) -> Result<Probe> {
        Ok(match self.locate() {
            Some(path) => Probe::satisfied().with_detail(path.display().to_string()),
            None => Probe::unsatisfied(),
        })
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn apply(&self, ctx: &Context<'_>) -> Result<Applied> {
        let destination = self
            .destination()
            .ok_or_else(|| StepError::Prerequisite("no candidate parent directory".into()))?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(StepError::io("create", parent))?;
        }

        info!("clone {} into {:?}", self.url, destination.display());
        ctx.system.clone_repo(&self.url, &destination)?;

        Ok(Applied::single())
    }
}
