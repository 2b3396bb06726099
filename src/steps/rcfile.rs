// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Managed shell run-control file.
//!
//! The run-control file is generated from a fixed template. Whether it is up
//! to date is decided by a set of __signature markers__: substrings that a
//! correctly generated file always contains, one per integration it wires
//! up. Every marker has to be present. A file missing even one of them is
//! regenerated in full after being backed up.
//!
//! # Local Additions
//!
//! Regeneration overwrites the file. The only exception is everything below
//! the [`LOCAL_ADDITIONS`] marker line, which is carried over verbatim. Edits
//! anywhere else are lost on the next regeneration, and survive only in the
//! backups.

use crate::{
    backup::BackupRotator,
    step::{Applied, Context, Probe, Result, Step, StepError},
};

use chrono::{Local, NaiveDateTime};
use std::{
    fs,
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Marker line that starts the user-owned trailing region.
pub const LOCAL_ADDITIONS: &str = "# >>> local additions >>>";

/// Line that bootstraps the framework.
pub const FRAMEWORK_MARKER: &str = r#"source "$ZSH/oh-my-zsh.sh""#;

const STARSHIP_HOOK: &str = r#"eval "$(starship init zsh)""#;

/// Inputs of the run-control template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcTemplate {
    pub framework_root: PathBuf,
    pub plugins: Vec<String>,

    /// Framework theme used when no external prompt renderer is hooked in.
    pub theme: Option<String>,

    /// Hook external prompt renderer instead of a framework theme.
    pub starship: bool,

    pub aliases: PathBuf,
    pub nvm_dir: PathBuf,
}

impl RcTemplate {
    fn prompt_line(&self) -> String {
        if self.starship {
            format!("command -v starship >/dev/null 2>&1 && {STARSHIP_HOOK}")
        } else {
            let theme = self
                .theme
                .as_deref()
                .map(|theme| format!("{theme}/{theme}"))
                .unwrap_or_else(|| "robbyrussell".into());
            format!(r#"ZSH_THEME="{theme}""#)
        }
    }

    fn aliases_marker(&self) -> String {
        format!(r#"source "{}""#, self.aliases.display())
    }

    /// Substrings every converged file contains.
    pub fn markers(&self) -> Vec<String> {
        let mut markers = vec![FRAMEWORK_MARKER.to_string()];
        markers.extend(self.plugins.iter().cloned());
        markers.push(if self.starship {
            STARSHIP_HOOK.to_string()
        } else {
            self.prompt_line()
        });
        markers.push(self.aliases_marker());
        markers
    }

    /// Render file content, appending a previous local region if given.
    pub fn render(&self, local: Option<&str>) -> String {
        let theme = if self.starship {
            r#"ZSH_THEME="""#.to_string()
        } else {
            self.prompt_line()
        };
        let prompt = if self.starship {
            format!("{}\n", self.prompt_line())
        } else {
            String::new()
        };

        let mut out = format!(
            r#"# Generated by converge. Regenerated whenever a required section is missing.
# Keep personal tweaks below the local additions marker at the end of this file.

export ZSH="{root}"
{theme}
plugins=({plugins})
{FRAMEWORK_MARKER}

export PATH="$HOME/.local/bin:$PATH"

export NVM_DIR="{nvm}"
[ -s "$NVM_DIR/nvm.sh" ] && source "$NVM_DIR/nvm.sh"

{prompt}[ -f "{aliases}" ] && {aliases_marker}

{LOCAL_ADDITIONS}
"#,
            root = self.framework_root.display(),
            plugins = self.plugins.join(" "),
            nvm = self.nvm_dir.display(),
            aliases = self.aliases.display(),
            aliases_marker = self.aliases_marker(),
        );
        if let Some(local) = local {
            out.push_str(local);
        }

        out
    }
}

/// Content after the local additions marker line, if the marker exists.
pub fn local_additions(content: &str) -> Option<&str> {
    let start = content.find(LOCAL_ADDITIONS)?;
    let rest = &content[start + LOCAL_ADDITIONS.len()..];
    Some(rest.strip_prefix('\n').unwrap_or(rest))
}

/// Run-control file carries every signature marker.
pub struct ManagedRcFile {
    path: PathBuf,
    template: RcTemplate,
    rotator: BackupRotator,
    clock: fn() -> NaiveDateTime,
}

impl ManagedRcFile {
    pub fn new(path: impl Into<PathBuf>, template: RcTemplate, rotator: BackupRotator) -> Self {
        Self {
            path: path.into(),
            template,
            rotator,
            clock: || Local::now().naive_local(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn template(&self) -> &RcTemplate {
        &self.template
    }

    pub fn rotator(&self) -> &BackupRotator {
        &self.rotator
    }

    /// Markers absent from given content.
    pub fn missing_markers(&self, content: &str) -> Vec<String> {
        self.template
            .markers()
            .into_iter()
            .filter(|marker| !content.contains(marker.as_str()))
            .collect()
    }

    /// Content the next apply would write.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::Io`] if an existing file cannot be read.
    pub fn render(&self) -> Result<String> {
        let existing = self.read_existing()?;
        let local = existing.as_deref().and_then(local_additions);
        Ok(self.template.render(local))
    }

    fn read_existing(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
            Err(err) => Err(StepError::io("read", &self.path)(err)),
        }
    }
}

impl Step for ManagedRcFile {
    fn name(&self) -> &str {
        "zshrc"
    }

    fn description(&self) -> String {
        format!("generate {:?}", self.path.display())
    }

    fn probe(&self, _ctx: &Context<'_>) -> Result<Probe> {
        let Some(content) = self.read_existing()? else {
            return Ok(Probe::unsatisfied().with_detail("file does not exist"));
        };

        let missing = self.missing_markers(&content);
        if missing.is_empty() {
            return Ok(Probe::satisfied());
        }

        Ok(Probe::unsatisfied().with_detail(format!(
            "missing {} of {} markers",
            missing.len(),
            self.template.markers().len()
        )))
    }

    #[instrument(skip(self, _ctx), level = "debug")]
    fn apply(&self, _ctx: &Context<'_>) -> Result<Applied> {
        let existing = self.read_existing()?;
        let mut applied = Applied::single();
        if existing.as_deref().is_some_and(|content| !content.is_empty()) {
            let backup = self.rotator.backup(&self.path, (self.clock)())?;
            applied = applied.with_warning(format!(
                "previous file saved as {:?}",
                backup.path.display()
            ));
        }

        let local = existing.as_deref().and_then(local_additions);
        let content = self.template.render(local);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(StepError::io("create", parent))?;
        }
        fs::write(&self.path, content).map_err(StepError::io("write", &self.path))?;
        info!("wrote {:?}", self.path.display());

        Ok(applied)
    }
}
