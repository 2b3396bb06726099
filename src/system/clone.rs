// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository cloning through libgit2.
//!
//! Plugins, themes, and the auxiliary checkout are all plain shallow clones.
//! Progress is drawn on a single bar per clone, and the bar gets out of the
//! way whenever the remote asks for credentials.

use auth_git2::{GitAuthenticator, Prompter};
use git2::{build::RepoBuilder, Config, FetchOptions, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{path::Path, time};
use tracing::{info, instrument};

/// Shallow clone remote into target directory while drawing progress.
///
/// # Errors
///
/// - Return [`CloneError::Git2`] if libgit2 operations fail.
/// - Return [`CloneError::IndicatifStyleTemplate`] if the bar cannot be styled.
#[instrument(skip(url, dest), level = "debug")]
pub fn clone_with_progress(url: &str, dest: &Path) -> Result<()> {
    info!("clone {url} into {:?}", dest.display());
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<40}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("=>-");
    bar.set_style(style);
    bar.set_message(short_name(url));
    bar.enable_steady_tick(time::Duration::from_millis(100));

    let prompter = BarPrompter::new(bar.clone());
    let authenticator = GitAuthenticator::default().set_prompter(prompter);
    let config = Config::open_default()?;

    let mut throttle = time::Instant::now();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(authenticator.credentials(&config));
    callbacks.transfer_progress(|progress| {
        if throttle.elapsed() > time::Duration::from_millis(10) {
            throttle = time::Instant::now();
            bar.set_length(progress.total_objects() as u64);
            bar.set_position(progress.received_objects() as u64);
        }
        true
    });

    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(callbacks);
    fetch.depth(1);
    let result = RepoBuilder::new().fetch_options(fetch).clone(url, dest);
    bar.finish_and_clear();
    result?;

    Ok(())
}

fn short_name(url: &str) -> String {
    url.trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url)
        .to_string()
}

/// Credential prompter that suspends a progress bar while asking.
#[derive(Debug, Clone)]
pub struct BarPrompter {
    bar: ProgressBar,
}

impl BarPrompter {
    /// Construct new prompter bound to a progress bar.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }

    fn ask_password(&self) -> Option<String> {
        self.bar.suspend(|| {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

impl Prompter for BarPrompter {
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        let username = self.bar.suspend(|| Text::new("username").prompt().ok())?;
        let password = self.ask_password()?;
        Some((username, password))
    }

    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.ask_password()
    }

    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("passphrase required for {}", ssh_key_path.display());
        self.ask_password()
    }
}

/// Clone error types.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
type Result<T, E = CloneError> = std::result::Result<T, E>;
