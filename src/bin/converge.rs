// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use converge::{
    config::Settings,
    env::Environment,
    path::{default_settings_path, rebase_home},
    runner::{ConvergenceRunner, Selection},
    step::{Context, StepRegistry},
    steps::{default_registry, managed_rcfile, shell::resolve_zsh},
    system::{Cmd, HostSystem},
};

use anyhow::{anyhow, Result};
use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use std::{ffi::OsString, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "converge [options] [<command>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config = match self.config {
            Some(path) => path,
            None => default_settings_path()?,
        };
        let settings = Settings::load(&config)?;
        info!("using settings {:?}", config.display());

        match self.command.unwrap_or_default() {
            Command::Run(opts) => run_converge(&settings, opts),
            Command::Status(opts) => run_status(&settings, opts),
            Command::Build => run_build(&settings),
            Command::Steps => run_steps(&settings),
            Command::Shell => run_shell(&settings),
            Command::Clean => run_clean(&settings),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Converge every selected step (default).
    #[command(override_usage = "converge run [options]")]
    Run(SelectOptions),

    /// Probe every selected step without changing anything.
    #[command(override_usage = "converge status [options]")]
    Status(SelectOptions),

    /// Print the managed run-control file without writing it.
    Build,

    /// List registered steps in convergence order.
    Steps,

    /// Replace this process with an interactive login zsh.
    Shell,

    /// Delete every backup of the managed run-control file.
    Clean,
}

impl Default for Command {
    fn default() -> Self {
        Self::Run(SelectOptions::default())
    }
}

#[derive(Parser, Clone, Debug, Default)]
#[command(author, about, long_about)]
struct SelectOptions {
    /// Only visit these steps.
    #[arg(short, long, value_name = "step", value_delimiter = ',')]
    pub only: Vec<String>,

    /// Leave these steps alone, on top of the settings skip list.
    #[arg(short, long, value_name = "step", value_delimiter = ',')]
    pub skip: Vec<String>,
}

impl SelectOptions {
    fn selection(self, settings: &Settings, registry: &StepRegistry) -> Selection {
        for name in self.only.iter().chain(&self.skip).chain(&settings.skip) {
            if registry.get(name).is_none() {
                warn!("unknown step {name:?}");
            }
        }

        Selection::all()
            .only(self.only)
            .skip(settings.skip.iter().cloned().chain(self.skip))
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    match parse_cli(std::env::args_os()) {
        Ok(Some(cli)) => cli.run(),
        Ok(None) => {
            println!("{}", Cli::command().render_usage());
            Ok(())
        }
        Err(err) => err.exit(),
    }
}

/// Parse command line, yielding nothing for an unknown command.
fn parse_cli<I, T>(args: I) -> Result<Option<Cli>, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        // INVARIANT: Unknown command prints usage but is not an error.
        Err(err) if err.kind() == ErrorKind::InvalidSubcommand => Ok(None),
        Err(err) => Err(err),
    }
}

fn run_converge(settings: &Settings, opts: SelectOptions) -> Result<()> {
    let env = Environment::from_process()?;
    let system = HostSystem::new(&env);
    let registry = default_registry(settings, &env)?;
    let selection = opts.selection(settings, &registry);

    let report = ConvergenceRunner::new(Context::new(&env, &system))
        .with_selection(selection)
        .run(&registry);
    println!("{report}");
    if report.has_failures() {
        warn!("some steps failed, run converge again once fixed");
    }

    Ok(())
}

fn run_status(settings: &Settings, opts: SelectOptions) -> Result<()> {
    let env = Environment::from_process()?;
    let system = HostSystem::new(&env);
    let registry = default_registry(settings, &env)?;
    let selection = opts.selection(settings, &registry);

    let report = ConvergenceRunner::new(Context::new(&env, &system))
        .with_selection(selection)
        .status(&registry);
    println!("{report}");

    Ok(())
}

fn run_build(settings: &Settings) -> Result<()> {
    let env = Environment::from_process()?;
    print!("{}", managed_rcfile(settings, &env).render()?);

    Ok(())
}

fn run_steps(settings: &Settings) -> Result<()> {
    let env = Environment::from_process()?;
    let registry = default_registry(settings, &env)?;
    let width = registry
        .steps()
        .map(|step| step.name().len())
        .max()
        .unwrap_or_default();
    for step in registry.steps() {
        let mark = if settings.skip.iter().any(|name| name == step.name()) {
            " (skipped)"
        } else {
            ""
        };
        println!("{:<width$}  {}{mark}", step.name(), step.description());
    }

    Ok(())
}

fn run_shell(settings: &Settings) -> Result<()> {
    let env = Environment::from_process()?;
    let system = HostSystem::new(&env);
    let ctx = Context::new(&env, &system);
    let fallbacks = settings
        .shell
        .fallbacks
        .iter()
        .map(|path| rebase_home(path, env.home()))
        .collect::<Vec<_>>();
    let zsh = resolve_zsh(&ctx, &fallbacks).ok_or_else(|| anyhow!("zsh is not installed"))?;
    let cmd = Cmd::new(zsh.display().to_string()).arg("-l");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        let mut shell = std::process::Command::new(&cmd.program);
        let err = shell.args(&cmd.args).exec();
        Err(anyhow!("failed to exec {cmd}: {err}"))
    }

    #[cfg(not(unix))]
    {
        system.run_interactive(&cmd)?;
        Ok(())
    }
}

fn run_clean(settings: &Settings) -> Result<()> {
    let env = Environment::from_process()?;
    let step = managed_rcfile(settings, &env);
    let removed = step.rotator().purge_all(step.path())?;
    for backup in &removed {
        println!("removed {}", backup.path.display());
    }
    let count = removed.len();
    info!("removed {count} backups of {:?}", step.path().display());

    Ok(())
}
