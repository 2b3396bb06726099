// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings file that declares the desired end
//! state of the machine. File I/O beyond a single convenience loader is left
//! to the caller.
//!
//! # General Layout
//!
//! Every section is optional. Anything left out falls back to the built-in
//! desired state, which reproduces a full zsh workstation setup: zsh as login
//! shell, a set of essential and network tools, Oh My Zsh with a handful of
//! community plugins, a managed `~/.zshrc`, lazygit, starship, nvm with a
//! recent Node.js, a couple of AI assistant CLIs, and one auxiliary checkout.
//!
//! Paths may use `~` and environment variables. Variables are expanded when
//! the file is parsed. A leading `~` is kept and resolved against the
//! [`Environment`](crate::env::Environment) home later, so the same settings
//! can be pointed at a scratch home directory.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Desired state of the machine.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Step names to leave alone.
    pub skip: Vec<String>,

    pub shell: ShellSettings,
    pub packages: PackageSettings,
    pub framework: FrameworkSettings,
    pub rcfile: RcFileSettings,
    pub runtime: RuntimeSettings,

    /// Standalone binaries installed through scripts.
    #[serde(rename = "tool")]
    pub tools: Vec<ToolSettings>,

    pub repo: Option<RepoSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            skip: Vec::new(),
            shell: ShellSettings::default(),
            packages: PackageSettings::default(),
            framework: FrameworkSettings::default(),
            rcfile: RcFileSettings::default(),
            runtime: RuntimeSettings::default(),
            tools: default_tools(),
            repo: Some(RepoSettings::default()),
        }
    }
}

impl Settings {
    /// Load settings from target path.
    ///
    /// A missing file is not an error. It simply means the built-in desired
    /// state applies.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the file is malformed.
    /// - Return [`ConfigError::NoBackups`] if backup retention is zero.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        read_to_string(path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            })?
            .parse()
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Regeneration must always leave at least one backup behind.
        if settings.rcfile.keep_backups == 0 {
            return Err(ConfigError::NoBackups);
        }

        // INVARIANT: Perform shell expansion on every path field.
        settings.framework.root = expand(&settings.framework.root)?;
        settings.rcfile.path = expand(&settings.rcfile.path)?;
        if let Some(aliases) = settings.rcfile.aliases.as_mut() {
            *aliases = expand(aliases)?;
        }
        for fallback in settings.shell.fallbacks.iter_mut() {
            *fallback = expand(fallback)?;
        }
        if let Some(repo) = settings.repo.as_mut() {
            for parent in repo.parents.iter_mut() {
                *parent = expand(parent)?;
            }
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

// Expand environment variables but leave `~` for later rebasing.
fn expand(path: &Path) -> Result<PathBuf> {
    let expanded = shellexpand::env(path.to_string_lossy().as_ref())
        .map_err(ConfigError::ShellExpansion)?
        .into_owned();
    Ok(PathBuf::from(expanded))
}

/// Where to look for an existing zsh before installing one.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShellSettings {
    /// Fixed install locations checked after `PATH`, in order.
    pub fallbacks: Vec<PathBuf>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            fallbacks: ["/bin/zsh", "/usr/bin/zsh", "/usr/local/bin/zsh", "/opt/homebrew/bin/zsh"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

/// Packages tracked by the system package manager.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageSettings {
    pub list: Vec<PackageSpec>,
}

impl Default for PackageSettings {
    fn default() -> Self {
        let essential = ["git", "curl", "wget", "unzip", "tmux", "htop", "jq", "tree"]
            .into_iter()
            .map(PackageSpec::from);
        let network = [
            PackageSpec::from("net-tools"),
            PackageSpec::Detailed {
                name: "dnsutils".into(),
                apt: None,
                yum: Some("bind-utils".into()),
                brew: Some("bind".into()),
            },
            PackageSpec::Detailed {
                name: "iputils-ping".into(),
                apt: None,
                yum: Some("iputils".into()),
                brew: Some(String::new()),
            },
            PackageSpec::from("traceroute"),
            PackageSpec::from("nmap"),
            PackageSpec::Detailed {
                name: "netcat-openbsd".into(),
                apt: None,
                yum: Some("nmap-ncat".into()),
                brew: Some("netcat".into()),
            },
            PackageSpec::from("whois"),
        ];

        Self {
            list: essential.chain(network).collect(),
        }
    }
}

/// Single package, optionally named differently per package manager.
///
/// An empty per-manager name means the package does not exist there and is
/// left out for that manager.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PackageSpec {
    Plain(String),
    Detailed {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        apt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        yum: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        brew: Option<String>,
    },
}

impl PackageSpec {
    /// Canonical name of package.
    pub fn name(&self) -> &str {
        match self {
            Self::Plain(name) => name,
            Self::Detailed { name, .. } => name,
        }
    }
}

impl From<&str> for PackageSpec {
    fn from(name: &str) -> Self {
        Self::Plain(name.into())
    }
}

/// Oh My Zsh along with its community plugins and themes.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FrameworkSettings {
    /// Framework root directory.
    pub root: PathBuf,

    /// URL of the unattended install script.
    pub installer: String,

    /// Plugins bundled with the framework that only need enabling.
    pub builtin_plugins: Vec<String>,

    #[serde(rename = "plugin")]
    pub plugins: Vec<RemoteAddon>,

    #[serde(rename = "theme")]
    pub themes: Vec<RemoteAddon>,
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.oh-my-zsh"),
            installer: "https://raw.githubusercontent.com/ohmyzsh/ohmyzsh/master/tools/install.sh"
                .into(),
            builtin_plugins: vec!["git".into()],
            plugins: vec![
                RemoteAddon::new(
                    "zsh-autosuggestions",
                    "https://github.com/zsh-users/zsh-autosuggestions",
                ),
                RemoteAddon::new(
                    "zsh-syntax-highlighting",
                    "https://github.com/zsh-users/zsh-syntax-highlighting",
                ),
                RemoteAddon::new(
                    "zsh-completions",
                    "https://github.com/zsh-users/zsh-completions",
                ),
            ],
            themes: vec![RemoteAddon::new(
                "powerlevel10k",
                "https://github.com/romkatv/powerlevel10k",
            )],
        }
    }
}

/// Plugin or theme cloned into the framework's custom directory.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RemoteAddon {
    /// Directory name under the custom directory.
    pub name: String,

    /// Remote to clone from.
    pub url: String,
}

impl RemoteAddon {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Managed shell run-control file.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RcFileSettings {
    pub path: PathBuf,

    /// Externally owned aliases file sourced by the managed file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<PathBuf>,

    /// Number of backups to retain.
    pub keep_backups: usize,
}

impl Default for RcFileSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.zshrc"),
            aliases: None,
            keep_backups: 3,
        }
    }
}

/// Node.js runtime managed through nvm.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Oldest acceptable major version.
    pub minimum_major: u32,

    /// URL of the nvm install script.
    pub nvm_installer: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            minimum_major: 22,
            nvm_installer: "https://raw.githubusercontent.com/nvm-sh/nvm/v0.40.3/install.sh".into(),
        }
    }
}

/// Binary installed by running a script.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ToolSettings {
    /// Step name.
    pub name: String,

    /// Executable that proves the tool is present.
    pub binary: String,

    /// Shell script that installs the tool.
    ///
    /// Runs through bash with `NVM_DIR` exported. Scripts of tools that need
    /// Node.js run with nvm already loaded.
    pub script: String,

    /// Needs a Node.js runtime before the script can run.
    #[serde(default)]
    pub needs_node: bool,
}

fn default_tools() -> Vec<ToolSettings> {
    vec![
        ToolSettings {
            name: "lazygit".into(),
            binary: "lazygit".into(),
            script: concat!(
                "set -e; ",
                "if command -v brew >/dev/null 2>&1; then brew install lazygit; exit 0; fi; ",
                r#"version=$(curl -fsSL https://api.github.com/repos/jesseduffield/lazygit/releases/latest | grep -Po '"tag_name": *"v\K[^"]*'); "#,
                r#"arch=$(uname -m); [ "$arch" = aarch64 ] && arch=arm64; "#,
                r#"curl -fsSLo /tmp/lazygit.tar.gz "https://github.com/jesseduffield/lazygit/releases/download/v${version}/lazygit_${version}_Linux_${arch}.tar.gz"; "#,
                "tar -xzf /tmp/lazygit.tar.gz -C /tmp lazygit; ",
                r#"mkdir -p "$HOME/.local/bin"; install /tmp/lazygit "$HOME/.local/bin""#,
            )
            .into(),
            needs_node: false,
        },
        ToolSettings {
            name: "starship".into(),
            binary: "starship".into(),
            script: concat!(
                r#"mkdir -p "$HOME/.local/bin" && "#,
                r#"curl -fsSL https://starship.rs/install.sh | sh -s -- -y -b "$HOME/.local/bin""#,
            )
            .into(),
            needs_node: false,
        },
        ToolSettings {
            name: "claude".into(),
            binary: "claude".into(),
            script: "npm install -g @anthropic-ai/claude-code".into(),
            needs_node: true,
        },
        ToolSettings {
            name: "gemini".into(),
            binary: "gemini".into(),
            script: "npm install -g @google/gemini-cli".into(),
            needs_node: true,
        },
    ]
}

/// Auxiliary repository checked out next to the user's other projects.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RepoSettings {
    /// Checkout directory name.
    pub name: String,

    pub url: String,

    /// Candidate parent directories, in priority order.
    #[serde(default = "default_repo_parents")]
    pub parents: Vec<PathBuf>,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            name: "dotfiles".into(),
            url: "https://github.com/awkless/dotfiles.git".into(),
            parents: default_repo_parents(),
        }
    }
}

fn default_repo_parents() -> Vec<PathBuf> {
    ["~/code", "~/src", "~/projects"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file exists but cannot be read.
    #[error("failed to read settings at {:?}", .path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Run-control file would be regenerated without any backup.
    #[error("rcfile.keep_backups must be at least 1")]
    NoBackups,

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("CODE", "/srv/code")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            skip = ["gemini"]

            [packages]
            list = ["git", { name = "dnsutils", yum = "bind-utils" }]

            [framework]
            builtin_plugins = []

            [[framework.plugin]]
            name = "zsh-autosuggestions"
            url = "https://github.com/zsh-users/zsh-autosuggestions"

            [rcfile]
            path = "~/.zshrc"
            keep_backups = 5

            [runtime]
            minimum_major = 20

            [[tool]]
            name = "lazygit"
            binary = "lazygit"
            script = "brew install lazygit"

            [repo]
            name = "notes"
            url = "https://blah.org/notes.git"
            parents = ["$CODE", "~/src"]
        "#
        .parse()?;

        assert_eq!(result.skip, vec!["gemini".to_string()]);
        assert_eq!(
            result.packages.list,
            vec![
                PackageSpec::from("git"),
                PackageSpec::Detailed {
                    name: "dnsutils".into(),
                    apt: None,
                    yum: Some("bind-utils".into()),
                    brew: None,
                },
            ]
        );
        assert_eq!(result.framework.root, PathBuf::from("~/.oh-my-zsh"));
        assert!(result.framework.builtin_plugins.is_empty());
        assert_eq!(result.framework.plugins.len(), 1);
        assert_eq!(result.framework.themes, FrameworkSettings::default().themes);
        assert_eq!(result.rcfile.keep_backups, 5);
        assert_eq!(result.runtime.minimum_major, 20);
        assert_eq!(
            result.tools,
            vec![ToolSettings {
                name: "lazygit".into(),
                binary: "lazygit".into(),
                script: "brew install lazygit".into(),
                needs_node: false,
            }]
        );
        assert_eq!(
            result.repo,
            Some(RepoSettings {
                name: "notes".into(),
                url: "https://blah.org/notes.git".into(),
                parents: vec![PathBuf::from("/srv/code"), PathBuf::from("~/src")],
            })
        );

        Ok(())
    }

    #[test]
    fn empty_settings_are_defaults() -> anyhow::Result<()> {
        let result: Settings = "".parse()?;
        assert_eq!(result, Settings::default());
        Ok(())
    }

    #[test]
    fn settings_survive_serialization() -> anyhow::Result<()> {
        let expect = Settings::default();
        let result: Settings = expect.to_string().parse()?;
        assert_eq!(result, expect);
        Ok(())
    }

    #[test]
    fn zero_backups_are_rejected() {
        let result = indoc! {"
            [rcfile]
            keep_backups = 0
        "}
        .parse::<Settings>();
        assert!(matches!(result, Err(ConfigError::NoBackups)));
    }

    #[test]
    fn missing_settings_file_is_default() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = Settings::load(dir.path().join("converge.toml"))?;
        assert_eq!(result, Settings::default());
        Ok(())
    }
}
