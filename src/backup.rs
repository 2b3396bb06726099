// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Timestamped backup rotation.
//!
//! Before a managed file gets regenerated, a copy of it is stored next to it
//! as `<file>.backup.<YYYYMMDD-HHMMSS>`. Only the newest few copies are kept
//! around. Order is decided by the timestamp embedded in the name rather than
//! filesystem metadata, since copies made by other tools may not preserve it.
//!
//! # Pitfalls
//!
//! Two runs racing on the same file will race on the backup-then-overwrite
//! sequence too. Only one run at a time is supported.

use chrono::NaiveDateTime;
use glob::Pattern;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Timestamp layout used in backup file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

const BACKUP_INFIX: &str = ".backup.";

/// Snapshot of a managed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    /// Location of the snapshot itself.
    pub path: PathBuf,

    /// Managed file the snapshot was taken of.
    pub original: PathBuf,

    pub created: NaiveDateTime,

    /// Whether rotation kept this snapshot.
    pub retained: bool,
}

impl BackupFile {
    fn parse(original: &Path, path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (_, stamp) = name.rsplit_once(BACKUP_INFIX)?;
        let created = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

        Some(Self {
            path,
            original: original.to_path_buf(),
            created,
            retained: true,
        })
    }
}

/// Keep the newest K backups of a managed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupRotator {
    keep: usize,
}

impl Default for BackupRotator {
    fn default() -> Self {
        Self { keep: 3 }
    }
}

impl BackupRotator {
    pub fn new(keep: usize) -> Self {
        Self { keep }
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Path a backup taken at a given time would be written to.
    pub fn backup_path(original: &Path, at: NaiveDateTime) -> PathBuf {
        let mut name = original.as_os_str().to_os_string();
        name.push(BACKUP_INFIX);
        name.push(at.format(TIMESTAMP_FORMAT).to_string());
        PathBuf::from(name)
    }

    /// Copy managed file to a new timestamped backup, then rotate.
    ///
    /// If a backup for the same second exists already, the timestamp is
    /// advanced one second at a time until a free name is found.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Copy`] if the file cannot be copied.
    /// - Return [`BackupError::Remove`] if rotation fails.
    /// - Return [`BackupError::Discarded`] if rotation removed the new backup
    ///   because newer ones already exist.
    #[instrument(skip(self, original), level = "debug")]
    pub fn backup(&self, original: impl AsRef<Path>, at: NaiveDateTime) -> Result<BackupFile> {
        let original = original.as_ref();
        let mut at = at;
        let mut path = Self::backup_path(original, at);
        while path.exists() {
            at += chrono::Duration::seconds(1);
            path = Self::backup_path(original, at);
        }

        fs::copy(original, &path).map_err(|err| BackupError::Copy {
            source: err,
            path: path.clone(),
        })?;
        info!("backed up {:?} to {:?}", original.display(), path.display());

        // INVARIANT: Never purge the backup just taken, whatever K is.
        let retained = Self::new(self.keep.max(1))
            .rotate(original)?
            .into_iter()
            .find(|backup| backup.path == path)
            .is_some_and(|backup| backup.retained);
        if !retained {
            return Err(BackupError::Discarded { path });
        }

        Ok(BackupFile {
            path,
            original: original.to_path_buf(),
            created: at,
            retained,
        })
    }

    /// List backups of a managed file, newest first.
    ///
    /// Entries whose name does not carry a valid timestamp are ignored.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Pattern`] if the path cannot form a glob.
    pub fn list(&self, original: impl AsRef<Path>) -> Result<Vec<BackupFile>> {
        let original = original.as_ref();
        let pattern = format!(
            "{}{BACKUP_INFIX}*",
            Pattern::escape(original.to_string_lossy().as_ref())
        );

        let mut backups = glob::glob(&pattern)?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| BackupFile::parse(original, path))
            .collect::<Vec<_>>();
        backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.path.cmp(&a.path)));

        Ok(backups)
    }

    /// Delete every backup beyond the newest K.
    ///
    /// Safe to call when there are no backups at all. Returns every backup
    /// seen, flagged as retained or purged.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Remove`] if an excess backup cannot be deleted.
    #[instrument(skip(self, original), level = "debug")]
    pub fn rotate(&self, original: impl AsRef<Path>) -> Result<Vec<BackupFile>> {
        let mut backups = self.list(original)?;
        for backup in backups.iter_mut().skip(self.keep) {
            debug!("purge old backup {:?}", backup.path.display());
            fs::remove_file(&backup.path).map_err(|err| BackupError::Remove {
                source: err,
                path: backup.path.clone(),
            })?;
            backup.retained = false;
        }

        Ok(backups)
    }

    /// Delete every backup of a managed file.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Remove`] if a backup cannot be deleted.
    pub fn purge_all(&self, original: impl AsRef<Path>) -> Result<Vec<BackupFile>> {
        Self::new(0).rotate(original)
    }
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Managed file cannot be copied to its backup location.
    #[error("failed to write backup {:?}", .path.display())]
    Copy {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Excess backup cannot be deleted.
    #[error("failed to remove backup {:?}", .path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Fresh backup was older than every retained one.
    #[error("backup {:?} was rotated out right after being taken", .path.display())]
    Discarded { path: PathBuf },

    /// Managed path cannot be turned into a glob pattern.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

/// Friendly result alias :3
type Result<T, E = BackupError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stamp(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn backup_path_appends_timestamp() {
        let zshrc = Path::new("/home/blah/.zshrc");
        let result = BackupRotator::backup_path(zshrc, stamp("20250102-030405"));
        let expect = PathBuf::from("/home/blah/.zshrc.backup.20250102-030405");
        assert_eq!(result, expect);
    }

    #[test]
    fn rotate_keeps_three_newest_of_five() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let zshrc = home.path().join(".zshrc");
        fs::write(&zshrc, "export ZSH=\"$HOME/.oh-my-zsh\"\n")?;
        let stamps = [
            "20250101-000000",
            "20250301-120000",
            "20250105-090000",
            "20250201-000001",
            "20250201-000000",
        ];
        for value in stamps {
            fs::write(BackupRotator::backup_path(&zshrc, stamp(value)), value)?;
        }

        let rotator = BackupRotator::new(3);
        let result = rotator.rotate(&zshrc)?;
        let purged = result.iter().filter(|backup| !backup.retained).count();
        assert_eq!(purged, 2);

        let remaining = rotator
            .list(&zshrc)?
            .into_iter()
            .map(|backup| backup.created)
            .collect::<Vec<_>>();
        let expect = vec![
            stamp("20250301-120000"),
            stamp("20250201-000001"),
            stamp("20250201-000000"),
        ];
        assert_eq!(remaining, expect);
        assert!(zshrc.exists());

        Ok(())
    }

    #[test]
    fn rotate_without_backups_is_noop() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let zshrc = home.path().join(".zshrc");

        let result = BackupRotator::default().rotate(&zshrc)?;
        assert!(result.is_empty());

        Ok(())
    }

    #[test]
    fn list_ignores_foreign_names() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let zshrc = home.path().join(".zshrc");
        fs::write(home.path().join(".zshrc.backup.old"), "")?;
        fs::write(home.path().join(".zshrc.orig"), "")?;
        let stale = BackupRotator::backup_path(&zshrc, stamp("20250101-000000"));
        fs::write(stale, "")?;

        let result = BackupRotator::default().list(&zshrc)?;
        assert_eq!(result.len(), 1);

        Ok(())
    }

    #[test]
    fn backup_same_second_does_not_clobber() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let zshrc = home.path().join(".zshrc");
        fs::write(&zshrc, "first")?;
        let rotator = BackupRotator::default();
        let at = stamp("20250101-000000");

        let first = rotator.backup(&zshrc, at)?;
        fs::write(&zshrc, "second")?;
        let second = rotator.backup(&zshrc, at)?;

        assert_eq!(first.created, at);
        assert_eq!(second.created, stamp("20250101-000001"));
        assert_eq!(fs::read_to_string(&first.path)?, "first");
        assert_eq!(fs::read_to_string(&second.path)?, "second");

        Ok(())
    }

    #[test]
    fn backup_survives_zero_retention() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let zshrc = home.path().join(".zshrc");
        fs::write(&zshrc, "precious")?;

        let rotator = BackupRotator::new(0);
        let result = rotator.backup(&zshrc, stamp("20250101-000000"))?;
        assert!(result.retained);
        assert_eq!(fs::read_to_string(&result.path)?, "precious");
        assert_eq!(rotator.list(&zshrc)?.len(), 1);

        Ok(())
    }

    #[test]
    fn backup_older_than_retained_ones_is_an_error() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let zshrc = home.path().join(".zshrc");
        fs::write(&zshrc, "")?;
        let rotator = BackupRotator::new(1);
        rotator.backup(&zshrc, stamp("20250301-000000"))?;

        let result = rotator.backup(&zshrc, stamp("20250101-000000"));
        assert!(matches!(result, Err(BackupError::Discarded { .. })));
        assert_eq!(rotator.list(&zshrc)?.len(), 1);

        Ok(())
    }

    #[test]
    fn purge_all_removes_everything() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let zshrc = home.path().join(".zshrc");
        fs::write(&zshrc, "")?;
        let rotator = BackupRotator::default();
        for value in ["20250101-000000", "20250101-000001"] {
            rotator.backup(&zshrc, stamp(value))?;
        }

        let result = rotator.purge_all(&zshrc)?;
        assert_eq!(result.len(), 2);
        assert!(rotator.list(&zshrc)?.is_empty());

        Ok(())
    }
}
