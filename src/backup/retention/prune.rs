//! Deletes encrypted archives that fall outside the retention policy, from
//! the local backup directory or from the remote one.

use crate::backup::backup_config::{BackupConfig, RemoteConfig};
use crate::backup::command::CommandRunner;
use crate::backup::context::RunId;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::{ItemWithDateTime, RetentionPolicy};
use crate::backup::run_log::RunLog;

use chrono::{DateTime, Utc};
use function_name::named;
use itertools::Itertools;
use std::path::PathBuf;

/// A directory holding encrypted archives.
pub trait BackupStore {
    fn describe(&self) -> String;

    /// File names directly inside the store.
    fn list(&self) -> Result<Vec<String>>;

    fn delete(&self, names: &[String]) -> Result<()>;
}

pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl BackupStore for LocalStore {
    fn describe(&self) -> String {
        format!("{:?}", self.dir)
    }

    #[named]
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn delete(&self, names: &[String]) -> Result<()> {
        let errors = names
            .iter()
            .filter_map(|name| {
                let path = self.dir.join(name);
                std::fs::remove_file(&path)
                    .map_err(Error::from)
                    .add_msg(format!("Delete {:?} failed", path))
                    .err()
            })
            .collect_vec();
        convert_error_vec(errors)
    }
}

/// The remote backup directory, reached over ssh.
pub struct RemoteStore<'a> {
    remote: &'a RemoteConfig,
    ssh: &'a str,
    runner: &'a dyn CommandRunner,
}

impl<'a> RemoteStore<'a> {
    pub fn new(config: &'a BackupConfig, runner: &'a dyn CommandRunner) -> Self {
        Self {
            remote: config.remote(),
            ssh: config.tools().ssh(),
            runner,
        }
    }
}

impl BackupStore for RemoteStore<'_> {
    fn describe(&self) -> String {
        self.remote.dir_target()
    }

    #[named]
    fn list(&self) -> Result<Vec<String>> {
        let command = format!("ls -1 -- {}", self.remote.quoted_dir());
        let output = self
            .runner
            .run_checked(&self.remote.ssh_command(self.ssh, command))
            .add_fn_name(function_path!())?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    #[named]
    fn delete(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let command = std::iter::once("rm -f --".to_string())
            .chain(names.iter().map(|n| self.remote.quoted_path_in_dir(n)))
            .join(" ");
        self.runner
            .run_checked(&self.remote.ssh_command(self.ssh, command))
            .add_fn_name(function_path!())
            .map(|_| ())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Archives of this host that survive the policy.
    pub kept: usize,
    /// Deleted, or selected for deletion on a dry run. Newest first.
    pub deleted: Vec<String>,
}

/// Applies `policy` to the archives of `hostname` in `store`.
///
/// Files that do not parse as this host's encrypted archives are never
/// touched.
pub fn prune(
    store: &dyn BackupStore,
    hostname: &str,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    dry_run: bool,
    log: &dyn RunLog,
) -> Result<PruneOutcome> {
    let archives = store
        .list()
        .add_msg(format!("Cannot list {}", store.describe()))?
        .into_iter()
        .filter_map(|name| {
            RunId::parse_encrypted_file_name(hostname, &name)
                .map(|id| ItemWithDateTime::from((name, *id.started_at())))
        })
        .collect_vec();
    let total = archives.len();

    let deleted = policy
        .select_for_deletion(archives, now)
        .into_iter()
        .map(|item| item.item)
        .collect_vec();
    let outcome = PruneOutcome {
        kept: total - deleted.len(),
        deleted,
    };
    tracing::info!(
        "{}: {} archives, {} to delete",
        store.describe(),
        total,
        outcome.deleted.len()
    );
    if outcome.deleted.is_empty() {
        log.say(&format!("Nothing to prune in {}", store.describe()));
        return Ok(outcome);
    }

    if dry_run {
        for name in &outcome.deleted {
            log.say(&format!("Would delete {name}"));
        }
        return Ok(outcome);
    }

    store
        .delete(&outcome.deleted)
        .add_msg(format!("Cannot prune {}", store.describe()))?;
    for name in &outcome.deleted {
        log.say(&format!("Deleted {name}"));
    }
    Ok(outcome)
}
