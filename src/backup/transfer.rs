//! Off-site delivery: the encrypted archive by scp, mirror trees by rsync.

use crate::backup::backup_config::BackupConfig;
use crate::backup::command::{CommandRunner, CommandSpec};
use crate::backup::context::RunContext;
use crate::backup::pipeline::{OnFailure, Stage};
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;

use std::path::Path;

/// Copies the encrypted archive to the remote directory.
///
/// A failed copy fails the run but does not stop the mirrors.
pub struct BulkTransferStage<'a> {
    config: &'a BackupConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> BulkTransferStage<'a> {
    pub fn new(config: &'a BackupConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    pub fn scp_command(&self, encrypted: &Path) -> CommandSpec {
        let remote = self.config.remote();
        let mut spec = CommandSpec::new(self.config.tools().scp())
            .arg("-P")
            .arg(remote.port().to_string())
            .args(["-o", "BatchMode=yes"]);
        if *remote.bandwidth_limit() > 0 {
            spec = spec.arg("-l").arg(remote.bandwidth_limit().to_string());
        }
        spec.arg(encrypted).arg(remote.dir_target())
    }
}

impl Stage for BulkTransferStage<'_> {
    fn name(&self) -> &'static str {
        "bulk transfer"
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Fail
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let log = ctx.log();
        let encrypted = ctx.encrypted_path().clone();
        let target = self.config.remote().dir_target();

        log.say(&format!("Transferring {:?} to {}", encrypted, target));
        self.runner
            .run_checked(&self.scp_command(&encrypted))
            .add_msg(format!("Copy of {:?} to {} failed", encrypted, target))?;
        ctx.record_archive_shipped();

        let dump_path = ctx.dump_path().clone();
        match ctx.discard_dump() {
            Ok(true) => tracing::debug!("Removed dump {:?}", dump_path),
            Ok(false) => {}
            Err(e) => ctx.warn(format!("Cannot remove dump {:?}: {e}", dump_path)),
        }
        log.say(&format!("Transfer complete: {:?} -> {}", encrypted, target));
        Ok(())
    }
}

/// One-way rsync of every configured tree to the remote directory.
///
/// Each tree is attempted regardless of earlier failures.
pub struct MirrorStage<'a> {
    config: &'a BackupConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> MirrorStage<'a> {
    pub fn new(config: &'a BackupConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// `-a` keeps symlinks as links and skips unchanged files, `--relative`
    /// keeps the full source path under the remote directory.
    pub fn rsync_command(&self, dir: &Path) -> CommandSpec {
        let remote = self.config.remote();
        CommandSpec::new(self.config.tools().rsync())
            .args(["-a", "--relative", "--delete", "-e"])
            .arg(remote.rsync_transport(self.config.tools().ssh()))
            .arg(dir)
            .arg(remote.dir_target())
    }
}

impl Stage for MirrorStage<'_> {
    fn name(&self) -> &'static str {
        "mirror transfer"
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Continue
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let log = ctx.log();
        let dirs = self.config.mirror_dirs();
        if dirs.is_empty() {
            tracing::info!("No mirror directories configured");
            return Ok(());
        }

        let mut errors = Vec::new();
        for dir in dirs {
            log.say(&format!("Mirroring {:?}", dir));
            match self.runner.run_checked(&self.rsync_command(dir)) {
                Ok(_) => log.quiet(&format!("Mirror of {:?} complete", dir)),
                Err(e) => errors.push(e.add_msg(format!("Mirror of {:?} failed", dir))),
            }
        }
        let failed = errors.len();
        convert_error_vec(errors).add_msg(format!(
            "{failed} of {} mirror directories failed",
            dirs.len()
        ))?;
        log.say(&format!("Mirror transfer complete ({} directories)", dirs.len()));
        Ok(())
    }
}
