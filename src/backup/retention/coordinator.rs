use crate::backup::backup_config::BackupConfig;
use crate::backup::command::{CommandRunner, CommandSpec};
use crate::backup::context::RunContext;
use crate::backup::pipeline::{OnFailure, Stage};
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;

use std::path::Path;

/// Which store a retention pass prunes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionTarget {
    Local,
    Remote,
}

impl RetentionTarget {
    fn label(self) -> &'static str {
        match self {
            RetentionTarget::Local => "local",
            RetentionTarget::Remote => "remote",
        }
    }
}

/// Hands retention to the prune command, once per target.
///
/// Applies no policy of its own. The remote pass runs even when the local
/// one failed. Nothing is pruned unless this run's archive reached the remote.
pub struct RetentionStage<'a> {
    config: &'a BackupConfig,
    config_path: &'a Path,
    runner: &'a dyn CommandRunner,
}

impl<'a> RetentionStage<'a> {
    pub fn new(
        config: &'a BackupConfig,
        config_path: &'a Path,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            config_path,
            runner,
        }
    }

    pub fn prune_command(&self, target: RetentionTarget) -> CommandSpec {
        let spec = CommandSpec::new(self.config.retention().command())
            .arg("--config")
            .arg(self.config_path);
        match target {
            RetentionTarget::Local => spec,
            RetentionTarget::Remote => spec.arg("--remote"),
        }
    }
}

impl Stage for RetentionStage<'_> {
    fn name(&self) -> &'static str {
        "retention"
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Continue
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let log = ctx.log();
        if !*ctx.archive_shipped() {
            log.say("Skipping retention, this run's archive was not copied off-site");
            return Ok(());
        }
        let errors = [RetentionTarget::Local, RetentionTarget::Remote]
            .into_iter()
            .filter_map(|target| {
                log.say(&format!("Applying {} retention", target.label()));
                let output = self
                    .runner
                    .run_checked(&self.prune_command(target))
                    .add_msg(format!("{} retention failed", target.label()));
                match output {
                    Ok(output) => {
                        // the prune command writes its own run log entries
                        output
                            .stdout
                            .lines()
                            .for_each(|line| tracing::debug!("{}: {line}", target.label()));
                        None
                    }
                    Err(e) => Some(e),
                }
            })
            .collect();
        convert_error_vec(errors)?;
        log.say("Retention complete");
        Ok(())
    }
}
