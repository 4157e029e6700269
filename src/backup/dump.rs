use crate::backup::backup_config::BackupConfig;
use crate::backup::command::{CommandRunner, CommandSpec};
use crate::backup::context::RunContext;
use crate::backup::pipeline::{OnFailure, Stage};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;

use std::path::Path;

/// Optional export of every database into one file that joins the archive.
pub struct DatabaseDumpStage<'a> {
    config: &'a BackupConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> DatabaseDumpStage<'a> {
    pub fn new(config: &'a BackupConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    fn dump_command(&self, password: &RedactedString, dump_path: &Path) -> CommandSpec {
        let mut result_file = std::ffi::OsString::from("--result-file=");
        result_file.push(dump_path);
        CommandSpec::new(self.config.tools().mysqldump())
            .arg(format!("--user={}", self.config.database_user()))
            .arg("--all-databases")
            .arg(result_file)
            .secret_env("MYSQL_PWD", password.clone())
    }
}

impl Stage for DatabaseDumpStage<'_> {
    fn name(&self) -> &'static str {
        "database dump"
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Continue
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let log = ctx.log();
        let tool = self.config.tools().mysqldump();
        if self.runner.resolve(tool).is_none() {
            log.say(&format!("Skipping database dump: {tool} not found"));
            return Ok(());
        }
        let Some(password) = self.config.database_password() else {
            log.say("Skipping database dump: no database root credential configured");
            return Ok(());
        };

        let dump_path = ctx.dump_path().clone();
        log.say(&format!("Dumping all databases to {:?}", dump_path));
        let res = self
            .runner
            .run_checked(&self.dump_command(password, &dump_path))
            .add_msg("Database dump failed, the archive will not contain it");
        if let Err(e) = res {
            if dump_path.exists() {
                if let Err(rm) = std::fs::remove_file(&dump_path) {
                    tracing::warn!("Failed to remove partial dump {:?}: {rm}", dump_path);
                }
            }
            return Err(e);
        }

        ctx.record_dump();
        log.say("Database dump complete");
        Ok(())
    }
}
