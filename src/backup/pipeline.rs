//! The ordered sequence of backup stages and the abort/continue policy
//! applied between them.

use crate::backup::archive::ArchiveStage;
use crate::backup::backup_config::BackupConfig;
use crate::backup::command::CommandRunner;
use crate::backup::context::RunContext;
use crate::backup::dump::DatabaseDumpStage;
use crate::backup::encrypt::EncryptStage;
use crate::backup::preflight::PreflightStage;
use crate::backup::result_error::result::Result;
use crate::backup::retention::coordinator::RetentionStage;
use crate::backup::transfer::{BulkTransferStage, MirrorStage};

use std::path::Path;
use std::time::{Duration, Instant};

/// What the pipeline does when a stage returns an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnFailure {
    /// Stop the run, no later stage executes.
    Abort,
    /// Mark the run failed but still execute the later stages.
    Fail,
    /// Record a warning and go on with the next stage.
    Continue,
}

pub trait Stage {
    fn name(&self) -> &'static str;

    fn on_failure(&self) -> OnFailure;

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()>;
}

#[derive(Debug)]
pub struct RunReport {
    pub aborted_at: Option<&'static str>,
    /// Stages that failed without stopping the run.
    pub failed: Vec<&'static str>,
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.aborted_at.is_none() && self.failed.is_empty() && self.warnings.is_empty()
    }

    /// 0 clean, 2 completed with warnings, 1 aborted or failed.
    pub fn exit_code(&self) -> i32 {
        if self.aborted_at.is_some() || !self.failed.is_empty() {
            1
        } else if self.warnings.is_empty() {
            0
        } else {
            2
        }
    }
}

pub struct Pipeline<'a> {
    stages: Vec<Box<dyn Stage + 'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(stages: Vec<Box<dyn Stage + 'a>>) -> Self {
        Self { stages }
    }

    /// Preflight, database dump, archive, encryption, bulk transfer, mirror,
    /// retention.
    pub fn standard(
        config: &'a BackupConfig,
        config_path: &'a Path,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self::new(vec![
            Box::new(PreflightStage::new(config, runner)),
            Box::new(DatabaseDumpStage::new(config, runner)),
            Box::new(ArchiveStage::new(config)),
            Box::new(EncryptStage::new(config)),
            Box::new(BulkTransferStage::new(config, runner)),
            Box::new(MirrorStage::new(config, runner)),
            Box::new(RetentionStage::new(config, config_path, runner)),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, ctx: &mut RunContext<'_>) -> RunReport {
        let started = Instant::now();
        let log = ctx.log();
        log.say(&format!(
            "Backup run {} started on {}",
            ctx.run_id().stamp(),
            ctx.run_id().hostname()
        ));

        let mut aborted_at = None;
        let mut failed = Vec::new();
        for stage in &self.stages {
            tracing::info!("Running stage {}", stage.name());
            match stage.run(ctx) {
                Ok(()) => tracing::debug!("Stage {} done", stage.name()),
                Err(e) => match stage.on_failure() {
                    OnFailure::Abort => {
                        tracing::error!("Stage {} failed: {e}", stage.name());
                        log.say(&format!("ERROR: {} failed:\n{e}", stage.name()));
                        aborted_at = Some(stage.name());
                        break;
                    }
                    OnFailure::Fail => {
                        tracing::error!("Stage {} failed: {e}", stage.name());
                        log.say(&format!("ERROR: {} failed, continuing:\n{e}", stage.name()));
                        failed.push(stage.name());
                    }
                    OnFailure::Continue => {
                        ctx.warn(format!("{} failed, continuing:\n{e}", stage.name()));
                    }
                },
            }
        }

        // a dump still on disk here was never shipped, don't leave it around
        let dump_path = ctx.dump_path().clone();
        match ctx.discard_dump() {
            Ok(true) => log.quiet(&format!("Removed database dump {:?}", dump_path)),
            Ok(false) => {}
            Err(e) => ctx.warn(format!("Cannot remove dump {:?}: {e}", dump_path)),
        }

        let duration = started.elapsed();
        let took = humantime::format_duration(Duration::from_secs(duration.as_secs()));
        match (aborted_at, failed.is_empty()) {
            (Some(name), _) => log.say(&format!("Backup run aborted at {name} after {took}")),
            (None, false) => log.say(&format!(
                "Backup run finished in {took}, failed: {}",
                failed.join(", ")
            )),
            (None, true) => log.say(&format!("Backup run finished in {took}")),
        }

        RunReport {
            aborted_at,
            failed,
            warnings: ctx.take_warnings(),
            duration,
        }
    }
}
