//! Fail-closed environment checks run before any artifact is produced.

use crate::backup::backup_config::BackupConfig;
use crate::backup::command::CommandRunner;
use crate::backup::context::RunContext;
use crate::backup::function_path;
use crate::backup::pipeline::{OnFailure, Stage};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use function_name::named;
use std::path::Path;

static WRITE_TEST_FILE: &str = ".host-backup-write-test";

pub struct PreflightStage<'a> {
    config: &'a BackupConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> PreflightStage<'a> {
    pub fn new(config: &'a BackupConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Tools every run needs. The dump tool is optional and not listed.
    pub fn required_tools(&self) -> Vec<&'a str> {
        let tools = self.config.tools();
        vec![
            tools.ssh().as_str(),
            tools.scp().as_str(),
            tools.rsync().as_str(),
            self.config.retention().command().as_str(),
        ]
    }

    #[named]
    fn check_tools(&self) -> Result<()> {
        for tool in self.required_tools() {
            match self.runner.resolve(tool) {
                Some(path) => tracing::debug!("Resolved {tool} to {:?}", path),
                None => return Err(Error::tool_not_found(tool)).add_fn_name(function_path!()),
            }
        }
        Ok(())
    }

    #[named]
    fn check_local_dirs(&self) -> Result<()> {
        [self.config.local_dir(), self.config.tmp_dir()]
            .into_iter()
            .try_for_each(|dir| check_writable_dir(dir))
            .add_fn_name(function_path!())
    }

    #[named]
    fn check_remote_connection(&self) -> Result<()> {
        let remote = self.config.remote();
        let output = self
            .runner
            .run_checked(&remote.ssh_command(self.config.tools().ssh(), "echo ok"))
            .add_msg(format!(
                "Cannot connect to {} on port {}",
                remote.destination(),
                remote.port()
            ))
            .add_fn_name(function_path!())?;
        if output.stdout.trim().is_empty() {
            return Err(Error::preflight(format!(
                "Connected to {} but the remote command returned no output",
                remote.destination()
            )))
            .add_fn_name(function_path!());
        }
        Ok(())
    }

    #[named]
    fn check_remote_dir(&self) -> Result<()> {
        let remote = self.config.remote();
        let dir = remote.quoted_dir();
        let probe = remote.quoted_path_in_dir(WRITE_TEST_FILE);
        let command = format!("test -d {dir} && touch {probe} && rm -f {probe}");
        self.runner
            .run_checked(&remote.ssh_command(self.config.tools().ssh(), command))
            .add_msg(format!(
                "Remote directory {:?} is missing or not writable",
                remote.dir()
            ))
            .add_fn_name(function_path!())
            .map(|_| ())
    }
}

/// The directory must already exist and accept a new file.
pub fn check_writable_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::preflight(format!(
            "{:?} does not exist or is not a directory",
            dir
        )));
    }
    tempfile::Builder::new()
        .prefix(WRITE_TEST_FILE)
        .tempfile_in(dir)
        .map(drop)
        .map_err(Error::from)
        .add_msg(format!("{:?} is not writable", dir))
}

impl Stage for PreflightStage<'_> {
    fn name(&self) -> &'static str {
        "preflight"
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Abort
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let log = ctx.log();
        self.check_tools()
            .add_msg("Required tool missing")?;
        self.check_local_dirs()
            .add_msg("Local directory check failed")?;
        self.check_remote_connection()
            .add_msg("Remote connection check failed")?;
        self.check_remote_dir()
            .add_msg("Remote directory check failed")?;
        log.say("Preflight checks passed");
        Ok(())
    }
}
