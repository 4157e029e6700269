use crate::backup::backup_config::BackupConfig;
use crate::backup::run_log::RunLog;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use getset::Getters;

use std::path::{Path, PathBuf};

static RUN_STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
pub static ARCHIVE_FILE_EXT: &str = "tar.gz";
pub static ENCRYPTED_FILE_EXT: &str = "enc";

/// Identifies one run: the host it ran on and the instant it started.
///
/// Every artifact name of a run derives from this, so names are stable for
/// the whole run.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RunId {
    hostname: String,
    started_at: DateTime<Utc>,
}

impl RunId {
    pub fn new<S: Into<String>>(hostname: S, started_at: DateTime<Utc>) -> Self {
        // names only carry second resolution
        let started_at = started_at.with_nanosecond(0).unwrap_or(started_at);
        Self {
            hostname: hostname.into(),
            started_at,
        }
    }

    pub fn stamp(&self) -> String {
        self.started_at.format(RUN_STAMP_FORMAT).to_string()
    }

    /// `<hostname>-<stamp>.tar.gz`
    pub fn archive_file_name(&self) -> String {
        format!("{}-{}.{}", self.hostname, self.stamp(), ARCHIVE_FILE_EXT)
    }

    /// `<hostname>-<stamp>.tar.gz.enc`
    pub fn encrypted_file_name(&self) -> String {
        format!("{}.{}", self.archive_file_name(), ENCRYPTED_FILE_EXT)
    }

    /// `<hostname>-<stamp>-databases.sql`
    pub fn dump_file_name(&self) -> String {
        format!("{}-{}-databases.sql", self.hostname, self.stamp())
    }

    /// Inverse of [`RunId::encrypted_file_name`] for a known hostname.
    pub fn parse_encrypted_file_name(hostname: &str, file_name: &str) -> Option<RunId> {
        let suffix = format!(".{}.{}", ARCHIVE_FILE_EXT, ENCRYPTED_FILE_EXT);
        let stamp = file_name
            .strip_prefix(hostname)?
            .strip_prefix('-')?
            .strip_suffix(suffix.as_str())?;
        NaiveDateTime::parse_from_str(stamp, RUN_STAMP_FORMAT)
            .ok()
            .map(|dt| RunId::new(hostname, dt.and_utc()))
    }
}

/// Mutable state threaded through the stages of one run.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct RunContext<'a> {
    run_id: RunId,
    archive_path: PathBuf,
    encrypted_path: PathBuf,
    dump_path: PathBuf,
    /// Paths fed to the archive: configured paths plus the dump, if produced.
    inputs: Vec<PathBuf>,
    dump_produced: bool,
    /// Set once the encrypted archive reached the remote directory.
    archive_shipped: bool,
    warnings: Vec<String>,
    #[getset(skip)]
    log: &'a dyn RunLog,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &BackupConfig, run_id: RunId, log: &'a dyn RunLog) -> Self {
        let archive_path = config.local_dir().join(run_id.archive_file_name());
        let encrypted_path = config.local_dir().join(run_id.encrypted_file_name());
        let dump_path = config.tmp_dir().join(run_id.dump_file_name());
        Self {
            run_id,
            archive_path,
            encrypted_path,
            dump_path,
            inputs: config.backup_paths().clone(),
            dump_produced: false,
            archive_shipped: false,
            warnings: Vec::new(),
            log,
        }
    }

    pub fn log(&self) -> &'a dyn RunLog {
        self.log
    }

    /// Logs a non-fatal problem and keeps it for the run report.
    pub fn warn<S: Into<String>>(&mut self, message: S) {
        let message = message.into();
        tracing::warn!("{message}");
        self.log.say(&format!("WARNING: {message}"));
        self.warnings.push(message);
    }

    pub(crate) fn record_dump(&mut self) {
        if !self.dump_produced {
            self.inputs.push(self.dump_path.clone());
            self.dump_produced = true;
        }
    }

    /// Deletes the dump file, if this run produced one. Returns whether a
    /// file was removed.
    pub(crate) fn discard_dump(&mut self) -> std::io::Result<bool> {
        if !self.dump_produced {
            return Ok(false);
        }
        let dump_path = self.dump_path.clone();
        self.inputs.retain(|p| p != &dump_path);
        self.dump_produced = false;
        match std::fs::remove_file(&dump_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn record_archive_shipped(&mut self) {
        self.archive_shipped = true;
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub fn is_dump_path<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref() == self.dump_path
    }
}
