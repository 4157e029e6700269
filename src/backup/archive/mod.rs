pub mod exclude;
pub mod walk;

use crate::backup::archive::exclude::Exclusions;
use crate::backup::archive::walk::walk_input;
use crate::backup::backup_config::BackupConfig;
use crate::backup::compress::GzipConfig;
use crate::backup::context::RunContext;
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::pipeline::{OnFailure, Stage};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::run_log::RunLog;

use function_name::named;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};

/// One filesystem entry headed for the archive
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Path on the filesystem
    pub src: PathBuf,
    /// Member name inside the archive
    pub dst: PathBuf,
}

impl ArchiveEntry {
    pub fn new<A: Into<PathBuf>, B: Into<PathBuf>>(src: A, dst: B) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// What went into a finished archive.
#[derive(Debug)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entry_count: usize,
    /// Entries that could not be read; the archive is still usable.
    pub non_fatal_error: Option<Error>,
}

/// `<path>.tmp`, where artifacts are written before being renamed into place.
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes every input into one gzip compressed tar at `out_path`.
///
/// The archive is written next to `out_path` and renamed into place once
/// complete, so a failed run never leaves a truncated file under the final
/// name.
#[named]
pub fn write_archive<P: AsRef<Path>>(
    inputs: &[P],
    exclusions: &Exclusions,
    compression: &GzipConfig,
    out_path: &Path,
    log: &dyn RunLog,
) -> Result<ArchiveSummary> {
    let tmp_path = tmp_path_for(out_path);
    let file = File::create_new(&tmp_path)
        .map_err(Error::from)
        .add_msg(format!("Cannot create archive {:?}", tmp_path))
        .add_fn_name(function_path!())?;

    write_tar_gz(file, inputs, exclusions, compression, &tmp_path, log)
        .and_then(|(entry_count, errors)| {
            std::fs::rename(&tmp_path, out_path)?;
            Ok(ArchiveSummary {
                path: out_path.to_path_buf(),
                entry_count,
                non_fatal_error: convert_error_vec(errors).err(),
            })
        })
        .map_err(|mut e| {
            if let Err(e2) = std::fs::remove_file(&tmp_path) {
                e = e.chain(Error::from(e2).add_msg("Delete tmp file failed."));
            }
            e
        })
        .add_fn_name(function_path!())
}

fn write_tar_gz<P: AsRef<Path>>(
    file: File,
    inputs: &[P],
    exclusions: &Exclusions,
    compression: &GzipConfig,
    tmp_path: &Path,
    log: &dyn RunLog,
) -> Result<(usize, Vec<Error>)> {
    let mut writer = tar::Builder::new(compression.build_compressor(BufWriter::new(file)));
    writer.follow_symlinks(false);

    let mut entry_count = 0;
    let mut errors = Vec::new();
    for input in inputs {
        for entry in walk_input(input.as_ref(), exclusions) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(e.add_msg("Ignoring entry"));
                    continue;
                }
            };
            if entry.src == tmp_path {
                continue;
            }
            match writer.append_path_with_name(&entry.src, &entry.dst) {
                Ok(()) => {
                    log.quiet(&format!("a {}", entry.dst.display()));
                    entry_count += 1;
                }
                // a source that vanished or cannot be opened is skipped,
                // anything else may have left a partial entry behind
                Err(e)
                    if e.kind() == std::io::ErrorKind::PermissionDenied
                        || e.kind() == std::io::ErrorKind::NotFound =>
                {
                    errors.push(Error::from(e).add_msg(format!("Ignoring {:?}", entry.src)));
                }
                Err(e) => return Err(Error::from(e).add_msg(format!("Appending {:?}", entry.src))),
            }
        }
    }
    tracing::info!("Processed {} archive entries", entry_count);

    Finish::finish(writer.into_inner()?)?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;

    Ok((entry_count, errors))
}

pub struct ArchiveStage<'a> {
    config: &'a BackupConfig,
}

impl<'a> ArchiveStage<'a> {
    pub fn new(config: &'a BackupConfig) -> Self {
        Self { config }
    }
}

impl Stage for ArchiveStage<'_> {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Abort
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let log = ctx.log();
        let exclusions = Exclusions::new(self.config.exclude())?;

        let (present, missing): (Vec<_>, Vec<_>) = ctx
            .inputs()
            .iter()
            .cloned()
            .partition(|p| p.symlink_metadata().is_ok());
        for path in missing {
            ctx.warn(format!("Backup path {:?} does not exist, skipping", path));
        }

        log.say(&format!("Creating archive {:?}", ctx.archive_path()));
        let summary = write_archive(
            &present,
            &exclusions,
            self.config.compression(),
            ctx.archive_path(),
            log,
        )?;
        if let Some(e) = summary.non_fatal_error {
            ctx.warn(format!("Some entries were not archived:\n{e}"));
        }
        log.say(&format!(
            "Archive complete: {:?} ({} entries)",
            summary.path, summary.entry_count
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::exclude::ExcludePattern;
    use crate::backup::context::RunId;
    use crate::backup::testutil::{test_config_with, MemoryRunLog};
    use chrono::Utc;
    use flate2::read::GzDecoder;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn archived_files(path: &Path) -> BTreeSet<PathBuf> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .filter(|e| e.header().entry_type().is_file())
            .map(|e| e.path().unwrap().into_owned())
            .collect()
    }

    fn exclusions(patterns: &[&str]) -> Exclusions {
        let patterns: Vec<_> = patterns
            .iter()
            .map(|p| ExcludePattern::new(p).unwrap())
            .collect();
        Exclusions::new(&patterns).unwrap()
    }

    /// Two inputs: `a/` holds logs and text, `b/` holds text only.
    fn two_inputs(root: &Path) -> (PathBuf, PathBuf) {
        let a = root.join("a");
        let b = root.join("b");
        std::fs::create_dir_all(a.join("logs")).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("keep.txt"), "a").unwrap();
        std::fs::write(a.join("logs/app.log"), "log").unwrap();
        std::fs::write(b.join("notes.txt"), "b").unwrap();
        (a, b)
    }

    #[test]
    fn test_archive_is_union_of_inputs() {
        let dir = TempDir::new().unwrap();
        let (a, b) = two_inputs(dir.path());
        let out = dir.path().join("out.tar.gz");
        let log = MemoryRunLog::default();

        let summary = write_archive(&[&a, &b], &exclusions(&[]), &GzipConfig::default(), &out, &log)
            .unwrap();

        assert!(summary.non_fatal_error.is_none());
        assert!(!tmp_path_for(&out).exists());
        let files = archived_files(&out);
        assert_eq!(files.len(), 3);
        assert!(files.contains(&walk::member_name(a.join("logs/app.log"))));
        assert!(files.contains(&walk::member_name(b.join("notes.txt"))));
        // per-file progress goes to the log file only
        assert!(log.contains("a "));
        assert!(log.echoed().is_empty());
    }

    #[test]
    fn test_exclusions_are_global_across_inputs() {
        let dir = TempDir::new().unwrap();
        let (a, b) = two_inputs(dir.path());
        let log = MemoryRunLog::default();

        let without = dir.path().join("without.tar.gz");
        write_archive(&[&a, &b], &exclusions(&[]), &GzipConfig::default(), &without, &log).unwrap();
        let with = dir.path().join("with.tar.gz");
        write_archive(&[&a, &b], &exclusions(&["*.log"]), &GzipConfig::default(), &with, &log)
            .unwrap();

        let removed: Vec<_> = archived_files(&without)
            .difference(&archived_files(&with))
            .cloned()
            .collect();
        assert_eq!(removed, vec![walk::member_name(a.join("logs/app.log"))]);
    }

    #[test]
    fn test_socket_in_input_does_not_fail_archive() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("a.txt"), "a").unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(data.join("agent.sock")).unwrap();
        let out = dir.path().join("out.tar.gz");
        let log = MemoryRunLog::default();

        let summary = write_archive(&[&data], &exclusions(&[]), &GzipConfig::default(), &out, &log)
            .unwrap();

        assert!(summary.non_fatal_error.is_none());
        let files = archived_files(&out);
        assert_eq!(files.into_iter().collect::<Vec<_>>(), vec![walk::member_name(data.join("a.txt"))]);
    }

    #[test]
    fn test_existing_tmp_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let (a, _) = two_inputs(dir.path());
        let out = dir.path().join("out.tar.gz");
        std::fs::write(tmp_path_for(&out), "someone else's").unwrap();
        let log = MemoryRunLog::default();

        let res = write_archive(&[&a], &exclusions(&[]), &GzipConfig::default(), &out, &log);

        assert!(res.is_err());
        assert!(!out.exists());
        assert_eq!(std::fs::read_to_string(tmp_path_for(&out)).unwrap(), "someone else's");
    }

    #[test]
    fn test_stage_archives_inputs_and_warns_on_missing() {
        let dir = TempDir::new().unwrap();
        let (a, _) = two_inputs(dir.path());
        let missing = dir.path().join("gone");
        let config = test_config_with(dir.path(), &[a.clone(), missing], "exclude: [\"logs\"]\n");
        let log = MemoryRunLog::default();
        let mut ctx = RunContext::new(&config, RunId::new("web-01", Utc::now()), &log);

        ArchiveStage::new(&config).run(&mut ctx).unwrap();

        assert_eq!(ctx.warnings().len(), 1);
        assert!(ctx.warnings()[0].contains("gone"));
        let files = archived_files(ctx.archive_path());
        assert_eq!(files.into_iter().collect::<Vec<_>>(), vec![walk::member_name(a.join("keep.txt"))]);
        assert!(log.contains("Archive complete"));
    }

    #[test]
    fn test_stage_includes_recorded_dump() {
        let dir = TempDir::new().unwrap();
        let (a, _) = two_inputs(dir.path());
        let config = test_config_with(dir.path(), &[a], "");
        let log = MemoryRunLog::default();
        let mut ctx = RunContext::new(&config, RunId::new("web-01", Utc::now()), &log);
        std::fs::write(ctx.dump_path(), "CREATE DATABASE x;").unwrap();
        ctx.record_dump();

        ArchiveStage::new(&config).run(&mut ctx).unwrap();

        let files = archived_files(ctx.archive_path());
        assert_eq!(files.len(), 3);
        assert!(files.contains(&walk::member_name(ctx.dump_path())));
    }
}
