use crate::backup::archive::exclude::Exclusions;
use crate::backup::archive::ArchiveEntry;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;

use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use walkdir::WalkDir;

use std::os::unix::fs::FileTypeExt;
use std::path::{Component, Path, PathBuf};

/// Archive member name of `path`: the path with its root stripped.
pub fn member_name<P: AsRef<Path>>(path: P) -> PathBuf {
    path.as_ref()
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Recursively lists `input`, pruning excluded members and their subtrees.
///
/// Symbolic links are listed as links and never followed. Sockets cannot be
/// stored in a tar and are left out.
#[named]
pub fn walk_input<'a>(input: &Path, exclusions: &'a Exclusions) -> DynIter<'a, Result<ArchiveEntry>> {
    tracing::debug!("Scanning {:?}", input);
    WalkDir::new(input)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |de| {
            let excluded = exclusions.is_excluded(member_name(de.path()));
            if excluded {
                tracing::trace!("Excluding {:?}", de.path());
            }
            !excluded
        })
        .filter_map(|res| match res {
            Ok(de) => {
                if de.file_type().is_socket() {
                    tracing::info!("Socket {:?} ignored", de.path());
                    return None;
                }
                let dst = member_name(de.path());
                if dst.as_os_str().is_empty() {
                    tracing::trace!("Skipping {:?}, no member name", de.path());
                    return None;
                }
                Some(Ok(ArchiveEntry::new(de.into_path(), dst)))
            }
            Err(e) => Some(Err(Error::from(e))),
        })
        .map(move |res| res.add_fn_name(function_path!()))
        .into_dyn_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::exclude::ExcludePattern;
    use tempfile::TempDir;

    fn create_test_files(dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir.join("subdir/cache"))?;
        std::fs::write(dir.join("file1.txt"), "content1")?;
        std::fs::write(dir.join("file2.log"), "content2")?;
        std::fs::write(dir.join("subdir/file3.txt"), "content3")?;
        std::fs::write(dir.join("subdir/cache/blob"), "content4")?;
        Ok(())
    }

    fn exclusions(patterns: &[&str]) -> Exclusions {
        let patterns: Vec<_> = patterns
            .iter()
            .map(|p| ExcludePattern::new(p).unwrap())
            .collect();
        Exclusions::new(&patterns).unwrap()
    }

    fn files(entries: Vec<Result<ArchiveEntry>>) -> Vec<PathBuf> {
        entries
            .into_iter()
            .map(Result::unwrap)
            .filter(|e| e.src.is_file())
            .map(|e| e.src)
            .collect()
    }

    #[test]
    fn test_member_name_strips_root() {
        assert_eq!(member_name("/etc/nginx/nginx.conf"), PathBuf::from("etc/nginx/nginx.conf"));
        assert_eq!(member_name("/"), PathBuf::new());
    }

    #[test]
    fn test_walk_lists_everything_without_exclusions() {
        let temp_dir = TempDir::new().unwrap();
        create_test_files(temp_dir.path()).unwrap();

        let ex = exclusions(&[]);
        let entries: Vec<_> = walk_input(temp_dir.path(), &ex).collect();

        assert!(entries.iter().all(|e| e.is_ok()));
        assert_eq!(files(entries).len(), 4);
    }

    #[test]
    fn test_walk_entries_map_to_member_names() {
        let temp_dir = TempDir::new().unwrap();
        create_test_files(temp_dir.path()).unwrap();

        let ex = exclusions(&[]);
        for entry in walk_input(temp_dir.path(), &ex) {
            let entry = entry.unwrap();
            assert_eq!(entry.dst, member_name(&entry.src));
        }
    }

    #[test]
    fn test_walk_prunes_excluded_directories() {
        let temp_dir = TempDir::new().unwrap();
        create_test_files(temp_dir.path()).unwrap();

        let ex = exclusions(&["cache", "*.log"]);
        let found = files(walk_input(temp_dir.path(), &ex).collect());

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().unwrap() == "txt"));
    }

    #[test]
    fn test_walk_single_file_input() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("only.txt");
        std::fs::write(&file, "x").unwrap();

        let ex = exclusions(&[]);
        assert_eq!(files(walk_input(&file, &ex).collect()), vec![file]);
    }

    #[test]
    fn test_walk_does_not_follow_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();

        let ex = exclusions(&[]);
        let entries: Vec<_> = walk_input(temp_dir.path(), &ex).map(Result::unwrap).collect();

        assert_eq!(entries.len(), 2);
        assert!(entries[1].src.is_symlink());
        assert!(files(walk_input(temp_dir.path(), &ex).collect()).is_empty());
    }

    #[test]
    fn test_walk_skips_sockets() {
        let temp_dir = TempDir::new().unwrap();
        create_test_files(temp_dir.path()).unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(temp_dir.path().join("agent.sock")).unwrap();

        let ex = exclusions(&[]);
        let entries: Vec<_> = walk_input(temp_dir.path(), &ex).map(Result::unwrap).collect();

        assert!(entries.iter().all(|e| e.src.file_name().unwrap() != "agent.sock"));
        assert_eq!(files(walk_input(temp_dir.path(), &ex).collect()).len(), 4);
    }

    #[test]
    fn test_walk_missing_input_yields_error() {
        let ex = exclusions(&[]);
        let entries: Vec<_> = walk_input(Path::new("/nonexistent/directory"), &ex).collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_err());
    }
}
