use crate::backup::backup_config::BackupConfig;
use crate::backup::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::backup::result_error::result::Result;
use crate::backup::run_log::RunLog;

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Run log that keeps entries in memory.
#[derive(Default)]
pub(crate) struct MemoryRunLog {
    entries: RefCell<Vec<(String, bool)>>,
}

impl MemoryRunLog {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.entries.borrow().iter().map(|(m, _)| m.clone()).collect()
    }

    pub(crate) fn echoed(&self) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|(_, echo)| *echo)
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.entries.borrow().iter().any(|(m, _)| m.contains(needle))
    }
}

impl RunLog for MemoryRunLog {
    fn emit(&self, message: &str, echo: bool) {
        self.entries.borrow_mut().push((message.to_string(), echo));
    }
}

type Handler = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput>>;

/// Scripted [`CommandRunner`]: records every call, never spawns anything.
///
/// Every program resolves unless marked missing. The default handler answers
/// `echo ok` with `ok` and succeeds silently otherwise.
pub(crate) struct FakeRunner {
    missing: HashSet<String>,
    calls: RefCell<Vec<CommandSpec>>,
    handler: Handler,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            missing: HashSet::new(),
            calls: RefCell::new(Vec::new()),
            handler: Box::new(default_handler),
        }
    }
}

fn default_handler(spec: &CommandSpec) -> Result<CommandOutput> {
    if spec.has_arg("echo ok") {
        Ok(CommandOutput::success("ok\n"))
    } else {
        Ok(CommandOutput::success(""))
    }
}

impl FakeRunner {
    pub(crate) fn without_tool<S: Into<String>>(mut self, program: S) -> Self {
        self.missing.insert(program.into());
        self
    }

    /// `handler` answers first; returning `None` falls back to the default.
    pub(crate) fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> Option<Result<CommandOutput>> + 'static,
    {
        self.handler = Box::new(move |spec: &CommandSpec| handler(spec).unwrap_or_else(|| default_handler(spec)));
        self
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    pub(crate) fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program() == program)
            .cloned()
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        (!self.missing.contains(program)).then(|| Path::new("/usr/bin").join(program))
    }

    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        (self.handler)(spec)
    }
}

/// Config rooted in `root` with `local/`, `tmp/` and `data/` created.
pub(crate) fn test_config(root: &Path) -> BackupConfig {
    let data = root.join("data");
    std::fs::create_dir_all(&data).unwrap();
    test_config_with(root, &[data], "")
}

/// Like [`test_config`] with explicit backup paths and extra YAML keys.
pub(crate) fn test_config_with(root: &Path, backup_paths: &[PathBuf], extra: &str) -> BackupConfig {
    let local = root.join("local");
    let tmp = root.join("tmp");
    std::fs::create_dir_all(&local).unwrap();
    std::fs::create_dir_all(&tmp).unwrap();
    let paths = backup_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    let yaml = format!(
        r#"
hostname: web-01
local_dir: {}
tmp_dir: {}
log_file: {}
backup_paths:
{paths}
passphrase: correct horse battery staple
remote:
  host: backup.example.org
  user: backup
  dir: /srv/backups
{extra}
"#,
        local.display(),
        tmp.display(),
        root.join("backup.log").display(),
    );
    serde_yml::from_str(&yaml).unwrap()
}
