//! External process invocation.
//!
//! Every external program the pipeline touches (ssh, scp, rsync, the dump
//! tool and the retention command) goes through [`CommandRunner`], which
//! reports an explicit [`CommandOutput`] instead of a fire-and-forget status.

use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use itertools::Itertools;
use std::ffi::{OsStr, OsString};
use std::fmt::{Display, Formatter};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Clone, Debug)]
pub struct CommandSpec {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, RedactedString)>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Environment entries are passed to the child but never displayed.
    pub fn secret_env<S: Into<String>>(mut self, key: S, value: RedactedString) -> Self {
        self.envs.push((key.into(), value));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn has_arg<S: AsRef<OsStr>>(&self, arg: S) -> bool {
        self.args.iter().any(|a| a.as_os_str() == arg.as_ref())
    }

    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.envs.iter().map(|(k, _)| k.as_str())
    }
}

impl Display for CommandSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            std::iter::once(self.program.clone())
                .chain(self.args_lossy())
                .map(|a| display_quote(&a))
                .join(" ")
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success<S: Into<String>>(stdout: S) -> Self {
        Self {
            status: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure<S: Into<String>>(status: i32, stderr: S) -> Self {
        Self {
            status: Some(status),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn status_display(&self) -> String {
        match self.status {
            Some(code) => format!("exit status {code}"),
            None => "no exit status (killed by signal)".to_string(),
        }
    }
}

pub trait CommandRunner {
    /// Resolves `program` to an executable file, looking on `PATH` unless it
    /// already contains a path separator.
    fn resolve(&self, program: &str) -> Option<PathBuf>;

    /// Runs to completion. An `Err` means the process could not be started.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec)?;
        if output.success {
            Ok(output)
        } else {
            Err(Error::command_failed(
                spec.to_string(),
                output.status_display(),
                output.stderr.trim_end(),
            ))
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') {
            let path = PathBuf::from(program);
            return is_executable(&path).then_some(path);
        }
        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }

    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("Running {spec}");
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.inner().as_str())))
            .stdin(Stdio::null())
            .output()
            .map_err(Error::from)
            .add_msg(format!("Cannot start `{spec}`"))?;

        let output = CommandOutput {
            status: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::trace!("`{spec}` finished: {:?}", output.status);
        Ok(output)
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|md| md.is_file() && md.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Single-quotes `arg` for a POSIX shell.
pub fn shell_quote<S: AsRef<str>>(arg: S) -> String {
    format!("'{}'", arg.as_ref().replace('\'', r"'\''"))
}

fn display_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if plain {
        arg.to_string()
    } else {
        shell_quote(arg)
    }
}
