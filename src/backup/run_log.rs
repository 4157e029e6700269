//! Operator-facing run log.
//!
//! Every entry is appended to the configured log file as
//! `<UTC timestamp, minute resolution> <message>`. Unless the caller asks for
//! a quiet entry the bare message is echoed to the console as well.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

pub static LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

pub trait RunLog {
    fn emit(&self, message: &str, echo: bool);

    /// Log file only.
    fn quiet(&self, message: &str) {
        self.emit(message, false)
    }

    /// Log file and console.
    fn say(&self, message: &str) {
        self.emit(message, true)
    }
}

/// Diagnostics go to stderr; `verbose` raises the level from WARN up to TRACE.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

/// One file line per message line, each carrying the timestamp, so nested
/// error chains stay greppable by time.
pub fn format_entry(at: DateTime<Utc>, message: &str) -> String {
    let stamp = at.format(LOG_TIME_FORMAT).to_string();
    let mut lines = message.lines().peekable();
    if lines.peek().is_none() {
        return format!("{stamp} \n");
    }
    lines.map(|line| format!("{stamp} {line}\n")).collect()
}

pub struct FileRunLog {
    file: File,
}

impl FileRunLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::from)
            .add_msg(format!("Cannot open log file {:?}", path))?;
        Ok(Self { file })
    }
}

impl RunLog for FileRunLog {
    fn emit(&self, message: &str, echo: bool) {
        let entry = format_entry(Utc::now(), message);
        // `&File` is `Write`, so appends need no interior mutability.
        if let Err(e) = (&self.file).write_all(entry.as_bytes()) {
            tracing::error!("Failed to append to run log: {e}");
        }
        if echo {
            println!("{message}");
        }
    }
}
