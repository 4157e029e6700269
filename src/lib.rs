//! # host-backup
//!
//! Single-host backup orchestrator: one run archives the configured paths
//! (plus an optional database dump), encrypts the archive, copies it to a
//! remote host, mirrors selected directory trees there and finally asks the
//! companion `host-backup-prune` program to apply retention locally and
//! remotely.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chrono::Utc;
//! use host_backup::backup::backup_config::BackupConfig;
//! use host_backup::backup::command::SystemRunner;
//! use host_backup::backup::context::{RunContext, RunId};
//! use host_backup::backup::pipeline::Pipeline;
//! use host_backup::backup::run_log::FileRunLog;
//! use std::path::Path;
//!
//! let config_path = Path::new("/etc/host-backup/config.yml");
//! let config = BackupConfig::load(config_path)?;
//! let log = FileRunLog::open(config.log_file())?;
//! let mut ctx = RunContext::new(&config, RunId::new(config.resolve_hostname()?, Utc::now()), &log);
//!
//! let report = Pipeline::standard(&config, config_path, &SystemRunner).run(&mut ctx);
//! std::process::exit(report.exit_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
