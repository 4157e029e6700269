use chrono::Utc;
use clap::{ArgAction, Parser};
use host_backup::backup::backup_config::{existing_config_path, BackupConfig, DEFAULT_CONFIG_PATH};
use host_backup::backup::command::SystemRunner;
use host_backup::backup::context::{RunContext, RunId};
use host_backup::backup::pipeline::{Pipeline, RunReport};
use host_backup::backup::result_error::result::Result;
use host_backup::backup::run_log::{init_tracing, FileRunLog};
use std::path::PathBuf;
use std::process::exit;
use tracing::error;

/// Archive, encrypt and ship this host's backup off-site, then apply retention
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, value_parser = existing_config_path)]
    config: PathBuf,
    /// More diagnostics on stderr, repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn run(args: &Args) -> Result<RunReport> {
    let config = BackupConfig::load(&args.config)?;
    let hostname = config.resolve_hostname()?;
    let log = FileRunLog::open(config.log_file())?;
    let runner = SystemRunner;

    let mut ctx = RunContext::new(&config, RunId::new(hostname, Utc::now()), &log);
    let pipeline = Pipeline::standard(&config, &args.config, &runner);
    let report = pipeline.run(&mut ctx);
    Ok(report)
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(&args) {
        Ok(report) => {
            if !report.failed.is_empty() {
                error!("Backup failed in: {}", report.failed.join(", "));
            }
            if !report.warnings.is_empty() {
                error!("Backup finished with {} warnings", report.warnings.len());
            }
            exit(report.exit_code())
        }
        Err(e) => {
            error!("{e}");
            exit(1)
        }
    }
}
