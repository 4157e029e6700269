use chrono::Utc;
use clap::{ArgAction, Parser};
use host_backup::backup::backup_config::{existing_config_path, BackupConfig, DEFAULT_CONFIG_PATH};
use host_backup::backup::command::SystemRunner;
use host_backup::backup::result_error::result::Result;
use host_backup::backup::retention::prune::{prune, BackupStore, LocalStore, RemoteStore};
use host_backup::backup::run_log::{init_tracing, FileRunLog, RunLog};
use std::path::PathBuf;
use std::process::exit;
use tracing::error;

/// Delete this host's encrypted archives that fall outside the retention policy
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, value_parser = existing_config_path)]
    config: PathBuf,
    /// Prune the remote backup directory instead of the local one
    #[arg(long)]
    remote: bool,
    /// Only report what would be deleted
    #[arg(long)]
    dry_run: bool,
    /// More diagnostics on stderr, repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn run(args: &Args) -> Result<()> {
    let config = BackupConfig::load(&args.config)?;
    let log = FileRunLog::open(config.log_file())?;
    let Some(policy) = config.retention().policy() else {
        log.say("No retention policy configured, nothing pruned");
        return Ok(());
    };
    let hostname = config.resolve_hostname()?;
    let runner = SystemRunner;

    let local;
    let remote;
    let store: &dyn BackupStore = if args.remote {
        remote = RemoteStore::new(&config, &runner);
        &remote
    } else {
        local = LocalStore::new(config.local_dir());
        &local
    };
    let outcome = prune(store, &hostname, policy, Utc::now(), args.dry_run, &log)?;
    tracing::info!("Kept {} archives", outcome.kept);
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(&args) {
        error!("{e}");
        exit(1);
    }
}
