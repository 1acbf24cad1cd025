use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;
use tracing::error;
use vm_backup::backup::backup_config::{BackupConfig, Job};
use vm_backup::backup::logging;

/// Backs up running virtual machines, or a directory tree with rsync
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    /// Keep running and start the job on the configured cron schedule
    #[arg(short, long)]
    daemon: bool,

    #[command(subcommand)]
    job: JobCommand,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum JobCommand {
    /// Snapshot, copy and commit every selected running domain
    Vm,
    /// Incremental rsync snapshot of a directory tree
    Fs,
}

impl From<JobCommand> for Job {
    fn from(value: JobCommand) -> Self {
        match value {
            JobCommand::Vm => Job::Vm,
            JobCommand::Fs => Job::Fs,
        }
    }
}

fn main() {
    let args = Args::parse();

    let config = match BackupConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            error!("{e}");
            exit(1);
        }
    };

    if let Err(e) = logging::init(config.log()) {
        eprintln!("Cannot set up logging: {e}");
        exit(1);
    }

    let job = Job::from(args.job);
    if args.daemon {
        if let Err(e) = config.start_loop(job) {
            error!("{e}");
        }
        exit(1);
    }

    match config.run_job(job) {
        Ok(code) => exit(i32::from(code)),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}
