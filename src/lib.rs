//! # vm_backup
//!
//! Unattended backups for a virtualization host.
//!
//! ## Jobs
//!
//! - **vm**: external disk-only snapshot of every selected running domain,
//!   copy of the frozen images through gzip/xz and gpg/age, blockcommit back
//!   into the base image, definition XML export, retention pruning and an
//!   email for every failing step
//! - **fs**: `rsync --link-dest` snapshot of a directory tree into
//!   `<destination>/<timestamp>` with a `latest` symlink
//!
//! ## Quick Start
//!
//! ```no_run
//! use vm_backup::backup::backup_config::{BackupConfig, Job};
//!
//! let config = BackupConfig::load("config.yml")?;
//! vm_backup::backup::logging::init(config.log())?;
//! let exit_code = config.run_job(Job::Vm)?;
//! # Ok::<(), vm_backup::backup::result_error::error::Error>(())
//! ```

pub mod backup;
