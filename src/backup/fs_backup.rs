//! Incremental filesystem backups with `rsync --link-dest`.
//!
//! ```text
//! <destination>/<timestamp>/...    one full tree per run
//! <destination>/latest -> <timestamp>
//! ```
//!
//! Files unchanged since the tree `latest` points to are hard links into that
//! tree, so every snapshot is complete while only changed files take space.
//! rsync writes into `.<timestamp>.partial`, which is renamed to `<timestamp>`
//! and becomes `latest` only once rsync succeeded.

use crate::backup::function_path;
use crate::backup::layout::{format_timestamp, parse_timestamp};
use crate::backup::notifications::{notify, Notification};
use crate::backup::process::{CommandLine, CommandRunner};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::{ItemWithDateTime, RetentionConfig};
use crate::backup::validate::{
    validate_dir_exist, validate_program, validate_section, validate_valid_file_name_part,
    validate_writable_dir,
};
use bon::Builder;
use chrono::{DateTime, TimeZone};
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::fs::read_dir;
use std::os::unix::fs::{symlink, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use validator::Validate;
use walkdir::WalkDir;

static DEFAULT_RSYNC_PROGRAM: &str = "rsync";
/// rsync: "Partial transfer due to vanished source files"
static RSYNC_VANISHED_SOURCE_FILES: i32 = 24;

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct FsBackupConfig {
    #[validate(custom(function = validate_dir_exist))]
    #[builder(into)]
    source: PathBuf,
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    destination: PathBuf,
    /// rsync `--exclude` patterns
    #[serde(default)]
    #[builder(default, into)]
    exclude: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = validate_section))]
    #[builder(default)]
    rsync: RsyncConfig,
    #[validate(custom(function = validate_section))]
    retention: Option<RetentionConfig>,
    #[serde(default = "default_latest_link")]
    #[validate(custom(function = validate_valid_file_name_part))]
    #[builder(default = default_latest_link(), into)]
    latest_link: String,
}

fn default_latest_link() -> String {
    "latest".to_string()
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RsyncConfig {
    #[validate(custom(function = validate_program))]
    #[builder(into)]
    program: Option<PathBuf>,
    /// Appended after the built-in options, e.g. `--one-file-system`
    #[serde(default)]
    #[builder(default, into)]
    extra_args: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub files: u64,
    pub bytes: u64,
    /// Files sharing their inode with an earlier snapshot
    pub hard_linked: u64,
}

impl Display for TreeStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} files, {:.1} MiB, {} hard linked to earlier snapshots",
            self.files,
            self.bytes as f64 / (1024.0 * 1024.0),
            self.hard_linked
        )
    }
}

#[derive(Debug)]
pub struct FsBackupReport {
    pub snapshot: PathBuf,
    pub link_dest: Option<PathBuf>,
    /// rsync reported files vanishing while it ran
    pub partial: bool,
    pub stats: Option<TreeStats>,
    pub deleted: Vec<PathBuf>,
    /// Housekeeping that failed after the snapshot was in place
    pub warnings: Option<Error>,
}

pub struct FsBackup<'a, R: CommandRunner, N: Notification> {
    config: &'a FsBackupConfig,
    runner: R,
    notifier: Option<&'a N>,
    host_name: &'a str,
}

impl<'a, R: CommandRunner, N: Notification> FsBackup<'a, R, N> {
    pub fn new(
        config: &'a FsBackupConfig,
        runner: R,
        notifier: Option<&'a N>,
        host_name: &'a str,
    ) -> Self {
        Self {
            config,
            runner,
            notifier,
            host_name,
        }
    }

    pub fn run<T: TimeZone>(&self, now: &DateTime<T>) -> Result<FsBackupReport>
    where
        T::Offset: Display,
    {
        let report = self.backup(now).inspect_err(|e| {
            error!("Backup of {:?} failed: {e}", self.config.source);
            notify(
                self.notifier,
                format!(
                    "[fs-backup] {}: backup of {} failed",
                    self.host_name,
                    self.config.source.display()
                ),
                format!(
                    "Host: {}\nSource: {}\nDestination: {}\n\n{e}\n",
                    self.host_name,
                    self.config.source.display(),
                    self.config.destination.display()
                ),
            )
        })?;

        if let Some(warnings) = &report.warnings {
            warn!("Snapshot {:?} is complete but: {warnings}", report.snapshot);
            notify(
                self.notifier,
                format!(
                    "[fs-backup] {}: backup of {} finished with warnings",
                    self.host_name,
                    self.config.source.display()
                ),
                format!(
                    "Host: {}\nSource: {}\nSnapshot: {}\n\n{warnings}\n",
                    self.host_name,
                    self.config.source.display(),
                    report.snapshot.display()
                ),
            );
        }
        Ok(report)
    }

    #[named]
    fn backup<T: TimeZone>(&self, now: &DateTime<T>) -> Result<FsBackupReport>
    where
        T::Offset: Display,
    {
        let timestamp = format_timestamp(now);
        let snapshot = self.config.destination.join(&timestamp);
        if snapshot.symlink_metadata().is_ok() {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{snapshot:?} already exists"),
            )))
            .add_fn_name(function_path!());
        }

        let partial_dir = self
            .config
            .destination
            .join(format!(".{timestamp}.partial"));
        if partial_dir.symlink_metadata().is_ok() {
            warn!("Removing {partial_dir:?} left by an interrupted run");
            std::fs::remove_dir_all(&partial_dir)
                .map_err(Error::from)
                .add_msg(format!("Cannot remove {partial_dir:?}"))
                .add_fn_name(function_path!())?;
        }

        let link_dest = self.latest_target();
        match &link_dest {
            Some(dir) => info!("Linking unchanged files against {dir:?}"),
            None => info!("No previous snapshot, making a full copy"),
        }

        let command = self.rsync_command(&partial_dir, link_dest.as_deref());
        let partial = match self.runner.run(&command) {
            Ok(_) => false,
            Err(e) if is_vanished_files(&e) => {
                warn!("Some source files vanished during the transfer: {e}");
                true
            }
            Err(e) => {
                if partial_dir.exists() {
                    match std::fs::remove_dir_all(&partial_dir) {
                        Ok(()) => info!("Removed incomplete {partial_dir:?}"),
                        Err(re) => warn!("Cannot remove incomplete {partial_dir:?}: {re}"),
                    }
                }
                return Err(e)
                    .add_msg(format!("Copying {:?} failed", self.config.source))
                    .add_fn_name(function_path!());
            }
        };

        std::fs::rename(&partial_dir, &snapshot)
            .map_err(Error::from)
            .add_msg(format!("Cannot move {partial_dir:?} to {snapshot:?}"))
            .add_fn_name(function_path!())?;
        self.repoint_latest(&timestamp)
            .add_fn_name(function_path!())?;
        info!(
            "Snapshot {snapshot:?} complete, {:?} now points to it",
            self.latest_path()
        );

        // the snapshot is in place, from here on failures are only warnings
        let mut warnings = Vec::new();
        let stats = match tree_stats(&snapshot) {
            Ok(stats) => {
                info!("Snapshot {snapshot:?}: {stats}");
                Some(stats)
            }
            Err(e) => {
                warnings.push(e.add_msg(format!("Cannot collect statistics of {snapshot:?}")));
                None
            }
        };
        let deleted = self.prune(&timestamp, &mut warnings);

        Ok(FsBackupReport {
            snapshot,
            link_dest,
            partial,
            stats,
            deleted,
            warnings: convert_error_vec(warnings).err(),
        })
    }

    fn latest_path(&self) -> PathBuf {
        self.config.destination.join(&self.config.latest_link)
    }

    /// The directory `latest` resolves to, as an absolute path since rsync
    /// reads a relative `--link-dest` against the destination.
    fn latest_target(&self) -> Option<PathBuf> {
        let latest = self.latest_path();
        let target = std::fs::read_link(&latest).ok()?;
        match std::fs::canonicalize(self.config.destination.join(target)) {
            Ok(dir) if dir.is_dir() => Some(dir),
            Ok(other) => {
                warn!("{latest:?} points at {other:?} which is not a directory, ignoring it");
                None
            }
            Err(e) => {
                warn!("{latest:?} is dangling, ignoring it: {e}");
                None
            }
        }
    }

    fn rsync_command(&self, snapshot: &Path, link_dest: Option<&Path>) -> CommandLine {
        let program = self
            .config
            .rsync
            .program
            .clone()
            .unwrap_or_else(|| DEFAULT_RSYNC_PROGRAM.into());
        let mut command = CommandLine::new(program).args(["-a", "--delete"]);
        for pattern in &self.config.exclude {
            command = command.arg(format!("--exclude={pattern}"));
        }
        command = command.args(&self.config.rsync.extra_args);
        if let Some(dir) = link_dest {
            let mut arg = OsString::from("--link-dest=");
            arg.push(dir);
            command = command.arg(arg);
        }

        command
            .arg(with_trailing_slash(&self.config.source))
            .arg(with_trailing_slash(snapshot))
    }

    /// Swaps `latest` over to `timestamp` with a rename, so it always
    /// points at a complete snapshot.
    #[named]
    fn repoint_latest(&self, timestamp: &str) -> Result<()> {
        let latest = self.latest_path();
        let tmp = self
            .config
            .destination
            .join(format!(".{}.tmp", self.config.latest_link));
        if tmp.symlink_metadata().is_ok() {
            std::fs::remove_file(&tmp)?;
        }

        symlink(timestamp, &tmp)
            .and_then(|_| std::fs::rename(&tmp, &latest))
            .map_err(Error::from)
            .add_msg(format!("Cannot point {latest:?} at {timestamp}"))
            .add_fn_name(function_path!())
    }

    /// Removes snapshots beyond the retention count, failures go to `warnings`.
    fn prune(&self, current: &str, warnings: &mut Vec<Error>) -> Vec<PathBuf> {
        let Some(retention) = &self.config.retention else {
            return Vec::new();
        };

        let entries = match read_dir(&self.config.destination) {
            Ok(entries) => entries,
            Err(e) => {
                warnings.push(Error::from(e).add_msg(format!(
                    "Cannot list {:?} for retention",
                    self.config.destination
                )));
                return Vec::new();
            }
        };
        let snapshots = entries
            .filter_map(|r| r.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| {
                let dt = parse_timestamp(e.file_name().to_str()?)?;
                Some(ItemWithDateTime::from((e.path(), dt)))
            });
        // whatever latest points to survives, even if it is older than the cut
        let protected = std::fs::read_link(self.latest_path()).ok();

        let mut deleted = Vec::new();
        for old in retention.get_delete(snapshots) {
            let name = old.item.file_name().map(PathBuf::from);
            if name.as_deref() == Some(Path::new(current)) || name == protected {
                continue;
            }
            info!("Removing out of retention snapshot {:?}", old.item);
            match std::fs::remove_dir_all(&old.item) {
                Ok(()) => deleted.push(old.item),
                Err(e) => warnings.push(
                    Error::from(e).add_msg(format!("Cannot remove {:?}", old.item)),
                ),
            }
        }
        deleted
    }
}

fn is_vanished_files(e: &Error) -> bool {
    matches!(
        e.root(),
        Error::CommandFailed { status: Some(code), .. } if *code == RSYNC_VANISHED_SOURCE_FILES
    )
}

fn with_trailing_slash(path: &Path) -> OsString {
    let mut s = path.as_os_str().to_os_string();
    if !path.as_os_str().to_string_lossy().ends_with('/') {
        s.push("/");
    }
    s
}

#[named]
fn tree_stats(dir: &Path) -> Result<TreeStats> {
    let mut stats = TreeStats::default();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(Error::from).add_fn_name(function_path!())?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        stats.files += 1;
        stats.bytes += metadata.len();
        if metadata.nlink() > 1 {
            stats.hard_linked += 1;
        }
    }
    Ok(stats)
}
