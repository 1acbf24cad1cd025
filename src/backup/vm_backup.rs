//! Point-in-time backups of running virtual machines.
//!
//! For every selected domain the driver redirects disk writes into an
//! external snapshot, copies the now static base images through the
//! configured compressor and encryptor, merges the snapshot back with an
//! active blockcommit, exports the domain definition and prunes backups
//! beyond the retention count. A failing domain is reported and skipped,
//! the run carries on with the next one.

use crate::backup::compress::CompressorConfig;
use crate::backup::domain_filter::DomainFilter;
use crate::backup::encrypt::EncryptorConfig;
use crate::backup::function_path;
use crate::backup::hypervisor::virsh::VirshConfig;
use crate::backup::hypervisor::{DomainDisk, DomainDisks, Hypervisor, SnapshotDisk};
use crate::backup::image::ImagePipeline;
use crate::backup::layout::{
    format_timestamp, image_base_name, is_snapshot_artifact, snapshot_file, snapshot_name,
    BackupLayout,
};
use crate::backup::notifications::{notify, Notification};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::{ItemWithDateTime, RetentionConfig};
use crate::backup::validate::{
    validate_section, validate_valid_file_name_part, validate_writable_dir,
};
use bon::Builder;
use chrono::{DateTime, TimeZone};
use derive_more::Display;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Write as _;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn};
use validator::Validate;

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct VmBackupConfig {
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    backup_root: PathBuf,
    #[validate(custom(function = validate_section))]
    retention: RetentionConfig,
    /// Marks snapshot files, `<image stem>.<prefix>-<timestamp>`
    #[serde(default = "default_snapshot_prefix")]
    #[validate(custom(function = validate_valid_file_name_part))]
    #[builder(default = default_snapshot_prefix(), into)]
    snapshot_prefix: String,
    #[serde(default)]
    #[builder(default)]
    domains: DomainFilter,
    #[serde(default)]
    #[validate(custom(function = validate_section))]
    #[builder(default)]
    virsh: VirshConfig,
    #[serde(default)]
    #[validate(custom(function = validate_section))]
    #[builder(default)]
    compressor: CompressorConfig,
    #[serde(default)]
    #[validate(custom(function = validate_section))]
    #[builder(default)]
    encryptor: EncryptorConfig,
}

fn default_snapshot_prefix() -> String {
    "vmbackup".to_string()
}

/// Step of a domain backup, used in logs and alerts.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Stage {
    #[display("listing domains")]
    ListDomains,
    #[display("reading disks")]
    ReadDisks,
    #[display("stale snapshot check")]
    StaleSnapshot,
    #[display("preparing backup directory")]
    Prepare,
    #[display("snapshot")]
    Snapshot,
    #[display("copy")]
    Copy,
    #[display("blockcommit")]
    Commit,
    #[display("definition export")]
    Definition,
    #[display("retention")]
    Prune,
}

#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub disk: Option<DomainDisk>,
    pub error: Error,
}

/// What happened to one domain during a run.
#[derive(Debug, Default)]
pub struct DomainOutcome {
    pub domain: String,
    pub backups: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<StageError>,
}

impl DomainOutcome {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_owned(),
            ..Self::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn failed_at(&self, stage: Stage) -> bool {
        self.errors.iter().any(|e| e.stage == stage)
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub timestamp: String,
    pub outcomes: Vec<DomainOutcome>,
}

impl RunReport {
    pub fn failed_domains(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failed())
            .map(|o| o.domain.as_str())
            .collect()
    }

    /// Number of domains that hit an error, saturating at 255.
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.failed_domains().len()).unwrap_or(u8::MAX)
    }

    pub fn outcome(&self, domain: &str) -> Option<&DomainOutcome> {
        self.outcomes.iter().find(|o| o.domain == domain)
    }
}

pub struct VmBackup<'a, H: Hypervisor, N: Notification> {
    config: &'a VmBackupConfig,
    hypervisor: H,
    notifier: Option<&'a N>,
    host_name: &'a str,
    layout: BackupLayout,
}

impl<'a, H: Hypervisor, N: Notification> VmBackup<'a, H, N> {
    pub fn new(
        config: &'a VmBackupConfig,
        hypervisor: H,
        notifier: Option<&'a N>,
        host_name: &'a str,
    ) -> Self {
        Self {
            layout: BackupLayout::new(&config.backup_root),
            config,
            hypervisor,
            notifier,
            host_name,
        }
    }

    /// Backs up every selected running domain. Only failing to enumerate
    /// domains is an error, per-domain failures end up in the report.
    #[named]
    pub fn run<T: TimeZone>(&self, now: &DateTime<T>) -> Result<RunReport>
    where
        T::Offset: std::fmt::Display,
    {
        let timestamp = format_timestamp(now);
        let domains = self
            .hypervisor
            .list_domains()
            .add_msg("Cannot list running domains")
            .add_fn_name(function_path!())
            .inspect_err(|e| self.alert("-", Stage::ListDomains, None, e))?;
        let selected = self.config.domains.select(domains)?;
        info!(
            "Backing up {} domain(s) with timestamp {timestamp}: {selected:?}",
            selected.len()
        );

        let outcomes = selected
            .iter()
            .map(|domain| self.backup_domain(domain, &timestamp))
            .collect_vec();
        let report = RunReport {
            timestamp,
            outcomes,
        };

        let failed = report.failed_domains();
        if failed.is_empty() {
            info!("All {} domain(s) backed up", report.outcomes.len());
        } else {
            error!("{} domain(s) had errors: {failed:?}", failed.len());
        }
        Ok(report)
    }

    fn backup_domain(&self, domain: &str, timestamp: &str) -> DomainOutcome {
        let mut outcome = DomainOutcome::new(domain);
        info!("Starting backup of {domain}");

        let DomainDisks {
            files: disks,
            skipped,
        } = match self.hypervisor.domain_disks(domain) {
            Ok(disks) => disks,
            Err(e) => {
                self.fail(&mut outcome, Stage::ReadDisks, None, e);
                return outcome;
            }
        };
        if disks.is_empty() {
            warn!("{domain} has no file backed disks, nothing to back up");
            return outcome;
        }

        if let Some(disk) = disks
            .iter()
            .find(|d| is_snapshot_artifact(&d.source, &self.config.snapshot_prefix))
        {
            let e = Error::StaleSnapshot {
                domain: domain.to_owned(),
                disk: disk.source.clone(),
            };
            self.fail(&mut outcome, Stage::StaleSnapshot, Some(disk), e);
            return outcome;
        }

        if let Some((first, second)) = same_backup_name(&disks) {
            let e = Error::DuplicateImageName {
                domain: domain.to_owned(),
                name: image_base_name(&second.source),
                first: first.source.clone(),
                second: second.source.clone(),
            };
            self.fail(&mut outcome, Stage::Prepare, Some(second), e);
            return outcome;
        }

        let domain_dir = self.layout.domain_dir(domain);
        if let Err(e) = std::fs::create_dir_all(&domain_dir) {
            let e = Error::from(e).add_msg(format!("Cannot create {domain_dir:?}"));
            self.fail(&mut outcome, Stage::Prepare, None, e);
            return outcome;
        }

        let snapshot_name = snapshot_name(&self.config.snapshot_prefix, timestamp);
        let snapshot_disks = disks
            .iter()
            .map(|d| SnapshotDisk {
                target: d.target.clone(),
                snapshot_file: snapshot_file(&d.source, &snapshot_name),
            })
            .collect_vec();
        if let Err(e) =
            self.hypervisor
                .create_disk_snapshot(domain, &snapshot_name, &snapshot_disks, &skipped)
        {
            self.fail(&mut outcome, Stage::Snapshot, None, e);
            return outcome;
        }
        info!("Created snapshot {snapshot_name} of {domain}");

        let pipeline = ImagePipeline::new(&self.config.compressor, &self.config.encryptor);
        let ext = pipeline.file_ext();
        let mut copied = Vec::with_capacity(disks.len());
        for disk in &disks {
            let destination = self
                .layout
                .image_backup_path(domain, &disk.source, timestamp, &ext);
            match pipeline.copy_image(&disk.source, &destination) {
                Ok(stats) => {
                    info!(
                        "Backed up {domain} {} {:?} to {destination:?}: {stats}",
                        disk.target, disk.source
                    );
                    outcome.backups.push(destination);
                    copied.push(disk);
                }
                Err(e) => self.fail(&mut outcome, Stage::Copy, Some(disk), e),
            }
        }

        // every disk is committed, copied or not, so the domain leaves the snapshot
        for (disk, snapshot) in disks.iter().zip(&snapshot_disks) {
            if let Err(e) = self.hypervisor.block_commit(domain, &disk.target) {
                warn!(
                    "Keeping {:?}, it still holds writes of {domain} {}",
                    snapshot.snapshot_file, disk.target
                );
                self.fail(&mut outcome, Stage::Commit, Some(disk), e);
                return outcome;
            }
            info!("Committed {domain} {} back into {:?}", disk.target, disk.source);
            if let Err(e) = std::fs::remove_file(&snapshot.snapshot_file) {
                warn!("Cannot remove snapshot file {:?}: {e}", snapshot.snapshot_file);
            }
        }

        let definition_exported = match self.export_definition(domain, timestamp) {
            Ok(path) => {
                info!("Exported definition of {domain} to {path:?}");
                outcome.backups.push(path);
                true
            }
            Err(e) => {
                self.fail(&mut outcome, Stage::Definition, None, e);
                false
            }
        };

        for disk in copied {
            let backups = self.layout.image_backups(domain, &disk.source);
            self.prune(&mut outcome, backups, Some(disk));
        }
        if definition_exported {
            let definitions = self.layout.definitions(domain);
            self.prune(&mut outcome, definitions, None);
        }

        if outcome.is_failed() {
            error!("Backup of {domain} finished with {} error(s)", outcome.errors.len());
        } else {
            info!("Backup of {domain} finished");
        }
        outcome
    }

    #[named]
    fn export_definition(&self, domain: &str, timestamp: &str) -> Result<PathBuf> {
        let xml = self
            .hypervisor
            .dump_xml(domain)
            .add_fn_name(function_path!())?;
        let destination = self.layout.definition_path(domain, timestamp);
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(self.layout.domain_dir(domain))?;
        tmp.write_all(xml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&destination)
            .map_err(|e| Error::from(e.error))
            .add_msg(format!("Cannot move definition into place at {destination:?}"))
            .add_fn_name(function_path!())?;
        Ok(destination)
    }

    fn prune(
        &self,
        outcome: &mut DomainOutcome,
        backups: io::Result<Vec<ItemWithDateTime<PathBuf>>>,
        disk: Option<&DomainDisk>,
    ) {
        let backups = match backups {
            Ok(backups) => backups,
            Err(e) => {
                self.fail(outcome, Stage::Prune, disk, Error::from(e));
                return;
            }
        };

        for old in self.config.retention.get_delete(backups) {
            info!("Removing out of retention backup {:?}", old.item);
            match std::fs::remove_file(&old.item) {
                Ok(()) => outcome.deleted.push(old.item),
                Err(e) => {
                    let e = Error::from(e).add_msg(format!("Cannot remove {:?}", old.item));
                    self.fail(outcome, Stage::Prune, disk, e);
                }
            }
        }
    }

    fn fail(&self, outcome: &mut DomainOutcome, stage: Stage, disk: Option<&DomainDisk>, e: Error) {
        error!("Backup of {} failed at {stage}: {e}", outcome.domain);
        self.alert(&outcome.domain, stage, disk, &e);
        outcome.errors.push(StageError {
            stage,
            disk: disk.cloned(),
            error: e,
        });
    }

    fn alert(&self, domain: &str, stage: Stage, disk: Option<&DomainDisk>, e: &Error) {
        let topic = format!(
            "[vm-backup] {}: {stage} failed for {domain}",
            self.host_name
        );
        notify(self.notifier, topic, alert_body(self.host_name, domain, stage, disk, e));
    }
}

/// First pair of disks whose backups would land on the same file name.
fn same_backup_name(disks: &[DomainDisk]) -> Option<(&DomainDisk, &DomainDisk)> {
    disks.iter().tuple_combinations().find(|(a, b)| {
        a.source != b.source && image_base_name(&a.source) == image_base_name(&b.source)
    })
}

fn alert_body(
    host_name: &str,
    domain: &str,
    stage: Stage,
    disk: Option<&DomainDisk>,
    e: &Error,
) -> String {
    let mut body = format!("Host: {host_name}\nDomain: {domain}\nStage: {stage}\n");
    if let Some(disk) = disk {
        let _ = writeln!(body, "Disk: {} ({})", disk.target, disk.source.display());
    }
    let _ = write!(body, "\n{e}\n");
    body
}
