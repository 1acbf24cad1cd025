//! The hypervisor management layer, seen as a handful of operations.

pub mod virsh;

use crate::backup::result_error::result::Result;
use std::path::PathBuf;

/// A file-backed disk attached to a domain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DomainDisk {
    /// Guest-facing device name, e.g. `vda`
    pub target: String,
    /// Image file currently receiving the guest's writes
    pub source: PathBuf,
}

/// Disks of a domain as far as a backup is concerned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainDisks {
    pub files: Vec<DomainDisk>,
    /// Targets of writable disks that are not file backed (block devices,
    /// network volumes). They are left out of the snapshot.
    pub skipped: Vec<String>,
}

/// Where a disk's writes go while the backup snapshot is active.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotDisk {
    pub target: String,
    pub snapshot_file: PathBuf,
}

pub trait Hypervisor {
    /// Names of the running domains.
    fn list_domains(&self) -> Result<Vec<String>>;

    /// Disks of `domain`. CD-ROMs and disks without a source are left out.
    fn domain_disks(&self, domain: &str) -> Result<DomainDisks>;

    /// Redirects writes of every listed disk into its snapshot file,
    /// atomically. The `skipped` targets keep writing to their own storage.
    fn create_disk_snapshot(
        &self,
        domain: &str,
        snapshot_name: &str,
        disks: &[SnapshotDisk],
        skipped: &[String],
    ) -> Result<()>;

    /// Merges the active snapshot layer of `target` back into its base image
    /// and pivots the domain onto it, waiting for completion.
    fn block_commit(&self, domain: &str, target: &str) -> Result<()>;

    /// The domain definition XML.
    fn dump_xml(&self, domain: &str) -> Result<String>;
}

impl<H: Hypervisor + ?Sized> Hypervisor for &H {
    fn list_domains(&self) -> Result<Vec<String>> {
        (**self).list_domains()
    }

    fn domain_disks(&self, domain: &str) -> Result<DomainDisks> {
        (**self).domain_disks(domain)
    }

    fn create_disk_snapshot(
        &self,
        domain: &str,
        snapshot_name: &str,
        disks: &[SnapshotDisk],
        skipped: &[String],
    ) -> Result<()> {
        (**self).create_disk_snapshot(domain, snapshot_name, disks, skipped)
    }

    fn block_commit(&self, domain: &str, target: &str) -> Result<()> {
        (**self).block_commit(domain, target)
    }

    fn dump_xml(&self, domain: &str) -> Result<String> {
        (**self).dump_xml(domain)
    }
}
