use crate::backup::function_path;
use crate::backup::hypervisor::{DomainDisk, DomainDisks, Hypervisor, SnapshotDisk};
use crate::backup::process::{CommandLine, CommandRunner};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::validate::validate_program;
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::PathBuf;
use validator::Validate;

static DEFAULT_VIRSH_PROGRAM: &str = "virsh";

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct VirshConfig {
    #[validate(custom(function = validate_program))]
    #[builder(into)]
    program: Option<PathBuf>,
    /// e.g. `qemu:///system`, libvirt's default when unset
    #[builder(into)]
    connect_uri: Option<String>,
    /// Freeze guest filesystems through the guest agent while snapshotting
    #[serde(default)]
    #[builder(default)]
    quiesce: bool,
}

/// [`Hypervisor`] on top of libvirt's `virsh`.
pub struct Virsh<R: CommandRunner> {
    config: VirshConfig,
    runner: R,
}

impl<R: CommandRunner> Virsh<R> {
    pub fn new(config: VirshConfig, runner: R) -> Self {
        Self { config, runner }
    }

    fn command(&self) -> CommandLine {
        let program = self
            .config
            .program
            .clone()
            .unwrap_or_else(|| DEFAULT_VIRSH_PROGRAM.into());
        match &self.config.connect_uri {
            Some(uri) => CommandLine::new(program).args(["-c", uri.as_str()]),
            None => CommandLine::new(program),
        }
    }
}

impl<R: CommandRunner> Hypervisor for Virsh<R> {
    #[named]
    fn list_domains(&self) -> Result<Vec<String>> {
        let command = self.command().args(["list", "--name", "--state-running"]);
        let output = self.runner.run(&command).add_fn_name(function_path!())?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    #[named]
    fn domain_disks(&self, domain: &str) -> Result<DomainDisks> {
        let command = self.command().args(["domblklist", domain, "--details"]);
        let output = self.runner.run(&command).add_fn_name(function_path!())?;
        parse_domblklist(&output.stdout).map_err(|reason| Error::UnexpectedOutput {
            command: command.to_string(),
            reason,
        })
    }

    #[named]
    fn create_disk_snapshot(
        &self,
        domain: &str,
        snapshot_name: &str,
        disks: &[SnapshotDisk],
        skipped: &[String],
    ) -> Result<()> {
        let mut command = self.command().args([
            "snapshot-create-as",
            "--domain",
            domain,
            "--name",
            snapshot_name,
            "--no-metadata",
            "--atomic",
            "--disk-only",
        ]);
        if self.config.quiesce {
            command = command.arg("--quiesce");
        }
        for disk in disks {
            // virsh escapes commas inside diskspec values by doubling them
            let file = disk.snapshot_file.to_string_lossy().replace(',', ",,");
            command = command
                .arg("--diskspec")
                .arg(format!("{},file={}", disk.target, file));
        }
        // unlisted writable disks would get a default external snapshot
        for target in skipped {
            command = command
                .arg("--diskspec")
                .arg(format!("{target},snapshot=no"));
        }

        self.runner
            .run(&command)
            .map(|_| ())
            .add_fn_name(function_path!())
    }

    #[named]
    fn block_commit(&self, domain: &str, target: &str) -> Result<()> {
        let command = self
            .command()
            .args(["blockcommit", domain, target, "--active", "--pivot", "--wait"]);
        self.runner
            .run(&command)
            .map(|_| ())
            .add_fn_name(function_path!())
    }

    #[named]
    fn dump_xml(&self, domain: &str) -> Result<String> {
        let command = self.command().args(["dumpxml", domain]);
        self.runner
            .run(&command)
            .map(|o| o.stdout)
            .add_fn_name(function_path!())
    }
}

/// Parses `virsh domblklist --details`:
///
/// ```text
///  Type   Device   Target   Source
/// ------------------------------------------------------
///  file   disk     vda      /var/lib/libvirt/images/web.qcow2
///  file   cdrom    sda      -
///  block  disk     vdc      /dev/vg0/web-extra
/// ```
fn parse_domblklist(stdout: &str) -> std::result::Result<DomainDisks, String> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some(header) if header.split_whitespace().eq(["Type", "Device", "Target", "Source"]) => {}
        other => return Err(format!("unexpected header {other:?}")),
    }

    let mut disks = DomainDisks::default();
    for line in lines.filter(|l| !l.starts_with('-')) {
        let (disk_type, rest) = split_field(line).ok_or(format!("short line {line:?}"))?;
        let (device, rest) = split_field(rest).ok_or(format!("short line {line:?}"))?;
        let (target, source) = split_field(rest).ok_or(format!("short line {line:?}"))?;

        if device != "disk" || source == "-" {
            tracing::debug!("Ignoring {device} {target} ({source})");
            continue;
        }
        if disk_type != "file" {
            tracing::warn!("Ignoring {disk_type} disk {target} ({source}), only file disks are backed up");
            disks.skipped.push(target.to_owned());
            continue;
        }

        disks.files.push(DomainDisk {
            target: target.to_owned(),
            source: PathBuf::from(source),
        });
    }

    Ok(disks)
}

/// First whitespace separated field and the trimmed remainder. The last
/// column (Source) may itself contain spaces.
fn split_field(s: &str) -> Option<(&str, &str)> {
    let (field, rest) = s.trim_start().split_once(char::is_whitespace)?;
    Some((field, rest.trim()))
}
