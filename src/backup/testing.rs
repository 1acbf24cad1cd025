//! Test doubles for the external collaborators of the backup drivers.

use crate::backup::hypervisor::{DomainDisk, DomainDisks, Hypervisor, SnapshotDisk};
use crate::backup::notifications::Notification;
use crate::backup::process::{CommandLine, CommandOutput, CommandRunner};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fmt::Display;
use std::path::Path;

/// Answers commands by the first argument that matches a registered key.
#[derive(Default)]
pub struct FakeRunner {
    responses: Vec<(String, std::result::Result<String, String>)>,
    calls: RefCell<Vec<String>>,
}

impl FakeRunner {
    pub fn respond(mut self, arg: &str, stdout: &str) -> Self {
        self.responses.push((arg.to_owned(), Ok(stdout.to_owned())));
        self
    }

    pub fn fail(mut self, arg: &str, stderr: &str) -> Self {
        self.responses.push((arg.to_owned(), Err(stderr.to_owned())));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(command.to_string());
        let response = self.responses.iter().find(|(key, _)| {
            command
                .arguments()
                .iter()
                .any(|a| a.as_os_str() == OsStr::new(key))
        });

        match response {
            Some((_, Ok(stdout))) => Ok(CommandOutput {
                stdout: stdout.clone(),
                ..CommandOutput::default()
            }),
            Some((_, Err(stderr))) => Err(Error::CommandFailed {
                command: command.to_string(),
                status: Some(1),
                stderr: stderr.clone(),
            }),
            None => Ok(CommandOutput::default()),
        }
    }
}

/// Hypervisor that behaves like virsh on the local filesystem: snapshots
/// create their side files, everything is recorded.
#[derive(Default)]
pub struct MockHypervisor {
    pub domains: Vec<String>,
    pub disks: HashMap<String, DomainDisks>,
    pub fail_disks: HashSet<String>,
    pub fail_snapshot: HashSet<String>,
    pub fail_commit: HashSet<(String, String)>,
    pub calls: RefCell<Vec<String>>,
}

impl MockHypervisor {
    pub fn with_domain(mut self, domain: &str, disks: &[(&str, &Path)]) -> Self {
        self.domains.push(domain.to_owned());
        self.disks.insert(
            domain.to_owned(),
            DomainDisks {
                files: disks
                    .iter()
                    .map(|(target, source)| DomainDisk {
                        target: (*target).to_owned(),
                        source: source.to_path_buf(),
                    })
                    .collect(),
                skipped: Vec::new(),
            },
        );
        self
    }

    /// Adds non-file disks to an already registered domain.
    pub fn with_skipped(mut self, domain: &str, targets: &[&str]) -> Self {
        self.disks
            .entry(domain.to_owned())
            .or_default()
            .skipped
            .extend(targets.iter().map(|t| (*t).to_owned()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn calls_for(&self, domain: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split_whitespace().nth(1) == Some(domain))
            .collect()
    }

    fn fail(&self, what: String) -> Error {
        Error::CommandFailed {
            command: what,
            status: Some(1),
            stderr: "error: mocked failure".to_owned(),
        }
    }
}

impl Hypervisor for MockHypervisor {
    fn list_domains(&self) -> Result<Vec<String>> {
        self.calls.borrow_mut().push("list".to_owned());
        Ok(self.domains.clone())
    }

    fn domain_disks(&self, domain: &str) -> Result<DomainDisks> {
        let call = format!("domblklist {domain}");
        self.calls.borrow_mut().push(call.clone());
        if self.fail_disks.contains(domain) {
            return Err(self.fail(call));
        }
        Ok(self.disks.get(domain).cloned().unwrap_or_default())
    }

    fn create_disk_snapshot(
        &self,
        domain: &str,
        snapshot_name: &str,
        disks: &[SnapshotDisk],
        skipped: &[String],
    ) -> Result<()> {
        let mut call = format!("snapshot-create {domain} {snapshot_name}");
        if !skipped.is_empty() {
            call.push_str(&format!(" skip={}", skipped.join(",")));
        }
        self.calls.borrow_mut().push(call.clone());
        if self.fail_snapshot.contains(domain) {
            return Err(self.fail(call));
        }
        for disk in disks {
            std::fs::write(&disk.snapshot_file, "overlay")?;
        }
        Ok(())
    }

    fn block_commit(&self, domain: &str, target: &str) -> Result<()> {
        let call = format!("blockcommit {domain} {target}");
        self.calls.borrow_mut().push(call.clone());
        if self
            .fail_commit
            .contains(&(domain.to_owned(), target.to_owned()))
        {
            return Err(self.fail(call));
        }
        Ok(())
    }

    fn dump_xml(&self, domain: &str) -> Result<String> {
        self.calls.borrow_mut().push(format!("dumpxml {domain}"));
        Ok(format!("<domain><name>{domain}</name></domain>"))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: RefCell<Vec<(String, String)>>,
}

impl Notification for RecordingNotifier {
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()> {
        self.sent
            .borrow_mut()
            .push((topic.to_string(), msg.to_string()));
        Ok(())
    }
}
