use crate::backup::fs_backup::{FsBackup, FsBackupConfig};
use crate::backup::function_path;
use crate::backup::hypervisor::virsh::Virsh;
use crate::backup::logging::LogConfig;
use crate::backup::notifications::NotificationConfig;
use crate::backup::process::SystemCommandRunner;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::{validate_cron_str, validate_section};
use crate::backup::vm_backup::{VmBackup, VmBackupConfig};
use chrono::Local;
use derive_more::Display;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::Path;
use tracing::{error, info, warn};
use validator::Validate;

static HOST_NAME_FILE: &str = "/proc/sys/kernel/hostname";

/// Top level of the YAML configuration. Each job reads its own section, a
/// config may carry only the one it is used for.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    /// Shown in alerts, defaults to the kernel host name
    #[getset(skip)]
    host_name: Option<String>,
    /// Schedule for `--daemon`
    #[validate(custom(function = validate_cron_str))]
    cron: Option<String>,
    #[serde(default)]
    #[validate(custom(function = validate_section))]
    log: LogConfig,
    #[validate(custom(function = validate_section))]
    notification: Option<NotificationConfig>,
    #[validate(custom(function = validate_section))]
    vm: Option<VmBackupConfig>,
    #[validate(custom(function = validate_section))]
    fs: Option<FsBackupConfig>,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Job {
    #[display("vm")]
    Vm,
    #[display("fs")]
    Fs,
}

impl BackupConfig {
    #[named]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .add_msg(format!("Cannot open config file {path:?}"))
            .and_then(|f| {
                serde_yml::from_reader::<_, BackupConfig>(f)
                    .map_err(Error::from)
                    .add_msg(format!("Parse YAML config failed: {path:?}"))
            })
            .and_then(|bc| {
                bc.validate()
                    .map_err(Error::from)
                    .map(|_| bc)
                    .add_msg(format!("Config validation failed: {path:?}"))
            })
            .add_fn_name(function_path!())
    }

    pub fn host_name(&self) -> String {
        self.host_name
            .clone()
            .or_else(|| {
                std::fs::read_to_string(HOST_NAME_FILE)
                    .ok()
                    .map(|s| s.trim().to_owned())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Runs `job` once and returns the process exit code: the number of
    /// failed domains for `vm`, 0 or 1 for `fs`.
    #[named]
    pub fn run_job(&self, job: Job) -> Result<u8> {
        let host_name = self.host_name();
        let now = Local::now();
        info!("Starting {job} backup on {host_name}");

        match job {
            Job::Vm => {
                let config = self
                    .vm
                    .as_ref()
                    .ok_or_else(|| Error::missing_section("vm"))?;
                let virsh = Virsh::new(config.virsh().clone(), SystemCommandRunner);
                let report = VmBackup::new(config, virsh, self.notification.as_ref(), &host_name)
                    .run(&now)
                    .add_fn_name(function_path!())?;
                Ok(report.exit_code())
            }
            Job::Fs => {
                let config = self
                    .fs
                    .as_ref()
                    .ok_or_else(|| Error::missing_section("fs"))?;
                let backup = FsBackup::new(
                    config,
                    SystemCommandRunner,
                    self.notification.as_ref(),
                    &host_name,
                );
                // failures are logged and alerted by the driver
                Ok(match backup.run(&now) {
                    Ok(report) => {
                        info!(
                            "Filesystem backup {:?} done, {} old snapshot(s) removed",
                            report.snapshot,
                            report.deleted.len()
                        );
                        0
                    }
                    Err(_) => 1,
                })
            }
        }
    }

    /// Runs `job` at every `cron` tick, forever. Only a missing or broken
    /// schedule ends the loop.
    #[named]
    pub fn start_loop(&self, job: Job) -> Result<()> {
        let cron = self
            .cron
            .as_deref()
            .ok_or_else(|| Error::missing_section("cron"))
            .add_fn_name(function_path!())?;

        loop {
            let now = Local::now();
            let next = cron_parser::parse(cron, &now).map_err(|e| Error::Cron {
                cron: cron.to_owned(),
                reason: format!("{e:?}"),
            })?;
            info!("Next {job} backup at {next}");
            std::thread::sleep((next - Local::now()).to_std().unwrap_or_default());

            match self.run_job(job) {
                Ok(0) => info!("Scheduled {job} backup finished"),
                Ok(code) => warn!("Scheduled {job} backup finished with exit code {code}"),
                Err(e) => error!("Scheduled {job} backup failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, yaml: &str) -> std::path::PathBuf {
        let path = dir.join("config.yml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_load_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("home")).unwrap();
        let path = write_config(
            root,
            &format!(
                "host_name: kvm01
cron: \"0 2 * * *\"
log:
  dir: {root:?}
  level: debug
notification:
  type: smtp
  host: smtp.example.com
  smtp_mode: StartTls
  from: backup@example.com
  to: [ops@example.com]
vm:
  backup_root: {vm:?}
  retention:
    count: 7
  compressor:
    compressor_type: xz
  encryptor:
    encryptor_type: age
    secret_type: passphrase
    passphrase: correct horse battery
fs:
  source: {home:?}
  destination: {snapshots:?}
  retention:
    count: 14
",
                vm = root.join("vm"),
                home = root.join("home"),
                snapshots = root.join("snapshots"),
            ),
        );

        let config = BackupConfig::load(&path).unwrap();
        assert_eq!(config.host_name(), "kvm01");
        assert_eq!(config.cron().as_deref(), Some("0 2 * * *"));
        assert_eq!(config.log().level(), "debug");
        assert!(config.notification().is_some());
        assert_eq!(config.vm().as_ref().unwrap().retention().count, 7);
        assert!(config.fs().is_some());
        // validation creates the backup directories
        assert!(root.join("vm").is_dir());
        assert!(root.join("snapshots").is_dir());
    }

    #[test]
    fn test_load_errors_name_the_file() {
        let temp_dir = TempDir::new().unwrap();

        let missing = BackupConfig::load(temp_dir.path().join("missing.yml")).unwrap_err();
        assert!(missing.to_string().contains("missing.yml"));

        let unknown = write_config(temp_dir.path(), "vms: {}\n");
        let error = BackupConfig::load(&unknown).unwrap_err().to_string();
        assert!(error.contains("Parse YAML config failed"));

        let invalid = write_config(temp_dir.path(), "cron: \"every day\"\n");
        let error = BackupConfig::load(&invalid).unwrap_err().to_string();
        assert!(error.contains("Config validation failed"));
    }

    #[test]
    fn test_host_name_falls_back_to_system() {
        let config: BackupConfig = serde_yml::from_str("{}").unwrap();
        assert!(!config.host_name().is_empty());
    }

    #[test]
    fn test_run_job_without_section() {
        let config: BackupConfig = serde_yml::from_str("{}").unwrap();
        assert!(matches!(
            config.run_job(Job::Vm).unwrap_err().root(),
            Error::MissingSection(_)
        ));
        assert!(config.start_loop(Job::Fs).is_err());
    }

    #[test]
    fn test_failed_fs_job_exits_with_one() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("home");
        let destination = temp_dir.path().join("snapshots");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&destination).unwrap();
        let config: BackupConfig = serde_yml::from_str(&format!(
            "fs:\n  source: {source:?}\n  destination: {destination:?}\n  rsync:\n    program: \"false\"\n"
        ))
        .unwrap();

        assert_eq!(config.run_job(Job::Fs).unwrap(), 1);
        assert!(destination.join("latest").symlink_metadata().is_err());
    }

    #[test]
    fn test_vm_job_fails_when_domains_cannot_be_listed() {
        let temp_dir = TempDir::new().unwrap();
        let config: BackupConfig = serde_yml::from_str(&format!(
            "vm:\n  backup_root: {:?}\n  retention:\n    count: 1\n  virsh:\n    program: \"false\"\n",
            temp_dir.path()
        ))
        .unwrap();

        let error = config.run_job(Job::Vm).unwrap_err();
        assert!(matches!(error.root(), Error::CommandFailed { .. }));
    }
}
