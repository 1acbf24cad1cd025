//! File naming of backups and snapshot images.
//!
//! ```text
//! <root>/<domain>/<image file name>-<timestamp>[.<ext>]
//! <root>/<domain>/<domain>-<timestamp>.xml
//! <image dir>/<image stem>.<snapshot prefix>-<timestamp>
//! ```
//!
//! Timestamps use [`TIME_FORMAT`] with `+` replaced by `_` so they survive
//! in file names and shell globs.

use crate::backup::retention::ItemWithDateTime;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt::Display;
use std::fs::read_dir;
use std::io;
use std::path::{Path, PathBuf};

pub static TIME_FORMAT: &str = "%Y-%m-%dT%Hh%Mm%Ss%z";
pub static DEFINITION_EXT: &str = "xml";

pub fn format_timestamp<O: Display, T: TimeZone<Offset = O>>(dt: &DateTime<T>) -> String {
    dt.format(TIME_FORMAT).to_string().replace('+', "_")
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s.replace('_', "+").as_str(), TIME_FORMAT)
        .ok()
        .map(|dt| dt.to_utc())
}

/// `<base>-<timestamp>` followed by `.<ext>` unless `ext` is empty.
pub fn backup_file_name(base: &str, timestamp: &str, ext: &str) -> String {
    if ext.is_empty() {
        format!("{base}-{timestamp}")
    } else {
        format!("{base}-{timestamp}.{ext}")
    }
}

/// Splits a backup file name of `base` into its timestamp and extension.
///
/// Timestamps never contain a `.`, so everything after the first one is the
/// extension. Any extension is accepted so that backups written with an
/// earlier compressor/encryptor setting still age out.
pub fn parse_backup_file_name<'a>(
    file_name: &'a str,
    base: &str,
) -> Option<(DateTime<Utc>, &'a str)> {
    let rest = file_name.strip_prefix(base)?.strip_prefix('-')?;
    let (timestamp, ext) = rest.split_once('.').unwrap_or((rest, ""));
    parse_timestamp(timestamp).map(|dt| (dt, ext))
}

pub fn snapshot_name(prefix: &str, timestamp: &str) -> String {
    format!("{prefix}-{timestamp}")
}

/// Side file next to `image` that receives guest writes while the snapshot
/// is active.
pub fn snapshot_file(image: &Path, snapshot_name: &str) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    image.with_file_name(format!("{stem}.{snapshot_name}"))
}

/// A disk whose file carries our snapshot marker belongs to a snapshot that
/// was never committed back.
pub fn is_snapshot_artifact(disk: &Path, prefix: &str) -> bool {
    disk.file_name()
        .map(|n| n.to_string_lossy().contains(&format!(".{prefix}-")))
        .unwrap_or(false)
}

pub fn image_base_name(image: &Path) -> String {
    image
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.to_string_lossy().replace('/', "_"))
}

#[derive(Clone, Debug)]
pub struct BackupLayout {
    root: PathBuf,
}

impl BackupLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.root.join(domain)
    }

    pub fn image_backup_path(&self, domain: &str, image: &Path, timestamp: &str, ext: &str) -> PathBuf {
        self.domain_dir(domain)
            .join(backup_file_name(&image_base_name(image), timestamp, ext))
    }

    pub fn definition_path(&self, domain: &str, timestamp: &str) -> PathBuf {
        self.domain_dir(domain)
            .join(backup_file_name(domain, timestamp, DEFINITION_EXT))
    }

    /// Every dated backup of `image`, definition exports excluded.
    pub fn image_backups(&self, domain: &str, image: &Path) -> io::Result<Vec<ItemWithDateTime<PathBuf>>> {
        let base = image_base_name(image);
        self.list(domain, |name| {
            parse_backup_file_name(name, &base)
                .filter(|(_, ext)| *ext != DEFINITION_EXT)
                .map(|(dt, _)| dt)
        })
    }

    pub fn definitions(&self, domain: &str) -> io::Result<Vec<ItemWithDateTime<PathBuf>>> {
        self.list(domain, |name| {
            parse_backup_file_name(name, domain)
                .filter(|(_, ext)| *ext == DEFINITION_EXT)
                .map(|(dt, _)| dt)
        })
    }

    fn list<F>(&self, domain: &str, date_of: F) -> io::Result<Vec<ItemWithDateTime<PathBuf>>>
    where
        F: Fn(&str) -> Option<DateTime<Utc>>,
    {
        let dir = self.domain_dir(domain);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        Ok(read_dir(&dir)?
            .filter_map(|r| r.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| {
                let path = e.path();
                let name = path.file_name()?.to_str()?.to_owned();
                date_of(&name).map(|dt| ItemWithDateTime::from((path, dt)))
            })
            .collect())
    }
}
