//! Log output: stdout plus one append-only file per day.

use crate::backup::result_error::result::Result;
use crate::backup::validate::{validate_valid_file_name_part, validate_writable_dir};
use bon::Builder;
use chrono::{Local, NaiveDate};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use validator::Validate;

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct LogConfig {
    /// Without a directory logs only go to stdout
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    dir: Option<PathBuf>,
    #[serde(default = "default_file_prefix")]
    #[validate(custom(function = validate_valid_file_name_part))]
    #[builder(default = default_file_prefix(), into)]
    file_prefix: String,
    /// `EnvFilter` directives, `RUST_LOG` takes precedence
    #[serde(default = "default_level")]
    #[builder(default = default_level(), into)]
    level: String,
}

fn default_file_prefix() -> String {
    "vm-backup".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// `<dir>/<prefix>-YYYY-MM-DD.log`, picked again for every event so a
/// daemon rolls over to a new file at midnight.
#[derive(Clone, Debug)]
pub struct DailyLogFile {
    dir: PathBuf,
    prefix: String,
}

impl DailyLogFile {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(dir: P, prefix: S) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}-{}.log", self.prefix, date.format("%Y-%m-%d")))
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }
}

#[derive(io_enum::Write)]
pub enum LogFileWriter {
    File(File),
    Sink(io::Sink),
}

impl<'a> MakeWriter<'a> for DailyLogFile {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let path = self.path_for(Local::now().date_naive());
        match self.open(&path) {
            Ok(file) => LogFileWriter::File(file),
            Err(e) => {
                // the subscriber is what would report this, so stderr it is
                eprintln!("Cannot open log file {path:?}: {e}");
                LogFileWriter::Sink(io::sink())
            }
        }
    }
}

/// Installs the global subscriber.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let file_layer = config.dir.as_ref().map(|dir| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(DailyLogFile::new(dir, &config.file_prefix))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()?;

    Ok(())
}
