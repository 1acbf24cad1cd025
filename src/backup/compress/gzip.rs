use crate::backup::compress::{Compressor, CompressorBuilder};
use crate::backup::process::filter::ProcessFilter;
use crate::backup::process::CommandLine;
use crate::backup::result_error::result::Result;
use crate::backup::validate::validate_program;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use std::path::PathBuf;
use validator::Validate;

static DEFAULT_GZIP_PROGRAM: &str = "gzip";
static DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Compression through an external gzip-compatible program.
///
/// `program` may point at `pigz` for parallel compression, it only has to
/// understand `-c` and `-<level>` and filter stdin to stdout.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct GzipConfig {
    #[validate(range(min = 1, max = 9))]
    level: Option<u32>,
    #[validate(custom(function = validate_program))]
    program: Option<PathBuf>,
    #[serde(default)]
    rsyncable: bool,
}

impl GzipConfig {
    pub fn command_line(&self) -> CommandLine {
        let program = self
            .program
            .clone()
            .unwrap_or_else(|| DEFAULT_GZIP_PROGRAM.into());
        let level = self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);
        let command = CommandLine::new(program)
            .arg("-c")
            .arg(format!("-{level}"));
        if self.rsyncable {
            command.arg("--rsyncable")
        } else {
            command
        }
    }
}

impl<W: Write + Send + 'static> CompressorBuilder<W> for GzipConfig {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        let command = self.command_line();
        tracing::debug!("Creating gzip compressor `{}`", command);
        Ok(ProcessFilter::spawn(command, writer)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::finish::Finish;

    #[test]
    fn test_gzip_command_line_defaults() {
        let config = GzipConfig::default();
        assert_eq!(config.command_line().to_string(), "gzip -c -6");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gzip_command_line_custom() {
        let config: GzipConfig =
            serde_yml::from_str("level: 9\nprogram: pigz\nrsyncable: true\n").unwrap();
        assert_eq!(config.command_line().to_string(), "pigz -c -9 --rsyncable");
    }

    #[test]
    fn test_gzip_config_invalid_level() {
        let config: GzipConfig = serde_yml::from_str("level: 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gzip_compressor_writes_gzip_stream() {
        let mut compressor = GzipConfig::default().build_compressor(Vec::new()).unwrap();
        compressor.write_all(&[0u8; 64 * 1024]).unwrap();
        let out = compressor.finish().unwrap();

        assert_eq!(&out[..2], &[0x1f, 0x8b]);
        assert!(out.len() < 64 * 1024);
    }
}
