//! Copying a disk image into its backup file.

use crate::backup::compress::{CompressorBuilder, CompressorConfig};
use crate::backup::encrypt::{EncryptorBuilder, EncryptorConfig};
use crate::backup::file_ext::{joined_file_ext, FileExtProvider};
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::{Duration, Instant};

static COPY_BUFFER_SIZE: usize = 1024 * 1024;
static MIB: f64 = 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImageCopyStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub duration: Duration,
}

impl ImageCopyStats {
    pub fn throughput_mib_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_read as f64 / MIB / secs
    }

    /// Output size as a percentage of the input size.
    pub fn compression_percent(&self) -> f64 {
        if self.bytes_read == 0 {
            return 100.0;
        }
        self.bytes_written as f64 * 100.0 / self.bytes_read as f64
    }
}

impl Display for ImageCopyStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1} MiB read, {:.1} MiB written in {:.1?} ({:.1} MiB/s, {:.1}% of original size)",
            self.bytes_read as f64 / MIB,
            self.bytes_written as f64 / MIB,
            self.duration,
            self.throughput_mib_per_sec(),
            self.compression_percent()
        )
    }
}

/// Image file → compressor → encryptor → backup file.
#[derive(Clone, Copy, Debug)]
pub struct ImagePipeline<'a> {
    compressor: &'a CompressorConfig,
    encryptor: &'a EncryptorConfig,
}

impl<'a> ImagePipeline<'a> {
    pub fn new(compressor: &'a CompressorConfig, encryptor: &'a EncryptorConfig) -> Self {
        Self {
            compressor,
            encryptor,
        }
    }

    pub fn file_ext(&self) -> String {
        joined_file_ext(&[
            self.compressor as &dyn FileExtProvider,
            self.encryptor as &dyn FileExtProvider,
        ])
    }

    /// Writes the processed image next to `destination` under a temporary
    /// name and renames it into place once every layer has finished, so a
    /// backup file with a final name is always complete.
    #[named]
    pub fn copy_image(&self, source: &Path, destination: &Path) -> Result<ImageCopyStats> {
        let start = Instant::now();
        let dir = destination.parent().ok_or_else(|| {
            Error::from(std::io::Error::other(format!(
                "{destination:?} has no parent directory"
            )))
        })?;

        let mut reader = File::open(source)
            .map(|f| BufReader::with_capacity(COPY_BUFFER_SIZE, f))
            .map_err(Error::from)
            .add_msg(format!("Cannot open disk image {source:?}"))?;

        let tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(dir)?;

        let mut writer = tmp
            .reopen()
            .map(BufWriter::new)
            .map_err(Error::from)
            .and_then(|f| self.encryptor.build_encryptor(f))
            .map(BufWriter::new)
            .and_then(|f| self.compressor.build_compressor(f))
            .map(|f| BufWriter::with_capacity(COPY_BUFFER_SIZE, f))
            .add_fn_name(function_path!())?;

        let bytes_read = std::io::copy(&mut reader, &mut writer)
            .map_err(Error::from)
            .add_msg(format!("Copying {source:?} failed"))?;

        writer
            .finish()?
            .finish()?
            .finish()?
            .finish()?
            .finish()?
            .sync_all()?;

        let bytes_written = tmp.as_file().metadata()?.len();
        tmp.persist(destination)
            .map_err(|e| Error::from(e.error))
            .add_msg(format!("Cannot move backup into place at {destination:?}"))?;

        Ok(ImageCopyStats {
            bytes_read,
            bytes_written,
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::compress::xz::XzConfig;
    use crate::backup::encrypt::age::AgeEncryptorConfig;
    use liblzma::read::XzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn write_image(dir: &Path) -> std::path::PathBuf {
        let image = dir.join("web.raw");
        let mut content = vec![0u8; 256 * 1024];
        content[..11].copy_from_slice(b"boot sector");
        std::fs::write(&image, content).unwrap();
        image
    }

    #[test]
    fn test_file_ext() {
        let gzip = CompressorConfig::default();
        let none = CompressorConfig::None;
        let plain = EncryptorConfig::None;
        let age = EncryptorConfig::Age(AgeEncryptorConfig::new_passphrase("passphrase123"));

        assert_eq!(ImagePipeline::new(&gzip, &plain).file_ext(), "gz");
        assert_eq!(ImagePipeline::new(&none, &age).file_ext(), "age");
        assert_eq!(ImagePipeline::new(&none, &plain).file_ext(), "");
    }

    #[test]
    fn test_copy_image_uncompressed() {
        let temp_dir = TempDir::new().unwrap();
        let image = write_image(temp_dir.path());
        let destination = temp_dir.path().join("backup.raw");

        let stats = ImagePipeline::new(&CompressorConfig::None, &EncryptorConfig::None)
            .copy_image(&image, &destination)
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), std::fs::read(&image).unwrap());
        assert_eq!(stats.bytes_read, 256 * 1024);
        assert_eq!(stats.bytes_written, 256 * 1024);
        assert_eq!(stats.compression_percent(), 100.0);
    }

    #[test]
    fn test_copy_image_xz() {
        let temp_dir = TempDir::new().unwrap();
        let image = write_image(temp_dir.path());
        let destination = temp_dir.path().join("backup.raw.xz");
        let xz: CompressorConfig = serde_yml::from_str("compressor_type: xz\nthread: 1\n").unwrap();

        let stats = ImagePipeline::new(&xz, &EncryptorConfig::None)
            .copy_image(&image, &destination)
            .unwrap();
        assert!(stats.bytes_written < stats.bytes_read);
        assert!(stats.compression_percent() < 100.0);

        let mut decoded = Vec::new();
        XzDecoder::new(File::open(&destination).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, std::fs::read(&image).unwrap());
    }

    #[test]
    fn test_copy_missing_image_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let result = ImagePipeline::new(&CompressorConfig::None, &EncryptorConfig::None)
            .copy_image(&temp_dir.path().join("missing.raw"), &out_dir.join("b"));

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = ImageCopyStats {
            bytes_read: 4 * 1024 * 1024,
            bytes_written: 1024 * 1024,
            duration: Duration::from_secs(2),
        };
        assert_eq!(stats.throughput_mib_per_sec(), 2.0);
        assert_eq!(stats.compression_percent(), 25.0);
        assert!(stats.to_string().contains("2.0 MiB/s"));
    }
}
