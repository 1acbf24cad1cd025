use crate::backup::encrypt::{Encryptor, EncryptorBuilder};
use crate::backup::process::filter::ProcessFilter;
use crate::backup::process::CommandLine;
use crate::backup::redacted::{validate_passphrase, RedactedString};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::result_error::error::Error;
use crate::backup::validate::validate_program;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use std::path::PathBuf;
use validator::Validate;

static DEFAULT_GPG_PROGRAM: &str = "gpg";
static DEFAULT_CIPHER_ALGO: &str = "AES256";

/// Symmetric encryption through an external gpg.
///
/// The passphrase is the first line gpg reads from its stdin
/// (`--passphrase-fd 0`), the payload follows on the same pipe. It is never
/// written to disk or put on the command line.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GpgEncryptorConfig {
    #[validate(custom(function = validate_passphrase))]
    passphrase: RedactedString,
    cipher_algo: Option<String>,
    #[validate(custom(function = validate_program))]
    program: Option<PathBuf>,
}

impl GpgEncryptorConfig {
    pub fn new<P: Into<RedactedString>>(passphrase: P) -> Self {
        Self {
            passphrase: passphrase.into(),
            cipher_algo: None,
            program: None,
        }
    }

    pub fn command_line(&self) -> CommandLine {
        let program = self
            .program
            .clone()
            .unwrap_or_else(|| DEFAULT_GPG_PROGRAM.into());
        CommandLine::new(program).args([
            "--batch",
            "--yes",
            "--quiet",
            "--no-tty",
            "--pinentry-mode",
            "loopback",
            "--passphrase-fd",
            "0",
            "--symmetric",
            "--cipher-algo",
            self.cipher_algo.as_deref().unwrap_or(DEFAULT_CIPHER_ALGO),
            // payload is compressed already
            "--compress-algo",
            "none",
            "--output",
            "-",
        ])
    }
}

impl<W: Write + Send + 'static> EncryptorBuilder<W> for GpgEncryptorConfig {
    fn build_encryptor(&self, writer: W) -> Result<Encryptor<W>> {
        let command = self.command_line();
        tracing::debug!("Initializing gpg encryption `{}`", command);
        let mut filter = ProcessFilter::spawn(command, writer)?;
        filter
            .write_all(self.passphrase.expose().as_bytes())
            .and_then(|_| filter.write_all(b"\n"))
            .map_err(Error::from)
            .add_msg("Failed to hand passphrase to gpg")?;
        Ok(filter.into())
    }
}
