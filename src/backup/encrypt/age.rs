use crate::backup::encrypt::{Encryptor, EncryptorBuilder};
use crate::backup::redacted::{validate_passphrase, RedactedString};
use crate::backup::result_error::result::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::result;
use validator::{Validate, ValidationErrors};

/// In-process Age encryption, for hosts without gpg.
///
/// Only scrypt passphrase recipients are supported.
#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(tag = "secret_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum AgeEncryptorConfig {
    Passphrase { passphrase: RedactedString },
}

impl AgeEncryptorConfig {
    pub fn new_passphrase<P: Into<RedactedString>>(passphrase: P) -> Self {
        Self::Passphrase {
            passphrase: passphrase.into(),
        }
    }
}

impl<W: Write + Send + 'static> EncryptorBuilder<W> for AgeEncryptorConfig {
    fn build_encryptor(&self, writer: W) -> Result<Encryptor<W>> {
        match self {
            AgeEncryptorConfig::Passphrase { passphrase } => {
                tracing::debug!("Initializing Age encryption with passphrase");
                Ok(
                    age::Encryptor::with_user_passphrase(passphrase.expose().into())
                        .wrap_output(writer)?
                        .into(),
                )
            }
        }
    }
}

impl Validate for AgeEncryptorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            AgeEncryptorConfig::Passphrase { passphrase } => {
                let mut errors = ValidationErrors::new();
                if let Err(e) = validate_passphrase(passphrase) {
                    errors.add("passphrase", e);
                }
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(errors)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::finish::Finish;
    use crate::backup::redacted::REDACTED_PLACEHOLDER;

    #[test]
    fn test_age_encryptor_config_validation() {
        assert!(AgeEncryptorConfig::new_passphrase("valid_passphrase_123")
            .validate()
            .is_ok());
        assert!(AgeEncryptorConfig::new_passphrase("short").validate().is_err());
    }

    #[test]
    fn test_age_encryptor_config_debug() {
        let config = AgeEncryptorConfig::new_passphrase("secret_password");
        assert_eq!(
            format!("{:?}", config),
            format!("Passphrase {{ passphrase: {} }}", REDACTED_PLACEHOLDER)
        );
    }

    #[test]
    fn test_age_encryptor_config_serialization() {
        let config = AgeEncryptorConfig::new_passphrase("secret_password");
        let serialized = serde_json::to_string(&config).unwrap();
        assert_eq!(
            serialized,
            format!(
                "{{\"secret_type\":\"passphrase\",\"passphrase\":\"{}\"}}",
                REDACTED_PLACEHOLDER
            )
        );
    }

    #[test]
    fn test_age_encryptor_writes_age_header() {
        let config = AgeEncryptorConfig::new_passphrase("test_passphrase_123");
        let mut encryptor = config.build_encryptor(Vec::new()).unwrap();
        assert!(matches!(encryptor, Encryptor::AgeEncryptor(_)));

        encryptor.write_all(b"disk image bytes").unwrap();
        let out = encryptor.finish().unwrap();
        assert!(out.starts_with(b"age-encryption.org/v1"));
    }
}
