pub mod age;
pub mod gpg;

use crate::backup::encrypt::age::AgeEncryptorConfig;
use crate::backup::encrypt::gpg::GpgEncryptorConfig;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::process::filter::ProcessFilter;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use ::age::stream::StreamWriter;
use derive_more::From;
use function_name::named;
use io_enum::Write;
use serde::{Deserialize, Serialize};
use std::io::{Error, Write};
use std::result;

use validator::{Validate, ValidationErrors};

#[derive(Write, From)]
pub enum Encryptor<W: Write + Send + 'static> {
    None(W),
    Gpg(ProcessFilter<W>),
    AgeEncryptor(StreamWriter<W>),
}

#[derive(Clone, Default, From, Serialize, Deserialize, Debug)]
#[serde(tag = "encryptor_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum EncryptorConfig {
    #[default]
    None,
    Gpg(GpgEncryptorConfig),
    Age(AgeEncryptorConfig),
}

impl Validate for EncryptorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            EncryptorConfig::None => Ok(()),
            EncryptorConfig::Gpg(inner) => inner.validate(),
            EncryptorConfig::Age(inner) => inner.validate(),
        }
    }
}

pub trait EncryptorBuilder<W: Write + Send + 'static> {
    fn build_encryptor(&self, writer: W) -> Result<Encryptor<W>>;
}

impl<W: Write + Send + 'static> Finish<W> for Encryptor<W> {
    fn finish(self) -> result::Result<W, Error> {
        match self {
            Encryptor::None(w) => Ok(w),
            Encryptor::Gpg(w) => w.finish(),
            Encryptor::AgeEncryptor(w) => w.finish(),
        }
    }
}

impl<W: Write + Send + 'static> EncryptorBuilder<W> for EncryptorConfig {
    #[named]
    fn build_encryptor(&self, writer: W) -> Result<Encryptor<W>> {
        match self {
            EncryptorConfig::None => {
                tracing::debug!("Using no encryption");
                Ok(writer.into())
            }
            EncryptorConfig::Gpg(gpg) => gpg.build_encryptor(writer),
            EncryptorConfig::Age(age) => age.build_encryptor(writer),
        }
        .add_fn_name(function_path!())
    }
}

impl FileExtProvider for EncryptorConfig {
    fn file_ext(&self) -> Option<&'static str> {
        match self {
            EncryptorConfig::None => None,
            EncryptorConfig::Gpg(_) => Some("gpg"),
            EncryptorConfig::Age(_) => Some("age"),
        }
    }
}
