use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;

use bon::Builder;
use derive_more::{Display, From};
use function_name::named;
use getset::Getters;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use itertools::Itertools;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use std::fmt::Formatter;
use std::result;

/// Picks which running domains get backed up.
///
/// An empty `include` list selects every domain; `exclude` wins over
/// `include`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DomainFilter {
    #[serde(default)]
    #[builder(default, into)]
    include: Vec<CustomDeserializedGlob>,
    #[serde(default)]
    #[builder(default, into)]
    exclude: Vec<CustomDeserializedGlob>,
}

/// A glob pattern deserialized straight from a string.
#[derive(Clone, Debug, From, Display, Serialize, PartialEq, Eq, Getters)]
#[serde(transparent)]
#[getset(get = "pub")]
pub struct CustomDeserializedGlob {
    glob: Glob,
}

impl CustomDeserializedGlob {
    pub fn new(pattern: &str) -> result::Result<Self, globset::Error> {
        GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map(Self::from)
    }
}

struct CustomGlobVisitor;

impl Visitor<'_> for CustomGlobVisitor {
    type Value = CustomDeserializedGlob;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a glob pattern")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        CustomDeserializedGlob::new(v).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for CustomDeserializedGlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(CustomGlobVisitor)
    }
}

fn build_globset(globs: &[CustomDeserializedGlob]) -> result::Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    globs.iter().for_each(|g| {
        builder.add(g.glob.clone());
    });
    builder.build()
}

impl DomainFilter {
    /// Keeps the order of `domains`, dropping duplicates.
    #[named]
    pub fn select<I, S>(&self, domains: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let include = build_globset(&self.include)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        let exclude = build_globset(&self.exclude)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;

        Ok(domains
            .into_iter()
            .map(Into::into)
            .unique()
            .filter(|domain| {
                let selected = (self.include.is_empty() || include.is_match(domain))
                    && !exclude.is_match(domain);
                if !selected {
                    tracing::debug!("Domain {domain:?} not selected for backup");
                }
                selected
            })
            .collect())
    }
}
