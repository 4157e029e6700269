use crate::backup::result_error::result::Result;

use derive_more::{Display, From};
use getset::Getters;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};

use std::fmt::{Debug, Formatter};
use std::path::{Component, Path};
use std::result;

/// One archive exclusion glob.
///
/// A leading `/` is dropped since archive member names are relative, and `*`
/// never crosses a path separator.
#[derive(Clone, Debug, From, Display, Serialize, PartialEq, Eq, Getters)]
#[serde(transparent)]
#[getset(get = "pub")]
pub struct ExcludePattern {
    glob: Glob,
}

impl ExcludePattern {
    pub fn new<S: AsRef<str>>(pattern: S) -> Result<Self> {
        let pattern = pattern.as_ref();
        let pattern = pattern.trim_start_matches('/');
        Ok(GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()?
            .into())
    }
}

struct ExcludePatternVisitor;

impl Visitor<'_> for ExcludePatternVisitor {
    type Value = ExcludePattern;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a glob pattern")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        ExcludePattern::new(v).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ExcludePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(ExcludePatternVisitor)
    }
}

/// Every configured pattern, applied to every archive input alike.
///
/// A member is excluded when a pattern matches its whole relative name or any
/// trailing run of its components, so `*.log` hits `var/log/syslog.log` and
/// `cache/tmp` hits `home/bob/cache/tmp`.
#[derive(Clone, Debug)]
pub struct Exclusions {
    set: GlobSet,
}

impl Exclusions {
    pub fn new<'a, I: IntoIterator<Item = &'a ExcludePattern>>(patterns: I) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        patterns.into_iter().for_each(|p| {
            builder.add(p.glob.clone());
        });
        Ok(Self {
            set: builder.build()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn is_excluded<P: AsRef<Path>>(&self, member: P) -> bool {
        if self.set.is_empty() {
            return false;
        }
        let components: Vec<Component> = member
            .as_ref()
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        (0..components.len()).any(|start| {
            let suffix: std::path::PathBuf = components[start..].iter().collect();
            self.set.is_match(&suffix)
        })
    }
}
