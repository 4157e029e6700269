use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use validator::Validate;

/// Default gzip level, same as the `gzip` command line tool
static DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Gzip settings for the archive stream
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GzipConfig {
    /// Compression level (0-9)
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,
}

impl GzipConfig {
    pub fn with_level(level: u32) -> Self {
        Self { level: Some(level) }
    }

    pub fn level(&self) -> u32 {
        self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn build_compressor<W: Write>(&self, writer: W) -> GzEncoder<W> {
        tracing::debug!("Creating gzip compressor with level={}", self.level());
        GzEncoder::new(writer, Compression::new(self.level()))
    }
}
