//! Gzip compression.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::Transform;
use crate::error::{Error, Result};

pub const GZIP_SUFFIX: &str = ".gz";

/// Gzip with a fixed header (no mtime, no file name), so equal input gives
/// equal output.
#[derive(Debug, Clone, Copy)]
pub struct Gzip {
    level: Compression,
}

impl Gzip {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn suffix(&self) -> &str {
        GZIP_SUFFIX
    }

    fn encode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
        let mut encoder = GzEncoder::new(output, self.level);
        std::io::copy(input, &mut encoder).map_err(|e| Error::transform("gzip", e))?;
        encoder.finish().map_err(|e| Error::transform("gzip", e))?;
        Ok(())
    }

    fn decode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
        let mut decoder = GzDecoder::new(input);
        std::io::copy(&mut decoder, output)
            .map_err(|e| Error::transform("gzip", format!("failed to decompress: {e}")))?;
        Ok(())
    }
}
