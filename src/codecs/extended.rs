//! Extended ("plus") bitstream family
//!
//! Serves 10, 5 and 2.5 ms frames. On top of the core payload it carries a
//! bandwidth cutoff field for the surrounding filter-bank stage and, when
//! error protection is enabled, an ep mode request plus a CRC trailer per
//! channel. Corrupted protected frames are detected and routed to
//! concealment rather than decoded.

use crate::codecs::frame::FrameCoder;
use crate::config::{CodecConfig, FrameDuration};
use crate::error::{CodecError, Result};

fn check_duration(config: &CodecConfig) -> Result<()> {
    match config.frame_duration {
        FrameDuration::Ms10 | FrameDuration::Ms5 | FrameDuration::Ms2p5 => Ok(()),
        other => Err(CodecError::invalid_config(format!(
            "extended family does not serve {} frames",
            other
        ))),
    }
}

/// Extended encode engine.
pub(crate) struct ExtendedEncoder {
    coder: FrameCoder,
}

impl ExtendedEncoder {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        check_duration(config)?;
        Ok(Self {
            coder: FrameCoder::new(config, true)?,
        })
    }

    pub fn coder(&self) -> &FrameCoder {
        &self.coder
    }
}

/// Extended decode engine.
pub(crate) struct ExtendedDecoder {
    coder: FrameCoder,
}

impl ExtendedDecoder {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        check_duration(config)?;
        Ok(Self {
            coder: FrameCoder::new(config, true)?,
        })
    }

    pub fn coder(&self) -> &FrameCoder {
        &self.coder
    }
}
