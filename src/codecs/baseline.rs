//! Baseline bitstream family
//!
//! Serves 10 ms and 7.5 ms frames with the core payload layout: no
//! bandwidth field, no error protection trailer.

use crate::codecs::frame::FrameCoder;
use crate::config::{CodecConfig, FrameDuration};
use crate::error::{CodecError, Result};

fn check_duration(config: &CodecConfig) -> Result<()> {
    match config.frame_duration {
        FrameDuration::Ms10 | FrameDuration::Ms7p5 => Ok(()),
        other => Err(CodecError::invalid_config(format!(
            "baseline family does not serve {} frames",
            other
        ))),
    }
}

/// Baseline encode engine.
pub(crate) struct BaselineEncoder {
    coder: FrameCoder,
}

impl BaselineEncoder {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        check_duration(config)?;
        Ok(Self {
            coder: FrameCoder::new(config, false)?,
        })
    }

    pub fn coder(&self) -> &FrameCoder {
        &self.coder
    }
}

/// Baseline decode engine.
pub(crate) struct BaselineDecoder {
    coder: FrameCoder,
}

impl BaselineDecoder {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        check_duration(config)?;
        Ok(Self {
            coder: FrameCoder::new(config, false)?,
        })
    }

    pub fn coder(&self) -> &FrameCoder {
        &self.coder
    }
}
