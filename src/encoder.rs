//! Encoder session
//!
//! Lifecycle: `new` -> (attach pool, optional overlay hook) -> `init` ->
//! per-frame `encode_planar` / `encode_interlaced` -> `uninit`. Frame calls
//! are synchronous and non-reentrant; a session is driven by one thread at
//! a time and shares no memory with other sessions.
//!
//! Init failure after the instance block was allocated intentionally keeps
//! the block on the session: callers must call `uninit` even after a failed
//! `init`, exactly like a successful one.

use crate::codecs::frame::PcmInput;
use crate::codecs::{registry, EncoderEngine, FormatFamily};
use crate::config::{CodecConfig, PcmLayout};
use crate::error::{CodecError, Result};
use crate::interlace::Layout;
use crate::pool::{MemoryPool, PoolBlock};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Uninitialized,
    Ready,
}

/// One encode direction of the codec runtime.
pub struct Encoder {
    config: CodecConfig,
    pool: Option<Arc<dyn MemoryPool>>,
    overlay: Option<Box<dyn FnMut(&mut CodecConfig) + Send>>,
    engine: Option<EncoderEngine>,
    instance: Option<PoolBlock>,
    scratch: Option<PoolBlock>,
    state: SessionState,
}

impl Encoder {
    /// Create an encoder session for a configuration.
    ///
    /// Nothing is validated or allocated until [`init`](Self::init).
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            pool: None,
            overlay: None,
            engine: None,
            instance: None,
            scratch: None,
            state: SessionState::Uninitialized,
        }
    }

    /// Attach the memory pool serving this session's two allocations.
    pub fn with_pool(mut self, pool: Arc<dyn MemoryPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Attach a last-chance configuration overlay hook, invoked after
    /// negotiation derives the missing fields and before the backend is
    /// constructed.
    pub fn with_overlay<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut CodecConfig) + Send + 'static,
    {
        self.overlay = Some(Box::new(hook));
        self
    }

    /// Negotiate the configuration, select the backend family and allocate
    /// the instance and scratch blocks.
    pub fn init(&mut self) -> Result<()> {
        if self.state == SessionState::Ready || self.instance.is_some() {
            return Err(CodecError::AlreadyInitialized);
        }
        let pool = self.pool.as_ref().ok_or(CodecError::MissingAllocator)?.clone();

        let family = self
            .config
            .negotiate(registry(), self.overlay.as_deref_mut())?;
        let entry = registry().entry(family)?;

        let (instance_size, scratch_size) = (entry.encoder_sizes)();
        let mut instance = pool
            .allocate(instance_size)
            .ok_or(CodecError::AllocationFailed {
                size: instance_size,
            })?;
        // A reusing pool may hand back a dirty block.
        instance.clear();
        self.instance = Some(instance);
        if scratch_size > 0 {
            let mut scratch = pool
                .allocate(scratch_size)
                .ok_or(CodecError::AllocationFailed { size: scratch_size })?;
            scratch.clear();
            self.scratch = Some(scratch);
        }

        let engine = (entry.new_encoder)(&self.config)?;
        let instance = self
            .instance
            .as_mut()
            .ok_or_else(|| CodecError::internal("instance block vanished during init"))?;
        engine.init_state(instance.bytes_mut())?;

        tracing::debug!(
            family = %family,
            sample_rate = self.config.sample_rate,
            channels = self.config.channels,
            bitrate = self.config.bitrate,
            frame_size = self.config.frame_size,
            frame_samples = engine.frame_samples(),
            layout = self.config.layout.as_str(),
            "encoder ready"
        );
        self.engine = Some(engine);
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Encode one frame of planar PCM into `out`.
    ///
    /// `channels` holds one buffer per channel of `frame_samples` samples in
    /// `bit_alignment`-wide containers. Writes exactly
    /// [`frame_size`](Self::frame_size) bytes and returns that count.
    pub fn encode_planar(&mut self, channels: &[&[u8]], out: &mut [u8]) -> Result<usize> {
        self.ensure_ready()?;
        if self.config.layout != PcmLayout::Planar {
            return Err(CodecError::LayoutMismatch {
                configured: self.config.layout.as_str(),
            });
        }
        self.check_input_lengths(channels.len(), None)?;
        let layout = Layout::from_config(&self.config);
        let needed = layout.planar_bytes(self.config.frame_samples());
        for buf in channels {
            if buf.len() < needed {
                return Err(CodecError::BufferTooSmall {
                    needed,
                    actual: buf.len(),
                });
            }
        }
        self.encode_frame(&PcmInput::Planar(channels), out)
    }

    /// Encode one frame of interleaved PCM into `out`.
    ///
    /// `pcm` holds `frame_samples * channels` samples with a per-channel
    /// byte stride of `bit_alignment / 8`.
    pub fn encode_interlaced(&mut self, pcm: &[u8], out: &mut [u8]) -> Result<usize> {
        self.ensure_ready()?;
        if self.config.layout != PcmLayout::Interlaced {
            return Err(CodecError::LayoutMismatch {
                configured: self.config.layout.as_str(),
            });
        }
        self.check_input_lengths(self.config.channels as usize, Some(pcm.len()))?;
        self.encode_frame(&PcmInput::Interlaced(pcm), out)
    }

    /// Allocating convenience wrapper around [`encode_planar`](Self::encode_planar).
    pub fn encode_planar_buf(&mut self, channels: &[&[u8]]) -> Result<Bytes> {
        let mut out = BytesMut::zeroed(self.config.frame_size as usize);
        self.encode_planar(channels, &mut out)?;
        Ok(out.freeze())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.engine.is_none() || self.state != SessionState::Ready {
            return Err(CodecError::NotReady);
        }
        Ok(())
    }

    fn check_input_lengths(&self, channel_count: usize, interlaced_len: Option<usize>) -> Result<()> {
        if channel_count != self.config.channels as usize {
            return Err(CodecError::invalid_input(format!(
                "expected {} channels, got {}",
                self.config.channels, channel_count
            )));
        }
        if let Some(len) = interlaced_len {
            let layout = Layout::from_config(&self.config);
            let needed = layout.interlaced_bytes(self.config.frame_samples());
            if len < needed {
                return Err(CodecError::BufferTooSmall {
                    needed,
                    actual: len,
                });
            }
        }
        Ok(())
    }

    fn encode_frame(&mut self, input: &PcmInput<'_>, out: &mut [u8]) -> Result<usize> {
        let frame_size = self.config.frame_size as usize;
        if out.is_empty() {
            return Err(CodecError::invalid_input("output buffer is empty"));
        }
        if out.len() < frame_size {
            return Err(CodecError::BufferTooSmall {
                needed: frame_size,
                actual: out.len(),
            });
        }
        let engine = self.engine.as_ref().ok_or(CodecError::NotReady)?;
        let instance = self.instance.as_mut().ok_or(CodecError::NotReady)?;
        let scratch = self.scratch.as_mut().ok_or(CodecError::NotReady)?;
        engine.encode(
            input,
            instance.bytes_mut(),
            scratch.bytes_mut(),
            &mut out[..frame_size],
        )?;
        Ok(frame_size)
    }

    /// Release the instance and scratch blocks back to the pool.
    ///
    /// Each block is released exactly once; calling `uninit` again is a
    /// no-op. Required after every `init`, including a failed one.
    pub fn uninit(&mut self) -> Result<()> {
        self.engine = None;
        self.state = SessionState::Uninitialized;
        if let Some(pool) = self.pool.as_ref() {
            if let Some(block) = self.instance.take() {
                pool.release(block);
            }
            if let Some(block) = self.scratch.take() {
                pool.release(block);
            }
        }
        Ok(())
    }

    /// The (possibly negotiated) configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Backend family serving this session, once initialized.
    pub fn family(&self) -> Option<FormatFamily> {
        self.engine.as_ref().map(EncoderEngine::family)
    }

    /// Samples per channel consumed by one frame call.
    pub fn frame_samples(&self) -> usize {
        self.config.frame_samples()
    }

    /// Bytes produced by one frame call.
    pub fn frame_size(&self) -> usize {
        self.config.frame_size as usize
    }

    /// Whether the session is ready for frame calls.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("family", &self.family())
            .finish_non_exhaustive()
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        if self.instance.is_some() || self.scratch.is_some() {
            tracing::warn!("encoder dropped without uninit; pool blocks not returned");
        }
    }
}
