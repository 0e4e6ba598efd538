//! Decoder session
//!
//! Mirrors the encoder session lifecycle: `new` -> (attach pool, optional
//! overlay hook) -> `init` -> per-frame `decode_planar` /
//! `decode_interlaced` -> `uninit`. Decode takes a bad-frame indicator;
//! lost or corrupted frames are concealed with the configured method
//! instead of failing the call.

use crate::codecs::frame::{self, PcmOutput};
use crate::codecs::{registry, DecoderEngine, FormatFamily};
use crate::config::{CodecConfig, EpModeRequest, PcmLayout};
use crate::error::{CodecError, Result};
use crate::interlace::Layout;
use crate::pool::{MemoryPool, PoolBlock};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Uninitialized,
    Ready,
}

/// One decode direction of the codec runtime.
pub struct Decoder {
    config: CodecConfig,
    pool: Option<Arc<dyn MemoryPool>>,
    overlay: Option<Box<dyn FnMut(&mut CodecConfig) + Send>>,
    engine: Option<DecoderEngine>,
    instance: Option<PoolBlock>,
    scratch: Option<PoolBlock>,
    state: SessionState,
}

impl Decoder {
    /// Create a decoder session for a configuration.
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

    /// Attach a last-chance configuration overlay hook.
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

        let (instance_size, scratch_size) = (entry.decoder_sizes)();
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

        let engine = (entry.new_decoder)(&self.config)?;
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
            plc = ?self.config.plc_method,
            "decoder ready"
        );
        self.engine = Some(engine);
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Decode one frame into planar PCM buffers.
    ///
    /// `data` must hold exactly [`frame_size`](Self::frame_size) bytes
    /// unless `bfi` marks the frame as lost, in which case it is ignored
    /// and the concealment output is written instead. Returns the samples
    /// written per channel.
    pub fn decode_planar(
        &mut self,
        data: &[u8],
        channels: &mut [&mut [u8]],
        bfi: bool,
    ) -> Result<usize> {
        self.ensure_ready()?;
        if self.config.layout != PcmLayout::Planar {
            return Err(CodecError::LayoutMismatch {
                configured: self.config.layout.as_str(),
            });
        }
        if channels.len() != self.config.channels as usize {
            return Err(CodecError::invalid_input(format!(
                "expected {} channels, got {}",
                self.config.channels,
                channels.len()
            )));
        }
        let layout = Layout::from_config(&self.config);
        let needed = layout.planar_bytes(self.config.frame_samples());
        for buf in channels.iter() {
            if buf.len() < needed {
                return Err(CodecError::BufferTooSmall {
                    needed,
                    actual: buf.len(),
                });
            }
        }
        self.check_payload(data, bfi)?;
        self.decode_frame(data, &mut PcmOutput::Planar(channels), bfi)
    }

    /// Decode one frame into an interleaved PCM buffer.
    pub fn decode_interlaced(&mut self, data: &[u8], pcm: &mut [u8], bfi: bool) -> Result<usize> {
        self.ensure_ready()?;
        if self.config.layout != PcmLayout::Interlaced {
            return Err(CodecError::LayoutMismatch {
                configured: self.config.layout.as_str(),
            });
        }
        let layout = Layout::from_config(&self.config);
        let needed = layout.interlaced_bytes(self.config.frame_samples());
        if pcm.len() < needed {
            return Err(CodecError::BufferTooSmall {
                needed,
                actual: pcm.len(),
            });
        }
        self.check_payload(data, bfi)?;
        self.decode_frame(data, &mut PcmOutput::Interlaced(pcm), bfi)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.engine.is_none() || self.state != SessionState::Ready {
            return Err(CodecError::NotReady);
        }
        Ok(())
    }

    fn check_payload(&self, data: &[u8], bfi: bool) -> Result<()> {
        if bfi {
            return Ok(());
        }
        let expected = self.config.frame_size as usize;
        if data.len() != expected {
            return Err(CodecError::InvalidFrameSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(())
    }

    fn decode_frame(
        &mut self,
        data: &[u8],
        output: &mut PcmOutput<'_, '_>,
        bfi: bool,
    ) -> Result<usize> {
        let engine = self.engine.as_ref().ok_or(CodecError::NotReady)?;
        let instance = self.instance.as_mut().ok_or(CodecError::NotReady)?;
        let scratch = self.scratch.as_mut().ok_or(CodecError::NotReady)?;
        engine.decode(
            data,
            bfi,
            instance.bytes_mut(),
            scratch.bytes_mut(),
            output,
        )?;
        Ok(engine.frame_samples())
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
        self.engine.as_ref().map(DecoderEngine::family)
    }

    /// Samples per channel produced by one frame call.
    pub fn frame_samples(&self) -> usize {
        self.config.frame_samples()
    }

    /// Bytes consumed by one frame call.
    pub fn frame_size(&self) -> usize {
        self.config.frame_size as usize
    }

    /// Whether the session is ready for frame calls.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Error protection mode request carried by the most recent protected
    /// frame, if any was decoded yet.
    pub fn ep_mode_request(&self) -> Option<EpModeRequest> {
        let state = frame::decoder_state_ref(self.instance.as_ref()?.bytes()).ok()?;
        Some(EpModeRequest::from_bits(state.epmr()))
    }

    /// Bandwidth cutoff band received on a channel (extended family).
    pub fn bandwidth_cutoff(&self, ch: usize) -> Option<u32> {
        if ch >= self.config.channels as usize {
            return None;
        }
        let state = frame::decoder_state_ref(self.instance.as_ref()?.bytes()).ok()?;
        Some(state.bw_cutoff(ch))
    }

    /// Frames concealed in a row on a channel.
    pub fn conceal_count(&self, ch: usize) -> Option<u32> {
        if ch >= self.config.channels as usize {
            return None;
        }
        let state = frame::decoder_state_ref(self.instance.as_ref()?.bytes()).ok()?;
        Some(state.bfi_count(ch))
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("family", &self.family())
            .finish_non_exhaustive()
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        if self.instance.is_some() || self.scratch.is_some() {
            tracing::warn!("decoder dropped without uninit; pool blocks not returned");
        }
    }
}
