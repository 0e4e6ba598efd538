//! Codec configuration and capability negotiation
//!
//! A [`CodecConfig`] is filled in by the caller, then negotiated once at
//! session init: missing fields are defaulted, exactly one of bitrate and
//! frame size is derived from the other, and the backend family serving the
//! request is selected. Negotiation performs no allocation; every failure is
//! reported before any side effect beyond the config struct itself.

use crate::codecs::{BackendRegistry, FormatFamily};
use crate::error::{CodecError, Result};
use std::fmt;

/// Sample rates accepted by both backend families, in Hz.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[8000, 16000, 24000, 32000, 44100, 48000];

/// PCM bit depths accepted at the sample boundary.
pub const SUPPORTED_BIT_DEPTHS: &[u8] = &[16, 24, 32];

/// Maximum number of channels per session.
pub const MAX_CHANNELS: u8 = 4;

/// Maximum number of samples per channel in one frame.
pub const MAX_FRAME_SAMPLES: usize = 480;

/// Maximum number of bytes of one encoded frame (all channels).
pub const MAX_FRAME_BYTES: usize = 870;

/// Per-channel encoded byte budget bounds.
pub const MIN_CHANNEL_BYTES: usize = 10;
pub(crate) const MAX_CHANNEL_BYTES: usize = 400;

/// Frame duration, the codec time base.
///
/// Internally carried in tenths of a millisecond, matching the wire-level
/// convention of the bitstream families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDuration {
    /// 2.5 ms frames (extended family only)
    Ms2p5,
    /// 5 ms frames (extended family only)
    Ms5,
    /// 7.5 ms frames (baseline family only)
    Ms7p5,
    /// 10 ms frames
    Ms10,
}

impl FrameDuration {
    /// Duration in tenths of a millisecond.
    pub fn dms(self) -> u32 {
        match self {
            Self::Ms2p5 => 25,
            Self::Ms5 => 50,
            Self::Ms7p5 => 75,
            Self::Ms10 => 100,
        }
    }

    /// Parse a duration given in tenths of a millisecond.
    pub fn from_dms(dms: u32) -> Option<Self> {
        match dms {
            25 => Some(Self::Ms2p5),
            50 => Some(Self::Ms5),
            75 => Some(Self::Ms7p5),
            100 => Some(Self::Ms10),
            _ => None,
        }
    }
}

impl fmt::Display for FrameDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ms2p5 => write!(f, "2.5ms"),
            Self::Ms5 => write!(f, "5ms"),
            Self::Ms7p5 => write!(f, "7.5ms"),
            Self::Ms10 => write!(f, "10ms"),
        }
    }
}

/// Multi-channel PCM layout at the sample boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PcmLayout {
    /// One buffer per channel
    #[default]
    Planar,
    /// One buffer, channels interleaved with a fixed per-channel byte stride
    Interlaced,
}

impl PcmLayout {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Planar => "planar",
            Self::Interlaced => "interlaced",
        }
    }
}

/// Decoder packet loss concealment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlcMethod {
    /// Envelope-shaped noise substitution; less complex
    #[default]
    Standard,
    /// Damped replay of the last good frame; enhanced concealment
    Advanced,
}

/// Error protection mode (extended family).
///
/// `Zero` differs from `Off` in that errors can be detected but not
/// corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpMode {
    /// Error protection disabled
    #[default]
    Off,
    /// Detection only, no correction
    Zero,
    /// Detection, one-symbol correction strength requested
    Low,
    /// Detection, two-symbol correction strength requested
    Medium,
    /// Detection, three-symbol correction strength requested
    High,
}

/// Error protection mode request carried in protected frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpModeRequest {
    /// Request no error correction
    #[default]
    Zero,
    /// Request low error correction
    Low,
    /// Request medium error correction
    Medium,
    /// Request high error correction
    High,
}

impl EpModeRequest {
    pub(crate) fn to_bits(self) -> u32 {
        match self {
            Self::Zero => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::Zero,
        }
    }
}

/// Codec configuration shared by encoder and decoder sessions.
///
/// Zero-valued numeric fields mean "unset": `bit_alignment` defaults to
/// `bit_depth`, and exactly one of `bitrate` and `frame_size` must be
/// supplied — the other is derived during negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1..=4)
    pub channels: u8,
    /// PCM sample bit depth (16, 24 or 32)
    pub bit_depth: u8,
    /// PCM container width in bits; 0 defaults to `bit_depth`
    pub bit_alignment: u8,
    /// Frame duration
    pub frame_duration: FrameDuration,
    /// Total bitrate in bits per second; 0 derives from `frame_size`
    pub bitrate: u32,
    /// Encoded frame size in bytes (all channels); 0 derives from `bitrate`
    pub frame_size: u16,
    /// Audio bandwidth limit in Hz; 0 means full bandwidth
    pub bandwidth: u32,
    /// Multi-channel PCM layout
    pub layout: PcmLayout,
    /// Packet loss concealment method (decoder)
    pub plc_method: PlcMethod,
    /// Error protection mode (extended family)
    pub ep_mode: EpMode,
    /// Error protection mode request (extended family, encoder)
    pub ep_mode_request: EpModeRequest,
    /// Derived: the extended family serves this configuration
    pub(crate) extended: bool,
}

impl CodecConfig {
    /// Create a configuration with the given core parameters.
    ///
    /// Rate control is left unset; use [`with_bitrate`](Self::with_bitrate)
    /// or [`with_frame_size`](Self::with_frame_size) before init.
    pub fn new(sample_rate: u32, channels: u8, frame_duration: FrameDuration) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth: 16,
            bit_alignment: 0,
            frame_duration,
            bitrate: 0,
            frame_size: 0,
            bandwidth: 0,
            layout: PcmLayout::Planar,
            plc_method: PlcMethod::Standard,
            ep_mode: EpMode::Off,
            ep_mode_request: EpModeRequest::Zero,
            extended: false,
        }
    }

    /// Set the total bitrate in bits per second.
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Set the encoded frame size in bytes.
    pub fn with_frame_size(mut self, frame_size: u16) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the PCM bit depth.
    pub fn with_bit_depth(mut self, bit_depth: u8) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    /// Set the PCM container width in bits.
    pub fn with_bit_alignment(mut self, bit_alignment: u8) -> Self {
        self.bit_alignment = bit_alignment;
        self
    }

    /// Set the multi-channel PCM layout.
    pub fn with_layout(mut self, layout: PcmLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the audio bandwidth limit in Hz.
    pub fn with_bandwidth(mut self, bandwidth: u32) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Set the packet loss concealment method.
    pub fn with_plc_method(mut self, plc_method: PlcMethod) -> Self {
        self.plc_method = plc_method;
        self
    }

    /// Set the error protection mode.
    pub fn with_ep_mode(mut self, ep_mode: EpMode) -> Self {
        self.ep_mode = ep_mode;
        self
    }

    /// Set the error protection mode request.
    pub fn with_ep_mode_request(mut self, request: EpModeRequest) -> Self {
        self.ep_mode_request = request;
        self
    }

    /// Samples per channel in one frame.
    ///
    /// 44100 Hz shares the 48 kHz frame grid, which is also why the rate
    /// derivation in [`negotiate`](Self::negotiate) carries a 44100/48000
    /// correction factor.
    pub fn frame_samples(&self) -> usize {
        let effective = if self.sample_rate == 44100 {
            48000
        } else {
            self.sample_rate
        };
        (effective as usize) * (self.frame_duration.dms() as usize) / 10_000
    }

    /// Whether the extended family was selected for this configuration.
    ///
    /// Meaningful after negotiation.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Validate the configuration, derive missing fields and select the
    /// backend family.
    ///
    /// The `overlay` hook, when present, gets a last chance to edit the
    /// configuration after derivation and before backend construction.
    pub(crate) fn negotiate<'c>(
        &mut self,
        registry: &BackendRegistry,
        overlay: Option<&mut (dyn FnMut(&mut CodecConfig) + Send + 'c)>,
    ) -> Result<FormatFamily> {
        if self.sample_rate == 0 || !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(CodecError::UnsupportedSampleRate {
                rate: self.sample_rate,
                supported: SUPPORTED_SAMPLE_RATES.to_vec(),
            });
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(CodecError::UnsupportedChannelCount {
                channels: self.channels,
                max: MAX_CHANNELS,
            });
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&self.bit_depth) {
            return Err(CodecError::UnsupportedBitDepth {
                bits: self.bit_depth,
                supported: SUPPORTED_BIT_DEPTHS.to_vec(),
            });
        }

        if self.bit_alignment == 0 {
            self.bit_alignment = self.bit_depth;
        }
        if self.bit_alignment < self.bit_depth {
            return Err(CodecError::AlignmentTooNarrow {
                alignment: self.bit_alignment,
                depth: self.bit_depth,
            });
        }
        if self.bit_alignment % 8 != 0 || self.bit_alignment > 32 {
            return Err(CodecError::invalid_config(format!(
                "bit alignment {} is not a container width",
                self.bit_alignment
            )));
        }

        self.derive_rate_control()?;

        let frame_size = self.frame_size as usize;
        let per_channel = frame_size / self.channels as usize;
        if frame_size > MAX_FRAME_BYTES
            || per_channel < MIN_CHANNEL_BYTES
            || frame_size.div_ceil(self.channels as usize) > MAX_CHANNEL_BYTES
        {
            return Err(CodecError::FrameSizeOutOfRange {
                bytes: frame_size,
                min: MIN_CHANNEL_BYTES * self.channels as usize,
                max: MAX_FRAME_BYTES,
            });
        }

        // 7.5 ms is the one duration the extended family does not serve,
        // even when compiled in.
        let family = match self.frame_duration {
            FrameDuration::Ms7p5 => FormatFamily::Baseline,
            FrameDuration::Ms10 => {
                if registry.has(FormatFamily::Extended) {
                    FormatFamily::Extended
                } else {
                    FormatFamily::Baseline
                }
            }
            FrameDuration::Ms2p5 | FrameDuration::Ms5 => FormatFamily::Extended,
        };
        if !registry.has(family) {
            return Err(CodecError::BackendUnavailable {
                family: family.name(),
            });
        }
        self.extended = family == FormatFamily::Extended;

        if self.bandwidth != 0 && self.bandwidth > self.sample_rate / 2 {
            return Err(CodecError::invalid_config(format!(
                "bandwidth {}Hz exceeds Nyquist for {}Hz",
                self.bandwidth, self.sample_rate
            )));
        }
        if self.ep_mode != EpMode::Off && !self.extended {
            return Err(CodecError::invalid_config(
                "error protection requires the extended family",
            ));
        }

        if let Some(hook) = overlay {
            hook(self);
        }

        Ok(family)
    }

    /// Derive whichever of bitrate and frame size is missing.
    ///
    /// The 44100 Hz correction is applied after the base formula and only in
    /// the direction being derived; the integer rounding order is part of
    /// the contract and must not be algebraically merged.
    fn derive_rate_control(&mut self) -> Result<()> {
        let dms = self.frame_duration.dms() as u64;
        match (self.bitrate, self.frame_size) {
            (0, 0) => return Err(CodecError::RateControlMissing),
            (b, 0) => {
                let mut frame_size = (b as u64) * dms / 80_000;
                if self.sample_rate == 44100 {
                    frame_size = frame_size * 48_000 / 44_100;
                }
                self.frame_size = frame_size.min(u16::MAX as u64) as u16;
            }
            (0, f) => {
                let mut bitrate = (f as u64) * 80_000 / dms;
                if self.sample_rate == 44100 {
                    bitrate = bitrate * 44_100 / 48_000;
                }
                self.bitrate = bitrate.min(u32::MAX as u64) as u32;
            }
            (_, _) => return Err(CodecError::RateControlConflict),
        }
        Ok(())
    }
}
