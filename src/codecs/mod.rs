//! Backend families and the startup capability registry
//!
//! Exactly one of two mutually exclusive families serves a session, chosen
//! at configuration time: the baseline format or the extended "plus"
//! format. Availability is resolved once at startup into a registry of
//! constructor and size-query function pointers; the Cargo features
//! `baseline` and `extended` decide only what gets registered. All callers
//! go through the same engine surface regardless of which family serves
//! them.

pub(crate) mod frame;

#[cfg(feature = "baseline")]
pub(crate) mod baseline;

#[cfg(feature = "extended")]
pub(crate) mod extended;

use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use self::frame::{PcmInput, PcmOutput};
use once_cell::sync::Lazy;

/// The two bitstream families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatFamily {
    /// Baseline format: 10 and 7.5 ms frames
    Baseline,
    /// Extended "plus" format: 10, 5 and 2.5 ms frames
    Extended,
}

impl FormatFamily {
    /// Stable family name, used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Extended => "extended",
        }
    }
}

impl std::fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode engine, selected once at init and immutable thereafter.
pub(crate) enum EncoderEngine {
    #[cfg(feature = "baseline")]
    Baseline(baseline::BaselineEncoder),
    #[cfg(feature = "extended")]
    Extended(extended::ExtendedEncoder),
}

impl EncoderEngine {
    pub fn family(&self) -> FormatFamily {
        match self {
            #[cfg(feature = "baseline")]
            Self::Baseline(_) => FormatFamily::Baseline,
            #[cfg(feature = "extended")]
            Self::Extended(_) => FormatFamily::Extended,
        }
    }

    fn coder(&self) -> &frame::FrameCoder {
        match self {
            #[cfg(feature = "baseline")]
            Self::Baseline(engine) => engine.coder(),
            #[cfg(feature = "extended")]
            Self::Extended(engine) => engine.coder(),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.coder().frame_samples()
    }

    pub fn init_state(&self, state_bytes: &mut [u8]) -> Result<()> {
        self.coder().init_encoder_state(state_bytes)
    }

    pub fn encode(
        &self,
        input: &PcmInput<'_>,
        state_bytes: &mut [u8],
        scratch_bytes: &mut [u8],
        out: &mut [u8],
    ) -> Result<()> {
        self.coder().encode_frame(input, state_bytes, scratch_bytes, out)
    }
}

/// Decode engine, selected once at init and immutable thereafter.
pub(crate) enum DecoderEngine {
    #[cfg(feature = "baseline")]
    Baseline(baseline::BaselineDecoder),
    #[cfg(feature = "extended")]
    Extended(extended::ExtendedDecoder),
}

impl DecoderEngine {
    pub fn family(&self) -> FormatFamily {
        match self {
            #[cfg(feature = "baseline")]
            Self::Baseline(_) => FormatFamily::Baseline,
            #[cfg(feature = "extended")]
            Self::Extended(_) => FormatFamily::Extended,
        }
    }

    fn coder(&self) -> &frame::FrameCoder {
        match self {
            #[cfg(feature = "baseline")]
            Self::Baseline(engine) => engine.coder(),
            #[cfg(feature = "extended")]
            Self::Extended(engine) => engine.coder(),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.coder().frame_samples()
    }

    pub fn init_state(&self, state_bytes: &mut [u8]) -> Result<()> {
        self.coder().init_decoder_state(state_bytes)
    }

    pub fn decode(
        &self,
        data: &[u8],
        bfi: bool,
        state_bytes: &mut [u8],
        scratch_bytes: &mut [u8],
        output: &mut PcmOutput<'_, '_>,
    ) -> Result<()> {
        self.coder().decode_frame(data, bfi, state_bytes, scratch_bytes, output)
    }
}

/// One registered backend family: constructors plus size queries.
///
/// Size queries report the instance and scratch block requirements without
/// allocating anything.
pub(crate) struct BackendEntry {
    pub family: FormatFamily,
    pub new_encoder: fn(&CodecConfig) -> Result<EncoderEngine>,
    pub new_decoder: fn(&CodecConfig) -> Result<DecoderEngine>,
    pub encoder_sizes: fn() -> (usize, usize),
    pub decoder_sizes: fn() -> (usize, usize),
}

/// Capability registry resolved once at startup.
pub(crate) struct BackendRegistry {
    entries: Vec<BackendEntry>,
}

impl BackendRegistry {
    fn startup() -> Self {
        let mut entries = Vec::new();

        #[cfg(feature = "baseline")]
        entries.push(BackendEntry {
            family: FormatFamily::Baseline,
            new_encoder: |config| {
                baseline::BaselineEncoder::new(config).map(EncoderEngine::Baseline)
            },
            new_decoder: |config| {
                baseline::BaselineDecoder::new(config).map(DecoderEngine::Baseline)
            },
            encoder_sizes: frame::encoder_sizes,
            decoder_sizes: frame::decoder_sizes,
        });

        #[cfg(feature = "extended")]
        entries.push(BackendEntry {
            family: FormatFamily::Extended,
            new_encoder: |config| {
                extended::ExtendedEncoder::new(config).map(EncoderEngine::Extended)
            },
            new_decoder: |config| {
                extended::ExtendedDecoder::new(config).map(DecoderEngine::Extended)
            },
            encoder_sizes: frame::encoder_sizes,
            decoder_sizes: frame::decoder_sizes,
        });

        Self { entries }
    }

    /// Whether a family was registered at startup.
    pub fn has(&self, family: FormatFamily) -> bool {
        self.entries.iter().any(|entry| entry.family == family)
    }

    /// Look up a family's entry.
    pub fn entry(&self, family: FormatFamily) -> Result<&BackendEntry> {
        self.entries
            .iter()
            .find(|entry| entry.family == family)
            .ok_or(CodecError::BackendUnavailable {
                family: family.name(),
            })
    }

    /// Names of the registered families.
    pub fn family_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.family.name()).collect()
    }
}

static REGISTRY: Lazy<BackendRegistry> = Lazy::new(BackendRegistry::startup);

/// The process-wide registry, built on first use.
pub(crate) fn registry() -> &'static BackendRegistry {
    &REGISTRY
}
