//! # LC3 Core: Low-Latency Audio Codec Runtime
//!
//! This library hosts the two related bitstream families of a low-latency
//! audio codec — a baseline format and an extended "plus" format — behind
//! one uniform session contract. The backend family is selected once at
//! configuration time; callers drive encode and decode sessions without
//! knowing which family serves them.
//!
//! ## Design
//!
//! - **Capability negotiation**: configurations are validated and completed
//!   (bitrate/frame-size derivation, alignment defaults) before anything is
//!   allocated, then routed to the one family serving the frame duration.
//! - **Caller-supplied memory pool**: each session performs exactly two
//!   allocations for its whole lifetime — one instance block and one
//!   scratch block — through the [`MemoryPool`] arena trait.
//! - **Spectral envelope quantization**: per-frame scale factors run
//!   through a two-stage vector quantizer whose pulse configurations are
//!   ranked by a bijective enumeration ([`sns::mpvq`]).
//! - **Planar and interlaced PCM**: multi-channel buffers are consumed in
//!   place in either layout; the layout is part of the configuration and a
//!   mismatched frame call is a hard contract violation.
//!
//! ## Usage
//!
//! ```rust
//! use lc3_core::{pcm_bytes, pcm_bytes_mut, CodecConfig, Decoder, Encoder, FrameDuration, HeapPool};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(HeapPool::new());
//! let config = CodecConfig::new(16000, 1, FrameDuration::Ms10).with_bitrate(32000);
//!
//! let mut encoder = Encoder::new(config.clone()).with_pool(pool.clone());
//! encoder.init()?;
//!
//! let pcm = vec![0i16; encoder.frame_samples()];
//! let mut frame = vec![0u8; encoder.frame_size()];
//! encoder.encode_planar(&[pcm_bytes(&pcm)], &mut frame)?;
//!
//! let mut decoder = Decoder::new(config).with_pool(pool.clone());
//! decoder.init()?;
//! let mut out = vec![0i16; decoder.frame_samples()];
//! decoder.decode_planar(&frame, &mut [pcm_bytes_mut(&mut out)], false)?;
//!
//! encoder.uninit()?;
//! decoder.uninit()?;
//! # Ok::<(), lc3_core::CodecError>(())
//! ```
//!
//! ## Concurrency
//!
//! Sessions are synchronous and non-reentrant; one thread drives one
//! session at a time, enforced by `&mut self`. Independent sessions share
//! no memory and may run on separate threads. The library spawns no
//! threads and performs no I/O.
//!
//! ## Feature Flags
//!
//! - `baseline`: the baseline bitstream family (enabled by default)
//! - `extended`: the extended "plus" bitstream family (enabled by default)

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod codecs;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod interlace;
pub mod pool;
pub mod sns;
pub mod utils;

#[cfg(test)]
mod tests;

pub use codecs::FormatFamily;
pub use config::{
    CodecConfig, EpMode, EpModeRequest, FrameDuration, PcmLayout, PlcMethod,
};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{CodecError, ErrorCategory, Result};
pub use interlace::{pcm_bytes, pcm_bytes_mut};
pub use pool::{HeapPool, MemoryPool, PoolBlock};

/// Version of the codec runtime.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Names of the bitstream families compiled into this build.
pub const SUPPORTED_FAMILIES: &[&str] = &[
    #[cfg(feature = "baseline")]
    "baseline",
    #[cfg(feature = "extended")]
    "extended",
];

/// Initialize the codec runtime.
///
/// Installs a default tracing subscriber if none is set, resolves the
/// backend registry and warms the enumeration offset table. Safe to call
/// multiple times; sessions do not require it but benefit from the tables
/// being built ahead of the first frame.
pub fn init() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let registry = codecs::registry();
    let _ = sns::mpvq::size(sns::mpvq::MAX_DIM, sns::mpvq::MAX_PULSES);

    tracing::info!(
        version = VERSION,
        families = ?registry.family_names(),
        "codec runtime initialized"
    );
    Ok(())
}
