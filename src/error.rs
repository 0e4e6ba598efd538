//! Error handling for the codec runtime
//!
//! This module defines the error type shared by configuration, session
//! lifecycle and per-frame operations, together with the category
//! partitioning callers use to decide between fixing their configuration,
//! fixing a call site, or re-initializing a stream.

#![allow(missing_docs)]

use std::fmt;
use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Error type for codec operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Invalid codec configuration
    #[error("Invalid codec configuration: {details}")]
    InvalidConfig { details: String },

    /// Unsupported sample rate
    #[error("Unsupported sample rate: {rate}Hz (supported: {supported:?})")]
    UnsupportedSampleRate { rate: u32, supported: Vec<u32> },

    /// Unsupported channel count
    #[error("Unsupported channel count: {channels} (supported: 1..={max})")]
    UnsupportedChannelCount { channels: u8, max: u8 },

    /// Unsupported PCM bit depth
    #[error("Unsupported bit depth: {bits} (supported: {supported:?})")]
    UnsupportedBitDepth { bits: u8, supported: Vec<u8> },

    /// Bit alignment narrower than the sample bit depth
    #[error("Bit alignment {alignment} is narrower than bit depth {depth}")]
    AlignmentTooNarrow { alignment: u8, depth: u8 },

    /// Neither bitrate nor frame size was supplied
    #[error("Rate control missing: supply exactly one of bitrate or frame_size")]
    RateControlMissing,

    /// Both bitrate and frame size were supplied
    #[error("Rate control over-specified: supply exactly one of bitrate or frame_size")]
    RateControlConflict,

    /// Derived or supplied frame size outside the legal byte range
    #[error("Frame size {bytes} bytes outside supported range {min}..={max}")]
    FrameSizeOutOfRange { bytes: usize, min: usize, max: usize },

    /// No memory pool was attached to the session
    #[error("No memory pool attached: a pool allocator is required before init")]
    MissingAllocator,

    /// The backend family serving this configuration is not available
    #[error("Backend family {family} is not available in this build")]
    BackendUnavailable { family: &'static str },

    /// Session used before successful initialization (or after uninit)
    #[error("Session is not initialized")]
    NotReady,

    /// Session initialized twice without an intervening uninit
    #[error("Session is already initialized")]
    AlreadyInitialized,

    /// Planar entry point called on an interlaced session or vice versa
    #[error("PCM layout mismatch: session is configured for {configured} input")]
    LayoutMismatch { configured: &'static str },

    /// Frame buffer does not match the negotiated frame size
    #[error("Invalid frame size: expected {expected}, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Buffer too small for the operation
    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// Per-frame input missing or empty
    #[error("Invalid frame input: {details}")]
    InvalidInput { details: String },

    /// Pool allocation failed
    #[error("Pool allocation of {size} bytes failed")]
    AllocationFailed { size: usize },

    /// Backend-reported numeric failure, surfaced verbatim
    #[error("Backend failure: code {code}")]
    Backend { code: i32 },

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {message} (this is a bug, please report it)")]
    Internal { message: String },
}

impl CodecError {
    /// Create a new invalid configuration error
    pub fn invalid_config(details: impl Into<String>) -> Self {
        Self::InvalidConfig {
            details: details.into(),
        }
    }

    /// Create a new invalid frame input error
    pub fn invalid_input(details: impl Into<String>) -> Self {
        Self::InvalidInput {
            details: details.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfig { .. }
            | Self::UnsupportedSampleRate { .. }
            | Self::UnsupportedChannelCount { .. }
            | Self::UnsupportedBitDepth { .. }
            | Self::AlignmentTooNarrow { .. }
            | Self::RateControlMissing
            | Self::RateControlConflict
            | Self::FrameSizeOutOfRange { .. }
            | Self::MissingAllocator
            | Self::BackendUnavailable { .. } => ErrorCategory::Configuration,

            Self::NotReady
            | Self::AlreadyInitialized
            | Self::LayoutMismatch { .. }
            | Self::InvalidFrameSize { .. }
            | Self::BufferTooSmall { .. }
            | Self::InvalidInput { .. } => ErrorCategory::Parameter,

            Self::AllocationFailed { .. } | Self::Backend { .. } | Self::Internal { .. } => {
                ErrorCategory::Runtime
            }
        }
    }

    /// Whether the stream must be re-initialized after this error.
    ///
    /// Runtime errors during encode/decode leave the instance state
    /// unspecified; the contract requires `uninit` + `init` (or stream
    /// abandonment) before further frame calls.
    pub fn requires_reinit(&self) -> bool {
        self.category() == ErrorCategory::Runtime
    }
}

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A documented precondition was violated; detected before any
    /// allocation, with zero side effects
    Configuration,
    /// A per-frame call violated the call contract; nothing was written
    Parameter,
    /// Allocation failure or backend-reported failure during init or a
    /// frame call
    Runtime,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Parameter => write!(f, "Parameter"),
            Self::Runtime => write!(f, "Runtime"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CodecError::invalid_config("test message");
        assert!(matches!(err, CodecError::InvalidConfig { .. }));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            CodecError::MissingAllocator.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            CodecError::LayoutMismatch {
                configured: "planar"
            }
            .category(),
            ErrorCategory::Parameter
        );
        assert_eq!(
            CodecError::Backend { code: -1 }.category(),
            ErrorCategory::Runtime
        );
    }

    #[test]
    fn test_reinit_contract() {
        assert!(CodecError::AllocationFailed { size: 128 }.requires_reinit());
        assert!(!CodecError::NotReady.requires_reinit());
        assert!(!CodecError::RateControlMissing.requires_reinit());
    }

    #[test]
    fn test_error_display() {
        let err = CodecError::InvalidFrameSize {
            expected: 40,
            actual: 39,
        };
        let display = format!("{}", err);
        assert!(display.contains("expected 40"));
        assert!(display.contains("got 39"));
    }
}
