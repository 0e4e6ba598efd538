//! Cross-module integration tests
//!
//! End-to-end session tests covering the negotiation / dispatch / pool
//! lifecycle and the frame round trip through both backend families,
//! plus property tests over the enumeration and rate-derivation laws.

use crate::config::{CodecConfig, EpMode, EpModeRequest, FrameDuration, PcmLayout, PlcMethod};
use crate::error::{CodecError, ErrorCategory};
use crate::interlace::{pcm_bytes, pcm_bytes_mut};
use crate::pool::{HeapPool, MemoryPool, PoolBlock};
use crate::{Decoder, Encoder, FormatFamily};
use std::sync::Arc;

fn sine(samples: usize, amplitude: f32, period: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| {
            let phase = i as f32 / period as f32 * std::f32::consts::TAU;
            (phase.sin() * amplitude * 32767.0) as i16
        })
        .collect()
}

fn config_16k_mono() -> CodecConfig {
    CodecConfig::new(16000, 1, FrameDuration::Ms10).with_bitrate(32000)
}

fn ready_pair(config: CodecConfig) -> (Encoder, Decoder, Arc<HeapPool>) {
    let pool = Arc::new(HeapPool::new());
    let mut encoder = Encoder::new(config.clone()).with_pool(pool.clone());
    let mut decoder = Decoder::new(config).with_pool(pool.clone());
    encoder.init().unwrap();
    decoder.init().unwrap();
    (encoder, decoder, pool)
}

#[test]
fn test_silence_end_to_end() {
    let (mut encoder, mut decoder, _pool) = ready_pair(config_16k_mono());
    assert_eq!(encoder.frame_size(), 40);
    assert_eq!(encoder.frame_samples(), 160);

    let pcm = vec![0i16; 160];
    let input = [pcm_bytes(&pcm)];
    let mut frame_a = [0u8; 40];
    let mut frame_b = [0u8; 40];
    assert_eq!(encoder.encode_planar(&input, &mut frame_a).unwrap(), 40);
    assert_eq!(encoder.encode_planar(&input, &mut frame_b).unwrap(), 40);
    // Silence is a fixed, deterministic frame.
    assert_eq!(frame_a, frame_b);

    let mut out = vec![0i16; 160];
    let mut bufs = [pcm_bytes_mut(&mut out)];
    let written = decoder.decode_planar(&frame_a, &mut bufs, false).unwrap();
    assert_eq!(written, 160);
    assert!(out.iter().all(|&s| s == 0));

    encoder.uninit().unwrap();
    decoder.uninit().unwrap();
}

#[test]
fn test_sine_round_trip_preserves_energy_scale() {
    let (mut encoder, mut decoder, _pool) = ready_pair(config_16k_mono());
    let pcm = sine(160, 0.5, 36);
    let input = [pcm_bytes(&pcm)];
    let mut frame = [0u8; 40];
    encoder.encode_planar(&input, &mut frame).unwrap();

    let mut out = vec![0i16; 160];
    let mut bufs = [pcm_bytes_mut(&mut out)];
    decoder.decode_planar(&frame, &mut bufs, false).unwrap();

    let rms = |s: &[i16]| {
        (s.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / s.len() as f64).sqrt()
    };
    let input_rms = rms(&pcm);
    let output_rms = rms(&out);
    assert!(output_rms > 0.0, "decoded frame is silent");
    let ratio = output_rms / input_rms;
    assert!(
        (0.05..=5.0).contains(&ratio),
        "energy ratio {} out of range (in {}, out {})",
        ratio,
        input_rms,
        output_rms
    );
}

#[test]
fn test_pool_discipline_two_allocations() {
    let pool = Arc::new(HeapPool::new());
    let mut encoder = Encoder::new(config_16k_mono()).with_pool(pool.clone());
    encoder.init().unwrap();
    // Exactly one instance block and one scratch block.
    assert_eq!(pool.allocated(), 2);
    assert_eq!(pool.released(), 0);

    let pcm = vec![0i16; 160];
    let mut frame = [0u8; 40];
    encoder.encode_planar(&[pcm_bytes(&pcm)], &mut frame).unwrap();
    // Frame calls never allocate.
    assert_eq!(pool.allocated(), 2);

    encoder.uninit().unwrap();
    assert_eq!(pool.released(), 2);
    // Release happens exactly once.
    encoder.uninit().unwrap();
    assert_eq!(pool.released(), 2);
}

#[test]
fn test_missing_allocator_is_configuration_error() {
    let mut encoder = Encoder::new(config_16k_mono());
    let err = encoder.init().unwrap_err();
    assert_eq!(err, CodecError::MissingAllocator);
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_configuration_error_before_any_allocation() {
    let pool = Arc::new(HeapPool::new());
    let mut encoder =
        Encoder::new(CodecConfig::new(16000, 1, FrameDuration::Ms10)).with_pool(pool.clone());
    let err = encoder.init().unwrap_err();
    assert_eq!(err, CodecError::RateControlMissing);
    assert_eq!(pool.allocated(), 0);
}

/// Pool that fails after a fixed number of allocations.
struct ExhaustiblePool {
    inner: HeapPool,
    budget: std::sync::atomic::AtomicUsize,
}

impl MemoryPool for ExhaustiblePool {
    fn allocate(&self, size: usize) -> Option<PoolBlock> {
        use std::sync::atomic::Ordering;
        if self.budget.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| b.checked_sub(1))
            .is_err()
        {
            return None;
        }
        self.inner.allocate(size)
    }

    fn release(&self, block: PoolBlock) {
        self.inner.release(block);
    }
}

#[test]
fn test_failed_init_keeps_instance_until_uninit() {
    // The scratch allocation fails; the already-allocated instance block
    // stays with the session and is only returned by the mandatory uninit.
    let pool = Arc::new(ExhaustiblePool {
        inner: HeapPool::new(),
        budget: std::sync::atomic::AtomicUsize::new(1),
    });
    let mut encoder = Encoder::new(config_16k_mono()).with_pool(pool.clone());
    let err = encoder.init().unwrap_err();
    assert!(matches!(err, CodecError::AllocationFailed { .. }));
    assert_eq!(pool.inner.allocated(), 1);
    assert_eq!(pool.inner.released(), 0);

    let pcm = vec![0i16; 160];
    let mut frame = [0u8; 40];
    assert_eq!(
        encoder.encode_planar(&[pcm_bytes(&pcm)], &mut frame),
        Err(CodecError::NotReady)
    );

    encoder.uninit().unwrap();
    assert_eq!(pool.inner.released(), 1);
}

#[test]
fn test_layout_mismatch_writes_nothing() {
    let (mut encoder, _decoder, _pool) = ready_pair(config_16k_mono());
    let pcm = vec![0x55i16; 160];
    let mut frame = [0u8; 40];
    let err = encoder
        .encode_interlaced(pcm_bytes(&pcm), &mut frame)
        .unwrap_err();
    assert!(matches!(err, CodecError::LayoutMismatch { .. }));
    assert_eq!(err.category(), ErrorCategory::Parameter);
    assert!(frame.iter().all(|&b| b == 0), "output was touched");
}

#[test]
fn test_frame_call_before_init_rejected() {
    let mut encoder = Encoder::new(config_16k_mono()).with_pool(Arc::new(HeapPool::new()));
    let pcm = vec![0i16; 160];
    let mut frame = [0u8; 40];
    assert_eq!(
        encoder.encode_planar(&[pcm_bytes(&pcm)], &mut frame),
        Err(CodecError::NotReady)
    );
}

#[test]
fn test_planar_interlaced_equivalence_mono() {
    // For one channel the interleaved stride degenerates to the planar
    // layout; both entry points must produce identical frames.
    let (mut planar_enc, _d, _p) = ready_pair(config_16k_mono());
    let (mut inter_enc, mut inter_dec, _p2) =
        ready_pair(config_16k_mono().with_layout(PcmLayout::Interlaced));

    let pcm = sine(160, 0.25, 50);
    let mut frame_planar = [0u8; 40];
    let mut frame_inter = [0u8; 40];
    planar_enc
        .encode_planar(&[pcm_bytes(&pcm)], &mut frame_planar)
        .unwrap();
    inter_enc
        .encode_interlaced(pcm_bytes(&pcm), &mut frame_inter)
        .unwrap();
    assert_eq!(frame_planar, frame_inter);

    let mut out = vec![0i16; 160];
    let written = inter_dec
        .decode_interlaced(&frame_inter, pcm_bytes_mut(&mut out), false)
        .unwrap();
    assert_eq!(written, 160);
}

#[test]
fn test_stereo_interlaced_round_trip() {
    let config = CodecConfig::new(16000, 2, FrameDuration::Ms10)
        .with_bitrate(64000)
        .with_layout(PcmLayout::Interlaced);
    let (mut encoder, mut decoder, _pool) = ready_pair(config);
    assert_eq!(encoder.frame_size(), 80);

    let left = sine(160, 0.4, 24);
    let right = sine(160, 0.2, 60);
    let mut interleaved = vec![0i16; 320];
    for i in 0..160 {
        interleaved[2 * i] = left[i];
        interleaved[2 * i + 1] = right[i];
    }

    let mut frame = [0u8; 80];
    encoder
        .encode_interlaced(pcm_bytes(&interleaved), &mut frame)
        .unwrap();

    let mut out = vec![0i16; 320];
    let written = decoder
        .decode_interlaced(&frame, pcm_bytes_mut(&mut out), false)
        .unwrap();
    assert_eq!(written, 160);
    assert!(out.iter().any(|&s| s != 0));
}

#[test]
fn test_family_routing_through_sessions() {
    let (encoder, _decoder, _pool) =
        ready_pair(CodecConfig::new(16000, 1, FrameDuration::Ms7p5).with_bitrate(32000));
    assert_eq!(encoder.family(), Some(FormatFamily::Baseline));

    let (encoder, _decoder, _pool) = ready_pair(config_16k_mono());
    assert_eq!(encoder.family(), Some(FormatFamily::Extended));

    let (encoder, _decoder, _pool) =
        ready_pair(CodecConfig::new(48000, 1, FrameDuration::Ms2p5).with_bitrate(128000));
    assert_eq!(encoder.family(), Some(FormatFamily::Extended));
    assert_eq!(encoder.frame_samples(), 120);
}

#[test]
fn test_plc_replays_then_fades() {
    let config = config_16k_mono().with_plc_method(PlcMethod::Advanced);
    let (mut encoder, mut decoder, _pool) = ready_pair(config);

    let pcm = sine(160, 0.4, 30);
    let mut frame = [0u8; 40];
    encoder.encode_planar(&[pcm_bytes(&pcm)], &mut frame).unwrap();

    let mut good = vec![0i16; 160];
    decoder
        .decode_planar(&frame, &mut [pcm_bytes_mut(&mut good)], false)
        .unwrap();

    let mut lost1 = vec![0i16; 160];
    decoder
        .decode_planar(&[], &mut [pcm_bytes_mut(&mut lost1)], true)
        .unwrap();
    // First concealed frame replays the last good frame.
    assert_eq!(good, lost1);
    assert_eq!(decoder.conceal_count(0), Some(1));

    let mut lost2 = vec![0i16; 160];
    decoder
        .decode_planar(&[], &mut [pcm_bytes_mut(&mut lost2)], true)
        .unwrap();
    let energy = |s: &[i16]| s.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>();
    assert!(energy(&lost2) < energy(&lost1));
    assert_eq!(decoder.conceal_count(0), Some(2));

    // A clean frame resets the concealment run.
    let mut again = vec![0i16; 160];
    decoder
        .decode_planar(&frame, &mut [pcm_bytes_mut(&mut again)], false)
        .unwrap();
    assert_eq!(decoder.conceal_count(0), Some(0));
}

#[test]
fn test_standard_plc_synthesizes_noise() {
    let (mut encoder, mut decoder, _pool) = ready_pair(config_16k_mono());

    let pcm = sine(160, 0.4, 30);
    let mut frame = [0u8; 40];
    encoder.encode_planar(&[pcm_bytes(&pcm)], &mut frame).unwrap();
    let mut good = vec![0i16; 160];
    decoder
        .decode_planar(&frame, &mut [pcm_bytes_mut(&mut good)], false)
        .unwrap();

    let mut lost = vec![0i16; 160];
    decoder
        .decode_planar(&[], &mut [pcm_bytes_mut(&mut lost)], true)
        .unwrap();
    assert!(lost.iter().any(|&s| s != 0), "noise substitution is silent");
    assert_ne!(good, lost);
}

#[test]
fn test_ep_crc_detects_corruption_and_conceals() {
    let config = config_16k_mono()
        .with_ep_mode(EpMode::Zero)
        .with_ep_mode_request(EpModeRequest::High);
    let (mut encoder, mut decoder, _pool) = ready_pair(config);

    let pcm = sine(160, 0.3, 40);
    let mut frame = [0u8; 40];
    encoder.encode_planar(&[pcm_bytes(&pcm)], &mut frame).unwrap();

    let mut clean = vec![0i16; 160];
    decoder
        .decode_planar(&frame, &mut [pcm_bytes_mut(&mut clean)], false)
        .unwrap();
    assert_eq!(decoder.conceal_count(0), Some(0));
    assert_eq!(decoder.ep_mode_request(), Some(EpModeRequest::High));

    frame[7] ^= 0x40;
    let mut corrupted = vec![0i16; 160];
    let written = decoder
        .decode_planar(&frame, &mut [pcm_bytes_mut(&mut corrupted)], false)
        .unwrap();
    assert_eq!(written, 160);
    assert_eq!(decoder.conceal_count(0), Some(1));
}

#[test]
fn test_wrong_payload_length_rejected() {
    let (_encoder, mut decoder, _pool) = ready_pair(config_16k_mono());
    let mut out = vec![0i16; 160];
    let err = decoder
        .decode_planar(&[0u8; 39], &mut [pcm_bytes_mut(&mut out)], false)
        .unwrap_err();
    assert_eq!(
        err,
        CodecError::InvalidFrameSize {
            expected: 40,
            actual: 39
        }
    );
}

#[test]
fn test_encode_convenience_buffer() {
    let (mut encoder, _decoder, _pool) = ready_pair(config_16k_mono());
    let pcm = vec![0i16; 160];
    let frame = encoder.encode_planar_buf(&[pcm_bytes(&pcm)]).unwrap();
    assert_eq!(frame.len(), 40);
}

#[test]
fn test_double_init_requires_uninit() {
    let pool = Arc::new(HeapPool::new());
    let mut encoder = Encoder::new(config_16k_mono()).with_pool(pool);
    encoder.init().unwrap();
    assert_eq!(encoder.init(), Err(CodecError::AlreadyInitialized));
    encoder.uninit().unwrap();
}

#[test]
fn test_24_bit_in_32_bit_containers() {
    let config = CodecConfig::new(16000, 1, FrameDuration::Ms10)
        .with_bitrate(48000)
        .with_bit_depth(24)
        .with_bit_alignment(32);
    let (mut encoder, mut decoder, _pool) = ready_pair(config);

    let mut samples = vec![0i32; 160];
    for (i, s) in samples.iter_mut().enumerate() {
        let phase = i as f32 / 40.0 * std::f32::consts::TAU;
        *s = (phase.sin() * 0.3 * 8_388_607.0) as i32;
    }
    let mut frame = vec![0u8; encoder.frame_size()];
    let chans = [bytemuck::cast_slice::<i32, u8>(&samples)];
    encoder.encode_planar(&chans, &mut frame).unwrap();

    let mut out = vec![0i32; 160];
    let mut bufs = [bytemuck::cast_slice_mut::<i32, u8>(&mut out)];
    let written = decoder.decode_planar(&frame, &mut bufs, false).unwrap();
    assert_eq!(written, 160);
    assert!(out.iter().any(|&s| s != 0));
    assert!(out.iter().all(|&s| (-(1 << 23)..1 << 23).contains(&s)));
}

mod properties {
    use crate::config::{CodecConfig, FrameDuration};
    use crate::sns::mpvq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn mpvq_round_trip(raw in proptest::collection::vec(-3i32..=3, 1..=16)) {
            // Trim the drawn vector onto the pulse budget.
            let mut vec = raw;
            let mut left = 10i32;
            for v in vec.iter_mut() {
                let magnitude = v.abs().min(left);
                *v = magnitude * v.signum();
                left -= magnitude;
            }
            let k: u32 = vec.iter().map(|v| v.unsigned_abs()).sum();

            let entry = mpvq::enumerate(&vec);
            prop_assert!(entry.index < mpvq::size(vec.len(), k as usize));
            let mut back = vec![0i32; vec.len()];
            mpvq::deenumerate(&mut back, k as usize, entry.lead_sign_neg, entry.index);
            prop_assert_eq!(back, vec);
        }

        #[test]
        fn rate_derivation_round_trip(
            frame_size in 20u16..400,
            rate_idx in 0usize..6,
            dms_idx in 0usize..4,
        ) {
            let rates = [8000u32, 16000, 24000, 32000, 44100, 48000];
            let durations = [
                FrameDuration::Ms2p5,
                FrameDuration::Ms5,
                FrameDuration::Ms7p5,
                FrameDuration::Ms10,
            ];
            let rate = rates[rate_idx];
            let duration = durations[dms_idx];

            let mut config = CodecConfig::new(rate, 1, duration).with_frame_size(frame_size);
            prop_assume!(config
                .negotiate(crate::codecs::registry(), None)
                .is_ok());
            let bitrate = config.bitrate;

            let mut back = CodecConfig::new(rate, 1, duration).with_bitrate(bitrate);
            prop_assume!(back.negotiate(crate::codecs::registry(), None).is_ok());
            // Deriving frame size from the derived bitrate reproduces the
            // original within integer rounding: exact for durations that
            // divide the rate formula, one byte otherwise, and one more on
            // the 44100 Hz grid where both corrections floor.
            prop_assert!(back.frame_size <= frame_size);
            prop_assert!(frame_size - back.frame_size <= 2);
        }
    }
}
