//! Shared per-frame signal path for both backend families
//!
//! One frame is coded per channel as: sub-block energy envelope ->
//! scale-factor quantization (SNS) -> envelope-normalized samples under one
//! global gain at a fixed per-sample width filling the channel's byte
//! budget. The extended family adds a bandwidth cutoff field, an error
//! protection mode request and a CRC trailer around the same core layout.
//!
//! All mutable per-instance state lives in pool-allocated blocks and is
//! overlaid here as plain-old-data structs; the engine itself is immutable
//! after construction.

use crate::config::{CodecConfig, EpMode, PlcMethod, MAX_CHANNELS, MAX_FRAME_SAMPLES};
use crate::error::{CodecError, Result};
use crate::interlace::{Layout, SampleView, SampleViewMut};
use crate::sns;
use crate::utils::bits::{BitReader, BitWriter};
use crate::utils::crc::crc16;
use bytemuck::{Pod, Zeroable};

/// Envelope bands per frame (one scale factor each).
pub(crate) const NUM_BANDS: usize = 16;

const SNS_BITS: u32 = 5 + 5 + 1 + 2 + 1 + 25;
const GAIN_BITS: u32 = 8;
const BW_BITS: u32 = 4;
const EPMR_BITS: u32 = 2;
const CRC_BYTES: usize = 2;
const MAX_SPEC_BITS: u32 = 8;

const STATE_MAGIC: u32 = 0x4c33_6672;

/// Per-frame PCM input, resolved by the session entry points.
pub(crate) enum PcmInput<'a> {
    Planar(&'a [&'a [u8]]),
    Interlaced(&'a [u8]),
}

/// Per-frame PCM output, resolved by the session entry points.
pub(crate) enum PcmOutput<'a, 'b> {
    Planar(&'a mut [&'b mut [u8]]),
    Interlaced(&'a mut [u8]),
}

/// Encoder instance state, overlaid on the pool-allocated instance block.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct EncoderState {
    magic: u32,
    frames: u32,
}

/// Decoder instance state, overlaid on the pool-allocated instance block.
///
/// Holds the concealment memory: the last good envelope and output per
/// channel, the damping level, and the noise generator seed.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct DecoderState {
    magic: u32,
    frames: u32,
    seed: u32,
    epmr: u32,
    bw_cutoff: [u32; MAX_CHANNELS as usize],
    bfi_count: [u32; MAX_CHANNELS as usize],
    primed: [u32; MAX_CHANNELS as usize],
    fade: [f32; MAX_CHANNELS as usize],
    last_scf: [[f32; NUM_BANDS]; MAX_CHANNELS as usize],
    last_pcm: [[f32; MAX_FRAME_SAMPLES]; MAX_CHANNELS as usize],
}

impl DecoderState {
    /// Error protection mode request seen in the most recent protected frame.
    pub fn epmr(&self) -> u32 {
        self.epmr
    }

    /// Bandwidth cutoff band received for a channel (extended family).
    pub fn bw_cutoff(&self, ch: usize) -> u32 {
        self.bw_cutoff[ch]
    }

    /// Frames concealed in a row on a channel.
    pub fn bfi_count(&self, ch: usize) -> u32 {
        self.bfi_count[ch]
    }
}

/// Encoder scratch workspace, overlaid on the pool-allocated scratch block.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct EncScratch {
    pcm: [f32; MAX_FRAME_SAMPLES],
    shaped: [f32; MAX_FRAME_SAMPLES],
    scf: [f32; NUM_BANDS],
}

/// Decoder scratch workspace.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct DecScratch {
    pcm: [f32; MAX_FRAME_SAMPLES],
    scf: [f32; NUM_BANDS],
}

/// Immutable per-session frame coder shared by both families.
pub(crate) struct FrameCoder {
    frame_samples: usize,
    channels: usize,
    frame_size: usize,
    channel_bytes: [usize; MAX_CHANNELS as usize],
    band_bounds: [usize; NUM_BANDS + 1],
    layout: Layout,
    plus: bool,
    ep: bool,
    epmr: u32,
    bw_cutoff: u32,
    plc: PlcMethod,
    scale: f32,
}

impl FrameCoder {
    pub fn new(config: &CodecConfig, plus: bool) -> Result<Self> {
        // Negotiation runs first, but the overlay hook may have edited the
        // configuration afterwards; re-check what the engine relies on.
        if config.channels == 0
            || config.channels > MAX_CHANNELS
            || config.bit_depth == 0
            || config.bit_alignment < config.bit_depth
            || config.bit_alignment % 8 != 0
        {
            return Err(CodecError::invalid_config(
                "channel or sample geometry invalid at backend construction",
            ));
        }
        let frame_samples = config.frame_samples();
        if frame_samples < NUM_BANDS || frame_samples > MAX_FRAME_SAMPLES {
            return Err(CodecError::invalid_config(format!(
                "frame of {} samples per channel is not supported",
                frame_samples
            )));
        }

        let channels = config.channels as usize;
        let frame_size = config.frame_size as usize;
        let mut channel_bytes = [0usize; MAX_CHANNELS as usize];
        let base = frame_size / channels;
        let remainder = frame_size % channels;
        for (ch, bytes) in channel_bytes.iter_mut().enumerate().take(channels) {
            *bytes = base + usize::from(ch < remainder);
        }

        let mut band_bounds = [0usize; NUM_BANDS + 1];
        for (b, bound) in band_bounds.iter_mut().enumerate() {
            *bound = b * frame_samples / NUM_BANDS;
        }

        let ep = plus && config.ep_mode != EpMode::Off;
        let bw_cutoff = if config.bandwidth == 0 {
            NUM_BANDS as u32
        } else {
            (2 * config.bandwidth * NUM_BANDS as u32)
                .div_ceil(config.sample_rate)
                .clamp(1, NUM_BANDS as u32)
        };

        let coder = Self {
            frame_samples,
            channels,
            frame_size,
            channel_bytes,
            band_bounds,
            layout: Layout::from_config(config),
            plus,
            ep,
            epmr: config.ep_mode_request.to_bits(),
            bw_cutoff,
            plc: config.plc_method,
            scale: 1.0 / (1i64 << (config.bit_depth - 1)) as f32,
        };
        let smallest = coder.channel_bytes[channels - 1];
        if smallest * 8 < coder.header_bits() as usize + if coder.ep { CRC_BYTES * 8 } else { 0 } {
            return Err(CodecError::FrameSizeOutOfRange {
                bytes: frame_size,
                min: channels * (coder.header_bits() as usize).div_ceil(8),
                max: crate::config::MAX_FRAME_BYTES,
            });
        }
        Ok(coder)
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn header_bits(&self) -> u32 {
        let mut bits = SNS_BITS + GAIN_BITS;
        if self.plus {
            bits += BW_BITS;
        }
        if self.ep {
            bits += EPMR_BITS;
        }
        bits
    }

    fn spec_bits(&self, ch: usize) -> u32 {
        let mut total = self.channel_bytes[ch] * 8;
        if self.ep {
            total -= CRC_BYTES * 8;
        }
        ((total as u32 - self.header_bits()) / self.frame_samples as u32).min(MAX_SPEC_BITS)
    }

    // ---- encode -----------------------------------------------------------

    pub fn init_encoder_state(&self, state_bytes: &mut [u8]) -> Result<()> {
        let state = encoder_state(state_bytes)?;
        state.magic = STATE_MAGIC;
        state.frames = 0;
        Ok(())
    }

    pub fn encode_frame(
        &self,
        input: &PcmInput<'_>,
        state_bytes: &mut [u8],
        scratch_bytes: &mut [u8],
        out: &mut [u8],
    ) -> Result<()> {
        let state = encoder_state(state_bytes)?;
        if state.magic != STATE_MAGIC {
            return Err(CodecError::internal("encoder instance state corrupted"));
        }
        let scratch: &mut EncScratch = overlay(scratch_bytes)?;

        out[..self.frame_size].fill(0);
        let mut offset = 0;
        for ch in 0..self.channels {
            let view = match input {
                PcmInput::Planar(bufs) => self.layout.planar_view(bufs[ch]),
                PcmInput::Interlaced(buf) => self.layout.interlaced_view(buf, ch),
            };
            let bytes = self.channel_bytes[ch];
            self.encode_channel(&view, ch, scratch, &mut out[offset..offset + bytes])?;
            offset += bytes;
        }

        state.frames = state.frames.wrapping_add(1);
        tracing::trace!(frame = state.frames, bytes = self.frame_size, "encoded frame");
        Ok(())
    }

    fn encode_channel(
        &self,
        view: &SampleView<'_>,
        ch: usize,
        scratch: &mut EncScratch,
        out: &mut [u8],
    ) -> Result<()> {
        let n = self.frame_samples;
        for i in 0..n {
            scratch.pcm[i] = view.read(i) as f32 * self.scale;
        }

        // Sub-block energy envelope in the log2 domain.
        for b in 0..NUM_BANDS {
            let lo = self.band_bounds[b];
            let hi = self.band_bounds[b + 1];
            let mut energy = 0.0f32;
            for i in lo..hi {
                energy += scratch.pcm[i] * scratch.pcm[i];
            }
            energy /= (hi - lo) as f32;
            scratch.scf[b] = (0.5 * (energy + 1e-8).log2()).clamp(-8.0, 8.0);
        }

        let (params, scf_q) = sns::quantize(&scratch.scf);

        // Normalize each sub-block by its quantized envelope.
        let mut max_abs = 0.0f32;
        for b in 0..NUM_BANDS {
            let gain = (-scf_q[b]).exp2();
            for i in self.band_bounds[b]..self.band_bounds[b + 1] {
                let shaped = scratch.pcm[i] * gain;
                scratch.shaped[i] = shaped;
                max_abs = max_abs.max(shaped.abs());
            }
        }

        let gg_ind = if max_abs > 0.0 {
            ((24.0 * max_abs.log2()).ceil() as i32 + 128).clamp(1, 255) as u32
        } else {
            0
        };
        let gg = global_gain(gg_ind);

        let crc_limit = if self.ep { out.len() - CRC_BYTES } else { out.len() };
        let mut writer = BitWriter::new(&mut out[..crc_limit]);
        if self.plus {
            writer.put(self.bw_cutoff - 1, BW_BITS)?;
        }
        if self.ep {
            writer.put(self.epmr, EPMR_BITS)?;
        }
        let cw = sns::mux(&params);
        writer.put(params.ind_lf as u32, 5)?;
        writer.put(params.ind_hf as u32, 5)?;
        writer.put(cw.submode_msb, 1)?;
        writer.put(cw.gain_msb, 2)?;
        writer.put(cw.lead_sign_a, 1)?;
        writer.put(cw.joint, 25)?;
        writer.put(gg_ind, GAIN_BITS)?;

        let bits = self.spec_bits(ch);
        if bits > 0 {
            let half = (1u32 << (bits - 1)) as f32;
            let limit = (1i32 << bits) - 1;
            for i in 0..n {
                let level = if gg_ind == 0 {
                    0
                } else {
                    let q = (scratch.shaped[i] / gg * half).floor() as i32 + half as i32;
                    q.clamp(0, limit) as u32
                };
                writer.put(level, bits)?;
            }
        }

        if self.ep {
            let crc = crc16(&out[..crc_limit]);
            out[crc_limit] = (crc >> 8) as u8;
            out[crc_limit + 1] = (crc & 0xff) as u8;
        }
        Ok(())
    }

    // ---- decode -----------------------------------------------------------

    pub fn init_decoder_state(&self, state_bytes: &mut [u8]) -> Result<()> {
        let state = decoder_state(state_bytes)?;
        state.magic = STATE_MAGIC;
        state.seed = 0x2c3a_9d11;
        Ok(())
    }

    pub fn decode_frame(
        &self,
        data: &[u8],
        bfi: bool,
        state_bytes: &mut [u8],
        scratch_bytes: &mut [u8],
        output: &mut PcmOutput<'_, '_>,
    ) -> Result<()> {
        let state = decoder_state(state_bytes)?;
        if state.magic != STATE_MAGIC {
            return Err(CodecError::internal("decoder instance state corrupted"));
        }
        let scratch: &mut DecScratch = overlay(scratch_bytes)?;

        let mut offset = 0;
        for ch in 0..self.channels {
            let bytes = self.channel_bytes[ch];
            let region = if bfi { &[][..] } else { &data[offset..offset + bytes] };
            match output {
                PcmOutput::Planar(slices) => {
                    let mut view = self.layout.planar_view_mut(&mut *slices[ch]);
                    self.decode_channel(region, ch, bfi, state, scratch, &mut view)?;
                }
                PcmOutput::Interlaced(buf) => {
                    let mut view = self.layout.interlaced_view_mut(&mut **buf, ch);
                    self.decode_channel(region, ch, bfi, state, scratch, &mut view)?;
                }
            }
            offset += bytes;
        }

        state.frames = state.frames.wrapping_add(1);
        tracing::trace!(frame = state.frames, bfi, "decoded frame");
        Ok(())
    }

    fn decode_channel(
        &self,
        data: &[u8],
        ch: usize,
        bfi: bool,
        state: &mut DecoderState,
        scratch: &mut DecScratch,
        view: &mut SampleViewMut<'_>,
    ) -> Result<()> {
        if bfi {
            return self.conceal_channel(ch, state, view);
        }
        if self.ep {
            let crc_limit = data.len() - CRC_BYTES;
            let received = (data[crc_limit] as u16) << 8 | data[crc_limit + 1] as u16;
            if crc16(&data[..crc_limit]) != received {
                tracing::debug!(ch, "crc mismatch, concealing frame");
                return self.conceal_channel(ch, state, view);
            }
        }
        match self.parse_channel(data, ch, state, scratch) {
            Ok(()) => {}
            Err(CodecError::InvalidInput { details }) => {
                // Bit error detected below the transport layer: conceal
                // instead of surfacing a decode failure.
                tracing::debug!(ch, %details, "bit error, concealing frame");
                return self.conceal_channel(ch, state, view);
            }
            Err(other) => return Err(other),
        }

        let n = self.frame_samples;
        let inv_scale = 1.0 / self.scale;
        for i in 0..n {
            let sample = scratch.pcm[i];
            view.write(i, (sample * inv_scale).round() as i32);
            state.last_pcm[ch][i] = sample;
        }
        state.last_scf[ch].copy_from_slice(&scratch.scf);
        state.primed[ch] = 1;
        state.fade[ch] = 1.0;
        state.bfi_count[ch] = 0;
        Ok(())
    }

    /// Parse one channel region into `scratch.pcm`/`scratch.scf`.
    ///
    /// `InvalidInput` from here means a bit error, which the caller maps to
    /// concealment; every other error propagates. Side information is only
    /// committed to `state` once the whole channel parses cleanly.
    fn parse_channel(
        &self,
        data: &[u8],
        ch: usize,
        state: &mut DecoderState,
        scratch: &mut DecScratch,
    ) -> Result<()> {
        let payload = if self.ep {
            &data[..data.len() - CRC_BYTES]
        } else {
            data
        };
        let mut reader = BitReader::new(payload);
        let mut bw_cutoff = NUM_BANDS as u32;
        if self.plus {
            bw_cutoff = reader.get(BW_BITS)? + 1;
            if bw_cutoff > self.bw_cutoff {
                // The negotiated bandwidth bounds what a clean frame can
                // carry; anything above is a bit error.
                return Err(CodecError::invalid_input("bandwidth cutoff out of range"));
            }
        }
        let epmr = if self.ep { reader.get(EPMR_BITS)? } else { 0 };

        let ind_lf = reader.get(5)?;
        let ind_hf = reader.get(5)?;
        let cw = sns::SnsCodeword {
            submode_msb: reader.get(1)?,
            gain_msb: reader.get(2)?,
            lead_sign_a: reader.get(1)?,
            joint: reader.get(25)?,
        };
        let params = sns::demux(ind_lf, ind_hf, &cw)?;
        let scf_q = sns::dequantize(&params)?;

        let gg_ind = reader.get(GAIN_BITS)?;
        let gg = global_gain(gg_ind);

        let bits = self.spec_bits(ch);
        let n = self.frame_samples;
        if bits > 0 {
            let half = 1i32 << (bits - 1);
            for i in 0..n {
                let level = reader.get(bits)? as i32;
                scratch.pcm[i] = (level - half) as f32 + 0.5;
            }
        } else {
            scratch.pcm[..n].fill(0.0);
        }

        // Undo the per-sample normalization and the envelope shaping.
        for b in 0..NUM_BANDS {
            let gain = scf_q[b].exp2()
                * if bits > 0 {
                    gg / (1i32 << (bits - 1)) as f32
                } else {
                    0.0
                };
            for i in self.band_bounds[b]..self.band_bounds[b + 1] {
                scratch.pcm[i] *= gain;
            }
        }

        scratch.scf.copy_from_slice(&scf_q);
        state.bw_cutoff[ch] = bw_cutoff;
        if self.ep {
            state.epmr = epmr;
        }
        Ok(())
    }

    fn conceal_channel(
        &self,
        ch: usize,
        state: &mut DecoderState,
        view: &mut SampleViewMut<'_>,
    ) -> Result<()> {
        let n = self.frame_samples;
        let inv_scale = 1.0 / self.scale;
        if state.primed[ch] == 0 {
            for i in 0..n {
                view.write(i, 0);
            }
            state.bfi_count[ch] = state.bfi_count[ch].wrapping_add(1);
            return Ok(());
        }

        let fade = state.fade[ch];
        match self.plc {
            PlcMethod::Advanced => {
                for i in 0..n {
                    let sample = state.last_pcm[ch][i] * fade;
                    view.write(i, (sample * inv_scale).round() as i32);
                }
            }
            PlcMethod::Standard => {
                for b in 0..NUM_BANDS {
                    let amp = 0.5 * state.last_scf[ch][b].exp2() * fade;
                    for i in self.band_bounds[b]..self.band_bounds[b + 1] {
                        state.seed = state.seed.wrapping_mul(1664525).wrapping_add(1013904223);
                        let noise = (state.seed >> 16) as f32 / 32768.0 - 1.0;
                        view.write(i, (noise * amp * inv_scale).round() as i32);
                    }
                }
            }
        }
        state.fade[ch] *= 0.7;
        state.bfi_count[ch] = state.bfi_count[ch].wrapping_add(1);
        Ok(())
    }
}

fn global_gain(gg_ind: u32) -> f32 {
    if gg_ind == 0 {
        0.0
    } else {
        ((gg_ind as f32 - 128.0) / 24.0).exp2()
    }
}

fn overlay<T: Pod>(bytes: &mut [u8]) -> Result<&mut T> {
    let size = std::mem::size_of::<T>();
    if bytes.len() < size {
        return Err(CodecError::internal("pool block smaller than reported size"));
    }
    bytemuck::try_from_bytes_mut(&mut bytes[..size])
        .map_err(|_| CodecError::internal("pool block not word aligned"))
}

pub(crate) fn encoder_state(bytes: &mut [u8]) -> Result<&mut EncoderState> {
    overlay(bytes)
}

pub(crate) fn decoder_state(bytes: &mut [u8]) -> Result<&mut DecoderState> {
    overlay(bytes)
}

/// Read-only view of a decoder instance block, for session accessors.
pub(crate) fn decoder_state_ref(bytes: &[u8]) -> Result<&DecoderState> {
    let size = std::mem::size_of::<DecoderState>();
    if bytes.len() < size {
        return Err(CodecError::internal("pool block smaller than reported size"));
    }
    bytemuck::try_from_bytes(&bytes[..size])
        .map_err(|_| CodecError::internal("pool block not word aligned"))
}

/// Backend-reported sizes; queried without allocating.
pub(crate) fn encoder_sizes() -> (usize, usize) {
    (
        std::mem::size_of::<EncoderState>(),
        std::mem::size_of::<EncScratch>(),
    )
}

pub(crate) fn decoder_sizes() -> (usize, usize) {
    (
        std::mem::size_of::<DecoderState>(),
        std::mem::size_of::<DecScratch>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecConfig, FrameDuration};

    fn coder(plus: bool) -> FrameCoder {
        let mut config = CodecConfig::new(16000, 1, FrameDuration::Ms10).with_bitrate(32000);
        config.bit_alignment = 16;
        config.frame_size = 40;
        FrameCoder::new(&config, plus).unwrap()
    }

    #[test]
    fn test_band_bounds_cover_frame() {
        let coder = coder(false);
        assert_eq!(coder.band_bounds[0], 0);
        assert_eq!(coder.band_bounds[NUM_BANDS], 160);
        for b in 0..NUM_BANDS {
            assert!(coder.band_bounds[b] < coder.band_bounds[b + 1]);
        }
    }

    #[test]
    fn test_spec_bits_budget() {
        // 320 bits, 51-bit header (extended, no ep) over 160 samples.
        let plus = coder(true);
        assert_eq!(plus.header_bits(), 51);
        assert_eq!(plus.spec_bits(0), 1);

        let base = coder(false);
        assert_eq!(base.header_bits(), 47);
        assert_eq!(base.spec_bits(0), 1);
    }

    #[test]
    fn test_channel_byte_split() {
        let mut config = CodecConfig::new(16000, 3, FrameDuration::Ms10).with_bitrate(96000);
        config.bit_alignment = 16;
        config.frame_size = 100;
        let coder = FrameCoder::new(&config, false).unwrap();
        assert_eq!(&coder.channel_bytes[..3], &[34, 33, 33]);
    }

    #[test]
    fn test_global_gain_mapping() {
        assert_eq!(global_gain(0), 0.0);
        assert!((global_gain(128) - 1.0).abs() < 1e-6);
        assert!(global_gain(152) > global_gain(128));
    }

    #[test]
    fn test_state_sizes_nonzero() {
        let (inst, scratch) = encoder_sizes();
        assert!(inst > 0 && scratch > 0);
        let (inst, scratch) = decoder_sizes();
        assert!(inst > std::mem::size_of::<EncoderState>());
        assert!(scratch > 0);
    }
}
