//! Spectral envelope quantization
//!
//! Per frame, a 16-value scale-factor vector is quantized in two stages:
//! nearest-codeword search over two fixed half-band codebooks, then pulse
//! quantization of the transform-rotated residual. Four shape candidates
//! compete — regular (10 + 6 split), low-frequency (10 dims), outlier-near
//! (16 dims, 8 pulses) and outlier-far (16 dims, 6 pulses) — each with its
//! own adjustment-gain family. The winner's pulse vectors are ranked by the
//! bijective enumeration in [`mpvq`] and multiplexed into one joint
//! codeword whose layout is shared with the decoder side below.

pub mod mpvq;
pub(crate) mod tables;

use crate::error::{CodecError, Result};
use self::tables::{DCT16, GAINS_FAR, GAINS_LOW_FREQ, GAINS_NEAR, GAINS_REGULAR, HFCB, LFCB};

/// Scale factors per frame.
pub const N_SCALES: usize = 16;

/// Dimensions of the regular shape's split sections.
const DIM_A: usize = 10;
const DIM_B: usize = 6;

/// Pulse budgets per shape.
const K_A: usize = 10;
const K_B: usize = 1;
const K_NEAR: usize = 8;
const K_FAR: usize = 6;

/// Transmitted SNS parameter set for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnsParams {
    /// Low-half codebook index (5 bits)
    pub ind_lf: u8,
    /// High-half codebook index (5 bits)
    pub ind_hf: u8,
    /// Shape selector: 0 regular, 1 low-frequency, 2 near, 3 far
    pub shape: u8,
    /// Gain index within the shape's gain family
    pub gain: u8,
    /// Leading sign of the first (or only) pulse section
    pub lead_sign_a: bool,
    /// Leading sign of the regular shape's second section
    pub lead_sign_b: bool,
    /// Rank of the first pulse section
    pub idx_a: u32,
    /// Rank of the regular shape's second section
    pub idx_b: u32,
}

/// Wire-level split of an [`SnsParams`]: the fields written around the
/// joint shape codeword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnsCodeword {
    /// Shape selector MSB (1 bit)
    pub submode_msb: u32,
    /// Gain MSB field (2 bits)
    pub gain_msb: u32,
    /// Leading sign of section A (1 bit)
    pub lead_sign_a: u32,
    /// Joint shape codeword (25 bits)
    pub joint: u32,
}

fn shape_gains(shape: u8) -> &'static [f32] {
    match shape {
        0 => &GAINS_REGULAR,
        1 => &GAINS_LOW_FREQ,
        2 => &GAINS_NEAR,
        _ => &GAINS_FAR,
    }
}

/// Quantize a scale-factor vector.
///
/// Returns the transmitted parameter set and the reconstructed envelope,
/// identical to what the decoder will rebuild from those parameters.
pub fn quantize(scf: &[f32; N_SCALES]) -> (SnsParams, [f32; N_SCALES]) {
    // Stage 1: nearest codeword per half, minimum squared error.
    let mut ind_lf = 0usize;
    let mut ind_hf = 0usize;
    let mut best_lf = f32::MAX;
    let mut best_hf = f32::MAX;
    for i in 0..32 {
        let mut err_lf = 0.0f32;
        let mut err_hf = 0.0f32;
        for n in 0..8 {
            let d_lf = scf[n] - LFCB[i][n];
            err_lf += d_lf * d_lf;
            let d_hf = scf[n + 8] - HFCB[i][n];
            err_hf += d_hf * d_hf;
        }
        if err_lf < best_lf {
            best_lf = err_lf;
            ind_lf = i;
        }
        if err_hf < best_hf {
            best_hf = err_hf;
            ind_hf = i;
        }
    }

    let mut r1 = [0.0f32; N_SCALES];
    for n in 0..8 {
        r1[n] = scf[n] - LFCB[ind_lf][n];
        r1[n + 8] = scf[n + 8] - HFCB[ind_hf][n];
    }

    // Stage 2 target: rotate the residual into the transform domain.
    let mut t2rot = [0.0f32; N_SCALES];
    let mut abs_x = [0.0f32; N_SCALES];
    let mut proj_fac = 0.0f32;
    for (j, t) in t2rot.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for (n, r) in r1.iter().enumerate() {
            sum += r * DCT16[n][j];
        }
        *t = sum;
        abs_x[j] = sum.abs();
        proj_fac += abs_x[j];
    }

    // Shape search: project to just below the far pyramid, then grow each
    // candidate by greedy unit-pulse addition.
    let mut y3 = [0i32; N_SCALES];
    let mut k = 0u32;
    let mut corr = 0.0f32;
    let mut energy = 0.0f32;
    if proj_fac > 1e-9 {
        let factor = (K_FAR as f32 - 1.0) / proj_fac;
        for n in 0..N_SCALES {
            let pulses = (abs_x[n] * factor).floor() as i32;
            if pulses > 0 {
                y3[n] = pulses;
                k += pulses as u32;
                corr += pulses as f32 * abs_x[n];
                energy += (pulses * pulses) as f32;
            }
        }
    }
    add_unit_pulses(&mut y3, &abs_x, N_SCALES, K_FAR as u32, &mut k, &mut corr, &mut energy);

    let mut y2 = y3;
    add_unit_pulses(&mut y2, &abs_x, N_SCALES, K_NEAR as u32, &mut k, &mut corr, &mut energy);

    // The 10-dimensional shapes keep only section A; pulses parked in
    // section B are removed before growing to the full budget.
    let mut y1 = y2;
    for n in DIM_A..N_SCALES {
        let pulses = y1[n];
        if pulses != 0 {
            y1[n] = 0;
            k -= pulses as u32;
            corr -= pulses as f32 * abs_x[n];
            energy -= (pulses * pulses) as f32;
        }
    }
    add_unit_pulses(&mut y1, &abs_x, DIM_A, K_A as u32, &mut k, &mut corr, &mut energy);

    let mut y0 = y1;
    let mut best_b = DIM_A;
    let mut max_b = 0.0f32;
    for n in DIM_A..N_SCALES {
        if abs_x[n] > max_b {
            max_b = abs_x[n];
            best_b = n;
        }
    }
    y0[best_b] = 1;

    // Signs come from the rotated target.
    for n in 0..N_SCALES {
        if t2rot[n] < 0.0 {
            y0[n] = -y0[n];
            y2[n] = -y2[n];
            y3[n] = -y3[n];
            if n < DIM_A {
                y1[n] = -y1[n];
            }
        }
    }

    // Shape and gain combination: minimum squared error against the target.
    let candidates = [&y0, &y1, &y2, &y3];
    let mut shape = 0u8;
    let mut gain = 0u8;
    let mut best_mse = f32::MAX;
    for (j, y) in candidates.iter().enumerate() {
        let norm = vector_norm(*y);
        for (i, &g) in shape_gains(j as u8).iter().enumerate() {
            let scale = g / norm;
            let mut mse = 0.0f32;
            for n in 0..N_SCALES {
                let diff = t2rot[n] - scale * y[n] as f32;
                mse += diff * diff;
            }
            if mse < best_mse {
                best_mse = mse;
                shape = j as u8;
                gain = i as u8;
            }
        }
    }

    let winner = candidates[shape as usize];
    let (lead_sign_a, lead_sign_b, idx_a, idx_b) = match shape {
        0 => {
            let a = mpvq::enumerate(&winner[..DIM_A]);
            let b = mpvq::enumerate(&winner[DIM_A..]);
            (a.lead_sign_neg, b.lead_sign_neg, a.index, b.index)
        }
        1 => {
            let a = mpvq::enumerate(&winner[..DIM_A]);
            (a.lead_sign_neg, false, a.index, 0)
        }
        _ => {
            let a = mpvq::enumerate(&winner[..]);
            (a.lead_sign_neg, false, a.index, 0)
        }
    };

    let params = SnsParams {
        ind_lf: ind_lf as u8,
        ind_hf: ind_hf as u8,
        shape,
        gain,
        lead_sign_a,
        lead_sign_b,
        idx_a,
        idx_b,
    };
    let gain_value = shape_gains(shape)[gain as usize];
    let recon = synthesize(params.ind_lf, params.ind_hf, winner, gain_value);
    (params, recon)
}

/// Rebuild the envelope from a transmitted parameter set.
///
/// The exact inverse of [`quantize`]: de-enumerate the pulse sections,
/// unit-normalize, apply the adjustment gain, rotate back and add the
/// stage-1 codewords. Out-of-range indices are reported as invalid input.
pub fn dequantize(params: &SnsParams) -> Result<[f32; N_SCALES]> {
    let gains = shape_gains(params.shape);
    if params.shape > 3 || params.gain as usize >= gains.len() {
        return Err(CodecError::invalid_input("sns shape or gain out of range"));
    }

    let mut y = [0i32; N_SCALES];
    match params.shape {
        0 => {
            if params.idx_a >= mpvq::size(DIM_A, K_A) || params.idx_b >= mpvq::size(DIM_B, K_B) {
                return Err(CodecError::invalid_input("sns pulse rank out of range"));
            }
            mpvq::deenumerate(&mut y[..DIM_A], K_A, params.lead_sign_a, params.idx_a);
            mpvq::deenumerate(&mut y[DIM_A..], K_B, params.lead_sign_b, params.idx_b);
        }
        1 => {
            if params.idx_a >= mpvq::size(DIM_A, K_A) {
                return Err(CodecError::invalid_input("sns pulse rank out of range"));
            }
            mpvq::deenumerate(&mut y[..DIM_A], K_A, params.lead_sign_a, params.idx_a);
        }
        2 => {
            if params.idx_a >= mpvq::size(N_SCALES, K_NEAR) {
                return Err(CodecError::invalid_input("sns pulse rank out of range"));
            }
            mpvq::deenumerate(&mut y, K_NEAR, params.lead_sign_a, params.idx_a);
        }
        _ => {
            if params.idx_a >= mpvq::size(N_SCALES, K_FAR) {
                return Err(CodecError::invalid_input("sns pulse rank out of range"));
            }
            mpvq::deenumerate(&mut y, K_FAR, params.lead_sign_a, params.idx_a);
        }
    }

    Ok(synthesize(
        params.ind_lf,
        params.ind_hf,
        &y,
        gains[params.gain as usize],
    ))
}

/// Multiplex a parameter set into its wire fields.
pub fn mux(params: &SnsParams) -> SnsCodeword {
    let sz_a = mpvq::size(DIM_A, K_A);
    let (submode_msb, gain_msb, joint) = match params.shape {
        0 => (
            0,
            params.gain as u32,
            (2 * params.idx_b + params.lead_sign_b as u32 + 2) * sz_a + params.idx_a,
        ),
        1 => (
            0,
            params.gain as u32 >> 1,
            (params.gain as u32 & 1) * sz_a + params.idx_a,
        ),
        2 => (1, params.gain as u32, params.idx_a),
        _ => (
            1,
            params.gain as u32 >> 1,
            mpvq::size(N_SCALES, K_NEAR) + 2 * params.idx_a + (params.gain as u32 & 1),
        ),
    };
    SnsCodeword {
        submode_msb,
        gain_msb,
        lead_sign_a: params.lead_sign_a as u32,
        joint,
    }
}

/// Demultiplex wire fields back into a parameter set.
///
/// Codewords outside the legal joint space are bit errors; the caller
/// routes them to concealment.
pub fn demux(ind_lf: u32, ind_hf: u32, cw: &SnsCodeword) -> Result<SnsParams> {
    let sz_a = mpvq::size(DIM_A, K_A);
    let (shape, gain, idx_a, idx_b, lead_sign_b) = if cw.submode_msb == 0 {
        if cw.joint >= 14 * sz_a {
            return Err(CodecError::invalid_input("sns joint codeword out of range"));
        }
        let quotient = cw.joint / sz_a;
        let idx_a = cw.joint % sz_a;
        if quotient < 2 {
            // low-frequency: the quotient carries the gain LSB
            (1u8, (cw.gain_msb << 1 | quotient) as u8, idx_a, 0, false)
        } else {
            if cw.gain_msb > 1 {
                return Err(CodecError::invalid_input("sns gain field out of range"));
            }
            let t = quotient - 2;
            (0, cw.gain_msb as u8, idx_a, t >> 1, t & 1 == 1)
        }
    } else {
        let sz_near = mpvq::size(N_SCALES, K_NEAR);
        let sz_far = mpvq::size(N_SCALES, K_FAR);
        if cw.joint >= sz_near + 2 * sz_far {
            return Err(CodecError::invalid_input("sns joint codeword out of range"));
        }
        if cw.joint < sz_near {
            (2, cw.gain_msb as u8, cw.joint, 0, false)
        } else {
            let t = cw.joint - sz_near;
            (3, (cw.gain_msb << 1 | (t & 1)) as u8, t >> 1, 0, false)
        }
    };
    Ok(SnsParams {
        ind_lf: ind_lf as u8,
        ind_hf: ind_hf as u8,
        shape,
        gain,
        lead_sign_a: cw.lead_sign_a != 0,
        lead_sign_b,
        idx_a,
        idx_b,
    })
}

fn vector_norm(y: &[i32; N_SCALES]) -> f32 {
    let sum: i32 = y.iter().map(|v| v * v).sum();
    (sum as f32).sqrt().max(f32::MIN_POSITIVE)
}

fn synthesize(ind_lf: u8, ind_hf: u8, y: &[i32; N_SCALES], gain: f32) -> [f32; N_SCALES] {
    let factor = gain / vector_norm(y);
    let mut scf_q = [0.0f32; N_SCALES];
    for (n, out) in scf_q.iter_mut().enumerate() {
        let st1 = if n < 8 {
            LFCB[ind_lf as usize][n]
        } else {
            HFCB[ind_hf as usize][n - 8]
        };
        let mut rot = 0.0f32;
        for (j, &pulse) in y.iter().enumerate() {
            rot += pulse as f32 * DCT16[n][j];
        }
        *out = st1 + factor * rot;
    }
    scf_q
}

fn add_unit_pulses(
    y: &mut [i32; N_SCALES],
    abs_x: &[f32; N_SCALES],
    dims: usize,
    target_k: u32,
    k: &mut u32,
    corr: &mut f32,
    energy: &mut f32,
) {
    while *k < target_k {
        let mut best = 0usize;
        let first_corr = *corr + abs_x[0];
        let mut best_corr_sq = first_corr * first_corr;
        let mut best_energy = *energy + 2.0 * y[0] as f32 + 1.0;
        for cand in 1..dims {
            let cand_corr = *corr + abs_x[cand];
            let cand_energy = *energy + 2.0 * y[cand] as f32 + 1.0;
            if cand_corr * cand_corr * best_energy > best_corr_sq * cand_energy {
                best = cand;
                best_corr_sq = cand_corr * cand_corr;
                best_energy = cand_energy;
            }
        }
        *corr += abs_x[best];
        *energy += 2.0 * y[best] as f32 + 1.0;
        y[best] += 1;
        *k += 1;
    }
}
