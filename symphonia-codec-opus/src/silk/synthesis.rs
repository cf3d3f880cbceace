//! Excitation reconstruction followed by the LTP and LPC synthesis filters.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.9

use crate::silk::fixed::{
    div32_varq, inverse32_varq, lshift_sat32, rand, rshift_round, sat16, smlabb, smlawb, smulwb,
    smulww,
};
use crate::silk::frame::{FrameType, Layout, LTP_ORDER, MAX_FRAME_LENGTH, MAX_NB_SUBFR};
use crate::silk::indices::FrameIndices;
use crate::silk::lpc::MAX_LPC_ORDER;
use crate::silk::params::FrameParams;
use crate::silk::tables::QUANTIZATION_OFFSETS_Q10;

const QUANT_LEVEL_ADJUST_Q10: i32 = 80;

/// Largest LTP memory (20 ms at 16 kHz).
const MAX_LTP_MEM_LENGTH: usize = 320;

/// History of decoded output, long enough for LTP memory plus two rewhitened subframes.
const OUT_BUF_LENGTH: usize = MAX_FRAME_LENGTH + 2 * (MAX_FRAME_LENGTH / MAX_NB_SUBFR);

/// Filter memory of one SILK channel.
#[derive(Clone)]
pub struct Synthesizer {
    prev_gain_q16: i32,
    lpc_state_q14: [i32; MAX_LPC_ORDER],
    out_buf: [i16; OUT_BUF_LENGTH],
}

impl Default for Synthesizer {
    fn default() -> Self {
        return Self { prev_gain_q16: 1 << 16, lpc_state_q14: [0; MAX_LPC_ORDER], out_buf: [0; OUT_BUF_LENGTH] };
    }
}

impl Synthesizer {
    /// Clears the filter histories after an internal sample rate change. The previous gain is
    /// kept.
    pub fn clear_history(&mut self) {
        self.lpc_state_q14 = [0; MAX_LPC_ORDER];
        self.out_buf = [0; OUT_BUF_LENGTH];
    }

    /// Synthesizes one frame of `layout.frame_length` samples into `out`.
    pub fn synthesize(
        &mut self,
        layout: &Layout,
        indices: &FrameIndices,
        params: &FrameParams,
        pulses: &[i32],
        out: &mut [i16],
    ) {
        let frame_length = layout.frame_length;
        let subfr_length = layout.subfr_length;
        let ltp_mem_length = layout.ltp_mem_length;
        let order = layout.lpc_order();
        let voiced = indices.frame_type == FrameType::Voiced;

        let mut exc_q14 = [0i32; MAX_FRAME_LENGTH];
        reconstruct_excitation(indices, &pulses[..frame_length], &mut exc_q14[..frame_length]);

        let mut s_ltp = [0i16; MAX_LTP_MEM_LENGTH];
        let mut s_ltp_q15 = [0i32; MAX_LTP_MEM_LENGTH + MAX_FRAME_LENGTH];
        let mut s_lpc_q14 = [0i32; MAX_FRAME_LENGTH / MAX_NB_SUBFR + MAX_LPC_ORDER];
        let mut res_q14 = [0i32; MAX_FRAME_LENGTH / MAX_NB_SUBFR];

        s_lpc_q14[..MAX_LPC_ORDER].copy_from_slice(&self.lpc_state_q14);

        let mut ltp_buf_idx = ltp_mem_length;

        for k in 0..layout.nb_subfr {
            let a_q12 = &params.pred_coef_q12[k >> 1][..order];
            let b_q14 = &params.ltp_coef_q14[k * LTP_ORDER..(k + 1) * LTP_ORDER];
            let gain_q16 = params.gains_q16[k];
            let exc = &exc_q14[k * subfr_length..(k + 1) * subfr_length];

            let gain_q10 = gain_q16 >> 6;
            let mut inv_gain_q31 = inverse32_varq(gain_q16.max(1), 47);

            let gain_adj_q16 = if gain_q16 != self.prev_gain_q16 {
                let adj = div32_varq(self.prev_gain_q16, gain_q16.max(1), 16);
                for s in &mut s_lpc_q14[..MAX_LPC_ORDER] {
                    *s = smulww(adj, *s);
                }
                adj
            }
            else {
                1 << 16
            };
            self.prev_gain_q16 = gain_q16;

            let res: &[i32] = if voiced {
                let lag = params.pitch_lags[k] as usize;
                let history = lag + LTP_ORDER / 2;

                if k == 0 || (k == 2 && params.nlsf_interpolated) {
                    // Rewhiten the past output with the current LPC filter.
                    let start_idx = ltp_mem_length - lag - order - LTP_ORDER / 2;

                    if k == 2 {
                        self.out_buf[ltp_mem_length..ltp_mem_length + 2 * subfr_length]
                            .copy_from_slice(&out[..2 * subfr_length]);
                    }

                    let input_start = start_idx + k * subfr_length;
                    lpc_analysis_filter(
                        &mut s_ltp[start_idx..ltp_mem_length],
                        &self.out_buf[input_start..input_start + ltp_mem_length - start_idx],
                        a_q12,
                    );

                    if k == 0 {
                        inv_gain_q31 = smulwb(inv_gain_q31, params.ltp_scale_q14) << 2;
                    }

                    for i in 0..history {
                        s_ltp_q15[ltp_buf_idx - i - 1] =
                            smulwb(inv_gain_q31, i32::from(s_ltp[ltp_mem_length - i - 1]));
                    }
                }
                else if gain_adj_q16 != 1 << 16 {
                    for i in 0..history {
                        let s = &mut s_ltp_q15[ltp_buf_idx - i - 1];
                        *s = smulww(gain_adj_q16, *s);
                    }
                }

                // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.9.1
                for (r, &e) in res_q14.iter_mut().zip(exc) {
                    let base = ltp_buf_idx - lag + LTP_ORDER / 2;
                    let mut pred_q13 = 2;
                    for (j, &b) in b_q14.iter().enumerate() {
                        pred_q13 = smlawb(pred_q13, s_ltp_q15[base - j], i32::from(b));
                    }

                    *r = e.wrapping_add(pred_q13.wrapping_shl(1));
                    s_ltp_q15[ltp_buf_idx] = r.wrapping_shl(1);
                    ltp_buf_idx += 1;
                }

                &res_q14[..subfr_length]
            }
            else {
                exc
            };

            // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.9.2
            let out_sub = &mut out[k * subfr_length..(k + 1) * subfr_length];
            for (i, (&r, y)) in res.iter().zip(out_sub.iter_mut()).enumerate() {
                let mut pred_q10 = (order >> 1) as i32;
                for (j, &a) in a_q12.iter().enumerate() {
                    pred_q10 = smlawb(pred_q10, s_lpc_q14[MAX_LPC_ORDER + i - j - 1], i32::from(a));
                }

                let s = r.saturating_add(lshift_sat32(pred_q10, 4));
                s_lpc_q14[MAX_LPC_ORDER + i] = s;

                *y = sat16(rshift_round(smulww(s, gain_q10), 8));
            }

            s_lpc_q14.copy_within(subfr_length..subfr_length + MAX_LPC_ORDER, 0);
        }

        self.lpc_state_q14.copy_from_slice(&s_lpc_q14[..MAX_LPC_ORDER]);

        // Keep the most recent `ltp_mem_length` output samples.
        let keep = ltp_mem_length - frame_length;
        self.out_buf.copy_within(frame_length..frame_length + keep, 0);
        self.out_buf[keep..keep + frame_length].copy_from_slice(&out[..frame_length]);
    }
}

/// Rebuilds the Q14 excitation from the pulses, the quantization offset and the seeded sign
/// dither.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.8.6
fn reconstruct_excitation(indices: &FrameIndices, pulses: &[i32], exc_q14: &mut [i32]) {
    let offset_q10 =
        i32::from(QUANTIZATION_OFFSETS_Q10[indices.frame_type.index() >> 1][indices.quant_offset.index()]);

    let mut seed = indices.seed;

    for (e, &p) in exc_q14.iter_mut().zip(pulses) {
        seed = rand(seed);

        let mut v = p << 14;
        if v > 0 {
            v -= QUANT_LEVEL_ADJUST_Q10 << 4;
        }
        else if v < 0 {
            v += QUANT_LEVEL_ADJUST_Q10 << 4;
        }
        v += offset_q10 << 4;

        if seed < 0 {
            v = -v;
        }
        *e = v;

        seed = seed.wrapping_add(p);
    }
}

/// Whitening FIR filter `out[n] = in[n] - sum(a[j] * in[n - j - 1])`. The first `order` outputs
/// are zero.
pub fn lpc_analysis_filter(out: &mut [i16], input: &[i16], a_q12: &[i16]) {
    let order = a_q12.len();

    for ix in order..input.len().min(out.len()) {
        let mut acc_q12 = 0i32;
        for (j, &a) in a_q12.iter().enumerate() {
            acc_q12 = smlabb(acc_q12, i32::from(input[ix - 1 - j]), i32::from(a));
        }
        let residual_q12 = (i32::from(input[ix]) << 12).wrapping_sub(acc_q12);
        out[ix] = sat16(rshift_round(residual_q12, 12));
    }

    out[..order].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::silk::fixed::smulbb;
    use crate::silk::frame::QuantizationOffsetType;

    fn energy(x: &[i16]) -> i64 {
        return x.iter().map(|&s| i64::from(smulbb(i32::from(s), i32::from(s)))).sum();
    }

    fn flat_params(layout: &Layout, gain_q16: i32) -> FrameParams {
        let mut params = FrameParams::default();
        params.gains_q16[..layout.nb_subfr].fill(gain_q16);
        return params;
    }

    #[test]
    fn silent_excitation_stays_quiet() {
        let layout = Layout::new(16, 4);
        let indices = FrameIndices { frame_type: FrameType::Inactive, ..Default::default() };
        let params = flat_params(&layout, 1 << 16);

        let mut synth = Synthesizer::default();
        let mut out = [0i16; MAX_FRAME_LENGTH];
        synth.synthesize(&layout, &indices, &params, &[0; MAX_FRAME_LENGTH], &mut out);

        // Only the dithered quantization offset remains, far below one LSB at unity gain.
        assert!(out.iter().all(|&s| s.abs() <= 1));
    }

    #[test]
    fn pulse_is_scaled_by_gain() {
        let layout = Layout::new(8, 2);
        let indices = FrameIndices {
            frame_type: FrameType::Unvoiced,
            quant_offset: QuantizationOffsetType::Low,
            seed: 0,
            ..Default::default()
        };

        let mut pulses = [0i32; MAX_FRAME_LENGTH];
        pulses[10] = 4;

        let mut quiet = [0i16; MAX_FRAME_LENGTH];
        let mut loud = [0i16; MAX_FRAME_LENGTH];
        Synthesizer::default().synthesize(&layout, &indices, &flat_params(&layout, 1 << 20), &pulses, &mut quiet);
        Synthesizer::default().synthesize(&layout, &indices, &flat_params(&layout, 1 << 24), &pulses, &mut loud);

        // With a flat LPC filter the output is the excitation times the gain.
        assert!(quiet[10].abs() > 0);
        assert!((i32::from(loud[10]) - 16 * i32::from(quiet[10])).abs() <= 16);
        assert!(energy(&loud[..80]) > energy(&quiet[..80]));
    }

    #[test]
    fn output_history_tracks_last_samples() {
        let layout = Layout::new(8, 2);
        let indices = FrameIndices { frame_type: FrameType::Unvoiced, ..Default::default() };
        let mut pulses = [0i32; MAX_FRAME_LENGTH];
        pulses[79] = 8;

        let mut synth = Synthesizer::default();
        let mut out = [0i16; MAX_FRAME_LENGTH];
        synth.synthesize(&layout, &indices, &flat_params(&layout, 1 << 22), &pulses, &mut out);

        let keep = layout.ltp_mem_length - layout.frame_length;
        assert_eq!(&synth.out_buf[keep..keep + 80], &out[..80]);
    }

    #[test]
    fn analysis_filter_removes_prediction() {
        // x[n] = x[n-1] is perfectly predicted by a[0] = 1.0 (Q12).
        let input = [100i16; 32];
        let mut out = [7i16; 32];
        let mut a = [0i16; 10];
        a[0] = 4096;
        lpc_analysis_filter(&mut out, &input, &a);

        assert!(out.iter().all(|&s| s == 0));
    }
}
