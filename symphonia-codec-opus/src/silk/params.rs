//! Dequantization of the side information into synthesis filter parameters.

use crate::silk::fixed::{log2lin, smulwb};
use crate::silk::frame::{Coding, FrameType, Layout, LTP_ORDER, MAX_NB_SUBFR};
use crate::silk::indices::FrameIndices;
use crate::silk::lpc::{decode_nlsf, interpolate_nlsf, nlsf_to_lpc, MAX_LPC_ORDER};
use crate::silk::tables::{
    CB_LAGS_STAGE2, CB_LAGS_STAGE2_10MS, CB_LAGS_STAGE3, CB_LAGS_STAGE3_10MS, LTP_SCALES_Q14,
    LTP_VQ_Q7,
};

const N_LEVELS_QGAIN: i32 = 64;
const MIN_DELTA_GAIN_QUANT: i32 = -4;
const MAX_DELTA_GAIN_QUANT: i32 = 36;

/// Largest drop of an independently coded gain index relative to the previous frame.
const MAX_GAIN_INDEX_DROP: i32 = 16;

const INV_SCALE_Q16: i32 = 1_907_825;
const GAIN_OFFSET_Q7: i32 = 2090;

const PITCH_MIN_LAG_MS: i32 = 2;
const PITCH_MAX_LAG_MS: i32 = 18;

/// Parameters driving the excitation and synthesis filters of one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameParams {
    pub gains_q16: [i32; MAX_NB_SUBFR],
    /// LPC coefficients for the first and second half of the frame.
    pub pred_coef_q12: [[i16; MAX_LPC_ORDER]; 2],
    /// The first half of the frame uses interpolated coefficients.
    pub nlsf_interpolated: bool,
    pub pitch_lags: [i32; MAX_NB_SUBFR],
    pub ltp_coef_q14: [i16; MAX_NB_SUBFR * LTP_ORDER],
    pub ltp_scale_q14: i32,
}

/// Converts gain indices into linear Q16 gains.
///
/// `prev_index` carries the last gain index of the channel across frames.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.4
pub fn dequantize_gains(
    indices: &[i32],
    prev_index: &mut i32,
    conditional: bool,
    gains_q16: &mut [i32],
) {
    for (k, (&ind, gain)) in indices.iter().zip(gains_q16.iter_mut()).enumerate() {
        if k == 0 && !conditional {
            *prev_index = ind.max(*prev_index - MAX_GAIN_INDEX_DROP);
        }
        else {
            let delta = ind + MIN_DELTA_GAIN_QUANT;

            // Large deltas step twice as fast.
            let threshold = 2 * MAX_DELTA_GAIN_QUANT - N_LEVELS_QGAIN + *prev_index;
            if delta > threshold {
                *prev_index += 2 * delta - threshold;
            }
            else {
                *prev_index += delta;
            }
        }
        *prev_index = (*prev_index).clamp(0, N_LEVELS_QGAIN - 1);

        *gain = log2lin((smulwb(INV_SCALE_Q16, *prev_index) + GAIN_OFFSET_Q7).min(3967));
    }
}

/// Expands the primary lag and contour index into per-subframe pitch lags.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.6.1
pub fn decode_pitch_lags(layout: &Layout, lag_index: i32, contour: usize, lags: &mut [i32]) {
    let fs = layout.fs_khz as i32;
    let min_lag = PITCH_MIN_LAG_MS * fs;
    let max_lag = PITCH_MAX_LAG_MS * fs;
    let lag = min_lag + lag_index;

    for (k, out) in lags.iter_mut().enumerate().take(layout.nb_subfr) {
        let offset = match (layout.fs_khz == 8, layout.is_10ms()) {
            (true, false) => CB_LAGS_STAGE2[k][contour],
            (true, true) => CB_LAGS_STAGE2_10MS[k][contour],
            (false, false) => CB_LAGS_STAGE3[k][contour],
            (false, true) => CB_LAGS_STAGE3_10MS[k][contour],
        };
        *out = (lag + i32::from(offset)).clamp(min_lag, max_lag);
    }
}

/// Per-channel state needed to dequantize the next frame.
#[derive(Debug, Clone)]
pub struct ParamState {
    pub last_gain_index: i32,
    pub prev_nlsf_q15: [i16; MAX_LPC_ORDER],
}

impl Default for ParamState {
    fn default() -> Self {
        return Self { last_gain_index: 10, prev_nlsf_q15: [0; MAX_LPC_ORDER] };
    }
}

impl ParamState {
    /// Turns the decoded indices of a frame into filter parameters.
    ///
    /// NLSF interpolation is disabled for the first frame after a reset since there is no
    /// previous frame to interpolate from.
    pub fn dequantize(
        &mut self,
        layout: &Layout,
        indices: &FrameIndices,
        coding: Coding,
        first_frame: bool,
    ) -> FrameParams {
        let mut params = FrameParams::default();
        let nb_subfr = layout.nb_subfr;
        let order = layout.lpc_order();

        dequantize_gains(
            &indices.gains[..nb_subfr],
            &mut self.last_gain_index,
            coding == Coding::Conditional,
            &mut params.gains_q16[..nb_subfr],
        );

        let mut nlsf_q15 = [0i16; MAX_LPC_ORDER];
        decode_nlsf(layout.codebook, indices.nlsf_stage1, &indices.nlsf_residuals, &mut nlsf_q15[..order]);
        nlsf_to_lpc(&nlsf_q15[..order], &mut params.pred_coef_q12[1][..order]);

        let interp_q2 = if first_frame { 4 } else { indices.nlsf_interp_q2 };

        if interp_q2 < 4 {
            let mut nlsf0_q15 = [0i16; MAX_LPC_ORDER];
            interpolate_nlsf(&self.prev_nlsf_q15[..order], &nlsf_q15[..order], interp_q2, &mut nlsf0_q15[..order]);
            nlsf_to_lpc(&nlsf0_q15[..order], &mut params.pred_coef_q12[0][..order]);
            params.nlsf_interpolated = true;
        }
        else {
            params.pred_coef_q12[0] = params.pred_coef_q12[1];
        }

        self.prev_nlsf_q15 = nlsf_q15;

        if indices.frame_type == FrameType::Voiced {
            decode_pitch_lags(layout, indices.lag_index, indices.contour_index, &mut params.pitch_lags);

            let codebook = LTP_VQ_Q7[indices.periodicity];
            for (k, &ix) in indices.ltp_index.iter().enumerate().take(nb_subfr) {
                for (i, &c) in codebook[ix].iter().enumerate() {
                    params.ltp_coef_q14[k * LTP_ORDER + i] = i16::from(c) << 7;
                }
            }

            params.ltp_scale_q14 = i32::from(LTP_SCALES_Q14[indices.ltp_scale_index]);
        }

        return params;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_gain_cannot_drop_too_far() {
        let mut prev = 40;
        let mut gains = [0; 1];
        dequantize_gains(&[5], &mut prev, false, &mut gains);
        assert_eq!(prev, 24);

        dequantize_gains(&[30], &mut prev, false, &mut gains);
        assert_eq!(prev, 30);
    }

    #[test]
    fn delta_gains_accumulate() {
        let mut prev = 10;
        let mut gains = [0; 4];
        // Deltas of 0, -4, +1 and a large step.
        dequantize_gains(&[4, 0, 5, 40], &mut prev, true, &mut gains);

        // 10, 6, 7, then 36 exceeds 8 + 7 so it counts double: 7 + 72 - 15.
        assert_eq!(prev, 63);
        assert!(gains[1] < gains[0]);
        assert!(gains[2] > gains[1]);
        assert!(gains[3] > gains[2]);
    }

    #[test]
    fn gains_are_monotonic_in_the_index() {
        let mut last = 0;
        for ind in 0..N_LEVELS_QGAIN {
            let mut prev = 0;
            let mut gain = [0; 1];
            dequantize_gains(&[ind], &mut prev, false, &mut gain);
            assert!(gain[0] >= last);
            last = gain[0];
        }
    }

    #[test]
    fn pitch_lags_are_clamped() {
        let layout = Layout::new(16, 4);
        let mut lags = [0; 4];

        decode_pitch_lags(&layout, 0, 0, &mut lags);
        assert_eq!(lags, [32; 4]);

        decode_pitch_lags(&layout, 300, 0, &mut lags);
        assert_eq!(lags, [288; 4]);
    }

    #[test]
    fn unvoiced_frames_have_no_ltp() {
        let layout = Layout::new(8, 4);
        let mut state = ParamState::default();
        let indices = FrameIndices { frame_type: FrameType::Unvoiced, nlsf_interp_q2: 4, ..Default::default() };

        let params = state.dequantize(&layout, &indices, Coding::Independent, true);
        assert_eq!(params.pitch_lags, [0; 4]);
        assert_eq!(params.ltp_scale_q14, 0);
        assert_eq!(params.pred_coef_q12[0], params.pred_coef_q12[1]);
        assert!(state.prev_nlsf_q15[..10].windows(2).all(|w| w[0] < w[1]));
    }
}
