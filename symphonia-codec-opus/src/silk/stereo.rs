//! Mid/side stereo prediction and unmixing.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.1

use crate::range::RangeDecoder;
use crate::silk::fixed::{rshift_round, sat16, smlawb, smulbb, smulwb};
use crate::silk::tables::{STEREO_ONLY_CODE_MID, STEREO_PRED_JOINT, STEREO_PRED_QUANT_Q13, UNIFORM3, UNIFORM5};

/// Duration over which the prediction weights are interpolated at the start of a frame.
const STEREO_INTERP_LEN_MS: usize = 8;

/// 0.5 / 5 in Q16.
const HALF_SUB_STEP_Q16: i32 = 6554;

/// Decodes the two mid to side prediction weights in Q13.
///
/// The first weight is returned relative to the second.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.1
pub fn decode_prediction(rc: &mut RangeDecoder<'_>) -> [i32; 2] {
    let joint = rc.decode_symbol(&STEREO_PRED_JOINT);

    let mut ix = [[0usize; 3]; 2];
    ix[0][2] = joint / 5;
    ix[1][2] = joint % 5;

    for row in &mut ix {
        row[0] = rc.decode_symbol(&UNIFORM3);
        row[1] = rc.decode_symbol(&UNIFORM5);
    }

    let mut pred_q13 = [0i32; 2];
    for (pred, row) in pred_q13.iter_mut().zip(&ix) {
        let i = row[0] + 3 * row[2];
        let low_q13 = i32::from(STEREO_PRED_QUANT_Q13[i]);
        let step_q13 = smulwb(i32::from(STEREO_PRED_QUANT_Q13[i + 1]) - low_q13, HALF_SUB_STEP_Q16);
        *pred = low_q13 + step_q13 * (2 * row[1] as i32 + 1);
    }

    pred_q13[0] -= pred_q13[1];

    return pred_q13;
}

/// Decodes the flag signalling that the side channel of this frame is not coded.
pub fn decode_mid_only(rc: &mut RangeDecoder<'_>) -> bool {
    return rc.decode_symbol(&STEREO_ONLY_CODE_MID) == 1;
}

/// Unmixing state carried across frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct StereoState {
    pub pred_prev_q13: [i32; 2],
    /// Last two mid samples of the previous frame.
    pub mid_history: [i16; 2],
    /// Last two side samples of the previous frame.
    pub side_history: [i16; 2],
}

impl StereoState {
    /// Delays the mono signal by the same amount as [`StereoState::ms_to_lr`].
    ///
    /// `mid` holds two history slots followed by `frame_length` decoded samples.
    pub fn buffer_mid(&mut self, mid: &mut [i16], frame_length: usize) {
        mid[..2].copy_from_slice(&self.mid_history);
        self.mid_history.copy_from_slice(&mid[frame_length..frame_length + 2]);
    }

    /// Converts a mid/side pair into left/right in place.
    ///
    /// Both buffers hold two history slots followed by `frame_length` decoded samples. The side
    /// channel is first predicted from a low-passed mid signal, with the weights moving linearly
    /// from the previous frame's values over the first 8 ms. The result is one sample behind the
    /// decoded signal and is read from index 1.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.8
    pub fn ms_to_lr(&mut self, mid: &mut [i16], side: &mut [i16], pred_q13: [i32; 2], fs_khz: u32, frame_length: usize) {
        mid[..2].copy_from_slice(&self.mid_history);
        side[..2].copy_from_slice(&self.side_history);
        self.mid_history.copy_from_slice(&mid[frame_length..frame_length + 2]);
        self.side_history.copy_from_slice(&side[frame_length..frame_length + 2]);

        let interp_len = STEREO_INTERP_LEN_MS * fs_khz as usize;
        let denom_q16 = (1 << 16) / interp_len as i32;

        let delta0_q13 = rshift_round(smulbb(pred_q13[0] - self.pred_prev_q13[0], denom_q16), 16);
        let delta1_q13 = rshift_round(smulbb(pred_q13[1] - self.pred_prev_q13[1], denom_q16), 16);

        let mut pred0_q13 = self.pred_prev_q13[0];
        let mut pred1_q13 = self.pred_prev_q13[1];

        for n in 0..frame_length {
            if n < interp_len {
                pred0_q13 += delta0_q13;
                pred1_q13 += delta1_q13;
            }
            else {
                pred0_q13 = pred_q13[0];
                pred1_q13 = pred_q13[1];
            }

            let m0 = i32::from(mid[n]);
            let m1 = i32::from(mid[n + 1]);
            let m2 = i32::from(mid[n + 2]);

            // Q11
            let sum = (m0 + m2 + (m1 << 1)) << 9;
            // Q8
            let sum = smlawb(i32::from(side[n + 1]) << 8, sum, pred0_q13);
            let sum = smlawb(sum, m1 << 11, pred1_q13);

            side[n + 1] = sat16(rshift_round(sum, 8));
        }

        self.pred_prev_q13 = pred_q13;

        for n in 1..=frame_length {
            let m = i32::from(mid[n]);
            let s = i32::from(side[n]);
            mid[n] = sat16(m + s);
            side[n] = sat16(m - s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::tests::RangeEncoder;

    #[test]
    fn prediction_weights_dequantize() {
        let mut enc = RangeEncoder::new(16);
        // Joint index 12 selects the middle coarse level for both weights.
        enc.encode_symbol(12, &STEREO_PRED_JOINT);
        enc.encode_symbol(1, &UNIFORM3);
        enc.encode_symbol(2, &UNIFORM5);
        enc.encode_symbol(1, &UNIFORM3);
        enc.encode_symbol(2, &UNIFORM5);
        enc.encode_symbol(1, &STEREO_ONLY_CODE_MID);
        let data = enc.finish();

        let mut rc = RangeDecoder::new(&data).unwrap();
        let pred = decode_prediction(&mut rc);

        // Index 7 + 5 sub-steps lands between -820 and 820, i.e. on zero.
        assert_eq!(pred, [0, 0]);
        assert!(decode_mid_only(&mut rc));
    }

    #[test]
    fn zero_side_without_prediction_duplicates_mid() {
        let mut state = StereoState::default();
        let frame_length = 80;

        let mut mid: Vec<i16> = (0..frame_length as i16 + 2).map(|i| i * 10).collect();
        let mut side = vec![0i16; frame_length + 2];

        state.ms_to_lr(&mut mid, &mut side, [0, 0], 8, frame_length);

        // History was empty, so the first output is zero and the rest is delayed by one.
        assert_eq!(mid[1], 0);
        assert_eq!(&mid[1..=frame_length], &side[1..=frame_length]);
        assert_eq!(mid[3], 30);
        assert_eq!(state.mid_history, [800, 810]);
    }

    #[test]
    fn side_is_added_and_subtracted() {
        let mut state = StereoState::default();
        let frame_length = 80;

        let mut mid = vec![1000i16; frame_length + 2];
        let mut side = vec![200i16; frame_length + 2];

        state.ms_to_lr(&mut mid, &mut side, [0, 0], 8, frame_length);

        assert_eq!(mid[40], 1200);
        assert_eq!(side[40], 800);
    }

    #[test]
    fn mid_buffering_delays_by_one_frame_tail() {
        let mut state = StereoState::default();
        let mut mid = [0i16, 0, 5, 6, 7, 8];
        state.buffer_mid(&mut mid, 4);
        assert_eq!(mid[..2], [0, 0]);
        assert_eq!(state.mid_history, [7, 8]);
    }
}
