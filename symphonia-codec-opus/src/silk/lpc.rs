//! Normalized line spectral frequencies and their conversion to LPC coefficients.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5

use crate::silk::fixed::{
    clz32, inverse32_varq, rshift_round, rshift_round64, sat16, smlawb, smmul, smulbb, smulww,
};
use crate::silk::tables::*;

pub const MAX_LPC_ORDER: usize = 16;

/// Bandwidth expansion passes tried before the filter is forced to zero.
const MAX_LPC_STABILIZE_ITERATIONS: u32 = 16;

/// Repulsion passes before the stabilizer falls back to sorting.
const MAX_STABILIZE_LOOPS: usize = 20;

/// Residual reconstruction levels are pulled 0.1 towards zero (Q10).
const NLSF_QUANT_LEVEL_ADJ_Q10: i32 = 102;

/// Q domain of the polynomial coefficients in the LSF to LPC conversion.
const QA: u32 = 16;

/// Q domain of the reflection coefficient recursion.
const QA_GAIN: u32 = 24;
const A_LIMIT: i32 = 16_773_022;
/// `1 / MAX_PREDICTION_POWER_GAIN` in Q30.
const MIN_INV_GAIN_Q30: i32 = 107_374;

const ORDERING_10: [usize; 10] = [0, 9, 6, 3, 4, 5, 8, 1, 2, 7];
const ORDERING_16: [usize; 16] = [0, 15, 8, 7, 4, 11, 12, 3, 2, 13, 10, 5, 6, 9, 14, 1];

/// The two NLSF codebooks. Narrowband and mediumband share the 10th order book, wideband uses
/// the 16th order book.
///
/// ```text
///     +-----------------+------------+-------------------------+
///     | Audio Bandwidth | LPC Order  | Codebook                |
///     +-----------------+------------+-------------------------+
///     | NB or MB        | 10         | NLSF_CB_NB_MB           |
///     | WB              | 16         | NLSF_CB_WB              |
///     +-----------------+------------+-------------------------+
/// ```
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NlsfCodebook {
    NarrowMedium,
    Wide,
}

impl NlsfCodebook {
    pub fn for_sample_rate(fs_khz: u32) -> Self {
        return if fs_khz == 16 { NlsfCodebook::Wide } else { NlsfCodebook::NarrowMedium };
    }

    pub fn order(self) -> usize {
        return match self {
            NlsfCodebook::NarrowMedium => 10,
            NlsfCodebook::Wide => 16,
        };
    }

    fn step_q16(self) -> i32 {
        return match self {
            NlsfCodebook::NarrowMedium => 11_796,
            NlsfCodebook::Wide => 9_830,
        };
    }

    /// Stage 1 index distribution for voiced (`voiced == true`) or other frames.
    pub fn stage1_cdf(self, voiced: bool) -> &'static [u16] {
        let row = usize::from(voiced);
        return match self {
            NlsfCodebook::NarrowMedium => &NLSF_CB1_NB_MB[row],
            NlsfCodebook::Wide => &NLSF_CB1_WB[row],
        };
    }

    pub fn stage2_cdf(self, row: usize) -> &'static [u16] {
        return match self {
            NlsfCodebook::NarrowMedium => &NLSF_CB2_NB_MB[row],
            NlsfCodebook::Wide => &NLSF_CB2_WB[row],
        };
    }

    fn vector_q8(self, index: usize) -> &'static [u8] {
        return match self {
            NlsfCodebook::NarrowMedium => &NLSF_CB1_NB_MB_Q8[index],
            NlsfCodebook::Wide => &NLSF_CB1_WB_Q8[index],
        };
    }

    fn weights_q9(self, index: usize) -> &'static [i16] {
        return match self {
            NlsfCodebook::NarrowMedium => &NLSF_CB1_NB_MB_WGHT_Q9[index],
            NlsfCodebook::Wide => &NLSF_CB1_WB_WGHT_Q9[index],
        };
    }

    fn selectors(self, index: usize) -> &'static [u8] {
        return match self {
            NlsfCodebook::NarrowMedium => &NLSF_CB2_SELECT_NB_MB[index],
            NlsfCodebook::Wide => &NLSF_CB2_SELECT_WB[index],
        };
    }

    fn predictors_q8(self) -> &'static [u8] {
        return match self {
            NlsfCodebook::NarrowMedium => &NLSF_PRED_NB_MB_Q8,
            NlsfCodebook::Wide => &NLSF_PRED_WB_Q8,
        };
    }

    pub fn delta_min_q15(self) -> &'static [i16] {
        return match self {
            NlsfCodebook::NarrowMedium => &NLSF_DELTA_MIN_NB_MB_Q15,
            NlsfCodebook::Wide => &NLSF_DELTA_MIN_WB_Q15,
        };
    }

    /// Splits the packed selector bytes of a stage 1 vector into the stage 2 distribution row and
    /// the backwards prediction weight for every coefficient.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.2
    pub fn unpack(self, index: usize) -> ([usize; MAX_LPC_ORDER], [u8; MAX_LPC_ORDER]) {
        let order = self.order();
        let pred = self.predictors_q8();

        let mut rows = [0; MAX_LPC_ORDER];
        let mut pred_q8 = [0; MAX_LPC_ORDER];

        for (pair, &entry) in self.selectors(index).iter().enumerate() {
            let i = 2 * pair;
            rows[i] = usize::from((entry >> 1) & 7);
            pred_q8[i] = pred[i + usize::from(entry & 1) * (order - 1)];
            rows[i + 1] = usize::from((entry >> 5) & 7);
            pred_q8[i + 1] = pred[i + usize::from((entry >> 4) & 1) * (order - 1) + 1];
        }

        return (rows, pred_q8);
    }
}

/// Reconstructs the quantized NLSF vector from the stage 1 index and the stage 2 residual
/// indices, then stabilizes it.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.3
pub fn decode_nlsf(codebook: NlsfCodebook, stage1: usize, residuals: &[i32], nlsf_q15: &mut [i16]) {
    let order = codebook.order();
    let (_, pred_q8) = codebook.unpack(stage1);

    let mut res_q10 = [0i16; MAX_LPC_ORDER];
    let mut out_q10 = 0i32;

    for i in (0..order).rev() {
        let pred_q10 = smulbb(out_q10, i32::from(pred_q8[i])) >> 8;

        out_q10 = residuals[i] << 10;
        if out_q10 > 0 {
            out_q10 -= NLSF_QUANT_LEVEL_ADJ_Q10;
        }
        else if out_q10 < 0 {
            out_q10 += NLSF_QUANT_LEVEL_ADJ_Q10;
        }

        out_q10 = smlawb(pred_q10, out_q10, codebook.step_q16());
        res_q10[i] = out_q10 as i16;
    }

    let cb1_q8 = codebook.vector_q8(stage1);
    let weights_q9 = codebook.weights_q9(stage1);

    for i in 0..order {
        let nlsf = (i32::from(res_q10[i]) << 14) / i32::from(weights_q9[i]) + (i32::from(cb1_q8[i]) << 7);
        nlsf_q15[i] = nlsf.clamp(0, 32767) as i16;
    }

    stabilize(&mut nlsf_q15[..order], codebook.delta_min_q15());
}

/// Enforces the minimum spacing `delta_min_q15` between consecutive NLSFs and the band edges.
///
/// The closest pair is pushed apart around its center up to 20 times. If the vector is still
/// unstable, it is sorted and clamped forwards then backwards.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.4
pub fn stabilize(nlsf_q15: &mut [i16], delta_min_q15: &[i16]) {
    let l = nlsf_q15.len();
    debug_assert_eq!(delta_min_q15.len(), l + 1);

    let delta = |i: usize| i32::from(delta_min_q15[i]);

    for _ in 0..MAX_STABILIZE_LOOPS {
        let mut min_diff = i32::from(nlsf_q15[0]) - delta(0);
        let mut at = 0;

        for i in 1..l {
            let diff = i32::from(nlsf_q15[i]) - (i32::from(nlsf_q15[i - 1]) + delta(i));
            if diff < min_diff {
                min_diff = diff;
                at = i;
            }
        }

        let diff = (1 << 15) - (i32::from(nlsf_q15[l - 1]) + delta(l));
        if diff < min_diff {
            min_diff = diff;
            at = l;
        }

        if min_diff >= 0 {
            return;
        }

        if at == 0 {
            nlsf_q15[0] = delta_min_q15[0];
        }
        else if at == l {
            nlsf_q15[l - 1] = ((1 << 15) - delta(l)) as i16;
        }
        else {
            let half = delta(at) >> 1;

            let min_center = (0..at).map(delta).sum::<i32>() + half;
            let max_center = (1 << 15) - (at + 1..=l).map(delta).sum::<i32>() - half;

            let sum = i32::from(nlsf_q15[at - 1]) + i32::from(nlsf_q15[at]);
            let center = i32::from(limit(rshift_round(sum, 1), min_center, max_center) as i16);

            nlsf_q15[at - 1] = (center - half) as i16;
            nlsf_q15[at] = (i32::from(nlsf_q15[at - 1]) + delta(at)) as i16;
        }
    }

    nlsf_q15.sort_unstable();

    nlsf_q15[0] = nlsf_q15[0].max(delta_min_q15[0]);
    for i in 1..l {
        nlsf_q15[i] = nlsf_q15[i].max(nlsf_q15[i - 1].saturating_add(delta_min_q15[i]));
    }

    nlsf_q15[l - 1] = i32::from(nlsf_q15[l - 1]).min((1 << 15) - delta(l)) as i16;
    for i in (0..l - 1).rev() {
        nlsf_q15[i] = i32::from(nlsf_q15[i]).min(i32::from(nlsf_q15[i + 1]) - delta(i + 1)) as i16;
    }
}

/// Clamp that accepts its bounds in either order.
fn limit(a: i32, limit1: i32, limit2: i32) -> i32 {
    if limit1 > limit2 {
        return a.clamp(limit2, limit1);
    }
    return a.clamp(limit1, limit2);
}

/// Converts a stabilized NLSF vector into Q12 LPC coefficients and bandwidth-expands them until
/// the synthesis filter is stable.
///
/// ```text
///        d2
///        __
///  P(z) = || (1 - 2*cos(n[2*k]) z^-1 + z^-2)(1 + z^-1)
///        k=0
///        d2
///        __
///  Q(z) = || (1 - 2*cos(n[2*k+1]) z^-1 + z^-2)(1 - z^-1)
///        k=0
///
///  A(z) = (P(z) + Q(z)) / 2
/// ```
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.6
pub fn nlsf_to_lpc(nlsf_q15: &[i16], a_q12: &mut [i16]) {
    let d = nlsf_q15.len();
    let ordering: &[usize] = if d == 16 { &ORDERING_16 } else { &ORDERING_10 };

    let mut cos_lsf_qa = [0i32; MAX_LPC_ORDER];

    for (k, &nlsf) in nlsf_q15.iter().enumerate() {
        let nlsf = i32::from(nlsf);
        let f_int = (nlsf >> 8) as usize;
        let f_frac = nlsf & 0xff;

        let cos_val = i32::from(LSF_COS_Q12[f_int]);
        let delta = i32::from(LSF_COS_Q12[f_int + 1]) - cos_val;

        cos_lsf_qa[ordering[k]] = rshift_round((cos_val << 8) + delta * f_frac, 20 - QA);
    }

    let dd = d / 2;
    let mut p = [0i32; MAX_LPC_ORDER / 2 + 1];
    let mut q = [0i32; MAX_LPC_ORDER / 2 + 1];

    find_poly(&mut p, &cos_lsf_qa, dd);
    find_poly(&mut q, &cos_lsf_qa[1..], dd);

    let mut a32_qa1 = [0i32; MAX_LPC_ORDER];

    for k in 0..dd {
        let p_tmp = p[k + 1].wrapping_add(p[k]);
        let q_tmp = q[k + 1].wrapping_sub(q[k]);

        a32_qa1[k] = q_tmp.wrapping_neg().wrapping_sub(p_tmp);
        a32_qa1[d - k - 1] = q_tmp.wrapping_sub(p_tmp);
    }

    let a32_qa1 = &mut a32_qa1[..d];
    lpc_fit(a_q12, a32_qa1, 12, QA + 1);

    let mut i = 0;
    while inverse_prediction_gain(a_q12) == 0 && i < MAX_LPC_STABILIZE_ITERATIONS {
        bandwidth_expand(a32_qa1, 65536 - (2 << i));
        for (a, &a32) in a_q12.iter_mut().zip(a32_qa1.iter()) {
            *a = rshift_round(a32, QA + 1 - 12) as i16;
        }
        i += 1;
    }
}

/// Expands `prod(1 - 2*cos(w) z^-1 + z^-2)` over every other entry of `c_lsf`.
fn find_poly(out: &mut [i32], c_lsf: &[i32], dd: usize) {
    out[0] = 1 << QA;
    out[1] = -c_lsf[0];

    for k in 1..dd {
        let f = i64::from(c_lsf[2 * k]);

        out[k + 1] = (out[k - 1] << 1).wrapping_sub(rshift_round64(f * i64::from(out[k]), QA) as i32);
        for n in (2..=k).rev() {
            let term = out[n - 2].wrapping_sub(rshift_round64(f * i64::from(out[n - 1]), QA) as i32);
            out[n] = out[n].wrapping_add(term);
        }
        out[1] = out[1].wrapping_sub(f as i32);
    }
}

/// Narrows `a_qin` into 16-bit `a_qout`, chirping the filter until its largest coefficient fits.
fn lpc_fit(a_qout: &mut [i16], a_qin: &mut [i32], q_out: u32, q_in: u32) {
    let shift = q_in - q_out;
    let mut fits = false;

    for _ in 0..10 {
        let (idx, maxabs) = a_qin
            .iter()
            .enumerate()
            .fold((0, 0), |(idx, max), (k, &a)| if a.wrapping_abs() > max { (k, a.wrapping_abs()) } else { (idx, max) });

        let maxabs = rshift_round(maxabs, shift);

        if maxabs > i32::from(i16::MAX) {
            // (i32::MAX >> 14) + i16::MAX
            let maxabs = maxabs.min(163_838);
            let chirp_q16 = 65_470 - ((maxabs - i32::from(i16::MAX)) << 14) / ((maxabs * (idx as i32 + 1)) >> 2);
            bandwidth_expand(a_qin, chirp_q16);
        }
        else {
            fits = true;
            break;
        }
    }

    if fits {
        for (out, &a) in a_qout.iter_mut().zip(a_qin.iter()) {
            *out = rshift_round(a, shift) as i16;
        }
    }
    else {
        for (out, a) in a_qout.iter_mut().zip(a_qin.iter_mut()) {
            *out = sat16(rshift_round(*a, shift));
            *a = i32::from(*out) << shift;
        }
    }
}

/// Chirps an AR filter: `a[i] *= chirp^(i+1)`.
pub fn bandwidth_expand(ar: &mut [i32], mut chirp_q16: i32) {
    let chirp_minus_one_q16 = chirp_q16 - 65536;

    if let Some((last, head)) = ar.split_last_mut() {
        for a in head {
            *a = smulww(chirp_q16, *a);
            chirp_q16 += rshift_round(chirp_q16 * chirp_minus_one_q16, 16);
        }
        *last = smulww(chirp_q16, *last);
    }
}

/// Returns the inverse prediction gain of the filter in Q30, or 0 when the filter is unstable
/// or its prediction gain exceeds 40 dB.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.8
pub fn inverse_prediction_gain(a_q12: &[i16]) -> i32 {
    let mut a_qa = [0i32; MAX_LPC_ORDER];
    let mut dc_resp = 0;

    for (dst, &a) in a_qa.iter_mut().zip(a_q12) {
        dc_resp += i32::from(a);
        *dst = i32::from(a) << (QA_GAIN - 12);
    }

    if dc_resp >= 4096 {
        return 0;
    }

    return inverse_prediction_gain_qa(&mut a_qa[..a_q12.len()]);
}

fn inverse_prediction_gain_qa(a_qa: &mut [i32]) -> i32 {
    let mul_frac_q31 = |a: i32, b: i32| rshift_round64(i64::from(a) * i64::from(b), 31) as i32;

    let mut inv_gain_q30 = 1i32 << 30;

    for k in (1..a_qa.len()).rev() {
        if a_qa[k] > A_LIMIT || a_qa[k] < -A_LIMIT {
            return 0;
        }

        let rc_q31 = -(a_qa[k] << (31 - QA_GAIN));
        let rc_mult1_q30 = (1 << 30) - smmul(rc_q31, rc_q31);

        inv_gain_q30 = smmul(inv_gain_q30, rc_mult1_q30) << 2;
        if inv_gain_q30 < MIN_INV_GAIN_Q30 {
            return 0;
        }

        let mult2_q = 32 - clz32(rc_mult1_q30.abs());
        let rc_mult2 = inverse32_varq(rc_mult1_q30, mult2_q + 30);

        for n in 0..(k + 1) >> 1 {
            let tmp1 = a_qa[n];
            let tmp2 = a_qa[k - n - 1];

            let v = rshift_round64(
                i64::from(tmp1.saturating_sub(mul_frac_q31(tmp2, rc_q31))) * i64::from(rc_mult2),
                mult2_q as u32,
            );
            let Ok(v) = i32::try_from(v) else { return 0 };
            a_qa[n] = v;

            let v = rshift_round64(
                i64::from(tmp2.saturating_sub(mul_frac_q31(tmp1, rc_q31))) * i64::from(rc_mult2),
                mult2_q as u32,
            );
            let Ok(v) = i32::try_from(v) else { return 0 };
            a_qa[k - n - 1] = v;
        }
    }

    if a_qa[0] > A_LIMIT || a_qa[0] < -A_LIMIT {
        return 0;
    }

    let rc_q31 = -(a_qa[0] << (31 - QA_GAIN));
    let rc_mult1_q30 = (1 << 30) - smmul(rc_q31, rc_q31);

    inv_gain_q30 = smmul(inv_gain_q30, rc_mult1_q30) << 2;
    if inv_gain_q30 < MIN_INV_GAIN_Q30 {
        return 0;
    }

    return inv_gain_q30;
}

/// Interpolates the first half of the frame's NLSFs from the previous frame: `n0 = n_prev +
/// (w * (n - n_prev) >> 2)`.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.5
pub fn interpolate_nlsf(prev_q15: &[i16], cur_q15: &[i16], weight_q2: i32, out_q15: &mut [i16]) {
    for ((out, &prev), &cur) in out_q15.iter_mut().zip(prev_q15).zip(cur_q15) {
        let prev = i32::from(prev);
        *out = (prev + ((weight_q2 * (i32::from(cur) - prev)) >> 2)) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uniform_nlsf(order: usize) -> Vec<i16> {
        return (1..=order).map(|k| (32768 * k / (order + 1)) as i16).collect();
    }

    #[test]
    fn stable_vector_is_left_untouched() {
        let mut nlsf = uniform_nlsf(16);
        let before = nlsf.clone();
        stabilize(&mut nlsf, &NLSF_DELTA_MIN_WB_Q15);
        assert_eq!(nlsf, before);
    }

    #[test]
    fn collapsed_vector_is_spread() {
        let mut nlsf = vec![16384i16; 10];
        stabilize(&mut nlsf, &NLSF_DELTA_MIN_NB_MB_Q15);

        assert!(nlsf[0] >= NLSF_DELTA_MIN_NB_MB_Q15[0]);
        for i in 1..10 {
            assert!(i32::from(nlsf[i]) - i32::from(nlsf[i - 1]) >= i32::from(NLSF_DELTA_MIN_NB_MB_Q15[i]));
        }
        assert!(32768 - i32::from(nlsf[9]) >= i32::from(NLSF_DELTA_MIN_NB_MB_Q15[10]));
    }

    #[test]
    fn zero_residual_decodes_to_the_stage1_vector() {
        let mut nlsf = [0i16; MAX_LPC_ORDER];
        decode_nlsf(NlsfCodebook::NarrowMedium, 0, &[0; MAX_LPC_ORDER], &mut nlsf);

        let expected: Vec<i16> = NLSF_CB1_NB_MB_Q8[0].iter().map(|&v| i16::from(v) << 7).collect();
        assert_eq!(&nlsf[..10], &expected[..]);
    }

    #[test]
    fn unpack_selects_rows_and_predictors() {
        // The first NB/MB vector uses distribution row 0 and the alternative predictor for its
        // second coefficient.
        let (rows, pred) = NlsfCodebook::NarrowMedium.unpack(0);
        assert_eq!(rows[0], 0);
        assert_eq!(rows[1], 0);
        assert_eq!(pred[0], NLSF_PRED_NB_MB_Q8[0]);
        assert_eq!(pred[1], NLSF_PRED_NB_MB_Q8[1 + 9]);
    }

    #[test]
    fn uniform_lsfs_give_a_flat_filter() {
        for order in [10, 16] {
            let nlsf = uniform_nlsf(order);
            let mut a = vec![0i16; order];
            nlsf_to_lpc(&nlsf, &mut a);
            assert!(a.iter().all(|&c| c.abs() <= 40), "{:?}", a);
            assert!(inverse_prediction_gain(&a) > 0);
        }
    }

    #[test]
    fn unstable_filters_are_rejected() {
        // A single pole on the unit circle.
        assert_eq!(inverse_prediction_gain(&[4096, 0, 0, 0, 0, 0, 0, 0, 0, 0]), 0);
        assert_eq!(inverse_prediction_gain(&[0; 10]), 1 << 30);
    }

    #[test]
    fn chirp_shrinks_coefficients() {
        let mut ar = [1 << 16; 4];
        bandwidth_expand(&mut ar, 1 << 15);
        assert_eq!(ar, [1 << 15, 1 << 14, 1 << 13, 1 << 12]);
    }

    fn nlsf_vector(order: usize) -> impl Strategy<Value = Vec<i16>> {
        return prop::collection::vec(0i16..=32767, order);
    }

    proptest! {
        #[test]
        fn stabilization_is_idempotent(mut nlsf in nlsf_vector(16), narrow in any::<bool>()) {
            let (nlsf, delta_min) = if narrow {
                nlsf.truncate(10);
                (nlsf, &NLSF_DELTA_MIN_NB_MB_Q15[..])
            }
            else {
                (nlsf, &NLSF_DELTA_MIN_WB_Q15[..])
            };

            let mut once = nlsf;
            stabilize(&mut once, delta_min);
            let mut twice = once.clone();
            stabilize(&mut twice, delta_min);

            prop_assert_eq!(once, twice);
        }

        #[test]
        fn converted_filters_are_stable(nlsf in nlsf_vector(16), narrow in any::<bool>()) {
            let codebook = if narrow { NlsfCodebook::NarrowMedium } else { NlsfCodebook::Wide };
            let order = codebook.order();

            let mut nlsf = nlsf;
            nlsf.truncate(order);
            stabilize(&mut nlsf, codebook.delta_min_q15());

            let mut a = vec![0i16; order];
            nlsf_to_lpc(&nlsf, &mut a);

            prop_assert!(inverse_prediction_gain(&a) > 0);
        }
    }
}
