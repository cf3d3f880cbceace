//! Side information of a SILK frame: frame type, gains, NLSF indices, pitch and LTP parameters.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7

use log::trace;

use crate::range::RangeDecoder;
use crate::silk::frame::{Coding, FrameType, Layout, QuantizationOffsetType, MAX_NB_SUBFR};
use crate::silk::lpc::MAX_LPC_ORDER;
use crate::silk::tables::*;

/// Largest stage 2 residual index coded without the extension table.
const NLSF_QUANT_MAX_AMPLITUDE: i32 = 4;

/// Quantization indices of one SILK frame, as read from the bitstream.
#[derive(Debug, Clone, Default)]
pub struct FrameIndices {
    pub frame_type: FrameType,
    pub quant_offset: QuantizationOffsetType,
    /// First entry is absolute or delta coded depending on [`Coding`], the rest are deltas.
    pub gains: [i32; MAX_NB_SUBFR],
    pub nlsf_stage1: usize,
    pub nlsf_residuals: [i32; MAX_LPC_ORDER],
    /// NLSF interpolation weight in Q2. 4 disables interpolation.
    pub nlsf_interp_q2: i32,
    pub lag_index: i32,
    pub contour_index: usize,
    pub periodicity: usize,
    pub ltp_index: [usize; MAX_NB_SUBFR],
    pub ltp_scale_index: usize,
    pub seed: i32,
}

/// State carried between frames by the entropy coding of the side information.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodingHistory {
    pub prev_frame_type: FrameType,
    pub prev_lag_index: i32,
}

/// Decodes the side information of one frame.
///
/// ```text
///   +---------------------------+-----------------------------------+
///   | Symbol(s)                 | Condition                         |
///   +---------------------------+-----------------------------------+
///   | Frame Type                |                                   |
///   | Subframe Gains            |                                   |
///   | NLSF Stage 1 Index        |                                   |
///   | NLSF Stage 2 Residual     |                                   |
///   | NLSF Interpolation Weight | 20 ms frames only                 |
///   | Primary Pitch Lag         | Voiced frames only                |
///   | Subframe Pitch Contour    | Voiced frames only                |
///   | Periodicity Index         | Voiced frames only                |
///   | LTP Filter                | Voiced frames only                |
///   | LTP Scaling               | Voiced, independently coded       |
///   | LCG Seed                  |                                   |
///   +---------------------------+-----------------------------------+
/// ```
///
/// `active` is the VAD flag of the frame. LBRR frames are always decoded as active.
pub fn decode_indices(
    rc: &mut RangeDecoder<'_>,
    layout: &Layout,
    active: bool,
    coding: Coding,
    history: &mut CodingHistory,
) -> FrameIndices {
    let mut indices = FrameIndices::default();

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.3
    let symbol = if active {
        rc.decode_symbol(&TYPE_OFFSET_VAD) + 2
    }
    else {
        rc.decode_symbol(&TYPE_OFFSET_NO_VAD)
    };
    (indices.frame_type, indices.quant_offset) = FrameType::from_symbol(symbol);

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.4
    if coding == Coding::Conditional {
        indices.gains[0] = rc.decode_symbol(&GAIN_DELTA) as i32;
    }
    else {
        let msb = rc.decode_symbol(&GAIN_HIGHBITS[indices.frame_type.index()]) as i32;
        let lsb = rc.decode_symbol(&UNIFORM8) as i32;
        indices.gains[0] = (msb << 3) + lsb;
    }

    for gain in &mut indices.gains[1..layout.nb_subfr] {
        *gain = rc.decode_symbol(&GAIN_DELTA) as i32;
    }

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.1
    let codebook = layout.codebook;
    indices.nlsf_stage1 = rc.decode_symbol(codebook.stage1_cdf(indices.frame_type == FrameType::Voiced));

    let (rows, _) = codebook.unpack(indices.nlsf_stage1);

    for (residual, &row) in indices.nlsf_residuals.iter_mut().zip(&rows).take(codebook.order()) {
        let mut ix = rc.decode_symbol(codebook.stage2_cdf(row)) as i32;

        if ix == 0 {
            ix -= rc.decode_symbol(&NLSF_EXT) as i32;
        }
        else if ix == 2 * NLSF_QUANT_MAX_AMPLITUDE {
            ix += rc.decode_symbol(&NLSF_EXT) as i32;
        }

        *residual = ix - NLSF_QUANT_MAX_AMPLITUDE;
    }

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.5.5
    indices.nlsf_interp_q2 = if layout.is_10ms() { 4 } else { rc.decode_symbol(&NLSF_INTERP_FACTOR) as i32 };

    if indices.frame_type == FrameType::Voiced {
        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.6.1
        let mut absolute = true;

        if coding == Coding::Conditional && history.prev_frame_type == FrameType::Voiced {
            let delta = rc.decode_symbol(&PITCH_DELTA) as i32;
            if delta > 0 {
                indices.lag_index = history.prev_lag_index + delta - 9;
                absolute = false;
            }
        }

        if absolute {
            let high = rc.decode_symbol(&PITCH_LAG) as i32;
            let low = rc.decode_symbol(layout.pitch_low_bits_cdf()) as i32;
            indices.lag_index = high * (layout.fs_khz as i32 >> 1) + low;
        }
        history.prev_lag_index = indices.lag_index;

        indices.contour_index = rc.decode_symbol(layout.pitch_contour_cdf());

        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.6.2
        indices.periodicity = rc.decode_symbol(&LTP_PER_INDEX);
        for ltp in &mut indices.ltp_index[..layout.nb_subfr] {
            *ltp = rc.decode_symbol(LTP_GAIN[indices.periodicity]);
        }

        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.6.3
        if coding == Coding::Independent {
            indices.ltp_scale_index = rc.decode_symbol(&LTP_SCALE);
        }
    }
    history.prev_frame_type = indices.frame_type;

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.7
    indices.seed = rc.decode_symbol(&UNIFORM4) as i32;

    trace!(
        "silk: frame type {:?} offset {:?} gains {:?} nlsf {} lag {}",
        indices.frame_type,
        indices.quant_offset,
        &indices.gains[..layout.nb_subfr],
        indices.nlsf_stage1,
        indices.lag_index
    );

    return indices;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::tests::RangeEncoder;

    #[test]
    fn unvoiced_frame_round_trip() {
        let layout = Layout::new(16, 4);
        let codebook = layout.codebook;

        let mut enc = RangeEncoder::new(64);
        // Active, unvoiced, high offset.
        enc.encode_symbol(1, &TYPE_OFFSET_VAD);
        enc.encode_symbol(5, &GAIN_HIGHBITS[1]);
        enc.encode_symbol(2, &UNIFORM8);
        for _ in 1..4 {
            enc.encode_symbol(4, &GAIN_DELTA);
        }
        enc.encode_symbol(7, codebook.stage1_cdf(false));
        let (rows, _) = codebook.unpack(7);
        for &row in rows.iter().take(16) {
            enc.encode_symbol(4, codebook.stage2_cdf(row));
        }
        enc.encode_symbol(4, &NLSF_INTERP_FACTOR);
        enc.encode_symbol(3, &UNIFORM4);
        let data = enc.finish();

        let mut rc = RangeDecoder::new(&data).unwrap();
        let mut history = CodingHistory::default();
        let indices = decode_indices(&mut rc, &layout, true, Coding::Independent, &mut history);

        assert_eq!(indices.frame_type, FrameType::Unvoiced);
        assert_eq!(indices.quant_offset, QuantizationOffsetType::High);
        assert_eq!(indices.gains, [42, 4, 4, 4]);
        assert_eq!(indices.nlsf_stage1, 7);
        assert_eq!(indices.nlsf_residuals, [0; 16]);
        assert_eq!(indices.nlsf_interp_q2, 4);
        assert_eq!(indices.seed, 3);
        assert_eq!(history.prev_frame_type, FrameType::Unvoiced);
    }

    #[test]
    fn voiced_frame_uses_pitch_delta_when_conditional() {
        let layout = Layout::new(12, 2);
        let codebook = layout.codebook;

        let mut enc = RangeEncoder::new(64);
        enc.encode_symbol(2, &TYPE_OFFSET_VAD);
        for _ in 0..2 {
            enc.encode_symbol(4, &GAIN_DELTA);
        }
        enc.encode_symbol(0, codebook.stage1_cdf(true));
        let (rows, _) = codebook.unpack(0);
        // Largest level with one extension step, then zeros.
        enc.encode_symbol(8, codebook.stage2_cdf(rows[0]));
        enc.encode_symbol(1, &NLSF_EXT);
        for &row in rows.iter().take(10).skip(1) {
            enc.encode_symbol(4, codebook.stage2_cdf(row));
        }
        enc.encode_symbol(12, &PITCH_DELTA);
        enc.encode_symbol(1, &PITCH_CONTOUR_10MS);
        enc.encode_symbol(2, &LTP_PER_INDEX);
        enc.encode_symbol(5, LTP_GAIN[2]);
        enc.encode_symbol(6, LTP_GAIN[2]);
        enc.encode_symbol(0, &UNIFORM4);
        let data = enc.finish();

        let mut rc = RangeDecoder::new(&data).unwrap();
        let mut history = CodingHistory { prev_frame_type: FrameType::Voiced, prev_lag_index: 50 };
        let indices = decode_indices(&mut rc, &layout, true, Coding::Conditional, &mut history);

        assert_eq!(indices.frame_type, FrameType::Voiced);
        assert_eq!(indices.nlsf_residuals[0], 5);
        assert_eq!(indices.nlsf_interp_q2, 4);
        assert_eq!(indices.lag_index, 53);
        assert_eq!(history.prev_lag_index, 53);
        assert_eq!(indices.contour_index, 1);
        assert_eq!(indices.periodicity, 2);
        assert_eq!(&indices.ltp_index[..2], &[5, 6]);
        assert_eq!(indices.ltp_scale_index, 0);
    }
}
