//! Excitation pulse decoding.
//!
//! SILK codes the excitation using a modified version of the Pyramid Vector Quantizer (PVQ)
//! codebook. The PVQ codebook is designed for Laplace-distributed values and consists of all sums
//! of K signed, unit pulses in a vector of dimension N, where two pulses at the same position are
//! required to have the same sign. Thus, the codebook includes all integer codevectors y of
//! dimension N that satisfy
//!
//! ```text
//!                               N-1
//!                               __
//!                               \  abs(y[j]) = K
//!                               /_
//!                               j=0
//! ```
//!
//! Unlike regular PVQ, SILK uses a variable-length, rather than fixed-length, encoding, and codes
//! the least significant bits of large coefficients directly. The dimension is fixed to N = 16:
//! the excitation is made up of a number of "shell blocks", each 16 samples in size.
//!
//! ```text
//!          +-----------------+------------+------------------------+
//!          | Audio Bandwidth | Frame Size | Number of Shell Blocks |
//!          +-----------------+------------+------------------------+
//!          | NB              | 10 ms      |                      5 |
//!          | MB              | 10 ms      |                      8 |
//!          | WB              | 10 ms      |                     10 |
//!          | NB              | 20 ms      |                     10 |
//!          | MB              | 20 ms      |                     15 |
//!          | WB              | 20 ms      |                     20 |
//!          +-----------------+------------+------------------------+
//!
//!               Table 44: Number of Shell Blocks Per SILK Frame
//! ```
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.8

use log::trace;

use crate::range::RangeDecoder;
use crate::silk::frame::{FrameType, Layout, QuantizationOffsetType, MAX_FRAME_LENGTH};
use crate::silk::tables::{
    LSB, PULSES_PER_BLOCK, RATE_LEVELS, SHELL_CODE_0, SHELL_CODE_1, SHELL_CODE_2, SHELL_CODE_3,
    SIGN,
};

pub const SHELL_BLOCK_LENGTH: usize = 16;

/// A pulse count of 17 signals that one more LSB is coded for the block.
const LSB_ESCAPE: usize = 17;

/// Rows of `PULSES_PER_BLOCK` used once LSBs are being coded.
const LSB_ROW: usize = 9;
const LSB_ROW_SATURATED: usize = 10;
const MAX_LSB_COUNT: u32 = 10;

/// Decodes the signed excitation pulses of one frame. Entries past the shell blocks of the frame
/// are zero.
pub fn decode_pulses(
    rc: &mut RangeDecoder<'_>,
    layout: &Layout,
    frame_type: FrameType,
    quant_offset: QuantizationOffsetType,
    pulses: &mut [i32; MAX_FRAME_LENGTH],
) {
    pulses.fill(0);

    let blocks = layout.shell_blocks();

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.8.1
    let rate_level = rc.decode_symbol(&RATE_LEVELS[frame_type.index() >> 1]);

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.8.2
    let mut counts = [0usize; MAX_FRAME_LENGTH / SHELL_BLOCK_LENGTH];
    let mut lsb_counts = [0u32; MAX_FRAME_LENGTH / SHELL_BLOCK_LENGTH];

    for (count, lsbs) in counts.iter_mut().zip(lsb_counts.iter_mut()).take(blocks) {
        *count = rc.decode_symbol(PULSES_PER_BLOCK[rate_level]);

        while *count == LSB_ESCAPE {
            *lsbs += 1;
            let row = if *lsbs == MAX_LSB_COUNT { LSB_ROW_SATURATED } else { LSB_ROW };
            *count = rc.decode_symbol(PULSES_PER_BLOCK[row]);
        }
    }

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.8.3
    for (block, &count) in pulses.chunks_exact_mut(SHELL_BLOCK_LENGTH).zip(&counts).take(blocks) {
        if count > 0 {
            shell_split(rc, block, count);
        }
    }

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.8.4
    for (block, &lsbs) in pulses.chunks_exact_mut(SHELL_BLOCK_LENGTH).zip(&lsb_counts).take(blocks) {
        if lsbs == 0 {
            continue;
        }

        for pulse in block.iter_mut() {
            for _ in 0..lsbs {
                *pulse = (*pulse << 1) + rc.decode_symbol(&LSB) as i32;
            }
        }
    }

    // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.8.5
    let sign_row = &SIGN[7 * (quant_offset.index() + 2 * frame_type.index())..];

    for ((block, &count), &lsbs) in
        pulses.chunks_exact_mut(SHELL_BLOCK_LENGTH).zip(&counts).zip(&lsb_counts).take(blocks)
    {
        // Blocks with only LSB-coded magnitudes still carry signs.
        if count == 0 && lsbs == 0 {
            continue;
        }

        let neg = u16::from(sign_row[count.min(6)]);
        let cdf = [256, 256 - neg, 256];

        for pulse in block.iter_mut().filter(|p| **p > 0) {
            if rc.decode_symbol(&cdf) == 0 {
                *pulse = -*pulse;
            }
        }
    }

    trace!("silk: rate level {}, pulse counts {:?}", rate_level, &counts[..blocks]);
}

/// Recursively splits `total` pulses between the two halves of `out`.
///
/// The halves are visited depth first, left to right, matching the bitstream order.
fn shell_split(rc: &mut RangeDecoder<'_>, out: &mut [i32], total: usize) {
    if out.len() == 1 {
        out[0] = total as i32;
        return;
    }

    let table = match out.len() {
        16 => SHELL_CODE_3,
        8 => SHELL_CODE_2,
        4 => SHELL_CODE_1,
        _ => SHELL_CODE_0,
    };

    let left = if total > 0 { rc.decode_symbol(table[total]) } else { 0 };

    let (a, b) = out.split_at_mut(out.len() / 2);
    shell_split(rc, a, left);
    shell_split(rc, b, total - left);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::tests::RangeEncoder;

    /// Encodes a shell block the way `shell_split` reads it.
    fn encode_split(enc: &mut RangeEncoder, block: &[i32]) {
        if block.len() == 1 {
            return;
        }
        let table = match block.len() {
            16 => SHELL_CODE_3,
            8 => SHELL_CODE_2,
            4 => SHELL_CODE_1,
            _ => SHELL_CODE_0,
        };
        let (a, b) = block.split_at(block.len() / 2);
        let total: i32 = block.iter().sum();
        if total > 0 {
            enc.encode_symbol(a.iter().sum::<i32>() as usize, table[total as usize]);
        }
        encode_split(enc, a);
        encode_split(enc, b);
    }

    #[test]
    fn shell_blocks_with_signs() {
        let layout = Layout::new(8, 2);
        let frame_type = FrameType::Unvoiced;
        let offset = QuantizationOffsetType::Low;

        let mut block = [0i32; 16];
        block[0] = 2;
        block[5] = 1;
        block[15] = 3;

        let mut enc = RangeEncoder::new(128);
        enc.encode_symbol(3, &RATE_LEVELS[0]);
        enc.encode_symbol(6, PULSES_PER_BLOCK[3]);
        for _ in 1..5 {
            enc.encode_symbol(0, PULSES_PER_BLOCK[3]);
        }
        encode_split(&mut enc, &block);

        // Negative, positive, negative.
        let neg = 256 - u16::from(SIGN[7 * 2 + 6]);
        let cdf = [256, neg, 256];
        enc.encode_symbol(0, &cdf);
        enc.encode_symbol(1, &cdf);
        enc.encode_symbol(0, &cdf);
        let data = enc.finish();

        let mut rc = RangeDecoder::new(&data).unwrap();
        let mut pulses = [0; MAX_FRAME_LENGTH];
        decode_pulses(&mut rc, &layout, frame_type, offset, &mut pulses);

        assert_eq!(pulses[0], -2);
        assert_eq!(pulses[5], 1);
        assert_eq!(pulses[15], -3);
        assert!(pulses[16..].iter().all(|&p| p == 0));
    }

    #[test]
    fn lsb_extension_doubles_magnitudes() {
        let layout = Layout::new(8, 2);

        let mut block = [0i32; 16];
        block[3] = 1;

        let mut enc = RangeEncoder::new(128);
        enc.encode_symbol(0, &RATE_LEVELS[0]);
        enc.encode_symbol(LSB_ESCAPE, PULSES_PER_BLOCK[0]);
        enc.encode_symbol(1, PULSES_PER_BLOCK[LSB_ROW]);
        for _ in 1..5 {
            enc.encode_symbol(0, PULSES_PER_BLOCK[0]);
        }
        encode_split(&mut enc, &block);
        for i in 0..16 {
            enc.encode_symbol(usize::from(i == 7), &LSB);
        }
        let neg = 256 - u16::from(SIGN[1]);
        let cdf = [256, neg, 256];
        enc.encode_symbol(1, &cdf);
        enc.encode_symbol(1, &cdf);
        let data = enc.finish();

        let mut rc = RangeDecoder::new(&data).unwrap();
        let mut pulses = [0; MAX_FRAME_LENGTH];
        decode_pulses(&mut rc, &layout, FrameType::Inactive, QuantizationOffsetType::Low, &mut pulses);

        assert_eq!(pulses[3], 2);
        assert_eq!(pulses[7], 1);
        assert_eq!(pulses.iter().filter(|&&p| p != 0).count(), 2);
    }
}
