//! Band energy decoding.
//!
//! Band energies are coded in the log2 domain in three passes: a coarse 6 dB resolution value
//! predicted in time and frequency, a fine refinement using the bits the allocator assigned to
//! each band, and a final pass spending whatever bits are left once the band shapes are decoded.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.2

use crate::celt::tables::{COARSE_ENERGY_MODEL, ENERGY_ALPHA, ENERGY_BETA, ENERGY_BETA_INTRA, SMALL_ENERGY};
use crate::celt::{MAX_BANDS, MAX_FINE_BITS};
use crate::range::RangeDecoder;

pub type BandEnergies = [[f32; MAX_BANDS]; 2];

/// Decodes the coarse energy of bands `start..end` on top of the previous frame's energies.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.2.1
pub fn decode_coarse(
    rc: &mut RangeDecoder<'_>,
    energy: &mut BandEnergies,
    start: usize,
    end: usize,
    intra: bool,
    channels: usize,
    lm: usize,
) {
    let model = &COARSE_ENERGY_MODEL[lm][usize::from(intra)];
    let (alpha, beta) = if intra { (0.0, ENERGY_BETA_INTRA) } else { (ENERGY_ALPHA[lm], ENERGY_BETA[lm]) };

    let budget = rc.storage_bits();
    let mut prev = [0.0f32; 2];

    for i in start..end {
        for (c, prev) in prev.iter_mut().enumerate().take(channels) {
            let available = budget - rc.tell();

            let qi = if available >= 15 {
                let pi = 2 * i.min(20);
                rc.decode_laplace(u32::from(model[pi]) << 7, u32::from(model[pi + 1]) << 6)
            }
            else if available >= 2 {
                let qi = rc.decode_symbol(&SMALL_ENERGY) as i32;
                (qi >> 1) ^ -(qi & 1)
            }
            else if available >= 1 {
                -i32::from(rc.decode_log2(1))
            }
            else {
                -1
            };

            let q = qi as f32;
            let old = energy[c][i].max(-9.0);

            energy[c][i] = alpha * old + *prev + q;
            *prev += q - beta * q;
        }
    }
}

/// Refines each band with `fine_bits[i]` raw bits per channel.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.2.2
pub fn decode_fine(
    rc: &mut RangeDecoder<'_>,
    energy: &mut BandEnergies,
    start: usize,
    end: usize,
    fine_bits: &[i32; MAX_BANDS],
    channels: usize,
) {
    for i in start..end {
        let bits = fine_bits[i];
        if bits <= 0 {
            continue;
        }

        for band in energy.iter_mut().take(channels) {
            let q2 = rc.get_raw_bits(bits as u32);
            let offset = (q2 as f32 + 0.5) * (1 << (14 - bits)) as f32 / 16384.0 - 0.5;
            band[i] += offset;
        }
    }
}

/// Spends the bits left at the end of the frame on one more bit of energy resolution, first for
/// bands without priority and then for the rest.
pub fn decode_final(
    rc: &mut RangeDecoder<'_>,
    energy: &mut BandEnergies,
    start: usize,
    end: usize,
    fine_bits: &[i32; MAX_BANDS],
    fine_priority: &[bool; MAX_BANDS],
    mut bits_left: i32,
    channels: usize,
) {
    let c = channels as i32;

    for prio in [false, true] {
        for i in start..end {
            if bits_left < c {
                break;
            }
            if fine_bits[i] >= MAX_FINE_BITS || fine_priority[i] != prio {
                continue;
            }

            for band in energy.iter_mut().take(channels) {
                let q2 = rc.get_raw_bits(1);
                let offset = (q2 as f32 - 0.5) * (1 << (14 - fine_bits[i] - 1)) as f32 / 16384.0;
                band[i] += offset;
                bits_left -= 1;
            }
        }
    }
}
