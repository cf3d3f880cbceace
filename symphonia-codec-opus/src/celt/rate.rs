//! Bit allocation.
//!
//! The allocator splits the frame's remaining bit budget between the bands. Both the encoder and
//! the decoder run it on identical inputs, so most of the allocation is implicit and only a few
//! decisions (band skipping, intensity stereo start, dual stereo) are signalled in the
//! bitstream. All quantities are in 1/8 bit units unless stated otherwise.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.3

use crate::celt::tables::{CACHE_BITS, CACHE_INDEX, EBAND_5MS, LOG2_FRAC, LOG_N, STATIC_ALLOC, STATIC_CAPS};
use crate::celt::{BITRES, MAX_BANDS, MAX_FINE_BITS};
use crate::range::RangeDecoder;

const ALLOC_STEPS: u32 = 6;
const LOG_MAX_PSEUDO: usize = 6;
const FINE_OFFSET: i32 = 21;

/// Width of band `i` in 2.5 ms MDCT bins.
#[inline]
pub fn band_width(i: usize) -> i32 {
    return i32::from(EBAND_5MS[i + 1] - EBAND_5MS[i]);
}

/// The pulse count represented by the pseudo-pulse index `i`.
#[inline]
pub fn get_pulses(i: i32) -> i32 {
    return if i < 8 { i } else { (8 + (i & 7)) << ((i >> 3) - 1) };
}

/// The pulse cost row of a band. `lm` may be -1 for a band split below the shortest block.
pub fn pulse_cache(band: usize, lm: i32) -> &'static [u8] {
    let idx = CACHE_INDEX[(lm + 1) as usize * MAX_BANDS + band];
    return &CACHE_BITS[idx as usize..];
}

/// The largest pseudo-pulse count whose cost fits in `bits`, rounded to the nearer neighbour.
pub fn bits2pulses(band: usize, lm: i32, bits: i32) -> i32 {
    let cache = pulse_cache(band, lm);

    let mut lo = 0;
    let mut hi = i32::from(cache[0]);
    let bits = bits - 1;

    for _ in 0..LOG_MAX_PSEUDO {
        let mid = (lo + hi + 1) >> 1;
        if i32::from(cache[mid as usize]) >= bits {
            hi = mid;
        }
        else {
            lo = mid;
        }
    }

    let lo_bits = if lo == 0 { -1 } else { i32::from(cache[lo as usize]) };
    if bits - lo_bits <= i32::from(cache[hi as usize]) - bits {
        return lo;
    }

    return hi;
}

/// The cost of coding `pulses` pseudo-pulses in a band.
pub fn pulses2bits(band: usize, lm: i32, pulses: i32) -> i32 {
    if pulses == 0 {
        return 0;
    }
    return i32::from(pulse_cache(band, lm)[pulses as usize]) + 1;
}

/// Computes the per-band allocation caps for a frame.
pub fn init_caps(caps: &mut [i32; MAX_BANDS], lm: usize, channels: usize) {
    for (i, cap) in caps.iter_mut().enumerate() {
        let n = band_width(i) << lm;
        *cap = (i32::from(STATIC_CAPS[lm][channels - 1][i]) + 64) * channels as i32 * n >> 2;
    }
}

/// The result of the bit allocation for one frame.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    /// One past the last band that receives PVQ bits.
    pub coded_bands: usize,
    /// First band coded with intensity stereo.
    pub intensity: usize,
    pub dual_stereo: bool,
    /// Bits left over after capping, redistributed while decoding the bands.
    pub balance: i32,
    /// Bits available for the shape of each band.
    pub pulses: [i32; MAX_BANDS],
    /// Fine energy bits per band and channel.
    pub fine_bits: [i32; MAX_BANDS],
    /// Bands given priority when distributing leftover bits to fine energy.
    pub fine_priority: [bool; MAX_BANDS],
}

/// Input to [`compute_allocation`].
pub struct AllocationParams<'a> {
    pub start: usize,
    pub end: usize,
    /// Dynamic allocation boosts.
    pub offsets: &'a [i32; MAX_BANDS],
    pub caps: &'a [i32; MAX_BANDS],
    pub trim: i32,
    /// Bits available for allocation.
    pub total: i32,
    pub channels: usize,
    pub lm: usize,
}

/// Runs the allocator, reading the signalled skip, intensity and dual stereo decisions.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.3
pub fn compute_allocation(rc: &mut RangeDecoder<'_>, params: &AllocationParams<'_>) -> Allocation {
    let AllocationParams { start, end, offsets, caps, trim, channels, lm, .. } = *params;
    let c = channels as i32;
    let len = STATIC_ALLOC.len();

    let mut total = params.total.max(0);
    let mut skip_start = start;

    let skip_rsv = if total >= 1 << BITRES { 1 << BITRES } else { 0 };
    total -= skip_rsv;

    let mut intensity_rsv = 0;
    let mut dual_stereo_rsv = 0;
    if channels == 2 {
        intensity_rsv = i32::from(LOG2_FRAC[end - start]);
        if intensity_rsv > total {
            intensity_rsv = 0;
        }
        else {
            total -= intensity_rsv;
            dual_stereo_rsv = if total >= 1 << BITRES { 1 << BITRES } else { 0 };
            total -= dual_stereo_rsv;
        }
    }

    let mut thresh = [0i32; MAX_BANDS];
    let mut trim_offset = [0i32; MAX_BANDS];

    for j in start..end {
        let n = band_width(j);
        thresh[j] = (c << BITRES).max((3 * n << lm << BITRES) >> 4);

        trim_offset[j] = c * n * (trim - 5 - lm as i32) * (end - j - 1) as i32 * (1 << (lm as i32 + BITRES)) >> 6;
        if n << lm == 1 {
            trim_offset[j] -= c << BITRES;
        }
    }

    let vector_bits = |row: usize, j: usize| -> i32 {
        return c * band_width(j) * i32::from(STATIC_ALLOC[row][j]) << lm >> 2;
    };

    // Find the two static allocation rows that bracket the budget.
    let mut lo = 1;
    let mut hi = len as i32 - 1;
    while lo <= hi {
        let mid = ((lo + hi) >> 1) as usize;
        let mut done = false;
        let mut psum = 0;

        for j in (start..end).rev() {
            let mut bits = vector_bits(mid, j);
            if bits > 0 {
                bits = (bits + trim_offset[j]).max(0);
            }
            bits += offsets[j];

            if bits >= thresh[j] || done {
                done = true;
                psum += bits.min(caps[j]);
            }
            else if bits >= c << BITRES {
                psum += c << BITRES;
            }
        }

        if psum > total {
            hi = mid as i32 - 1;
        }
        else {
            lo = mid as i32 + 1;
        }
    }

    let hi = lo as usize;
    let lo = hi - 1;

    let mut bits1 = [0i32; MAX_BANDS];
    let mut bits2 = [0i32; MAX_BANDS];

    for j in start..end {
        let mut b1 = vector_bits(lo, j);
        let mut b2 = if hi >= len { caps[j] } else { vector_bits(hi, j) };

        if b1 > 0 {
            b1 = (b1 + trim_offset[j]).max(0);
        }
        if b2 > 0 {
            b2 = (b2 + trim_offset[j]).max(0);
        }
        if lo > 0 {
            b1 += offsets[j];
        }
        b2 += offsets[j];
        if offsets[j] > 0 {
            skip_start = j;
        }

        bits1[j] = b1;
        bits2[j] = (b2 - b1).max(0);
    }

    let mut alloc = Allocation::default();

    interp_bits2pulses(
        rc,
        params,
        Interp { skip_start, bits1: &bits1, bits2: &bits2, thresh: &thresh, total, skip_rsv, intensity_rsv, dual_stereo_rsv },
        &mut alloc,
    );

    return alloc;
}

struct Interp<'a> {
    skip_start: usize,
    bits1: &'a [i32; MAX_BANDS],
    bits2: &'a [i32; MAX_BANDS],
    thresh: &'a [i32; MAX_BANDS],
    total: i32,
    skip_rsv: i32,
    intensity_rsv: i32,
    dual_stereo_rsv: i32,
}

fn interp_bits2pulses(
    rc: &mut RangeDecoder<'_>,
    params: &AllocationParams<'_>,
    interp: Interp<'_>,
    alloc: &mut Allocation,
) {
    let AllocationParams { start, end, caps, channels, lm, .. } = *params;
    let Interp { skip_start, bits1, bits2, thresh, mut total, skip_rsv, mut intensity_rsv, mut dual_stereo_rsv } =
        interp;

    let c = channels as i32;
    let stereo = i32::from(channels > 1);
    let alloc_floor = c << BITRES;
    let log_m = (lm as i32) << BITRES;
    let bits = &mut alloc.pulses;

    // Interpolate between the two rows in 1/64 steps.
    let mut lo = 0;
    let mut hi = 1 << ALLOC_STEPS;
    for _ in 0..ALLOC_STEPS {
        let mid = (lo + hi) >> 1;
        let mut psum = 0;
        let mut done = false;

        for j in (start..end).rev() {
            let tmp = bits1[j] + (mid * bits2[j] >> ALLOC_STEPS);
            if tmp >= thresh[j] || done {
                done = true;
                psum += tmp.min(caps[j]);
            }
            else if tmp >= alloc_floor {
                psum += alloc_floor;
            }
        }

        if psum > total {
            hi = mid;
        }
        else {
            lo = mid;
        }
    }

    let mut psum = 0;
    let mut done = false;
    for j in (start..end).rev() {
        let mut tmp = bits1[j] + (lo * bits2[j] >> ALLOC_STEPS);
        if tmp < thresh[j] && !done {
            tmp = if tmp >= alloc_floor { alloc_floor } else { 0 };
        }
        else {
            done = true;
        }
        tmp = tmp.min(caps[j]);
        bits[j] = tmp;
        psum += tmp;
    }

    let band_span = |to: usize| -> i32 { i32::from(EBAND_5MS[to] - EBAND_5MS[start]) };

    // Skip bands from the top down while the encoder asks for it.
    let mut coded_bands = end;
    loop {
        let j = coded_bands - 1;

        if j <= skip_start {
            total += skip_rsv;
            break;
        }

        let mut left = total - psum;
        let percoeff = left / band_span(coded_bands);
        left -= band_span(coded_bands) * percoeff;

        let rem = (left - band_span(j)).max(0);
        let width = band_width(j);
        let mut band_bits = bits[j] + percoeff * width + rem;

        if band_bits >= thresh[j].max(alloc_floor + (1 << BITRES)) {
            if rc.decode_log2(1) {
                break;
            }
            psum += 1 << BITRES;
            band_bits -= 1 << BITRES;
        }

        psum -= bits[j] + intensity_rsv;
        if intensity_rsv > 0 {
            intensity_rsv = i32::from(LOG2_FRAC[j - start]);
        }
        psum += intensity_rsv;

        if band_bits >= alloc_floor {
            psum += alloc_floor;
            bits[j] = alloc_floor;
        }
        else {
            bits[j] = 0;
        }

        coded_bands -= 1;
    }

    alloc.intensity = if intensity_rsv > 0 { start + rc.decode_uniform((coded_bands + 1 - start) as u32) as usize } else { 0 };

    if alloc.intensity <= start {
        total += dual_stereo_rsv;
        dual_stereo_rsv = 0;
    }
    alloc.dual_stereo = dual_stereo_rsv > 0 && rc.decode_log2(1);

    // Spread what is left evenly per coefficient, then one bit at a time from the bottom.
    let mut left = total - psum;
    let percoeff = left / band_span(coded_bands);
    left -= band_span(coded_bands) * percoeff;

    for j in start..coded_bands {
        bits[j] += percoeff * band_width(j);
    }
    for j in start..coded_bands {
        let tmp = left.min(band_width(j));
        bits[j] += tmp;
        left -= tmp;
    }

    let mut balance = 0;
    for j in start..coded_bands {
        let n0 = band_width(j);
        let n = n0 << lm;
        let bit = bits[j] + balance;
        let ebits = &mut alloc.fine_bits[j];
        let priority = &mut alloc.fine_priority[j];

        let mut excess;
        if n > 1 {
            excess = (bit - caps[j]).max(0);
            bits[j] = bit - excess;

            // Stereo bands that are not intensity coded carry an extra degree of freedom.
            let den = c * n + i32::from(channels == 2 && n > 2 && !alloc.dual_stereo && j < alloc.intensity);
            let nclogn = den * (i32::from(LOG_N[j]) + log_m);

            let mut offset = (nclogn >> 1) - den * FINE_OFFSET;
            if n == 2 {
                offset += den << BITRES >> 2;
            }

            if bits[j] + offset < den * 2 << BITRES {
                offset += nclogn >> 2;
            }
            else if bits[j] + offset < den * 3 << BITRES {
                offset += nclogn >> 3;
            }

            *ebits = (bits[j] + offset + (den << (BITRES - 1))).max(0);
            *ebits = (*ebits / den) >> BITRES;

            if c * *ebits > bits[j] >> BITRES {
                *ebits = bits[j] >> stereo >> BITRES;
            }
            *ebits = (*ebits).min(MAX_FINE_BITS);

            *priority = *ebits * (den << BITRES) >= bits[j] + offset;

            bits[j] -= c * *ebits << BITRES;
        }
        else {
            // A single coefficient only needs a sign bit, the rest goes to fine energy.
            excess = (bit - (c << BITRES)).max(0);
            bits[j] = bit - excess;
            *ebits = 0;
            *priority = true;
        }

        if excess > 0 {
            let extra_fine = (excess >> (stereo + BITRES as i32)).min(MAX_FINE_BITS - *ebits);
            *ebits += extra_fine;
            let extra_bits = extra_fine * c << BITRES;
            *priority = extra_bits >= excess - balance;
            excess -= extra_bits;
        }
        balance = excess;
    }

    alloc.balance = balance;

    for j in coded_bands..end {
        alloc.fine_bits[j] = bits[j] >> stereo >> BITRES;
        bits[j] = 0;
        alloc.fine_priority[j] = alloc.fine_bits[j] < 1;
    }

    alloc.coded_bands = coded_bands;
}
