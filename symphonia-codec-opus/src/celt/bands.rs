//! Band shape decoding.
//!
//! Each band is coded as a unit norm vector scaled by its decoded energy. The shape is coded with
//! Pyramid Vector Quantization, recursively splitting bands that would need more than the
//! codebook can address, and folding previously decoded bands into those that received no bits.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.4

use crate::celt::cwrs::decode_pulses;
use crate::celt::energy::BandEnergies;
use crate::celt::rate::{bits2pulses, get_pulses, pulse_cache, pulses2bits};
use crate::celt::tables::{
    BIT_DEINTERLEAVE, BIT_INTERLEAVE, EBAND_5MS, EXP2_FRAC_Q14, LOG_N, MEAN_ENERGY, ORDERY, SPREAD_FACTOR,
};
use crate::celt::{BITRES, MAX_BANDS};
use crate::range::{ilog, RangeDecoder};

/// Largest band in MDCT bins: the last band of a 20 ms frame.
pub const MAX_BAND_SIZE: usize = 176;

const QTHETA_OFFSET: i32 = 4;
const QTHETA_OFFSET_TWOPHASE: i32 = 16;

pub const SPREAD_NONE: usize = 0;
pub const SPREAD_AGGRESSIVE: usize = 3;

/// The linear congruential generator used for noise filling.
#[inline]
pub fn lcg_rand(seed: u32) -> u32 {
    return seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
}

#[inline]
fn frac_mul16(a: i32, b: i32) -> i32 {
    return (16384 + i32::from(a as i16) * i32::from(b as i16)) >> 15;
}

/// A cosine approximation that is identical on every platform, since it feeds the allocator.
pub fn bitexact_cos(x: i32) -> i32 {
    let x2 = (4096 + x * x) >> 13;
    let x2 = (32767 - x2) + frac_mul16(x2, -7651 + frac_mul16(x2, 8277 + frac_mul16(-626, x2)));
    return 1 + x2;
}

/// log2 of `isin / icos` in Q11.
pub fn bitexact_log2tan(isin: i32, icos: i32) -> i32 {
    let lc = ilog(icos as u32) as i32;
    let ls = ilog(isin as u32) as i32;
    let icos = icos << (15 - lc);
    let isin = isin << (15 - ls);

    return (ls - lc) * (1 << 11) + frac_mul16(isin, frac_mul16(isin, -2597) + 7932)
        - frac_mul16(icos, frac_mul16(icos, -2597) + 7932);
}

/// One level of the Haar transform across `stride` interleaved vectors.
pub fn haar1(x: &mut [f32], n0: usize, stride: usize) {
    const SCALE: f32 = 0.707_106_78;

    for i in 0..stride {
        for j in 0..n0 >> 1 {
            let a = stride * 2 * j + i;
            let b = stride * (2 * j + 1) + i;
            let tmp1 = SCALE * x[a];
            let tmp2 = SCALE * x[b];
            x[a] = tmp1 + tmp2;
            x[b] = tmp1 - tmp2;
        }
    }
}

fn deinterleave_hadamard(x: &mut [f32], n0: usize, stride: usize, hadamard: bool) {
    let n = n0 * stride;
    let mut tmp = [0.0f32; MAX_BAND_SIZE];

    for i in 0..stride {
        let row = if hadamard { usize::from(ORDERY[stride - 2 + i]) } else { i };
        for j in 0..n0 {
            tmp[row * n0 + j] = x[j * stride + i];
        }
    }

    x[..n].copy_from_slice(&tmp[..n]);
}

fn interleave_hadamard(x: &mut [f32], n0: usize, stride: usize, hadamard: bool) {
    let n = n0 * stride;
    let mut tmp = [0.0f32; MAX_BAND_SIZE];

    for i in 0..stride {
        let row = if hadamard { usize::from(ORDERY[stride - 2 + i]) } else { i };
        for j in 0..n0 {
            tmp[j * stride + i] = x[row * n0 + j];
        }
    }

    x[..n].copy_from_slice(&tmp[..n]);
}

/// Scales `x` to norm `gain`.
pub fn renormalise_vector(x: &mut [f32], gain: f32) {
    let e = 1e-15 + x.iter().map(|v| v * v).sum::<f32>();
    let g = gain / e.sqrt();
    x.iter_mut().for_each(|v| *v *= g);
}

fn exp_rotation1(x: &mut [f32], len: usize, stride: usize, c: f32, s: f32) {
    for i in 0..len.saturating_sub(stride) {
        let x1 = x[i];
        let x2 = x[i + stride];
        x[i + stride] = c * x2 + s * x1;
        x[i] = c * x1 - s * x2;
    }

    let mut i = len as isize - 2 * stride as isize - 1;
    while i >= 0 {
        let k = i as usize;
        let x1 = x[k];
        let x2 = x[k + stride];
        x[k + stride] = c * x2 + s * x1;
        x[k] = c * x1 - s * x2;
        i -= 1;
    }
}

/// Undoes the spreading rotation applied by the encoder to sparse pulse vectors.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.4.3
fn inverse_exp_rotation(x: &mut [f32], len: usize, stride: usize, k: i32, spread: usize) {
    if 2 * k as usize >= len || spread == SPREAD_NONE {
        return;
    }

    let factor = SPREAD_FACTOR[spread - 1];
    let gain = len as f32 / (len as i32 + factor * k) as f32;
    let theta = 0.5 * gain * gain;

    let c = (0.5 * std::f32::consts::PI * theta).cos();
    let s = (0.5 * std::f32::consts::PI * (1.0 - theta)).cos();

    let mut stride2 = 0;
    if len >= 8 * stride {
        stride2 = 1;
        while (stride2 * stride2 + stride2) * stride + (stride >> 2) < len {
            stride2 += 1;
        }
    }

    let len = len / stride;
    for chunk in x.chunks_exact_mut(len).take(stride) {
        if stride2 > 0 {
            exp_rotation1(chunk, len, stride2, s, c);
        }
        exp_rotation1(chunk, len, 1, c, s);
    }
}

/// Marks which of the `blocks` interleaved short blocks received at least one pulse.
fn extract_collapse_mask(iy: &[i32], n: usize, blocks: usize) -> u32 {
    if blocks <= 1 {
        return 1;
    }

    let n0 = n / blocks;
    let mut mask = 0;
    for (i, block) in iy[..n].chunks_exact(n0).enumerate() {
        if block.iter().any(|&p| p != 0) {
            mask |= 1 << i;
        }
    }

    return mask;
}

/// The number of quantization steps for a split angle.
fn compute_qn(n: usize, b: i32, offset: i32, pulse_cap: i32, stereo: bool) -> i32 {
    let mut n2 = 2 * n as i32 - 1;
    if stereo && n == 2 {
        n2 -= 1;
    }

    let qb = (b + n2 * offset) / n2;
    let qb = qb.min(b - pulse_cap - (4 << BITRES)).min(8 << BITRES);

    if qb < (1 << BITRES >> 1) {
        return 1;
    }

    let qn = i32::from(EXP2_FRAC_Q14[(qb & 0x7) as usize]) >> (14 - (qb >> BITRES));
    return (qn + 1) >> 1 << 1;
}

/// Merges a decoded mid/side pair back into left/right.
fn stereo_merge(x: &mut [f32], y: &mut [f32], mid: f32) {
    let xp = mid * y.iter().zip(x.iter()).map(|(a, b)| a * b).sum::<f32>();
    let side = y.iter().map(|v| v * v).sum::<f32>();

    let el = mid * mid + side - 2.0 * xp;
    let er = mid * mid + side + 2.0 * xp;

    if er < 6e-4 || el < 6e-4 {
        y.copy_from_slice(x);
        return;
    }

    let lgain = 1.0 / el.sqrt();
    let rgain = 1.0 / er.sqrt();

    for (xv, yv) in x.iter_mut().zip(y.iter_mut()) {
        let l = mid * *xv;
        let r = *yv;
        *xv = lgain * (l - r);
        *yv = rgain * (l + r);
    }
}

/// The decoded split of a band into two halves.
struct Split {
    inv: bool,
    imid: i32,
    iside: i32,
    delta: i32,
    itheta: i32,
    qalloc: i32,
}

/// Decoding state shared by all bands of a frame.
struct BandDecoder<'a, 'b> {
    rc: &'a mut RangeDecoder<'b>,
    band: usize,
    intensity: usize,
    spread: usize,
    tf_change: i32,
    remaining_bits: i32,
    seed: u32,
    disable_inv: bool,
}

impl BandDecoder<'_, '_> {
    /// Decodes the angle between the two halves of a split band.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.4.4
    fn compute_theta(&mut self, n: usize, b: &mut i32, blocks: usize, b0: usize, lm: i32, stereo: bool, fill: &mut u32) -> Split {
        let pulse_cap = i32::from(LOG_N[self.band]) + lm * (1 << BITRES);
        let offset = (pulse_cap >> 1) - if stereo && n == 2 { QTHETA_OFFSET_TWOPHASE } else { QTHETA_OFFSET };

        let mut qn = compute_qn(n, *b, offset, pulse_cap, stereo);
        if stereo && self.band >= self.intensity {
            qn = 1;
        }

        let tell = self.rc.tell_frac() as i32;
        let mut itheta = 0;
        let mut inv = false;

        if qn != 1 {
            let qn = qn as u32;
            let q = if stereo && n > 2 {
                self.rc.decode_step(qn / 2)
            }
            else if b0 > 1 || stereo {
                self.rc.decode_uniform(qn + 1)
            }
            else {
                self.rc.decode_triangular(qn)
            };
            itheta = (q * 16384 / qn) as i32;
        }
        else if stereo {
            if *b > 2 << BITRES && self.remaining_bits > 2 << BITRES {
                inv = self.rc.decode_log2(2);
            }
            if self.disable_inv {
                inv = false;
            }
        }

        let qalloc = self.rc.tell_frac() as i32 - tell;
        *b -= qalloc;

        let (imid, iside, delta) = match itheta {
            0 => {
                *fill &= (1 << blocks) - 1;
                (32767, 0, -16384)
            }
            16384 => {
                *fill &= ((1 << blocks) - 1) << blocks;
                (0, 32767, 16384)
            }
            _ => {
                let imid = bitexact_cos(itheta);
                let iside = bitexact_cos(16384 - itheta);
                let delta = frac_mul16(((n as i32) - 1) << 7, bitexact_log2tan(iside, imid));
                (imid, iside, delta)
            }
        };

        return Split { inv, imid, iside, delta, itheta, qalloc };
    }

    fn decode_sign(&mut self, v: &mut [f32]) {
        let mut negative = false;
        if self.remaining_bits >= 1 << BITRES {
            negative = self.rc.get_raw_bits(1) == 1;
            self.remaining_bits -= 1 << BITRES;
        }
        v[0] = if negative { -1.0 } else { 1.0 };
    }

    /// Decodes a band of a single coefficient: just its sign.
    fn decode_band_n1(&mut self, x: &mut [f32], y: Option<&mut [f32]>, lowband_out: Option<&mut [f32]>) -> u32 {
        self.decode_sign(x);
        if let Some(y) = y {
            self.decode_sign(y);
        }

        if let Some(out) = lowband_out {
            out[0] = x[0];
        }

        return 1;
    }

    /// Decodes a pulse vector and mixes it into a unit norm shape scaled by `gain`.
    fn alg_unquant(&mut self, x: &mut [f32], n: usize, k: i32, blocks: usize, gain: f32) -> u32 {
        let mut iy = [0i32; MAX_BAND_SIZE];
        let ryy = decode_pulses(self.rc, &mut iy[..n], n, k as usize);

        let g = gain / ryy.sqrt();
        for (v, &p) in x.iter_mut().zip(&iy[..n]) {
            *v = g * p as f32;
        }

        inverse_exp_rotation(x, n, blocks, k, self.spread);

        return extract_collapse_mask(&iy, n, blocks);
    }

    /// Decodes a mono partition, recursively splitting it in two while it is too large for a
    /// single codebook.
    #[allow(clippy::too_many_arguments)]
    fn decode_partition(
        &mut self,
        x: &mut [f32],
        n: usize,
        mut b: i32,
        mut blocks: usize,
        lowband: Option<&[f32]>,
        mut lm: i32,
        gain: f32,
        mut fill: u32,
    ) -> u32 {
        let b0 = blocks;
        let cache = pulse_cache(self.band, lm);

        if lm != -1 && b > i32::from(cache[usize::from(cache[0])]) + 12 && n > 2 {
            let n = n >> 1;
            let (x, y) = x.split_at_mut(n);
            lm -= 1;
            if blocks == 1 {
                fill = (fill & 1) | (fill << 1);
            }
            blocks = (blocks + 1) >> 1;

            let split = self.compute_theta(n, &mut b, blocks, b0, lm, false, &mut fill);
            let mid = split.imid as f32 / 32768.0;
            let side = split.iside as f32 / 32768.0;
            let itheta = split.itheta;
            let mut delta = split.delta;

            // Give more bits to low energy blocks of a transient.
            if b0 > 1 && itheta & 0x3fff != 0 {
                if itheta > 8192 {
                    delta -= delta >> (4 - lm);
                }
                else {
                    delta = 0.min(delta + ((n as i32) << BITRES >> (5 - lm)));
                }
            }

            let mut mbits = 0.max(b.min((b - delta) / 2));
            let mut sbits = b - mbits;
            self.remaining_bits -= split.qalloc;

            let next_lowband = lowband.map(|l| &l[n..]);
            let mut rebalance = self.remaining_bits;

            let mut cm;
            if mbits >= sbits {
                cm = self.decode_partition(x, n, mbits, blocks, lowband, lm, gain * mid, fill);
                rebalance = mbits - (rebalance - self.remaining_bits);
                if rebalance > 3 << BITRES && itheta != 0 {
                    sbits += rebalance - (3 << BITRES);
                }
                cm |= self.decode_partition(y, n, sbits, blocks, next_lowband, lm, gain * side, fill >> blocks)
                    << (b0 >> 1);
            }
            else {
                cm = self.decode_partition(y, n, sbits, blocks, next_lowband, lm, gain * side, fill >> blocks)
                    << (b0 >> 1);
                rebalance = sbits - (rebalance - self.remaining_bits);
                if rebalance > 3 << BITRES && itheta != 16384 {
                    mbits += rebalance - (3 << BITRES);
                }
                cm |= self.decode_partition(x, n, mbits, blocks, lowband, lm, gain * mid, fill);
            }

            return cm;
        }

        let mut q = bits2pulses(self.band, lm, b);
        let mut curr_bits = pulses2bits(self.band, lm, q);
        self.remaining_bits -= curr_bits;

        // Never bust the budget.
        while self.remaining_bits < 0 && q > 0 {
            self.remaining_bits += curr_bits;
            q -= 1;
            curr_bits = pulses2bits(self.band, lm, q);
            self.remaining_bits -= curr_bits;
        }

        if q != 0 {
            return self.alg_unquant(&mut x[..n], n, get_pulses(q), blocks, gain);
        }

        // No pulses: fill the band with noise or a folded copy of a lower band.
        let cm_mask = (1u32 << blocks) - 1;
        fill &= cm_mask;

        if fill == 0 {
            x[..n].fill(0.0);
            return 0;
        }

        let cm = match lowband {
            None => {
                for v in x[..n].iter_mut() {
                    self.seed = lcg_rand(self.seed);
                    *v = ((self.seed as i32) >> 20) as f32;
                }
                cm_mask
            }
            Some(lowband) => {
                for (v, &l) in x[..n].iter_mut().zip(lowband) {
                    self.seed = lcg_rand(self.seed);
                    let tmp = if self.seed & 0x8000 != 0 { 1.0 / 256.0 } else { -1.0 / 256.0 };
                    *v = l + tmp;
                }
                fill
            }
        };

        renormalise_vector(&mut x[..n], gain);

        return cm;
    }

    /// Decodes a mono band, applying the signalled time-frequency resolution change.
    #[allow(clippy::too_many_arguments)]
    fn decode_band(
        &mut self,
        x: &mut [f32],
        n: usize,
        b: i32,
        mut blocks: usize,
        lowband: Option<&[f32]>,
        lm: i32,
        lowband_out: Option<&mut [f32]>,
        gain: f32,
        mut fill: u32,
    ) -> u32 {
        let n0 = n;
        let mut n_b = n / blocks;
        let long_blocks = blocks == 1;
        let mut tf_change = self.tf_change;

        if n == 1 {
            return self.decode_band_n1(x, None, lowband_out);
        }

        let recombine = tf_change.max(0) as usize;

        let mut scratch = [0.0f32; MAX_BAND_SIZE];
        let mut lowband = match lowband {
            Some(l) => {
                scratch[..n].copy_from_slice(&l[..n]);
                Some(&mut scratch[..n])
            }
            None => None,
        };

        // Recombine short blocks to increase frequency resolution.
        for k in 0..recombine {
            if let Some(l) = lowband.as_deref_mut() {
                haar1(l, n >> k, 1 << k);
            }
            fill = u32::from(BIT_INTERLEAVE[(fill & 0xf) as usize])
                | u32::from(BIT_INTERLEAVE[(fill >> 4) as usize]) << 2;
        }
        blocks >>= recombine;
        n_b <<= recombine;

        // Split long blocks to increase time resolution.
        let mut time_divide = 0;
        while n_b & 1 == 0 && tf_change < 0 {
            if let Some(l) = lowband.as_deref_mut() {
                haar1(l, n_b, blocks);
            }
            fill |= fill << blocks;
            blocks <<= 1;
            n_b >>= 1;
            time_divide += 1;
            tf_change += 1;
        }

        let b0 = blocks;
        let n_b0 = n_b;

        if b0 > 1 {
            if let Some(l) = lowband.as_deref_mut() {
                deinterleave_hadamard(l, n_b >> recombine, b0 << recombine, long_blocks);
            }
        }

        let mut cm = self.decode_partition(x, n, b, blocks, lowband.as_deref(), lm, gain, fill);

        if b0 > 1 {
            interleave_hadamard(x, n_b >> recombine, b0 << recombine, long_blocks);
        }

        let mut n_b = n_b0;
        blocks = b0;
        for _ in 0..time_divide {
            blocks >>= 1;
            n_b <<= 1;
            cm |= cm >> blocks;
            haar1(x, n_b, blocks);
        }

        for k in 0..recombine {
            cm = u32::from(BIT_DEINTERLEAVE[cm as usize]);
            haar1(x, n0 >> k, 1 << k);
        }
        blocks <<= recombine;

        // Scale for later folding.
        if let Some(out) = lowband_out {
            let scale = (n0 as f32).sqrt();
            for (o, &v) in out[..n0].iter_mut().zip(&x[..n0]) {
                *o = scale * v;
            }
        }

        return cm & ((1 << blocks) - 1);
    }

    /// Decodes a stereo band coded as mid and side.
    #[allow(clippy::too_many_arguments)]
    fn decode_band_stereo(
        &mut self,
        x: &mut [f32],
        y: &mut [f32],
        n: usize,
        mut b: i32,
        blocks: usize,
        lowband: Option<&[f32]>,
        lm: i32,
        lowband_out: Option<&mut [f32]>,
        mut fill: u32,
    ) -> u32 {
        if n == 1 {
            return self.decode_band_n1(x, Some(y), lowband_out);
        }

        let orig_fill = fill;
        let split = self.compute_theta(n, &mut b, blocks, blocks, lm, true, &mut fill);
        let mid = split.imid as f32 / 32768.0;
        let side = split.iside as f32 / 32768.0;
        let itheta = split.itheta;

        let mut cm;
        if n == 2 {
            // The side of a two coefficient band is orthogonal to the mid, so it only needs a
            // sign.
            let sbits = if itheta != 0 && itheta != 16384 { 1 << BITRES } else { 0 };
            let mbits = b - sbits;
            self.remaining_bits -= split.qalloc + sbits;

            let mut sign = 0;
            if sbits != 0 {
                sign = self.rc.get_raw_bits(1);
            }
            let sign = 1.0 - 2.0 * sign as f32;

            let (x2, y2) = if itheta > 8192 { (&mut *y, &mut *x) } else { (&mut *x, &mut *y) };
            cm = self.decode_band(x2, n, mbits, blocks, lowband, lm, lowband_out, 1.0, orig_fill);
            y2[0] = -sign * x2[1];
            y2[1] = sign * x2[0];

            for k in 0..2 {
                let m = mid * x[k];
                let s = side * y[k];
                x[k] = m - s;
                y[k] = m + s;
            }
        }
        else {
            let mut mbits = 0.max(b.min((b - split.delta) / 2));
            let mut sbits = b - mbits;
            self.remaining_bits -= split.qalloc;

            let mut rebalance = self.remaining_bits;
            if mbits >= sbits {
                cm = self.decode_band(x, n, mbits, blocks, lowband, lm, lowband_out, 1.0, fill);
                rebalance = mbits - (rebalance - self.remaining_bits);
                if rebalance > 3 << BITRES && itheta != 0 {
                    sbits += rebalance - (3 << BITRES);
                }
                cm |= self.decode_band(y, n, sbits, blocks, None, lm, None, side, fill >> blocks);
            }
            else {
                cm = self.decode_band(y, n, sbits, blocks, None, lm, None, side, fill >> blocks);
                rebalance = sbits - (rebalance - self.remaining_bits);
                if rebalance > 3 << BITRES && itheta != 16384 {
                    mbits += rebalance - (3 << BITRES);
                }
                cm |= self.decode_band(x, n, mbits, blocks, lowband, lm, lowband_out, 1.0, fill);
            }

            stereo_merge(&mut x[..n], &mut y[..n], mid);
        }

        if split.inv {
            y[..n].iter_mut().for_each(|v| *v = -*v);
        }

        return cm;
    }
}

/// Frame level inputs to [`decode_all_bands`].
pub struct BandsParams<'a> {
    pub start: usize,
    pub end: usize,
    pub lm: usize,
    pub short_blocks: bool,
    pub spread: usize,
    pub dual_stereo: bool,
    pub intensity: usize,
    pub tf_res: &'a [i32; MAX_BANDS],
    /// Total bits in the frame minus the anti-collapse reservation, in 1/8 bits.
    pub total_bits: i32,
    pub balance: i32,
    pub coded_bands: usize,
    pub pulses: &'a [i32; MAX_BANDS],
    pub disable_inv: bool,
}

/// Decodes the normalized shapes of all bands into `x` (and `y` for stereo).
///
/// Returns the collapse mask of every band and channel, indexed by `band * channels + channel`.
/// `seed` is the noise generator state, carried across frames.
pub fn decode_all_bands(
    rc: &mut RangeDecoder<'_>,
    params: &BandsParams<'_>,
    x: &mut [f32],
    mut y: Option<&mut [f32]>,
    seed: &mut u32,
) -> [u8; 2 * MAX_BANDS] {
    let BandsParams { start, end, lm, spread, intensity, tf_res, total_bits, coded_bands, pulses, .. } = *params;

    let m = 1usize << lm;
    let blocks = if params.short_blocks { m } else { 1 };
    let channels = if y.is_some() { 2 } else { 1 };
    let edge = |band: usize| m * usize::from(EBAND_5MS[band]);

    let norm_offset = edge(start);
    let norm_len = edge(MAX_BANDS - 1) - norm_offset;
    let mut norm = vec![0.0f32; norm_len];
    let mut norm2 = vec![0.0f32; if channels == 2 { norm_len } else { 0 }];

    let mut collapse_masks = [0u8; 2 * MAX_BANDS];
    let mut fold = [0.0f32; MAX_BAND_SIZE];

    let mut bd = BandDecoder {
        rc,
        band: start,
        intensity,
        spread,
        tf_change: 0,
        remaining_bits: 0,
        seed: *seed,
        disable_inv: params.disable_inv,
    };

    let mut balance = params.balance;
    let mut dual_stereo = params.dual_stereo;
    let mut lowband_offset = 0;
    let mut update_lowband = true;

    for i in start..end {
        let last = i == end - 1;
        let n = edge(i + 1) - edge(i);
        let tell = bd.rc.tell_frac() as i32;

        bd.band = i;

        if i != start {
            balance -= tell;
        }
        let remaining_bits = total_bits - tell - 1;
        bd.remaining_bits = remaining_bits;

        let b = if i < coded_bands {
            let curr_balance = balance / 3.min((coded_bands - i) as i32);
            0.max(16383.min((remaining_bits + 1).min(pulses[i] + curr_balance)))
        }
        else {
            0
        };

        if (edge(i) >= edge(start) + n || i == start + 1) && (update_lowband || lowband_offset == 0) {
            lowband_offset = i;
        }

        if i == start + 1 {
            // Duplicate enough of the first band to fold the second one.
            let n1 = edge(start + 1) - edge(start);
            let n2 = edge(start + 2) - edge(start + 1);
            if n2 > n1 {
                norm.copy_within(2 * n1 - n2..n1, n1);
                if dual_stereo {
                    norm2.copy_within(2 * n1 - n2..n1, n1);
                }
            }
        }

        let tf_change = tf_res[i];
        bd.tf_change = tf_change;

        // Collapse masks of the bands being folded from.
        let mut effective_lowband = None;
        let (mut x_cm, mut y_cm);
        if lowband_offset != 0 && (spread != SPREAD_AGGRESSIVE || blocks > 1 || tf_change < 0) {
            let eff = (edge(lowband_offset) as isize - norm_offset as isize - n as isize).max(0) as usize;
            effective_lowband = Some(eff);

            let mut fold_start = lowband_offset;
            loop {
                fold_start -= 1;
                if edge(fold_start) <= eff + norm_offset {
                    break;
                }
            }

            let mut fold_end = lowband_offset - 1;
            loop {
                fold_end += 1;
                if !(fold_end < i && edge(fold_end) < eff + norm_offset + n) {
                    break;
                }
            }

            x_cm = 0;
            y_cm = 0;
            for fold_i in fold_start..fold_end {
                x_cm |= u32::from(collapse_masks[fold_i * channels]);
                y_cm |= u32::from(collapse_masks[fold_i * channels + channels - 1]);
            }
        }
        else {
            x_cm = (1 << blocks) - 1;
            y_cm = x_cm;
        }

        if dual_stereo && i == intensity {
            // Intensity coded bands fold from the average of both channels.
            dual_stereo = false;
            for (a, b) in norm[..edge(i) - norm_offset].iter_mut().zip(&norm2) {
                *a = 0.5 * (*a + b);
            }
        }

        let band = edge(i)..edge(i + 1);
        let out_range = edge(i) - norm_offset..edge(i) - norm_offset + n;

        let load_fold = |fold: &mut [f32; MAX_BAND_SIZE], src: &[f32]| -> bool {
            return match effective_lowband {
                Some(eff) => {
                    fold[..n].copy_from_slice(&src[eff..eff + n]);
                    true
                }
                None => false,
            };
        };

        match y.as_deref_mut() {
            Some(y) if dual_stereo => {
                let has_fold = load_fold(&mut fold, &norm);
                let out = if last { None } else { Some(&mut norm[out_range.clone()]) };
                x_cm = bd.decode_band(&mut x[band.clone()], n, b / 2, blocks, has_fold.then_some(&fold[..n]), lm as i32, out, 1.0, x_cm);

                let has_fold = load_fold(&mut fold, &norm2);
                let out = if last { None } else { Some(&mut norm2[out_range]) };
                y_cm = bd.decode_band(&mut y[band], n, b / 2, blocks, has_fold.then_some(&fold[..n]), lm as i32, out, 1.0, y_cm);
            }
            Some(y) => {
                let has_fold = load_fold(&mut fold, &norm);
                let out = if last { None } else { Some(&mut norm[out_range]) };
                x_cm = bd.decode_band_stereo(
                    &mut x[band.clone()],
                    &mut y[band],
                    n,
                    b,
                    blocks,
                    has_fold.then_some(&fold[..n]),
                    lm as i32,
                    out,
                    x_cm | y_cm,
                );
                y_cm = x_cm;
            }
            None => {
                let has_fold = load_fold(&mut fold, &norm);
                let out = if last { None } else { Some(&mut norm[out_range]) };
                x_cm = bd.decode_band(&mut x[band], n, b, blocks, has_fold.then_some(&fold[..n]), lm as i32, out, 1.0, x_cm | y_cm);
                y_cm = x_cm;
            }
        }

        collapse_masks[i * channels] = x_cm as u8;
        collapse_masks[i * channels + channels - 1] = y_cm as u8;
        balance += pulses[i] + tell;

        // Only move the folding source while it has at least one bit per sample.
        update_lowband = b > (n as i32) << BITRES;
    }

    *seed = bd.seed;

    return collapse_masks;
}

/// Injects noise into short blocks that received no pulses so transients do not leave holes.
///
/// `coeffs` holds the spectrum of each channel, `frame_size` bins apart.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.5
#[allow(clippy::too_many_arguments)]
pub fn anti_collapse(
    coeffs: &mut [f32],
    collapse_masks: &[u8; 2 * MAX_BANDS],
    lm: usize,
    channels: usize,
    frame_size: usize,
    start: usize,
    end: usize,
    energy: &BandEnergies,
    prev1: &BandEnergies,
    prev2: &BandEnergies,
    pulses: &[i32; MAX_BANDS],
    mut seed: u32,
) {
    for i in start..end {
        let n0 = usize::from(EBAND_5MS[i + 1] - EBAND_5MS[i]);
        let depth = ((1 + pulses[i]) as u32 / n0 as u32) >> lm;

        let thresh = 0.5 * (-0.125 * depth as f32).exp2();
        let sqrt_1 = 1.0 / ((n0 << lm) as f32).sqrt();

        for c in 0..channels {
            let mut p1 = prev1[c][i];
            let mut p2 = prev2[c][i];
            if channels == 1 {
                p1 = p1.max(prev1[1][i]);
                p2 = p2.max(prev2[1][i]);
            }

            let ediff = (energy[c][i] - p1.min(p2)).max(0.0);

            // Short blocks carry less energy than long ones.
            let mut r = 2.0 * (-ediff).exp2();
            if lm == 3 {
                r *= std::f32::consts::SQRT_2;
            }
            let r = r.min(thresh) * sqrt_1;

            let offset = c * frame_size + (usize::from(EBAND_5MS[i]) << lm);
            let band = &mut coeffs[offset..offset + (n0 << lm)];

            let mut renormalize = false;
            for k in 0..1 << lm {
                if collapse_masks[i * channels + c] & (1 << k) == 0 {
                    for j in 0..n0 {
                        seed = lcg_rand(seed);
                        band[(j << lm) + k] = if seed & 0x8000 != 0 { r } else { -r };
                    }
                    renormalize = true;
                }
            }

            if renormalize {
                renormalise_vector(band, 1.0);
            }
        }
    }
}

/// Scales the unit norm band shapes of one channel by their decoded energies.
///
/// Bins below `start` and from `end` upwards are cleared.
pub fn denormalise_bands(x: &[f32], freq: &mut [f32], energy: &[f32; MAX_BANDS], start: usize, end: usize, lm: usize) {
    let m = 1 << lm;
    let lo = m * usize::from(EBAND_5MS[start]);
    let hi = m * usize::from(EBAND_5MS[end]);

    freq[..lo].fill(0.0);

    for i in start..end {
        let band = m * usize::from(EBAND_5MS[i])..m * usize::from(EBAND_5MS[i + 1]);
        let g = (energy[i] + MEAN_ENERGY[i]).min(32.0).exp2();
        for (f, &v) in freq[band.clone()].iter_mut().zip(&x[band]) {
            *f = v * g;
        }
    }

    freq[hi..].fill(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitexact_cos_endpoints() {
        assert_eq!(bitexact_cos(2), 32768);
        assert!(bitexact_cos(16383) < 10);
        // cos(pi/4) in Q15.
        assert!((bitexact_cos(8192) - 23170).abs() < 8);
    }

    #[test]
    fn log2tan_is_antisymmetric() {
        let a = bitexact_log2tan(20000, 10000);
        let b = bitexact_log2tan(10000, 20000);
        assert_eq!(a, -b);
        // log2(2) in Q11.
        assert!((a - 2048).abs() < 16);
    }

    #[test]
    fn haar_is_orthonormal() {
        let mut x = [1.0f32, 3.0, -2.0, 5.0];
        let energy: f32 = x.iter().map(|v| v * v).sum();
        haar1(&mut x, 4, 1);
        let after: f32 = x.iter().map(|v| v * v).sum();
        assert!((energy - after).abs() < 1e-4);

        haar1(&mut x, 4, 1);
        assert!((x[0] - 1.0).abs() < 1e-5 && (x[3] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn hadamard_interleaving_inverts() {
        for stride in [2usize, 4, 8] {
            for hadamard in [false, true] {
                let orig: Vec<f32> = (0..4 * stride).map(|i| i as f32).collect();
                let mut x = orig.clone();
                deinterleave_hadamard(&mut x, 4, stride, hadamard);
                interleave_hadamard(&mut x, 4, stride, hadamard);
                assert_eq!(x, orig);
            }
        }
    }

    #[test]
    fn renormalised_vectors_have_the_requested_norm() {
        let mut x = [3.0f32, 4.0, 0.0, 0.0];
        renormalise_vector(&mut x, 2.0);
        assert!((x[0] - 1.2).abs() < 1e-6);
        assert!((x[1] - 1.6).abs() < 1e-6);
    }

    #[test]
    fn collapse_mask_flags_blocks_with_pulses() {
        let iy = [0, 0, 1, 0, 0, 0, 0, -2];
        assert_eq!(extract_collapse_mask(&iy, 8, 4), 0b1010);
        assert_eq!(extract_collapse_mask(&iy, 8, 1), 1);
    }

    #[test]
    fn spreading_preserves_energy() {
        let mut x: Vec<f32> = (0..16).map(|i| if i % 5 == 0 { 1.0 } else { 0.0 }).collect();
        let before: f32 = x.iter().map(|v| v * v).sum();
        inverse_exp_rotation(&mut x, 16, 1, 2, 2);
        let after: f32 = x.iter().map(|v| v * v).sum();
        assert!((before - after).abs() < 1e-4);
        assert!(x.iter().filter(|v| v.abs() > 1e-6).count() > 4);
    }

    #[test]
    fn qn_grows_with_bits() {
        assert_eq!(compute_qn(8, 0, 0, 24, false), 1);
        let small = compute_qn(8, 100, 4, 24, false);
        let large = compute_qn(8, 400, 4, 24, false);
        assert!(small <= large);
        assert!(large <= 256 && large % 2 == 0);
    }

    #[test]
    fn denormalise_clears_outside_the_coded_range() {
        let x = [1.0f32; 960];
        let mut freq = [5.0f32; 960];
        let mut energy = [0.0; MAX_BANDS];
        energy[17] = 1.0 - MEAN_ENERGY[17];

        denormalise_bands(&x, &mut freq, &energy, 17, 19, 3);

        assert!(freq[..320].iter().all(|&v| v == 0.0));
        assert!(freq[320..384].iter().all(|&v| (v - 2.0).abs() < 1e-5));
        assert!(freq[480..].iter().all(|&v| v == 0.0));
    }
}
