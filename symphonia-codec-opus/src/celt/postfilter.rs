//! Pitch post-filter and de-emphasis.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.7.1

use crate::celt::tables::{POSTFILTER_TAPS, TAPSET};
use crate::celt::{COMBFILTER_MINPERIOD, OVERLAP};
use crate::range::RangeDecoder;

/// De-emphasis filter coefficient.
const DEEMPHASIS_COEF: f32 = 0.850_006_1;

/// Parameters of the comb filter for one frame. A gain of zero disables the filter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PostFilter {
    pub period: usize,
    pub gain: f32,
    pub tapset: usize,
}

impl PostFilter {
    /// Reads the post-filter parameters from the frame header.
    ///
    /// The caller checks that at least 16 bits remain.
    pub fn read(rc: &mut RangeDecoder<'_>, total_bits: i32) -> Self {
        if !rc.decode_log2(1) {
            return PostFilter::default();
        }

        let octave = rc.decode_uniform(6);
        let period = (16 << octave) + rc.get_raw_bits(4 + octave) - 1;
        let qg = rc.get_raw_bits(3);

        let tapset = if rc.tell() + 2 <= total_bits { rc.decode_symbol(&TAPSET) } else { 0 };

        return PostFilter { period: period as usize, gain: 0.09375 * (qg + 1) as f32, tapset };
    }

    fn taps(&self) -> [f32; 3] {
        let taps = POSTFILTER_TAPS[self.tapset];
        return [self.gain * taps[0], self.gain * taps[1], self.gain * taps[2]];
    }
}

/// Applies the comb filter in place to `n` samples of `buf` starting at `offset`.
///
/// The samples before `offset` are the filter history. The filter moves from `old` to `new` over
/// the first `OVERLAP` samples with a squared window cross-fade.
pub fn comb_filter(buf: &mut [f32], offset: usize, n: usize, old: PostFilter, new: PostFilter, window: &[f32; OVERLAP]) {
    if old.gain == 0.0 && new.gain == 0.0 {
        return;
    }

    let t0 = old.period.max(COMBFILTER_MINPERIOD);
    let t1 = new.period.max(COMBFILTER_MINPERIOD);
    let [g00, g01, g02] = old.taps();
    let [g10, g11, g12] = new.taps();

    let unchanged = old.gain == new.gain && t0 == t1 && old.tapset == new.tapset;
    let overlap = if unchanged { 0 } else { OVERLAP.min(n) };

    for i in 0..overlap {
        let x = offset + i;
        let f = window[i] * window[i];

        buf[x] = buf[x]
            + (1.0 - f) * g00 * buf[x - t0]
            + (1.0 - f) * g01 * (buf[x - t0 + 1] + buf[x - t0 - 1])
            + (1.0 - f) * g02 * (buf[x - t0 + 2] + buf[x - t0 - 2])
            + f * g10 * buf[x - t1]
            + f * g11 * (buf[x - t1 + 1] + buf[x - t1 - 1])
            + f * g12 * (buf[x - t1 + 2] + buf[x - t1 - 2]);
    }

    if new.gain == 0.0 {
        return;
    }

    for i in overlap..n {
        let x = offset + i;

        buf[x] = buf[x]
            + g10 * buf[x - t1]
            + g11 * (buf[x - t1 + 1] + buf[x - t1 - 1])
            + g12 * (buf[x - t1 + 2] + buf[x - t1 - 2]);
    }
}

/// Runs the de-emphasis filter over `input`, scaling the result to the nominal `[-1, 1]` range.
///
/// `mem` carries the filter state between frames.
pub fn deemphasis(input: &[f32], out: &mut [f32], mem: &mut f32) {
    let mut m = *mem;

    for (o, &x) in out.iter_mut().zip(input) {
        let tmp = x + m;
        m = DEEMPHASIS_COEF * tmp;
        *o = tmp / 32768.0;
    }

    *mem = m;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celt::tables::WINDOW_120;
    use crate::range::tests::RangeEncoder;

    #[test]
    fn disabled_filter_is_transparent() {
        let mut buf: Vec<f32> = (0..1200).map(|i| (i as f32 * 0.05).sin()).collect();
        let orig = buf.clone();

        comb_filter(&mut buf, 1000, 200, PostFilter::default(), PostFilter::default(), &WINDOW_120);

        assert_eq!(buf, orig);
    }

    #[test]
    fn steady_filter_feeds_back_one_period() {
        let period = 100;
        let mut buf = vec![0.0f32; 1400];
        buf[1000 - period] = 1.0;

        let pf = PostFilter { period, gain: 0.5, tapset: 2 };
        comb_filter(&mut buf, 1000, 300, pf, pf, &WINDOW_120);

        let taps = pf.taps();
        assert!((buf[1000] - taps[0]).abs() < 1e-7);
        assert!((buf[1001] - taps[1]).abs() < 1e-7);
        assert_eq!(buf[1002], 0.0);
        // The filtered output is fed back again one period later.
        assert!((buf[1100] - (taps[0] * taps[0] + taps[1] * taps[1])).abs() < 1e-7);
    }

    #[test]
    fn deemphasis_is_a_leaky_integrator() {
        let input = [32768.0f32, 0.0, 0.0];
        let mut out = [0.0f32; 3];
        let mut mem = 0.0;

        deemphasis(&input, &mut out, &mut mem);

        assert_eq!(out[0], 1.0);
        assert!((out[1] - DEEMPHASIS_COEF).abs() < 1e-6);
        assert!((out[2] - DEEMPHASIS_COEF * DEEMPHASIS_COEF).abs() < 1e-6);
        assert!(mem > 0.0);
    }

    #[test]
    fn post_filter_parameters_are_read() {
        let mut enc = RangeEncoder::new(16);
        enc.encode_log2(true, 1);
        enc.encode_uniform(2, 6);
        enc.encode_raw_bits(5, 6);
        enc.encode_raw_bits(3, 3);
        enc.encode_symbol(1, &TAPSET);
        let data = enc.finish();

        let mut rc = RangeDecoder::new(&data).unwrap();
        let pf = PostFilter::read(&mut rc, 128);

        assert_eq!(pf.period, 64 + 5 - 1);
        assert_eq!(pf.gain, 0.375);
        assert_eq!(pf.tapset, 1);
    }
}
