//! Range Decoder
//!
//! Opus uses an entropy coder based on range coding [RANGE-CODING]
//! [MARTIN79], which is itself a rediscovery of the FIFO arithmetic code
//! introduced by [CODING-THESIS].  It is very similar to arithmetic
//! encoding, except that encoding is done with digits in any base
//! instead of with bits, so it is faster when using larger bases (i.e.,
//! a byte).  All of the calculations in the range coder must use bit-
//! exact integer arithmetic.
//!
//! ```text
//!   +----------+--------------------+
//!   | symbols  |  ...   | raw bits  |
//!   +----------+--------------------+
//!   ^ forward             backward ^
//! ```
//!
//! Range coded symbols are read forward from the start of the frame while
//! raw bits are read backward from its end.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.1

use crate::error::{Error, Result};

const SYM_BITS: u32 = 8;
const CODE_BITS: u32 = 32;
const SYM_MAX: u32 = (1 << SYM_BITS) - 1;
const CODE_TOP: u32 = 1 << (CODE_BITS - 1);
const CODE_BOT: u32 = CODE_TOP >> SYM_BITS;
const CODE_EXTRA: u32 = (CODE_BITS - 2) % SYM_BITS + 1;
const WINDOW_SIZE: u32 = 32;
const UINT_BITS: u32 = 8;

/// Integer log2 plus one (the number of significant bits), zero for zero.
#[inline]
pub fn ilog(x: u32) -> u32 {
    return 32 - x.leading_zeros();
}

pub struct RangeDecoder<'a> {
    buf: &'a [u8],
    storage: usize,
    offs: usize,
    end_offs: usize,
    end_window: u32,
    nend_bits: u32,
    nbits_total: i32,
    rng: u32,
    val: u32,
    ext: u32,
    rem: u32,
}

impl<'a> RangeDecoder<'a> {
    /// Creates a new range decoder over a single Opus frame.
    ///
    /// Let b0 be an 8-bit unsigned integer containing first input byte (or
    /// containing zero if there are no bytes in this Opus frame).
    /// The decoder initializes rng to 128 and initializes val to
    /// (127 - (b0>>1)), where (b0>>1) is the top 7 bits of the first input byte.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.1
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(Error::InvalidData("opus: empty range coded frame"));
        }

        return Ok(Self::new_unchecked(buf));
    }

    /// Creates a decoder that tolerates an empty buffer, reading zero bytes throughout.
    pub(crate) fn new_unchecked(buf: &'a [u8]) -> Self {
        let mut dec = RangeDecoder {
            buf,
            storage: buf.len(),
            offs: 0,
            end_offs: 0,
            end_window: 0,
            nend_bits: 0,
            nbits_total: (CODE_BITS + 1 - ((CODE_BITS - CODE_EXTRA) / SYM_BITS) * SYM_BITS) as i32,
            rng: 1 << CODE_EXTRA,
            val: 0,
            ext: 0,
            rem: 0,
        };

        dec.rem = dec.read_byte();
        dec.val = dec.rng - 1 - (dec.rem >> (SYM_BITS - CODE_EXTRA));
        dec.normalize();

        return dec;
    }

    fn read_byte(&mut self) -> u32 {
        if self.offs < self.storage {
            let byte = self.buf[self.offs];
            self.offs += 1;
            return u32::from(byte);
        }

        return 0;
    }

    fn read_byte_from_end(&mut self) -> u32 {
        if self.end_offs < self.storage {
            self.end_offs += 1;
            return u32::from(self.buf[self.storage - self.end_offs]);
        }

        return 0;
    }

    /// Normalizes the range as described in RFC 6716, Section 4.1.2.1.
    ///
    /// To normalize the range, the decoder repeats the following process,
    /// until rng > 2**23. If rng is already greater than 2**23, the entire
    /// process is skipped. First, it sets rng to (rng<<8). Then, it reads the
    /// next byte of the Opus frame and forms an 8-bit value sym, using the
    /// leftover bit buffered from the previous byte as the high bit and the
    /// top 7 bits of the byte just read as the other 7 bits of sym. Then, it
    /// sets val = ((val<<8) + (255-sym)) & 0x7FFFFFFF
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.2.1
    fn normalize(&mut self) {
        while self.rng <= CODE_BOT {
            self.nbits_total += SYM_BITS as i32;
            self.rng <<= SYM_BITS;

            let mut sym = self.rem;
            self.rem = self.read_byte();
            sym = (sym << SYM_BITS | self.rem) >> (SYM_BITS - CODE_EXTRA);

            self.val = ((self.val << SYM_BITS) + (SYM_MAX & !sym)) & (CODE_TOP - 1);
        }
    }

    /// Returns the cumulative frequency of the next symbol for a distribution with total `ft`.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.2
    pub fn decode(&mut self, ft: u32) -> u32 {
        self.ext = self.rng / ft;
        let s = self.val / self.ext;
        return ft - (s + 1).min(ft);
    }

    /// Same as [`Self::decode`] with `ft = 1 << bits`.
    pub fn decode_bin(&mut self, bits: u32) -> u32 {
        self.ext = self.rng >> bits;
        let s = self.val / self.ext;
        return (1 << bits) - (s + 1).min(1 << bits);
    }

    /// Advances past the symbol occupying `[fl, fh)` of a distribution with total `ft`.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.2
    pub fn update(&mut self, fl: u32, fh: u32, ft: u32) {
        let s = self.ext * (ft - fh);
        self.val -= s;
        self.rng = if fl > 0 { self.ext * (fh - fl) } else { self.rng - s };
        self.normalize();
    }

    /// Decodes a symbol using a cumulative distribution `[ft, c0, c1, ..., ft]`.
    ///
    /// Symbol k occupies `[c(k-1), c(k))` with `c(-1) = 0`.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.3.3
    pub fn decode_symbol(&mut self, cdf: &[u16]) -> usize {
        let ft = u32::from(cdf[0]);
        let fs = self.decode(ft);

        let bounds = &cdf[1..];
        let k = bounds.iter().position(|&c| u32::from(c) > fs).unwrap_or(bounds.len() - 1);

        let fl = if k > 0 { u32::from(bounds[k - 1]) } else { 0 };
        let fh = u32::from(bounds[k]);

        self.update(fl, fh, ft);

        return k;
    }

    /// Decodes a single binary symbol.
    ///
    /// The context is described by a single parameter, logp, which is the
    /// absolute value of the base-2 logarithm of the probability of a "1".
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.3.2
    pub fn decode_log2(&mut self, logp: u32) -> bool {
        let r = self.rng;
        let d = self.val;
        let s = r >> logp;
        let bit = d < s;

        if !bit {
            self.val = d - s;
        }
        self.rng = if bit { s } else { r - s };
        self.normalize();

        return bit;
    }

    /// Decodes a uniformly distributed integer in `[0, ft)`.
    ///
    /// ```text
    ///   ft  <= 2**8 : a single range coded symbol
    ///   ft  >  2**8 : the top 8 bits range coded, the remainder as raw bits
    /// ```
    ///
    /// Values that decode past `ft - 1` signal a corrupt frame and saturate to `ft - 1`.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.5
    pub fn decode_uniform(&mut self, ft: u32) -> u32 {
        let ft = ft - 1;
        let mut ftb = ilog(ft);

        if ftb > UINT_BITS {
            ftb -= UINT_BITS;
            let ft1 = (ft >> ftb) + 1;
            let s = self.decode(ft1);
            self.update(s, s + 1, ft1);

            let t = (s << ftb) | self.get_raw_bits(ftb);
            return t.min(ft);
        }

        let ft = ft + 1;
        let s = self.decode(ft);
        self.update(s, s + 1, ft);

        return s;
    }

    /// Decodes a value with a step shaped distribution: `k0 + 1` values three times as likely
    /// as the remainder.
    pub fn decode_step(&mut self, k0: u32) -> u32 {
        let k1 = (k0 + 1) * 3;
        let total = k1 + k0;
        let value = self.decode(total);

        let k = if value < k1 { value / 3 } else { value - (k1 - (k0 + 1)) };
        let (fl, fh) = if k <= k0 { (3 * k, 3 * (k + 1)) } else { (k1 + k - (k0 + 1), k1 + k - k0) };

        self.update(fl, fh, total);

        return k;
    }

    /// Decodes a value in `[0, qn]` with a triangular distribution peaking at `qn / 2`.
    pub fn decode_triangular(&mut self, qn: u32) -> u32 {
        let qn2 = qn >> 1;
        let ft = (qn2 + 1) * (qn2 + 1);
        let fm = self.decode(ft);

        let (k, fl, fs) = if fm < (qn2 * (qn2 + 1)) >> 1 {
            let k = (isqrt32(8 * fm + 1) - 1) >> 1;
            (k, (k * (k + 1)) >> 1, k + 1)
        }
        else {
            let k = (2 * (qn + 1) - isqrt32(8 * (ft - fm - 1) + 1)) >> 1;
            (k, ft - (((qn + 1 - k) * (qn + 2 - k)) >> 1), qn + 1 - k)
        };

        self.update(fl, fl + fs, ft);

        return k;
    }

    /// Decodes a two-sided geometric distribution used by CELT coarse energy.
    ///
    /// `fs` is the probability of zero in Q15 and `decay` the per-step decay in Q14.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.2.1
    pub fn decode_laplace(&mut self, fs: u32, decay: u32) -> i32 {
        const MINP: u32 = 1;
        const NMIN: u32 = 16;

        let mut val = 0i32;
        let mut fs = fs;
        let mut fl = 0u32;
        let fm = self.decode_bin(15);

        if fm >= fs {
            val += 1;
            fl = fs;
            fs = (((32768 - MINP * (2 * NMIN) - fs) * (16384 - decay)) >> 15) + MINP;

            while fs > MINP && fm >= fl + 2 * fs {
                fs *= 2;
                fl += fs;
                fs = (((fs - 2 * MINP) * decay) >> 15) + MINP;
                val += 1;
            }

            if fs <= MINP {
                let di = (fm - fl) >> 1;
                val += di as i32;
                fl += 2 * di * MINP;
            }

            if fm < fl + fs {
                val = -val;
            }
            else {
                fl += fs;
            }
        }

        self.update(fl, (fl + fs).min(32768), 32768);

        return val;
    }

    /// Reads `bits` raw bits from the end of the frame.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.4
    pub fn get_raw_bits(&mut self, bits: u32) -> u32 {
        if bits == 0 {
            return 0;
        }

        let mut window = self.end_window;
        let mut available = self.nend_bits;

        if available < bits {
            loop {
                window |= self.read_byte_from_end() << available;
                available += SYM_BITS;
                if available > WINDOW_SIZE - SYM_BITS {
                    break;
                }
            }
        }

        let ret = window & ((1u64 << bits) - 1) as u32;
        window = if bits >= 32 { 0 } else { window >> bits };
        available -= bits;

        self.end_window = window;
        self.nend_bits = available;
        self.nbits_total += bits as i32;

        return ret;
    }

    /// Number of whole bits consumed so far, rounded up.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.6.1
    pub fn tell(&self) -> i32 {
        return self.nbits_total - ilog(self.rng) as i32;
    }

    /// Number of bits consumed so far in 1/8 bit units, rounded up.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.1.6.2
    pub fn tell_frac(&self) -> u32 {
        const CORRECTION: [u32; 8] = [35733, 38967, 42495, 46340, 50535, 55109, 60097, 65535];

        let nbits = (self.nbits_total as u32) << 3;
        let l = ilog(self.rng);
        let r = self.rng >> (l - 16);
        let mut b = (r >> 12) - 8;
        if r > CORRECTION[b as usize] {
            b += 1;
        }

        return nbits - ((l << 3) + b);
    }

    /// Total size of the frame in bits.
    pub fn storage_bits(&self) -> i32 {
        return (self.storage * 8) as i32;
    }

    /// Removes `bytes` from the end of the frame so that a trailing payload is invisible to the
    /// raw bit reader. Must be called before any raw bits are read.
    pub fn shrink(&mut self, bytes: usize) {
        self.storage = self.storage.saturating_sub(bytes);
    }

    /// The final range, used for conformance checks against reference decoders.
    pub fn final_range(&self) -> u32 {
        return self.rng;
    }

    /// Marks every remaining bit of the frame as consumed.
    pub(crate) fn skip_to_end(&mut self) {
        self.nbits_total += self.storage_bits() - self.tell();
    }
}

fn isqrt32(val: u32) -> u32 {
    // Bit-by-bit integer square root.
    let mut g = 0u32;
    let mut bshift = ((ilog(val) as i32 - 1) >> 1).max(0);
    let mut b = 1u32 << bshift;
    let mut val = val;

    loop {
        let t = ((g << 1) + b) << bshift;
        if t <= val {
            g += b;
            val -= t;
        }
        b >>= 1;
        bshift -= 1;
        if bshift < 0 {
            break;
        }
    }

    return g;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Range encoder used by tests to synthesize bitstreams.
    pub(crate) struct RangeEncoder {
        buf: Vec<u8>,
        offs: usize,
        end_offs: usize,
        end_window: u32,
        nend_bits: u32,
        rng: u32,
        low: u32,
        rem: i32,
        ext: u32,
    }

    impl RangeEncoder {
        pub(crate) fn new(size: usize) -> Self {
            return RangeEncoder {
                buf: vec![0; size],
                offs: 0,
                end_offs: 0,
                end_window: 0,
                nend_bits: 0,
                rng: CODE_TOP,
                low: 0,
                rem: -1,
                ext: 0,
            };
        }

        fn write_byte(&mut self, value: u32) {
            assert!(self.offs + self.end_offs < self.buf.len(), "encoder overflow");
            self.buf[self.offs] = value as u8;
            self.offs += 1;
        }

        fn write_byte_at_end(&mut self, value: u32) {
            assert!(self.offs + self.end_offs < self.buf.len(), "encoder overflow");
            self.end_offs += 1;
            let idx = self.buf.len() - self.end_offs;
            self.buf[idx] = value as u8;
        }

        fn carry_out(&mut self, c: u32) {
            if c != SYM_MAX {
                let carry = c >> SYM_BITS;
                if self.rem >= 0 {
                    self.write_byte(self.rem as u32 + carry);
                }
                if self.ext > 0 {
                    let sym = (SYM_MAX + carry) & SYM_MAX;
                    while self.ext > 0 {
                        self.write_byte(sym);
                        self.ext -= 1;
                    }
                }
                self.rem = (c & SYM_MAX) as i32;
            }
            else {
                self.ext += 1;
            }
        }

        fn normalize(&mut self) {
            while self.rng <= CODE_BOT {
                self.carry_out(self.low >> (CODE_BITS - SYM_BITS - 1));
                self.low = (self.low << SYM_BITS) & (CODE_TOP - 1);
                self.rng <<= SYM_BITS;
            }
        }

        pub(crate) fn encode(&mut self, fl: u32, fh: u32, ft: u32) {
            let r = self.rng / ft;
            if fl > 0 {
                self.low += self.rng - r * (ft - fl);
                self.rng = r * (fh - fl);
            }
            else {
                self.rng -= r * (ft - fh);
            }
            self.normalize();
        }

        pub(crate) fn encode_symbol(&mut self, symbol: usize, cdf: &[u16]) {
            let fl = if symbol > 0 { u32::from(cdf[symbol]) } else { 0 };
            self.encode(fl, u32::from(cdf[symbol + 1]), u32::from(cdf[0]));
        }

        pub(crate) fn encode_log2(&mut self, bit: bool, logp: u32) {
            let s = self.rng >> logp;
            let r = self.rng - s;
            if bit {
                self.low += r;
            }
            self.rng = if bit { s } else { r };
            self.normalize();
        }

        pub(crate) fn encode_uniform(&mut self, fl: u32, ft: u32) {
            let ft = ft - 1;
            let mut ftb = ilog(ft);
            if ftb > UINT_BITS {
                ftb -= UINT_BITS;
                let ft1 = (ft >> ftb) + 1;
                let fl1 = fl >> ftb;
                self.encode(fl1, fl1 + 1, ft1);
                self.encode_raw_bits(fl & ((1 << ftb) - 1), ftb);
            }
            else {
                self.encode(fl, fl + 1, ft + 1);
            }
        }

        pub(crate) fn encode_raw_bits(&mut self, fl: u32, bits: u32) {
            let mut window = self.end_window;
            let mut used = self.nend_bits;
            if used + bits > WINDOW_SIZE {
                while used >= SYM_BITS {
                    self.write_byte_at_end(window & SYM_MAX);
                    window >>= SYM_BITS;
                    used -= SYM_BITS;
                }
            }
            window |= fl << used;
            used += bits;
            self.end_window = window;
            self.nend_bits = used;
        }

        pub(crate) fn finish(mut self) -> Vec<u8> {
            let mut l = CODE_BITS as i32 - ilog(self.rng) as i32;
            let mut msk = (CODE_TOP - 1) >> l;
            let mut end = (self.low.wrapping_add(msk)) & !msk;

            if (end | msk) >= self.low.wrapping_add(self.rng) {
                l += 1;
                msk >>= 1;
                end = (self.low.wrapping_add(msk)) & !msk;
            }

            while l > 0 {
                self.carry_out(end >> (CODE_BITS - SYM_BITS - 1));
                end = (end << SYM_BITS) & (CODE_TOP - 1);
                l -= SYM_BITS as i32;
            }

            if self.rem >= 0 || self.ext > 0 {
                self.carry_out(0);
            }

            let mut window = self.end_window;
            let mut used = self.nend_bits;
            while used >= SYM_BITS {
                self.write_byte_at_end(window & SYM_MAX);
                window >>= SYM_BITS;
                used -= SYM_BITS;
            }

            if used > 0 {
                let idx = self.buf.len() - self.end_offs - 1;
                self.buf[idx] |= window as u8;
            }

            return self.buf;
        }
    }

    const SILK_MODEL_FRAME_TYPE_INACTIVE: &[u16] = &[256, 26, 256];

    const SILK_MODEL_GAIN_HIGHBITS: &[&[u16]] = &[
        &[256, 32, 144, 212, 241, 253, 254, 255, 256],
        &[256, 2, 19, 64, 124, 186, 233, 252, 256],
        &[256, 1, 4, 30, 101, 195, 245, 254, 256],
    ];

    const SILK_MODEL_GAIN_LOWBITS: &[u16] = &[256, 32, 64, 96, 128, 160, 192, 224, 256];

    const SILK_MODEL_GAIN_DELTA: &[u16] = &[
        256, 6, 11, 22, 53, 185, 206, 214, 218, 221, 223, 225, 227, 228,
        229, 230, 231, 232, 233, 234, 235, 236, 237, 238, 239, 240, 241, 242,
        243, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 254, 255, 256,
    ];

    const SILK_MODEL_LSF_S1: &[&[&[u16]]] = &[
        &[
            &[
                256, 44, 78, 108, 127, 148, 160, 171, 174, 177, 179,
                195, 197, 199, 200, 205, 207, 208, 211, 214, 215, 216,
                218, 220, 222, 225, 226, 235, 244, 246, 253, 255, 256,
            ],
            &[
                256, 1, 11, 12, 20, 23, 31, 39, 53, 66, 80,
                81, 95, 107, 120, 131, 142, 154, 165, 175, 185, 196,
                204, 213, 221, 228, 236, 237, 238, 244, 245, 251, 256,
            ],
        ],
        &[
            &[
                256, 31, 52, 55, 72, 73, 81, 98, 102, 103, 121,
                137, 141, 143, 146, 147, 157, 158, 161, 177, 188, 204,
                206, 208, 211, 213, 224, 225, 229, 238, 246, 253, 256,
            ],
            &[
                256, 1, 5, 21, 26, 44, 55, 60, 74, 89, 90,
                93, 105, 118, 132, 146, 152, 166, 178, 180, 186, 187,
                199, 211, 222, 232, 235, 245, 250, 251, 252, 253, 256,
            ],
        ],
    ];

    const SILK_MODEL_LSF_S2: &[&[u16]] = &[
        &[256, 1, 2, 3, 18, 242, 253, 254, 255, 256],
        &[256, 1, 2, 4, 38, 221, 253, 254, 255, 256],
        &[256, 1, 2, 6, 48, 197, 252, 254, 255, 256],
        &[256, 1, 2, 10, 62, 185, 246, 254, 255, 256],
        &[256, 1, 4, 20, 73, 174, 248, 254, 255, 256],
        &[256, 1, 4, 21, 76, 166, 239, 254, 255, 256],
        &[256, 1, 8, 32, 85, 159, 226, 252, 255, 256],
        &[256, 1, 2, 20, 83, 161, 219, 249, 255, 256],
        &[256, 1, 2, 3, 12, 244, 253, 254, 255, 256],
        &[256, 1, 2, 4, 32, 218, 253, 254, 255, 256],
        &[256, 1, 2, 5, 47, 199, 252, 254, 255, 256],
        &[256, 1, 2, 12, 61, 187, 252, 254, 255, 256],
        &[256, 1, 5, 24, 72, 172, 249, 254, 255, 256],
        &[256, 1, 2, 16, 70, 170, 242, 254, 255, 256],
        &[256, 1, 2, 17, 78, 165, 226, 251, 255, 256],
        &[256, 1, 8, 29, 79, 156, 237, 254, 255, 256],
    ];

    const SILK_MODEL_LSF_INTERPOLATION_OFFSET: &[u16] = &[256, 13, 35, 64, 75, 256];
    const SILK_MODEL_LCG_SEED: &[u16] = &[256, 64, 128, 192, 256];
    const SILK_MODEL_EXC_RATE: &[&[u16]] = &[
        &[256, 15, 66, 78, 124, 169, 182, 215, 242, 256],
        &[256, 33, 63, 99, 116, 150, 199, 217, 238, 256],
    ];

    const SILK_MODEL_PULSE_COUNT: &[&[u16]] = &[
        &[256, 131, 205, 230, 238, 241, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 254, 255, 256],
        &[256, 58, 151, 211, 234, 241, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 254, 255, 256],
    ];

    #[test]
    fn decoder() {
        let data = [0x0b, 0xe4, 0xc1, 0x36, 0xec, 0xc5, 0x80];
        let mut decoder = RangeDecoder::new(&data).unwrap();

        assert!(!decoder.decode_log2(1), "decode_log2 failed");
        assert!(!decoder.decode_log2(1), "decode_log2 failed");
        assert_eq!(decoder.decode_symbol(SILK_MODEL_FRAME_TYPE_INACTIVE), 1);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_GAIN_HIGHBITS[0]), 0);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_GAIN_LOWBITS), 6);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_GAIN_DELTA), 0);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_GAIN_DELTA), 3);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_GAIN_DELTA), 4);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_LSF_S1[1][0]), 9);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_LSF_S2[10]), 5);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_LSF_S2[9]), 4);

        // The remaining 14 of the 16 wideband stage-2 residuals.
        for _ in 0..14 {
            assert_eq!(decoder.decode_symbol(SILK_MODEL_LSF_S2[8]), 4);
        }

        assert_eq!(decoder.decode_symbol(SILK_MODEL_LSF_INTERPOLATION_OFFSET), 4);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_LCG_SEED), 2);
        assert_eq!(decoder.decode_symbol(SILK_MODEL_EXC_RATE[0]), 0);

        for _ in 0..20 {
            assert_eq!(decoder.decode_symbol(SILK_MODEL_PULSE_COUNT[0]), 0);
        }

        assert!(decoder.tell() <= decoder.storage_bits());
    }

    #[test]
    fn empty_frame_is_invalid() {
        assert!(matches!(RangeDecoder::new(&[]), Err(Error::InvalidData(_))));
    }

    #[test]
    fn initial_tell() {
        let data = [0u8; 8];
        let decoder = RangeDecoder::new(&data).unwrap();

        assert_eq!(decoder.tell(), 1);
        assert_eq!(decoder.tell_frac(), 8);
    }

    #[test]
    fn range_stays_normalized() {
        let data = [0xFF, 0x00, 0x55, 0xAA, 0x12, 0x34, 0x56, 0x78];
        let mut decoder = RangeDecoder::new(&data).unwrap();

        for i in 0..64 {
            let _ = decoder.decode_log2(1 + (i % 15));
            assert!(decoder.rng > CODE_BOT);
        }
    }

    #[test]
    fn raw_bits_read_from_the_end() {
        let data = [0x00, 0x00, 0x00, 0xA5, 0x3C];
        let mut decoder = RangeDecoder::new(&data).unwrap();

        assert_eq!(decoder.get_raw_bits(4), 0xC);
        assert_eq!(decoder.get_raw_bits(4), 0x3);
        assert_eq!(decoder.get_raw_bits(8), 0xA5);
        assert_eq!(decoder.get_raw_bits(0), 0);
    }

    #[test]
    fn shrink_hides_trailing_bytes() {
        let data = [0x00, 0x00, 0x7E, 0xFF];
        let mut decoder = RangeDecoder::new(&data).unwrap();

        decoder.shrink(1);
        assert_eq!(decoder.get_raw_bits(8), 0x7E);
        assert_eq!(decoder.storage_bits(), 24);
    }

    #[test]
    fn encoder_round_trip_matches_tell() {
        let mut enc = RangeEncoder::new(64);
        enc.encode_log2(true, 1);
        enc.encode_symbol(3, SILK_MODEL_GAIN_HIGHBITS[1]);
        enc.encode_uniform(1000, 1500);
        enc.encode_uniform(5, 7);
        enc.encode_raw_bits(0x15, 5);
        enc.encode_log2(false, 15);
        let data = enc.finish();

        let mut dec = RangeDecoder::new(&data).unwrap();
        assert!(dec.decode_log2(1));
        assert_eq!(dec.decode_symbol(SILK_MODEL_GAIN_HIGHBITS[1]), 3);
        assert_eq!(dec.decode_uniform(1500), 1000);
        assert_eq!(dec.decode_uniform(7), 5);
        assert_eq!(dec.get_raw_bits(5), 0x15);
        assert!(!dec.decode_log2(15));
        assert!(dec.tell() <= dec.storage_bits());
    }

    #[test]
    fn step_and_triangular_distributions() {
        let data = [0x5A, 0x13, 0xC7, 0x88, 0x01, 0x42, 0x99, 0xF0];

        let mut dec = RangeDecoder::new(&data).unwrap();
        for k0 in [1, 4, 8, 16] {
            assert!(dec.decode_step(k0) <= 2 * k0 + 1);
        }

        let mut dec = RangeDecoder::new(&data).unwrap();
        for qn in [2, 4, 8, 16, 32] {
            assert!(dec.decode_triangular(qn) <= qn);
        }
    }

    #[test]
    fn laplace_zero_is_most_likely() {
        // A zero filled frame sits at the top of the range, inside the central symbol.
        let data = [0x00; 8];
        let mut dec = RangeDecoder::new(&data).unwrap();

        assert_eq!(dec.decode_laplace(72 << 7, 127 << 6), 0);
    }

    #[test]
    fn isqrt() {
        for v in [0u32, 1, 2, 3, 4, 15, 16, 17, 99, 100, 65535, 1 << 20] {
            let r = isqrt32(v);
            assert!(r * r <= v && (r + 1) * (r + 1) > v, "isqrt({v}) = {r}");
        }
    }
}
