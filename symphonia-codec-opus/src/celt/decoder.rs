//! CELT frame decoding.
//!
//! ```text
//!   +---------+
//!   | Range   |
//!   | Decoder |
//!   +---------+
//!        |
//!        | Fine
//!        +-----------+ Energy  +------------+
//!        |           +-------->|  Energy    |
//!        | Coarse    |         | Dequantize |------+
//!        +-----------+-------->|            |      |
//!        | Energy    |         +------------+      |
//!        |           |                             |
//!        | Bit       |  +--------------+           |
//!        +-----------+->| Bit          |           |
//!        | Allocation   | Allocation   |           |
//!        |              +--------------+           |
//!        |                    |                    |
//!        | PVQ                v                    v
//!        +-------------->+---------+  +---------+  +------------+
//!                        | Band    |->| Anti-   |->| Denormal-  |
//!                        | Shapes  |  | collapse|  | ization    |
//!                        +---------+  +---------+  +------------+
//!                                                        |
//!                                                        v
//!   +------------+   +-------------+   +------------+   +---------+
//!   | De-        |<--| Pitch post- |<--| Overlap    |<--| Inverse |
//!   | emphasis   |   | filter      |   | add        |   | MDCT    |
//!   +------------+   +-------------+   +------------+   +---------+
//! ```
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.3

use log::trace;

use crate::celt::bands::{anti_collapse, decode_all_bands, denormalise_bands, BandsParams};
use crate::celt::energy::{decode_coarse, decode_final, decode_fine, BandEnergies};
use crate::celt::mdct::Imdct;
use crate::celt::postfilter::{comb_filter, deemphasis, PostFilter};
use crate::celt::rate::{band_width, compute_allocation, init_caps, AllocationParams};
use crate::celt::tables::{SPREAD, TF_SELECT, TRIM, WINDOW_120};
use crate::celt::{BITRES, DECODE_BUFFER_SIZE, MAX_BANDS, MAX_FRAME_SIZE, MAX_LM, OVERLAP, SHORT_BLOCKSIZE};
use crate::error::{Error, Result};
use crate::range::RangeDecoder;

/// Energy of a band that has not been coded, in log2 units.
pub const ENERGY_SILENCE: f32 = -28.0;

const SPREAD_NORMAL: usize = 2;

/// Per output channel synthesis state.
struct ChannelState {
    /// Decoded history followed by the overlap of the next frame.
    mem: Box<[f32]>,
    deemphasis: f32,
}

impl ChannelState {
    fn new() -> Self {
        return ChannelState { mem: vec![0.0; DECODE_BUFFER_SIZE + OVERLAP].into_boxed_slice(), deemphasis: 0.0 };
    }
}

/// Decoder for the CELT layer of one Opus stream.
pub struct CeltDecoder {
    output_channels: usize,
    disable_inv: bool,
    imdct: [Imdct; MAX_LM + 1],
    channels: [ChannelState; 2],
    energy: BandEnergies,
    prev_energy: BandEnergies,
    prev_energy2: BandEnergies,
    postfilter: PostFilter,
    postfilter_old: PostFilter,
    /// Final range of the previous frame, seeding the noise generator.
    seed: u32,
    coeffs: Box<[f32]>,
}

impl CeltDecoder {
    pub fn new(output_channels: usize) -> Self {
        return CeltDecoder {
            output_channels: output_channels.clamp(1, 2),
            disable_inv: false,
            imdct: [Imdct::new(120), Imdct::new(240), Imdct::new(480), Imdct::new(960)],
            channels: [ChannelState::new(), ChannelState::new()],
            energy: [[0.0; MAX_BANDS]; 2],
            prev_energy: [[ENERGY_SILENCE; MAX_BANDS]; 2],
            prev_energy2: [[ENERGY_SILENCE; MAX_BANDS]; 2],
            postfilter: PostFilter::default(),
            postfilter_old: PostFilter::default(),
            seed: 0,
            coeffs: vec![0.0; 2 * MAX_FRAME_SIZE].into_boxed_slice(),
        };
    }

    /// Enables or disables phase inverted intensity stereo.
    pub fn set_phase_inversion(&mut self, enabled: bool) {
        self.disable_inv = !enabled;
    }

    /// Clears all inter-frame state.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.mem.fill(0.0);
            channel.deemphasis = 0.0;
        }

        self.energy = [[0.0; MAX_BANDS]; 2];
        self.prev_energy = [[ENERGY_SILENCE; MAX_BANDS]; 2];
        self.prev_energy2 = [[ENERGY_SILENCE; MAX_BANDS]; 2];
        self.postfilter = PostFilter::default();
        self.postfilter_old = PostFilter::default();
        self.seed = 0;
    }

    /// The band energies of the last decoded frame.
    pub fn energy(&self) -> &BandEnergies {
        return &self.energy;
    }

    /// Decodes one frame of `frame_size` samples into the first `frame_size` samples of each
    /// output plane, coding bands `start_band..end_band`.
    ///
    /// Running out of bits inside the frame is not an error. Missing bits decode as the
    /// cheapest symbols and the frame is always fully reconstructed.
    pub fn decode_frame(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        out: &mut [&mut [f32]],
        coded_channels: usize,
        frame_size: usize,
        start_band: usize,
        end_band: usize,
    ) -> Result<()> {
        if coded_channels != 1 && coded_channels != 2 {
            return Err(Error::InvalidData("celt: invalid number of coded channels"));
        }

        if start_band > end_band || end_band > MAX_BANDS {
            return Err(Error::InvalidData("celt: invalid band range"));
        }

        let lm = match frame_size {
            120 => 0,
            240 => 1,
            480 => 2,
            960 => 3,
            _ => return Err(Error::InvalidData("celt: invalid frame size")),
        };

        if out.len() < self.output_channels || out.iter().any(|plane| plane.len() < frame_size) {
            return Err(Error::InternalInvariant("celt: output planes too short"));
        }

        let n = frame_size;
        let c = coded_channels;
        let (start, end) = (start_band, end_band);
        let total_bits = rc.storage_bits();

        if c == 1 {
            let [e0, e1] = &mut self.energy;
            for (a, b) in e0.iter_mut().zip(e1.iter()) {
                *a = a.max(*b);
            }
        }

        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.3
        let tell = rc.tell();
        let silence = if tell >= total_bits {
            true
        }
        else if tell == 1 {
            rc.decode_log2(15)
        }
        else {
            false
        };

        if silence {
            rc.skip_to_end();
        }

        let postfilter = if start == 0 && rc.tell() + 16 <= total_bits {
            PostFilter::read(rc, total_bits)
        }
        else {
            PostFilter::default()
        };

        let transient = lm > 0 && rc.tell() + 3 <= total_bits && rc.decode_log2(3);
        let intra = rc.tell() + 3 <= total_bits && rc.decode_log2(3);

        decode_coarse(rc, &mut self.energy, start, end, intra, c, lm);

        let tf_res = tf_decode(rc, start, end, transient, lm);

        let spread = if rc.tell() + 4 <= total_bits { rc.decode_symbol(&SPREAD) } else { SPREAD_NORMAL };

        let mut caps = [0; MAX_BANDS];
        init_caps(&mut caps, lm, c);

        let (offsets, trim) = decode_dynalloc(rc, start, end, &caps, c, lm, total_bits);

        let mut bits = (total_bits << BITRES) - rc.tell_frac() as i32 - 1;
        let anti_collapse_rsv =
            if transient && lm >= 2 && bits >= (lm as i32 + 2) << BITRES { 1 << BITRES } else { 0 };
        bits -= anti_collapse_rsv;

        let alloc = compute_allocation(
            rc,
            &AllocationParams { start, end, offsets: &offsets, caps: &caps, trim, total: bits, channels: c, lm },
        );

        trace!(
            "celt: lm {} bands {}..{} silence {} transient {} intra {} spread {} trim {} coded bands {}",
            lm,
            start,
            end,
            silence,
            transient,
            intra,
            spread,
            trim,
            alloc.coded_bands
        );

        decode_fine(rc, &mut self.energy, start, end, &alloc.fine_bits, c);

        for channel in &mut self.channels[..self.output_channels] {
            channel.mem.copy_within(n..DECODE_BUFFER_SIZE + OVERLAP / 2, 0);
        }

        let coeffs = &mut self.coeffs[..c * n];
        let (x, y) = coeffs.split_at_mut(n);
        let y = if c == 2 { Some(y) } else { None };

        let collapse_masks = decode_all_bands(
            rc,
            &BandsParams {
                start,
                end,
                lm,
                short_blocks: transient,
                spread,
                dual_stereo: alloc.dual_stereo,
                intensity: alloc.intensity,
                tf_res: &tf_res,
                total_bits: (total_bits << BITRES) - anti_collapse_rsv,
                balance: alloc.balance,
                coded_bands: alloc.coded_bands,
                pulses: &alloc.pulses,
                disable_inv: self.disable_inv,
            },
            x,
            y,
            &mut self.seed,
        );

        let anti_collapse_on = anti_collapse_rsv > 0 && rc.get_raw_bits(1) == 1;

        let bits_left = total_bits - rc.tell();
        decode_final(rc, &mut self.energy, start, end, &alloc.fine_bits, &alloc.fine_priority, bits_left, c);

        if anti_collapse_on {
            anti_collapse(
                &mut self.coeffs[..c * n],
                &collapse_masks,
                lm,
                c,
                n,
                start,
                end,
                &self.energy,
                &self.prev_energy,
                &self.prev_energy2,
                &alloc.pulses,
                self.seed,
            );
        }

        if silence {
            self.energy = [[ENERGY_SILENCE; MAX_BANDS]; 2];
        }

        self.synthesize(c, n, lm, start, end, transient, silence);

        for channel in &mut self.channels[..self.output_channels] {
            let offset = DECODE_BUFFER_SIZE - n;
            comb_filter(&mut channel.mem, offset, SHORT_BLOCKSIZE, self.postfilter_old, self.postfilter, &WINDOW_120);
            if lm != 0 {
                comb_filter(
                    &mut channel.mem,
                    offset + SHORT_BLOCKSIZE,
                    n - SHORT_BLOCKSIZE,
                    self.postfilter,
                    postfilter,
                    &WINDOW_120,
                );
            }
        }

        self.postfilter_old = if lm != 0 { postfilter } else { self.postfilter };
        self.postfilter = postfilter;

        for (channel, plane) in self.channels.iter_mut().zip(out.iter_mut()).take(self.output_channels) {
            let offset = DECODE_BUFFER_SIZE - n;
            deemphasis(&channel.mem[offset..offset + n], &mut plane[..n], &mut channel.deemphasis);
        }

        self.update_energy_history(c, start, end, transient);

        self.seed = rc.final_range();

        if rc.tell() > total_bits {
            return Err(Error::InternalInvariant("celt: read past the end of the frame"));
        }

        return Ok(());
    }

    /// Denormalizes the decoded spectrum and runs the inverse MDCT into the history buffers.
    fn synthesize(
        &mut self,
        coded_channels: usize,
        n: usize,
        lm: usize,
        start: usize,
        end: usize,
        transient: bool,
        silence: bool,
    ) {
        let (blocks, block_len, imdct) =
            if transient { (1 << lm, SHORT_BLOCKSIZE, &mut self.imdct[0]) } else { (1, n, &mut self.imdct[lm]) };

        let mut freq = [0.0f32; MAX_FRAME_SIZE];
        let mut freq2 = [0.0f32; MAX_FRAME_SIZE];
        let freq = &mut freq[..n];
        let freq2 = &mut freq2[..n];

        let coeffs = &self.coeffs;
        let energy = &self.energy;

        for (cc, channel) in self.channels[..self.output_channels].iter_mut().enumerate() {
            if silence {
                freq.fill(0.0);
            }
            else if coded_channels == 2 && self.output_channels == 1 {
                // Stereo to mono downmix.
                denormalise_bands(&coeffs[..n], freq, &energy[0], start, end, lm);
                denormalise_bands(&coeffs[n..2 * n], freq2, &energy[1], start, end, lm);
                for (a, &b) in freq.iter_mut().zip(freq2.iter()) {
                    *a = 0.5 * (*a + b);
                }
            }
            else {
                // A mono stream on a stereo output is duplicated.
                let c = cc.min(coded_channels - 1);
                denormalise_bands(&coeffs[c * n..(c + 1) * n], freq, &energy[c], start, end, lm);
            }

            let out_syn = DECODE_BUFFER_SIZE - n;
            for b in 0..blocks {
                let offset = out_syn + block_len * b;
                imdct.backward(&freq[b..], blocks, &mut channel.mem[offset..], &WINDOW_120);
            }
        }
    }

    fn update_energy_history(&mut self, coded_channels: usize, start: usize, end: usize, transient: bool) {
        if coded_channels == 1 {
            self.energy[1] = self.energy[0];
        }

        if !transient {
            self.prev_energy2 = self.prev_energy;
            self.prev_energy = self.energy;
        }
        else {
            for (prev, cur) in self.prev_energy.iter_mut().flatten().zip(self.energy.iter().flatten()) {
                *prev = prev.min(*cur);
            }
        }

        for c in 0..2 {
            for i in (0..start).chain(end..MAX_BANDS) {
                self.energy[c][i] = 0.0;
                self.prev_energy[c][i] = ENERGY_SILENCE;
                self.prev_energy2[c][i] = ENERGY_SILENCE;
            }
        }
    }
}

/// Decodes the per-band time-frequency resolution changes.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.4.5
fn tf_decode(rc: &mut RangeDecoder<'_>, start: usize, end: usize, transient: bool, lm: usize) -> [i32; MAX_BANDS] {
    let mut tf_res = [0i32; MAX_BANDS];

    let mut budget = rc.storage_bits();
    let mut tell = rc.tell();
    let mut logp = if transient { 2 } else { 4 };

    let select_rsv = lm > 0 && tell + logp + 1 <= budget;
    if select_rsv {
        budget -= 1;
    }

    let mut curr = 0;
    let mut changed = 0;
    for tf in &mut tf_res[start..end] {
        if tell + logp <= budget {
            curr ^= i32::from(rc.decode_log2(logp as u32));
            tell = rc.tell();
            changed |= curr;
        }
        *tf = curr;
        logp = if transient { 4 } else { 5 };
    }

    let row = &TF_SELECT[lm];
    let base = 4 * usize::from(transient);
    let changed = changed as usize;

    let select = if select_rsv && row[base + changed] != row[base + 2 + changed] {
        usize::from(rc.decode_log2(1))
    }
    else {
        0
    };

    for tf in &mut tf_res[start..end] {
        *tf = i32::from(row[base + 2 * select + *tf as usize]);
    }

    return tf_res;
}

/// Decodes the dynamic allocation boosts and the allocation trim.
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.3
fn decode_dynalloc(
    rc: &mut RangeDecoder<'_>,
    start: usize,
    end: usize,
    caps: &[i32; MAX_BANDS],
    channels: usize,
    lm: usize,
    total_bits: i32,
) -> ([i32; MAX_BANDS], i32) {
    let mut offsets = [0; MAX_BANDS];
    let mut total = total_bits << BITRES;
    let mut tell = rc.tell_frac() as i32;
    let mut logp = 6;

    for i in start..end {
        let width = (channels as i32 * band_width(i)) << lm;
        // At least 6 bits, at most 1 bit per sample, and never less than 1/8 bit per sample.
        let quanta = (width << BITRES).min((6 << BITRES).max(width));

        let mut loop_logp = logp;
        let mut boost = 0;
        while tell + (loop_logp << BITRES) < total && boost < caps[i] {
            let flag = rc.decode_log2(loop_logp as u32);
            tell = rc.tell_frac() as i32;
            if !flag {
                break;
            }
            boost += quanta;
            total -= quanta;
            loop_logp = 1;
        }

        offsets[i] = boost;

        if boost > 0 {
            logp = (logp - 1).max(2);
        }
    }

    let trim = if tell + (6 << BITRES) <= total { rc.decode_symbol(&TRIM) as i32 } else { 5 };

    return (offsets, trim);
}
