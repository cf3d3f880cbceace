//! SILK superframe decoding.
//!
//! A SILK superframe covers one Opus frame of 10, 20, 40 or 60 ms and is made of one or more
//! 20 ms SILK frames (a 10 ms superframe holds a single 10 ms frame).
//!
//! ```text
//! +----------------------------------+
//! |           Header Bits            |
//! | +------------------------------+ |
//! | |    VAD flag (1 bit/frame)    | |
//! | +------------------------------+ |
//! | |        LBRR flag (1 bit)     | |
//! | +------------------------------+ |
//! +----------------------------------+
//! |      Per-Frame LBRR Flags        |
//! |          (optional)              |
//! +----------------------------------+
//! |        LBRR Frames               |
//! |          (optional)              |
//! +----------------------------------+
//! |        Regular SILK Frames       |
//! | +------------------------------+ |
//! | |  Stereo prediction weights   | |
//! | |  Mid-only flag (optional)    | |
//! | |  Frame side information      | |
//! | |  Excitation                  | |
//! | +------------------------------+ |
//! |               ...                |
//! +----------------------------------+
//! ```
//!
//! In a stereo stream the header bits, LBRR flags and frames are repeated for the side channel.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.2

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::range::RangeDecoder;
use crate::silk::frame::{Coding, Layout, MAX_FRAME_LENGTH, MAX_NB_SUBFR};
use crate::silk::indices::{decode_indices, CodingHistory};
use crate::silk::params::ParamState;
use crate::silk::pulses::decode_pulses;
use crate::silk::stereo::{decode_mid_only, decode_prediction, StereoState};
use crate::silk::synthesis::Synthesizer;
use crate::silk::tables::{LBRR_FLAGS_2, LBRR_FLAGS_3};
use crate::toc::Bandwidth;

/// Most 20 ms SILK frames in one superframe.
const MAX_FRAMES_PER_PACKET: usize = 3;

/// Decoder state of one coded channel (mid or side).
#[derive(Clone)]
struct ChannelState {
    layout: Option<Layout>,
    history: CodingHistory,
    params: ParamState,
    synth: Synthesizer,
    first_frame: bool,
    vad_flags: [bool; MAX_FRAMES_PER_PACKET],
    lbrr_flags: [bool; MAX_FRAMES_PER_PACKET],
}

impl Default for ChannelState {
    fn default() -> Self {
        return Self {
            layout: None,
            history: CodingHistory::default(),
            params: ParamState::default(),
            synth: Synthesizer::default(),
            first_frame: true,
            vad_flags: [false; MAX_FRAMES_PER_PACKET],
            lbrr_flags: [false; MAX_FRAMES_PER_PACKET],
        };
    }
}

impl ChannelState {
    /// Selects the frame geometry. A change of internal sample rate clears the filter memories.
    fn configure(&mut self, fs_khz: u32, nb_subfr: usize) {
        if self.layout.map(|l| l.fs_khz) != Some(fs_khz) {
            self.first_frame = true;
            self.params.last_gain_index = 10;
            self.synth.clear_history();
        }
        self.layout = Some(Layout::new(fs_khz, nb_subfr));
    }

    /// Prepares the side channel for the first coded frame after a run of mid-only frames.
    fn restart_side(&mut self) {
        self.synth.clear_history();
        self.params.last_gain_index = 10;
        self.first_frame = true;
    }

    fn decode_header_flags(&mut self, rc: &mut RangeDecoder<'_>, frames: usize) -> bool {
        for flag in &mut self.vad_flags[..frames] {
            *flag = rc.decode_log2(1);
        }
        return rc.decode_log2(1);
    }

    fn decode_lbrr_flags(&mut self, rc: &mut RangeDecoder<'_>, frames: usize, lbrr: bool) {
        self.lbrr_flags = [false; MAX_FRAMES_PER_PACKET];

        if !lbrr {
            return;
        }

        if frames == 1 {
            self.lbrr_flags[0] = true;
            return;
        }

        let cdf: &[u16] = if frames == 2 { &LBRR_FLAGS_2 } else { &LBRR_FLAGS_3 };
        let symbol = rc.decode_symbol(cdf) + 1;

        for (i, flag) in self.lbrr_flags[..frames].iter_mut().enumerate() {
            *flag = (symbol >> i) & 1 == 1;
        }
    }

    /// Parses an LBRR frame and discards it.
    fn skip_frame(&mut self, rc: &mut RangeDecoder<'_>, layout: &Layout, coding: Coding) {
        let indices = decode_indices(rc, layout, true, coding, &mut self.history);

        let mut pulses = [0i32; MAX_FRAME_LENGTH];
        decode_pulses(rc, layout, indices.frame_type, indices.quant_offset, &mut pulses);
    }

    /// Decodes one frame of `layout.frame_length` samples into `out`.
    fn decode_frame(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        layout: &Layout,
        active: bool,
        coding: Coding,
        out: &mut [i16],
    ) {
        let indices = decode_indices(rc, layout, active, coding, &mut self.history);

        let mut pulses = [0i32; MAX_FRAME_LENGTH];
        decode_pulses(rc, layout, indices.frame_type, indices.quant_offset, &mut pulses);

        let params = self.params.dequantize(layout, &indices, coding, self.first_frame);

        trace!(
            "silk: gains {:?} lags {:?}",
            &params.gains_q16[..layout.nb_subfr],
            &params.pitch_lags[..layout.nb_subfr]
        );

        self.synth.synthesize(layout, &indices, &params, &pulses, out);

        self.first_frame = false;
    }
}

/// Decoder for the SILK layer of one Opus stream.
///
/// Output is produced at the internal SILK sample rate, one sample behind the coded signal in
/// both mono and stereo so that switching between the two is seamless.
pub struct SilkDecoder {
    output_channels: usize,
    channels: [ChannelState; 2],
    stereo: StereoState,
    prev_coded_channels: usize,
    prev_decode_only_mid: bool,
}

impl SilkDecoder {
    pub fn new(output_channels: usize) -> Self {
        return Self {
            output_channels: output_channels.clamp(1, 2),
            channels: [ChannelState::default(), ChannelState::default()],
            stereo: StereoState::default(),
            prev_coded_channels: 0,
            prev_decode_only_mid: false,
        };
    }

    /// Returns the decoder to its initial state.
    pub fn reset(&mut self) {
        *self = Self::new(self.output_channels);
    }

    /// Decodes a superframe of `duration_ms` and appends it to `out`, one plane per output
    /// channel, at the internal sample rate.
    ///
    /// Returns the number of samples appended per channel. Only a bad combination of bandwidth,
    /// channel count and duration is an error. The bitstream itself is always decodable.
    pub fn decode_superframe(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        bandwidth: Bandwidth,
        coded_channels: usize,
        duration_ms: u32,
        out: &mut [Vec<f32>],
    ) -> Result<usize> {
        let (frames, nb_subfr) = match duration_ms {
            10 => (1, MAX_NB_SUBFR / 2),
            20 => (1, MAX_NB_SUBFR),
            40 => (2, MAX_NB_SUBFR),
            60 => (3, MAX_NB_SUBFR),
            _ => return Err(Error::InvalidData("silk: invalid frame duration")),
        };

        if !(1..=2).contains(&coded_channels) {
            return Err(Error::InvalidData("silk: invalid channel count"));
        }

        if out.len() < self.output_channels {
            return Err(Error::InternalInvariant("silk: too few output planes"));
        }

        let fs_khz = bandwidth.silk_sample_rate() / 1000;

        // A new side channel starts from scratch.
        if coded_channels > self.prev_coded_channels && self.prev_coded_channels != 0 {
            self.channels[1] = ChannelState::default();
        }

        for channel in &mut self.channels[..coded_channels] {
            channel.configure(fs_khz, nb_subfr);
        }

        if self.output_channels == 2 && coded_channels == 2 && self.prev_coded_channels == 1 {
            self.stereo.pred_prev_q13 = [0; 2];
            self.stereo.side_history = [0; 2];
        }
        self.prev_coded_channels = coded_channels;

        let layout = Layout::new(fs_khz, nb_subfr);

        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.3
        let mut lbrr = [false; 2];
        for (channel, lbrr) in self.channels[..coded_channels].iter_mut().zip(lbrr.iter_mut()) {
            *lbrr = channel.decode_header_flags(rc, frames);
        }

        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.4
        for (channel, &lbrr) in self.channels[..coded_channels].iter_mut().zip(lbrr.iter()) {
            channel.decode_lbrr_flags(rc, frames, lbrr);
        }

        debug!(
            "silk: {} ms at {} kHz, {} channel(s), vad {:?}, lbrr {:?}",
            duration_ms,
            fs_khz,
            coded_channels,
            &self.channels[0].vad_flags[..frames],
            &lbrr[..coded_channels]
        );

        self.skip_lbrr_frames(rc, &layout, frames, coded_channels);

        for plane in out.iter_mut().take(self.output_channels) {
            plane.reserve(frames * layout.frame_length);
        }

        let frame_length = layout.frame_length;

        for i in 0..frames {
            let mut bufs = [[0i16; MAX_FRAME_LENGTH + 2]; 2];

            let mut pred_q13 = self.stereo.pred_prev_q13;
            let mut decode_only_mid = false;

            if coded_channels == 2 {
                pred_q13 = decode_prediction(rc);
                if !self.channels[1].vad_flags[i] {
                    decode_only_mid = decode_mid_only(rc);
                }

                if !decode_only_mid && self.prev_decode_only_mid {
                    self.channels[1].restart_side();
                }
            }

            for (n, buf) in bufs.iter_mut().enumerate().take(coded_channels) {
                if n > 0 && decode_only_mid {
                    continue;
                }

                let coding = if i == 0 {
                    Coding::Independent
                }
                else if n > 0 && self.prev_decode_only_mid {
                    Coding::IndependentNoLtpScaling
                }
                else {
                    Coding::Conditional
                };

                let channel = &mut self.channels[n];
                let active = channel.vad_flags[i];
                channel.decode_frame(rc, &layout, active, coding, &mut buf[2..2 + frame_length]);
            }

            let [mid, side] = &mut bufs;

            if self.output_channels == 2 && coded_channels == 2 {
                self.stereo.ms_to_lr(mid, side, pred_q13, fs_khz, frame_length);
            }
            else {
                self.stereo.buffer_mid(mid, frame_length);
            }

            out[0].extend(mid[1..=frame_length].iter().map(|&s| f32::from(s) / 32768.0));

            if self.output_channels == 2 {
                let right: &[i16] = if coded_channels == 2 { &side[1..=frame_length] } else { &mid[1..=frame_length] };
                out[1].extend(right.iter().map(|&s| f32::from(s) / 32768.0));
            }

            self.prev_decode_only_mid = decode_only_mid;
        }

        return Ok(frames * frame_length);
    }

    /// Parses and discards the low bit-rate redundancy frames of the superframe.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.5
    fn skip_lbrr_frames(&mut self, rc: &mut RangeDecoder<'_>, layout: &Layout, frames: usize, coded_channels: usize) {
        for i in 0..frames {
            for n in 0..coded_channels {
                if !self.channels[n].lbrr_flags[i] {
                    continue;
                }

                if coded_channels == 2 && n == 0 {
                    let _ = decode_prediction(rc);
                    if !self.channels[1].lbrr_flags[i] {
                        let _ = decode_mid_only(rc);
                    }
                }

                let coding = if i > 0 && self.channels[n].lbrr_flags[i - 1] {
                    Coding::Conditional
                }
                else {
                    Coding::Independent
                };

                self.channels[n].skip_frame(rc, layout, coding);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::range::tests::RangeEncoder;
    use crate::silk::tables::*;

    /// Writes an inactive, fully predictable frame: zero gains deltas, stage 1 index 0, flat
    /// residuals, no pulses.
    pub(crate) fn encode_quiet_frame(enc: &mut RangeEncoder, layout: &Layout, conditional: bool) {
        enc.encode_symbol(0, &TYPE_OFFSET_NO_VAD);
        if conditional {
            enc.encode_symbol(4, &GAIN_DELTA);
        }
        else {
            enc.encode_symbol(0, &GAIN_HIGHBITS[0]);
            enc.encode_symbol(0, &UNIFORM8);
        }
        for _ in 1..layout.nb_subfr {
            enc.encode_symbol(4, &GAIN_DELTA);
        }
        let codebook = layout.codebook;
        enc.encode_symbol(0, codebook.stage1_cdf(false));
        let (rows, _) = codebook.unpack(0);
        for &row in rows.iter().take(codebook.order()) {
            enc.encode_symbol(4, codebook.stage2_cdf(row));
        }
        if !layout.is_10ms() {
            enc.encode_symbol(4, &NLSF_INTERP_FACTOR);
        }
        enc.encode_symbol(0, &UNIFORM4);

        enc.encode_symbol(0, &RATE_LEVELS[0]);
        for _ in 0..layout.shell_blocks() {
            enc.encode_symbol(0, PULSES_PER_BLOCK[0]);
        }
    }

    /// Writes a mono superframe of inactive frames without LBRR.
    pub(crate) fn encode_quiet_mono_superframe(enc: &mut RangeEncoder, fs_khz: u32, duration_ms: u32) {
        let (frames, nb_subfr) = if duration_ms == 10 { (1, 2) } else { ((duration_ms / 20) as usize, 4) };
        let layout = Layout::new(fs_khz, nb_subfr);

        for _ in 0..frames {
            enc.encode_log2(false, 1);
        }
        enc.encode_log2(false, 1);
        for i in 0..frames {
            encode_quiet_frame(enc, &layout, i > 0);
        }
    }

    /// A mono superframe of inactive frames without LBRR, zero padded to 256 bytes.
    pub(crate) fn quiet_mono_superframe(fs_khz: u32, duration_ms: u32) -> Vec<u8> {
        let mut enc = RangeEncoder::new(256);
        encode_quiet_mono_superframe(&mut enc, fs_khz, duration_ms);
        return enc.finish();
    }

    #[test]
    fn twenty_ms_wideband_gives_320_samples() {
        let data = quiet_mono_superframe(16, 20);
        let mut rc = RangeDecoder::new(&data).unwrap();

        let mut silk = SilkDecoder::new(1);
        let mut out = vec![Vec::new()];
        let n = silk.decode_superframe(&mut rc, Bandwidth::WideBand, 1, 20, &mut out).unwrap();

        assert_eq!(n, 320);
        assert_eq!(out[0].len(), 320);
        assert!(out[0].iter().all(|s| s.abs() < 0.01));
        assert_eq!(silk.channels[0].layout.map(|l| l.fs_khz), Some(16));
    }

    #[test]
    fn sixty_ms_narrowband_gives_three_frames() {
        let data = quiet_mono_superframe(8, 60);
        let mut rc = RangeDecoder::new(&data).unwrap();

        let mut silk = SilkDecoder::new(2);
        let mut out = vec![Vec::new(), Vec::new()];
        let n = silk.decode_superframe(&mut rc, Bandwidth::NarrowBand, 1, 60, &mut out).unwrap();

        assert_eq!(n, 480);
        // Mono stream on a stereo output is duplicated.
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn ten_ms_medium_band() {
        let data = quiet_mono_superframe(12, 10);
        let mut rc = RangeDecoder::new(&data).unwrap();

        let mut silk = SilkDecoder::new(1);
        let mut out = vec![Vec::new()];
        let n = silk.decode_superframe(&mut rc, Bandwidth::MediumBand, 1, 10, &mut out).unwrap();
        assert_eq!(n, 120);
    }

    #[test]
    fn stereo_mid_only_superframe() {
        let layout = Layout::new(16, 4);

        let mut enc = RangeEncoder::new(256);
        // Mid: inactive, no LBRR. Side: inactive, no LBRR.
        enc.encode_log2(false, 1);
        enc.encode_log2(false, 1);
        enc.encode_log2(false, 1);
        enc.encode_log2(false, 1);
        // Zero prediction weights, then mid-only.
        enc.encode_symbol(12, &STEREO_PRED_JOINT);
        enc.encode_symbol(1, &UNIFORM3);
        enc.encode_symbol(2, &UNIFORM5);
        enc.encode_symbol(1, &UNIFORM3);
        enc.encode_symbol(2, &UNIFORM5);
        enc.encode_symbol(1, &STEREO_ONLY_CODE_MID);
        encode_quiet_frame(&mut enc, &layout, false);
        let data = enc.finish();

        let mut rc = RangeDecoder::new(&data).unwrap();
        let mut silk = SilkDecoder::new(2);
        let mut out = vec![Vec::new(), Vec::new()];
        let n = silk.decode_superframe(&mut rc, Bandwidth::WideBand, 2, 20, &mut out).unwrap();

        assert_eq!(n, 320);
        assert_eq!(out[0], out[1]);
        assert!(silk.prev_decode_only_mid);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let data = quiet_mono_superframe(16, 20);
        let mut rc = RangeDecoder::new(&data).unwrap();
        let mut silk = SilkDecoder::new(1);
        let mut out = vec![Vec::new()];

        assert!(silk.decode_superframe(&mut rc, Bandwidth::WideBand, 1, 5, &mut out).is_err());
        assert!(silk.decode_superframe(&mut rc, Bandwidth::WideBand, 3, 20, &mut out).is_err());
    }
}
