//! Decoding the frames of one elementary Opus stream.
//!
//! A frame is decoded by SILK, by CELT, or by both (Hybrid). SILK output is resampled to 48 kHz by
//! a stateful resampler which may hold back part of its output. Those samples are owed to the
//! caller and are paid back by a flush when the resampler is reconfigured or the stream is
//! drained. In Hybrid frames the CELT output owed against the same latency waits in a delay line.
//!
//! Mode switches are smoothed by an optional redundant 5 ms CELT frame carried at the end of a
//! SILK or Hybrid frame, which is cross-faded into the output at the frame boundary.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.5

use log::{debug, trace, warn};
use once_cell::sync::Lazy;

use crate::celt::{CeltDecoder, HYBRID_START_BAND};
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::fifo::SampleFifo;
use crate::packet::FramePacket;
use crate::range::RangeDecoder;
use crate::resampler::Resampler;
use crate::silk::SilkDecoder;
use crate::toc::{AudioMode, Bandwidth, Toc};

/// Samples in a redundant CELT frame.
const REDUNDANCY_FRAME_SIZE: usize = 240;

/// Length of the cross-fade with a redundant frame.
const CROSS_FADE_LEN: usize = 120;

/// Silence fed to a freshly configured resampler, per SILK bandwidth.
const SILK_RESAMPLE_DELAY: [usize; 3] = [4, 8, 11];

/// The CELT window squared, a power complementary cross-fade.
static CROSS_FADE_WINDOW: Lazy<[f32; CROSS_FADE_LEN]> = Lazy::new(|| {
    let mut window = [0.0; CROSS_FADE_LEN];
    for (w, &x) in window.iter_mut().zip(crate::celt::WINDOW_120.iter()) {
        *w = x * x;
    }
    window
});

/// Cross-fades from `in1` to `in2` into `out`.
///
/// `out[i] = in2[i] * w[i] + in1[i] * (1 - w[i])`
pub fn fade(out: &mut [f32], in1: &[f32], in2: &[f32], window: &[f32]) {
    for (((o, &a), &b), &w) in out.iter_mut().zip(in1).zip(in2).zip(window) {
        *o = b * w + a * (1.0 - w);
    }
}

/// A redundant frame that still has to be faded into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redundancy {
    Idle,
    /// The fade was interrupted at this index because the frame's output was owed.
    Pending(usize),
}

/// Where a redundant frame sits relative to the primary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedundancyPosition {
    /// Precedes the primary frame. Used when switching from CELT to SILK.
    Start,
    /// Follows the primary frame. Used when switching from SILK to CELT.
    End,
}

/// Sub-slices `len` samples of every plane starting at `pos`.
fn planes_at(out: &mut [Vec<f32>], pos: usize, len: usize) -> Vec<&mut [f32]> {
    return out.iter_mut().map(|plane| &mut plane[pos..pos + len]).collect();
}

/// Decoder state of one elementary stream.
pub struct FrameDecoder<R: Resampler> {
    channels: usize,
    config: DecoderConfig,
    silk: SilkDecoder,
    celt: CeltDecoder,
    resampler: R,
    /// CELT output of Hybrid frames waiting for the matching resampled SILK output.
    celt_delay: SampleFifo,
    redundancy: Redundancy,
    /// Resampled SILK samples owed to the output.
    delayed_samples: usize,
    silk_out: Vec<Vec<f32>>,
    celt_out: Vec<Vec<f32>>,
    redundancy_out: Vec<Vec<f32>>,
}

impl<R: Resampler> FrameDecoder<R> {
    /// Instantiates a decoder producing `channels` (1 or 2) output channels.
    pub fn new(channels: usize, config: DecoderConfig, resampler: R) -> Self {
        let channels = channels.clamp(1, 2);

        let mut celt = CeltDecoder::new(channels);
        celt.set_phase_inversion(config.phase_inversion);

        return FrameDecoder {
            channels,
            config,
            silk: SilkDecoder::new(channels),
            celt,
            resampler,
            celt_delay: SampleFifo::new(channels),
            redundancy: Redundancy::Idle,
            delayed_samples: 0,
            silk_out: vec![Vec::new(); channels],
            celt_out: vec![vec![0.0; crate::celt::MAX_FRAME_SIZE]; channels],
            redundancy_out: vec![vec![0.0; REDUNDANCY_FRAME_SIZE]; channels],
        };
    }

    /// Samples owed to the output by the resampler.
    pub fn delayed_samples(&self) -> usize {
        return self.delayed_samples;
    }

    /// Returns every component to its initial state, dropping owed samples.
    pub fn reset(&mut self) {
        self.silk.reset();
        self.celt.reset();
        self.resampler.reset();
        self.celt_delay.clear();
        self.redundancy = Redundancy::Idle;
        self.delayed_samples = 0;
    }

    /// Decodes every frame of `packet` into `out`, starting at sample `start` of each plane.
    ///
    /// Without a packet only the owed samples are written. Returns the number of samples written
    /// per channel.
    pub fn decode_packet(
        &mut self,
        packet: Option<&FramePacket<'_>>,
        out: &mut [Vec<f32>],
        start: usize,
    ) -> Result<usize> {
        if out.len() < self.channels {
            return Err(Error::InternalInvariant("opus: too few output planes for stream"));
        }

        let flush_needed = match (self.resampler.input_rate(), packet) {
            (Some(rate), Some(packet)) => {
                let toc = packet.toc();
                toc.mode() == AudioMode::Celt || rate != toc.bandwidth().silk_sample_rate()
            }
            (Some(_), None) => self.delayed_samples > 0,
            (None, _) => false,
        };

        let owed = if flush_needed { self.delayed_samples } else { 0 };
        let needed = start + owed + packet.map_or(0, |packet| packet.duration());

        if out[..self.channels].iter().any(|plane| plane.len() < needed) {
            return Err(Error::InternalInvariant("opus: stream output buffer too short"));
        }

        let mut pos = start;

        if flush_needed {
            self.flush_resampler(out, pos, owed)?;
            pos += owed;
        }

        let packet = match packet {
            Some(packet) => packet,
            None => return Ok(pos - start),
        };

        let toc = packet.toc();
        let frame_samples = toc.frame_samples();

        for (i, frame) in packet.frames().enumerate() {
            let samples = match self.decode_frame(frame, toc, out, pos) {
                Ok(samples) => samples,
                Err(err) if !self.config.is_strict() => {
                    warn!("opus: frame {} of {} not decoded ({}), substituting silence", i, packet.frame_count(), err);

                    for plane in &mut out[..self.channels] {
                        plane[pos..pos + frame_samples].fill(0.0);
                    }
                    frame_samples
                }
                Err(err) => {
                    debug!("opus: frame {} of {} not decoded: {}", i, packet.frame_count(), err);
                    return Err(err);
                }
            };

            pos += samples;
        }

        return Ok(pos - start);
    }

    /// Writes the `owed` samples held by the resampler, then returns it to the unconfigured state.
    fn flush_resampler(&mut self, out: &mut [Vec<f32>], pos: usize, owed: usize) -> Result<()> {
        trace!("opus: flushing {} owed samples", owed);

        self.resampler.flush(&mut planes_at(out, pos, owed), owed)?;

        let queued = self.celt_delay.len();
        if queued > 0 {
            if queued != owed {
                return Err(Error::InternalInvariant("opus: celt delay does not match owed samples"));
            }
            self.celt_delay.pop_add(&mut planes_at(out, pos, owed), owed);
        }

        self.fade_pending_redundancy(out, pos);

        self.resampler.reset();
        self.delayed_samples = 0;

        return Ok(());
    }

    /// Configures the resampler for the SILK rate of `bandwidth` and primes it with silence.
    fn init_resampler(&mut self, bandwidth: Bandwidth) -> Result<()> {
        self.resampler.configure(bandwidth.silk_sample_rate(), self.channels)?;

        let delay = match bandwidth {
            Bandwidth::NarrowBand => SILK_RESAMPLE_DELAY[0],
            Bandwidth::MediumBand => SILK_RESAMPLE_DELAY[1],
            _ => SILK_RESAMPLE_DELAY[2],
        };

        let silence = vec![0.0f32; delay];
        let input = vec![silence.as_slice(); self.channels];
        let mut none = vec![Vec::new(); self.channels];

        self.resampler.convert(&input, &mut planes_at(&mut none, 0, 0))?;

        return Ok(());
    }

    /// Finishes a cross-fade that the previous frame could not complete.
    fn fade_pending_redundancy(&mut self, out: &mut [Vec<f32>], pos: usize) {
        if let Redundancy::Pending(idx) = self.redundancy {
            let len = CROSS_FADE_LEN - idx;

            for (plane, red) in out.iter_mut().zip(&self.redundancy_out) {
                let len = len.min(plane.len().saturating_sub(pos));
                let mut prev = [0.0f32; CROSS_FADE_LEN];
                prev[..len].copy_from_slice(&plane[pos..pos + len]);

                fade(
                    &mut plane[pos..pos + len],
                    &prev[..len],
                    &red[CROSS_FADE_LEN + idx..],
                    &CROSS_FADE_WINDOW[idx..],
                );
            }
        }

        self.redundancy = Redundancy::Idle;
    }

    fn decode_redundancy(&mut self, data: &[u8], toc: Toc) -> Result<()> {
        let mut rc = RangeDecoder::new(data)?;

        let mut dst = planes_at(&mut self.redundancy_out, 0, REDUNDANCY_FRAME_SIZE);

        return self
            .celt
            .decode_frame(
                &mut rc,
                &mut dst,
                toc.channels(),
                REDUNDANCY_FRAME_SIZE,
                0,
                toc.bandwidth().celt_end_band(),
            )
            .map_err(|err| {
                warn!("opus: redundant frame not decoded: {}", err);
                err
            });
    }

    /// Decodes one frame into `out` at `pos`. Returns the number of samples written, which is
    /// less than the frame duration when the resampler owes samples.
    fn decode_frame(&mut self, data: &[u8], toc: Toc, out: &mut [Vec<f32>], pos: usize) -> Result<usize> {
        let mode = toc.mode();
        let frame_samples = toc.frame_samples();
        let coded_channels = toc.channels();
        let delayed = self.delayed_samples;

        let mut size = data.len();
        let mut rc = RangeDecoder::new_unchecked(data);
        let mut samples = frame_samples;

        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.2
        if mode != AudioMode::Celt {
            let bandwidth = toc.bandwidth().min(Bandwidth::WideBand);

            if self.resampler.input_rate().is_none() {
                self.init_resampler(bandwidth)?;
            }

            let duration_ms = toc.silk_frame_ms().ok_or(Error::InternalInvariant("opus: celt frame in silk path"))?;

            for plane in &mut self.silk_out {
                plane.clear();
            }

            self.silk.decode_superframe(&mut rc, bandwidth, coded_channels, duration_ms, &mut self.silk_out)?;

            let input = self.silk_out.iter().map(|plane| plane.as_slice()).collect::<Vec<_>>();
            samples = self.resampler.convert(&input, &mut planes_at(out, pos, frame_samples))?;

            self.delayed_samples += frame_samples - samples;
        }
        else {
            self.silk.reset();
        }

        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.5.1
        let consumed = rc.tell();
        let has_redundancy = match mode {
            AudioMode::Hybrid if consumed + 37 <= (size * 8) as i32 => rc.decode_log2(12),
            AudioMode::Silk if consumed + 17 <= (size * 8) as i32 => true,
            _ => false,
        };

        let mut redundancy = None;

        if has_redundancy {
            let position = if rc.decode_log2(1) { RedundancyPosition::Start } else { RedundancyPosition::End };

            let redundancy_size = if mode == AudioMode::Hybrid {
                rc.decode_uniform(256) as usize + 2
            }
            else {
                size - ((rc.tell() + 7) >> 3) as usize
            };

            size = size
                .checked_sub(redundancy_size)
                .ok_or(Error::InvalidData("opus: redundant frame larger than its frame"))?;

            debug!("opus: {} byte redundant frame at {:?}", redundancy_size, position);

            if position == RedundancyPosition::Start {
                self.decode_redundancy(&data[size..], toc)?;
                self.celt.reset();
            }

            redundancy = Some((position, redundancy_size));
        }

        // https://datatracker.ietf.org/doc/html/rfc6716#section-4.3
        if mode != AudioMode::Silk {
            let mut celt_pos = pos;
            let mut celt_samples = samples;

            let queued = self.celt_delay.len();
            if queued > 0 {
                if mode == AudioMode::Hybrid {
                    self.celt_delay.pop_add(&mut planes_at(out, pos, queued), queued);
                    celt_pos += queued;
                    celt_samples = celt_samples
                        .checked_sub(queued)
                        .ok_or(Error::InternalInvariant("opus: celt delay exceeds frame output"))?;
                }
                else {
                    warn!("opus: dropping {} spurious celt delay samples", queued);
                    self.celt_delay.clear();

                    if self.config.is_strict() {
                        return Err(Error::InternalInvariant("opus: spurious celt delay samples"));
                    }
                }
            }

            rc.shrink(redundancy.map_or(0, |(_, size)| size));

            let start_band = if mode == AudioMode::Hybrid { HYBRID_START_BAND } else { 0 };
            let end_band = toc.bandwidth().celt_end_band();

            if mode == AudioMode::Celt {
                let mut dst = planes_at(out, pos, frame_samples);
                self.celt.decode_frame(&mut rc, &mut dst, coded_channels, frame_samples, start_band, end_band)?;
            }
            else {
                let mut dst = planes_at(&mut self.celt_out, 0, frame_samples);
                self.celt.decode_frame(&mut rc, &mut dst, coded_channels, frame_samples, start_band, end_band)?;

                for (plane, celt) in out.iter_mut().zip(&self.celt_out) {
                    for (o, &c) in plane[celt_pos..celt_pos + celt_samples].iter_mut().zip(&celt[..celt_samples]) {
                        *o += c;
                    }
                }

                self.celt_delay.push_from(&self.celt_out, celt_samples, frame_samples - celt_samples);
            }
        }
        else {
            self.celt.reset();
        }

        self.fade_pending_redundancy(out, pos);

        match redundancy {
            Some((RedundancyPosition::End, redundancy_size)) => {
                self.celt.reset();
                self.decode_redundancy(&data[size..size + redundancy_size], toc)?;

                // The fade ends with the samples written by this frame.
                if delayed < CROSS_FADE_LEN && samples + delayed >= CROSS_FADE_LEN {
                    let at = pos + samples + delayed - CROSS_FADE_LEN;
                    let len = CROSS_FADE_LEN - delayed;

                    for (plane, red) in out.iter_mut().zip(&self.redundancy_out) {
                        let mut prev = [0.0f32; CROSS_FADE_LEN];
                        prev[..len].copy_from_slice(&plane[at..at + len]);

                        fade(&mut plane[at..at + len], &prev[..len], &red[CROSS_FADE_LEN..], &CROSS_FADE_WINDOW[..]);
                    }

                    if delayed > 0 {
                        self.redundancy = Redundancy::Pending(len);
                    }
                }
            }
            Some((RedundancyPosition::Start, _)) => {
                let at = pos + delayed;

                for (plane, red) in out.iter_mut().zip(&self.redundancy_out) {
                    let end = (at + REDUNDANCY_FRAME_SIZE).min(plane.len());
                    if end <= at + CROSS_FADE_LEN {
                        continue;
                    }

                    plane[at..at + CROSS_FADE_LEN].copy_from_slice(&red[..CROSS_FADE_LEN]);

                    let len = end - at - CROSS_FADE_LEN;
                    let mut next = [0.0f32; CROSS_FADE_LEN];
                    next[..len].copy_from_slice(&plane[at + CROSS_FADE_LEN..end]);

                    fade(&mut plane[at + CROSS_FADE_LEN..end], &red[CROSS_FADE_LEN..], &next[..len], &CROSS_FADE_WINDOW[..]);
                }
            }
            None => (),
        }

        return Ok(samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::tests::RangeEncoder;
    use crate::resampler::SincResampler;
    use crate::silk::encode_quiet_mono_superframe;

    /// TOC byte of a SILK-only wideband 20 ms mono frame.
    const SILK_WB_20MS: u8 = 9 << 3;

    /// TOC byte of a CELT-only fullband 20 ms mono frame.
    const CELT_FB_20MS: u8 = 31 << 3;

    fn decoder() -> FrameDecoder<SincResampler> {
        return FrameDecoder::new(1, DecoderConfig::default(), SincResampler::new());
    }

    fn decode(dec: &mut FrameDecoder<SincResampler>, packet: Option<&[u8]>) -> Vec<f32> {
        let packet = packet.map(|buf| FramePacket::new(buf).unwrap());

        let mut out = vec![vec![0.0f32; 2880]];
        let n = dec.decode_packet(packet.as_ref(), &mut out, 0).unwrap();

        out[0].truncate(n);
        return out.swap_remove(0);
    }

    /// A 2 byte CELT frame with the silence flag set.
    fn celt_silence() -> Vec<u8> {
        let mut enc = RangeEncoder::new(2);
        enc.encode_log2(true, 15);
        return enc.finish();
    }

    /// A SILK frame followed by a silent redundant CELT frame.
    fn silk_with_redundancy(at_start: bool) -> (Vec<u8>, usize) {
        let mut enc = RangeEncoder::new(64);
        encode_quiet_mono_superframe(&mut enc, 16, 20);
        enc.encode_log2(at_start, 1);
        let mut primary = enc.finish();

        // The primary part ends where its range coded symbols end.
        let mut rc = RangeDecoder::new(&primary).unwrap();
        let mut silk = SilkDecoder::new(1);
        let mut scratch = vec![Vec::new()];
        silk.decode_superframe(&mut rc, Bandwidth::WideBand, 1, 20, &mut scratch).unwrap();
        assert_eq!(rc.decode_log2(1), at_start);
        let primary_len = ((rc.tell() + 7) >> 3) as usize;
        primary.truncate(primary_len);

        let mut packet = vec![SILK_WB_20MS];
        packet.extend_from_slice(&primary);
        packet.extend_from_slice(&celt_silence());

        return (packet, primary_len);
    }

    #[test]
    fn fade_follows_the_window() {
        let in1 = [1.0f32, 1.0, 1.0, 1.0];
        let in2 = [-1.0f32, 0.0, 2.0, 4.0];
        let window = [0.0f32, 0.25, 0.5, 1.0];
        let mut out = [0.0f32; 4];

        fade(&mut out, &in1, &in2, &window);

        for i in 0..4 {
            assert_eq!(out[i], in2[i] * window[i] + in1[i] * (1.0 - window[i]));
        }
        assert_eq!(out, [1.0, 0.75, 1.5, 4.0]);
    }

    #[test]
    fn cross_fade_window_rises_from_zero_to_one() {
        let window = &*CROSS_FADE_WINDOW;

        assert!(window[0] < 1e-3);
        assert!(window[CROSS_FADE_LEN - 1] > 0.999);
        assert!(window.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn silk_frame_gives_a_full_frame() {
        let mut frame = crate::silk::quiet_mono_superframe(16, 20);
        while frame.last() == Some(&0) {
            frame.pop();
        }

        let mut packet = vec![SILK_WB_20MS];
        packet.extend_from_slice(&frame);

        let mut dec = decoder();
        assert_eq!(decode(&mut dec, Some(&packet)).len(), 960);
        assert_eq!(dec.delayed_samples(), 0);
        assert!(decode(&mut dec, None).is_empty());
    }

    #[test]
    fn redundancy_at_end_fades_into_the_redundant_frame() {
        let (packet, primary_len) = silk_with_redundancy(false);
        let plain = &packet[..1 + primary_len];

        let mut dec = decoder();
        let faded = decode(&mut dec, Some(&packet));

        let mut reference = decoder();
        let unfaded = decode(&mut reference, Some(plain));

        assert_eq!(faded.len(), 960);
        assert_eq!(faded[..840], unfaded[..840]);

        // The redundant frame is silent, so only the faded out primary signal remains.
        let w = &*CROSS_FADE_WINDOW;
        for i in 0..CROSS_FADE_LEN {
            let expected = 0.0 * w[i] + unfaded[840 + i] * (1.0 - w[i]);
            assert!((faded[840 + i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn redundancy_at_start_precedes_the_primary_frame() {
        let (packet, primary_len) = silk_with_redundancy(true);
        let plain = &packet[..1 + primary_len];

        let mut dec = decoder();
        let faded = decode(&mut dec, Some(&packet));

        let mut reference = decoder();
        let unfaded = decode(&mut reference, Some(plain));

        assert!(faded[..CROSS_FADE_LEN].iter().all(|&s| s == 0.0));

        let w = &*CROSS_FADE_WINDOW;
        for i in 0..CROSS_FADE_LEN {
            let expected = unfaded[120 + i] * w[i] + 0.0 * (1.0 - w[i]);
            assert!((faded[120 + i] - expected).abs() < 1e-6);
        }

        assert_eq!(faded[240..], unfaded[240..]);
    }

    #[test]
    fn celt_then_silk_switches_modes() {
        let mut dec = decoder();

        let mut celt = vec![CELT_FB_20MS];
        celt.extend_from_slice(&celt_silence());
        let out = decode(&mut dec, Some(&celt));
        assert_eq!(out.len(), 960);
        assert!(out.iter().all(|&s| s == 0.0));

        let (packet, _) = silk_with_redundancy(true);
        let out = decode(&mut dec, Some(&packet));
        assert_eq!(out.len(), 960);
        assert!(out.iter().all(|s| s.is_finite()));

        // Back to CELT flushes the resampler, which owes nothing.
        let out = decode(&mut dec, Some(&celt));
        assert_eq!(out.len(), 960);
        assert_eq!(dec.delayed_samples(), 0);
    }

    #[test]
    fn oversized_hybrid_redundancy_is_rejected() {
        let mut enc = RangeEncoder::new(64);
        // Silence the SILK layer cheaply, then claim a 257 byte redundant frame.
        encode_quiet_mono_superframe(&mut enc, 16, 20);
        enc.encode_log2(true, 12);
        enc.encode_log2(false, 1);
        enc.encode_uniform(255, 256);
        let frame = enc.finish();

        // Hybrid SWB 20 ms.
        let mut packet = vec![13 << 3];
        packet.extend_from_slice(&frame);

        let mut strict = FrameDecoder::new(
            1,
            DecoderConfig { error_policy: crate::config::ErrorPolicy::Strict, ..Default::default() },
            SincResampler::new(),
        );
        let parsed = FramePacket::new(&packet).unwrap();
        let mut out = vec![vec![0.0f32; 960]];
        let err = strict.decode_packet(Some(&parsed), &mut out, 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidData);

        // The lenient policy substitutes silence.
        let mut lenient = decoder();
        let out = decode(&mut lenient, Some(&packet));
        assert_eq!(out.len(), 960);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn reset_drops_owed_state() {
        let mut dec = decoder();
        let (packet, _) = silk_with_redundancy(false);
        decode(&mut dec, Some(&packet));

        dec.reset();

        assert_eq!(dec.delayed_samples(), 0);
        assert!(dec.celt_delay.is_empty());
        assert_eq!(dec.redundancy, Redundancy::Idle);
        assert!(dec.resampler.input_rate().is_none());
    }
}
