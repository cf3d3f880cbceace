//! Multistream packet decoding.
//!
//! A multistream packet concatenates one packet per elementary stream, all but the last in
//! self-delimited framing. Every stream codes the same duration, but the streams may disagree on
//! how many samples are ready because each resampler owes a different amount. Output is limited to
//! the samples every stream has ready and the excess of each stream waits in a sync buffer for the
//! next packet.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#appendix-B

use log::{trace, warn};

use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::fifo::SampleFifo;
use crate::frame::FrameDecoder;
use crate::header::{ChannelMapping, ChannelSource};
use crate::packet::{FramePacket, MAX_PACKET_SAMPLES};
use crate::resampler::Resampler;

struct Stream<R: Resampler> {
    decoder: FrameDecoder<R>,
    /// Samples decoded beyond what the other streams had ready.
    sync: SampleFifo,
    out: Vec<Vec<f32>>,
}

impl<R: Resampler> Stream<R> {
    /// Samples this stream could emit without new input.
    fn pending(&self) -> usize {
        return self.decoder.delayed_samples() + self.sync.len();
    }
}

/// Decoder for all elementary streams of an Opus multistream.
pub struct MultiStreamDecoder<R: Resampler> {
    mapping: ChannelMapping,
    gain: Option<f32>,
    streams: Vec<Stream<R>>,
}

impl<R: Resampler> MultiStreamDecoder<R> {
    /// Instantiates a decoder for `mapping`. Each stream gets its own resampler from
    /// `make_resampler`. A `gain` of `None` leaves the output unscaled.
    pub fn new(
        mapping: ChannelMapping,
        gain: Option<f32>,
        config: DecoderConfig,
        mut make_resampler: impl FnMut() -> R,
    ) -> Self {
        let streams = (0..mapping.stream_count)
            .map(|index| {
                let channels = mapping.stream_channels(index);
                Stream {
                    decoder: FrameDecoder::new(channels, config, make_resampler()),
                    sync: SampleFifo::new(channels),
                    out: vec![Vec::new(); channels],
                }
            })
            .collect();

        return MultiStreamDecoder { mapping, gain, streams };
    }

    pub fn channel_count(&self) -> usize {
        return self.mapping.channel_count();
    }

    /// Most samples any stream could emit without new input.
    pub fn pending_samples(&self) -> usize {
        return self.streams.iter().map(Stream::pending).max().unwrap_or(0);
    }

    /// Returns every stream to its initial state, dropping pending samples.
    pub fn reset(&mut self) {
        for stream in &mut self.streams {
            stream.decoder.reset();
            stream.sync.clear();
        }
    }

    /// Decodes `packet`, or only the pending samples if there is none, into `out`.
    ///
    /// `out` holds one plane per output channel. Planes are grown as needed. Returns the number
    /// of samples written per channel. On error every stream is reset and the pending samples are
    /// dropped.
    pub fn decode(&mut self, packet: Option<&[u8]>, out: &mut [Vec<f32>]) -> Result<usize> {
        if out.len() < self.mapping.channel_count() {
            return Err(Error::InternalInvariant("opus: too few output planes"));
        }

        let stream_count = self.streams.len();

        let packets = match packet {
            Some(buf) => self.parse(buf)?,
            None => Vec::new(),
        };

        let coded = packets.first().map_or(0, |packet| packet.duration());
        let pending = self.pending_samples();
        let capacity = coded + pending;

        if capacity == 0 {
            return Ok(0);
        }

        // Streams decoded before the failure have advanced, so all of them start over.
        let ready = match self.decode_streams(&packets, capacity) {
            Ok(ready) => ready,
            Err(err) => {
                self.reset();
                return Err(err);
            }
        };

        trace!(
            "opus: {} stream(s), {} coded, {} pending, {} ready",
            stream_count,
            coded,
            pending,
            ready
        );

        self.map_channels(out, ready);

        return Ok(ready);
    }

    /// Decodes every stream after draining its sync buffer, keeps the samples beyond the shortest
    /// stream for the next packet, and returns the number of samples every stream has ready.
    fn decode_streams(&mut self, packets: &[FramePacket<'_>], capacity: usize) -> Result<usize> {
        let mut totals = Vec::with_capacity(self.streams.len());

        for (index, stream) in self.streams.iter_mut().enumerate() {
            for plane in &mut stream.out {
                if plane.len() < capacity {
                    plane.resize(capacity, 0.0);
                }
            }

            let synced = {
                let len = stream.sync.len();
                let mut planes = stream.out.iter_mut().map(|plane| &mut plane[..len]).collect::<Vec<_>>();
                stream.sync.pop_into(&mut planes, len)
            };

            let decoded = stream.decoder.decode_packet(packets.get(index), &mut stream.out, synced)?;

            totals.push((synced, synced + decoded));
        }

        let ready = totals.iter().map(|&(_, total)| total).min().unwrap_or(0);

        if totals.iter().any(|&(_, total)| total - ready > MAX_PACKET_SAMPLES) {
            return Err(Error::ResourceExhausted("opus: stream sync buffer overflow"));
        }

        for (index, (stream, &(synced, total))) in self.streams.iter_mut().zip(&totals).enumerate() {
            if total > ready {
                if synced == 0 {
                    warn!("opus: stream {} is {} sample(s) ahead, buffering", index, total - ready);
                }

                stream.sync.push_from(&stream.out, ready, total - ready);
            }
        }

        return Ok(ready);
    }

    /// Splits a multistream packet into the packets of the elementary streams.
    fn parse<'a>(&self, buf: &'a [u8]) -> Result<Vec<FramePacket<'a>>> {
        let stream_count = self.streams.len();

        let mut packets = Vec::with_capacity(stream_count);
        let mut rest = buf;

        for index in 0..stream_count {
            let packet = FramePacket::parse(rest, index + 1 != stream_count)?;

            if let Some(first) = packets.first().map(|first: &FramePacket<'_>| first.duration()) {
                if packet.duration() != first {
                    return Err(Error::InvalidData("opus: streams code different durations"));
                }
            }

            rest = &rest[packet.packet_size()..];
            packets.push(packet);
        }

        return Ok(packets);
    }

    /// Routes `len` decoded samples of every stream to the output channels.
    fn map_channels(&self, out: &mut [Vec<f32>], len: usize) {
        for (index, &source) in self.mapping.sources.iter().enumerate() {
            let (done, rest) = out.split_at_mut(index);
            let plane = &mut rest[0];

            if plane.len() < len {
                plane.resize(len, 0.0);
            }

            match source {
                ChannelSource::Silence => plane[..len].fill(0.0),
                ChannelSource::Stream { stream, channel } => {
                    plane[..len].copy_from_slice(&self.streams[stream].out[channel][..len]);
                }
                ChannelSource::Copy { of } => plane[..len].copy_from_slice(&done[of][..len]),
            }
        }

        if let Some(gain) = self.gain {
            for plane in &mut out[..self.mapping.channel_count()] {
                plane[..len].iter_mut().for_each(|s| *s *= gain);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorPolicy;
    use crate::error::ErrorKind;
    use crate::range::tests::RangeEncoder;
    use crate::silk::{encode_quiet_mono_superframe, quiet_mono_superframe};

    /// A resampler that repeats each input sample and holds back `lag` output samples.
    ///
    /// Emitted samples count up from 1 so that routing can be checked.
    struct LaggingResampler {
        lag: usize,
        rate: Option<u32>,
        ready: usize,
        next: f32,
    }

    impl LaggingResampler {
        fn new(lag: usize) -> Self {
            return LaggingResampler { lag, rate: None, ready: 0, next: 1.0 };
        }

        fn emit(&mut self, output: &mut [&mut [f32]], count: usize) {
            for plane in output.iter_mut() {
                for (i, s) in plane[..count].iter_mut().enumerate() {
                    *s = self.next + i as f32;
                }
            }
            self.next += count as f32;
            self.ready -= count;
        }
    }

    impl Resampler for LaggingResampler {
        fn configure(&mut self, in_rate: u32, _channels: usize) -> Result<()> {
            self.rate = Some(in_rate);
            self.ready = 0;
            return Ok(());
        }

        fn input_rate(&self) -> Option<u32> {
            return self.rate;
        }

        fn convert(&mut self, input: &[&[f32]], output: &mut [&mut [f32]]) -> Result<usize> {
            let ratio = (48_000 / self.rate.unwrap_or(48_000)) as usize;
            self.ready += input[0].len() * ratio;

            let capacity = output.iter().map(|plane| plane.len()).min().unwrap_or(0);
            let count = self.ready.saturating_sub(self.lag).min(capacity);
            self.emit(output, count);
            return Ok(count);
        }

        fn flush(&mut self, output: &mut [&mut [f32]], pending: usize) -> Result<()> {
            self.ready = self.ready.max(pending);
            self.emit(output, pending);
            return Ok(());
        }

        fn reset(&mut self) {
            self.rate = None;
            self.ready = 0;
        }
    }

    /// A SILK-only wideband 20 ms mono packet.
    fn silk_packet() -> Vec<u8> {
        let mut frame = quiet_mono_superframe(16, 20);
        while frame.last() == Some(&0) {
            frame.pop();
        }

        let mut packet = vec![9 << 3];
        packet.extend_from_slice(&frame);
        return packet;
    }

    /// Two mono streams, the first self-delimited.
    fn two_stream_packet(second: &[u8]) -> Vec<u8> {
        let first = silk_packet();

        let mut packet = vec![first[0], (first.len() - 1) as u8];
        packet.extend_from_slice(&first[1..]);
        packet.extend_from_slice(second);
        return packet;
    }

    fn two_mono_streams(sources: Vec<ChannelSource>, gain: Option<f32>, lags: [usize; 2]) -> MultiStreamDecoder<LaggingResampler> {
        let mapping = ChannelMapping { stream_count: 2, coupled_count: 0, sources };
        let mut lags = lags.into_iter();

        return MultiStreamDecoder::new(mapping, gain, DecoderConfig::default(), || {
            LaggingResampler::new(lags.next().unwrap_or(0))
        });
    }

    fn sync_lens<R: Resampler>(dec: &MultiStreamDecoder<R>) -> Vec<usize> {
        return dec.streams.iter().map(|stream| stream.sync.len()).collect();
    }

    #[test]
    fn staggered_streams_converge_after_draining() {
        let sources = vec![
            ChannelSource::Stream { stream: 0, channel: 0 },
            ChannelSource::Stream { stream: 1, channel: 0 },
        ];
        let mut dec = two_mono_streams(sources, None, [0, 240]);
        let mut out = vec![Vec::new(), Vec::new()];

        let packet = two_stream_packet(&silk_packet());

        let mut total = 0;
        for _ in 0..4 {
            let n = dec.decode(Some(&packet), &mut out).unwrap();
            assert!(n <= 960 + dec.pending_samples());
            total += n;
        }

        // The lagging stream holds the others back.
        assert!(sync_lens(&dec)[0] > 0);
        assert_eq!(sync_lens(&dec)[1], 0);

        total += dec.decode(None, &mut out).unwrap();

        assert_eq!(sync_lens(&dec), vec![0, 0]);
        assert_eq!(dec.pending_samples(), 0);
        assert_eq!(total, 4 * 960);

        assert_eq!(dec.decode(None, &mut out).unwrap(), 0);
    }

    #[test]
    fn channels_are_routed_and_scaled() {
        let sources = vec![
            ChannelSource::Stream { stream: 1, channel: 0 },
            ChannelSource::Copy { of: 0 },
            ChannelSource::Silence,
            ChannelSource::Stream { stream: 0, channel: 0 },
        ];
        let mut dec = two_mono_streams(sources, Some(0.5), [0, 0]);
        let mut out = vec![vec![7.0f32; 4]; 4];

        let n = dec.decode(Some(&two_stream_packet(&silk_packet())), &mut out).unwrap();
        assert_eq!(n, 960);

        assert_eq!(out[0][..n], out[1][..n]);
        assert!(out[2][..n].iter().all(|&s| s == 0.0));
        assert_eq!(out[0][0], 0.5);
        assert_eq!(out[3][1], 1.0);
    }

    #[test]
    fn mismatched_stream_durations_are_rejected() {
        let mut ten_ms = quiet_mono_superframe(16, 10);
        while ten_ms.last() == Some(&0) {
            ten_ms.pop();
        }
        let mut second = vec![8 << 3];
        second.extend_from_slice(&ten_ms);

        let sources = vec![ChannelSource::Stream { stream: 0, channel: 0 }];
        let mut dec = two_mono_streams(sources, None, [0, 0]);
        let mut out = vec![Vec::new()];

        let err = dec.decode(Some(&two_stream_packet(&second)), &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn missing_stream_is_rejected() {
        let sources = vec![ChannelSource::Stream { stream: 0, channel: 0 }];
        let mut dec = two_mono_streams(sources, None, [0, 0]);
        let mut out = vec![Vec::new()];

        // Only the self-delimited first stream is present.
        let err = dec.decode(Some(&two_stream_packet(&[])), &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    /// A Hybrid SWB 20 ms packet claiming a redundant frame longer than the packet.
    fn oversized_redundancy_packet() -> Vec<u8> {
        let mut enc = RangeEncoder::new(64);
        encode_quiet_mono_superframe(&mut enc, 16, 20);
        enc.encode_log2(true, 12);
        enc.encode_log2(false, 1);
        enc.encode_uniform(255, 256);

        let mut packet = vec![13 << 3];
        packet.extend_from_slice(&enc.finish());
        return packet;
    }

    #[test]
    fn failed_stream_resets_every_stream() {
        let mapping = ChannelMapping {
            stream_count: 2,
            coupled_count: 0,
            sources: vec![
                ChannelSource::Stream { stream: 0, channel: 0 },
                ChannelSource::Stream { stream: 1, channel: 0 },
            ],
        };
        let strict = DecoderConfig { error_policy: ErrorPolicy::Strict, ..Default::default() };
        let mut lags = [0, 240].into_iter();
        let mut dec = MultiStreamDecoder::new(mapping, None, strict, || LaggingResampler::new(lags.next().unwrap_or(0)));
        let mut out = vec![Vec::new(), Vec::new()];

        let good = two_stream_packet(&silk_packet());
        let first = dec.decode(Some(&good), &mut out).unwrap();
        assert!(sync_lens(&dec)[0] > 0);

        // The first stream decodes and drains its sync buffer before the second one fails.
        let err = dec.decode(Some(&two_stream_packet(&oversized_redundancy_packet())), &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(sync_lens(&dec), vec![0, 0]);
        assert_eq!(dec.pending_samples(), 0);

        // Decoding resumes in step, as from the start of the stream.
        assert_eq!(dec.decode(Some(&good), &mut out).unwrap(), first);
    }

    #[test]
    fn reset_clears_sync_buffers() {
        let sources = vec![ChannelSource::Stream { stream: 0, channel: 0 }];
        let mut dec = two_mono_streams(sources, None, [0, 480]);
        let mut out = vec![Vec::new()];

        dec.decode(Some(&two_stream_packet(&silk_packet())), &mut out).unwrap();
        assert!(dec.pending_samples() > 0);

        dec.reset();
        assert_eq!(dec.pending_samples(), 0);
        assert_eq!(dec.decode(None, &mut out).unwrap(), 0);
    }
}
