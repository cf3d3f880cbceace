//! The Symphonia decoder for Opus.

use log::{debug, error};
use symphonia_core::audio::{AsAudioBufferRef, AudioBuffer, AudioBufferRef, Channels, Signal, SignalSpec};
use symphonia_core::codecs::{
    CodecDescriptor, CodecParameters, Decoder, DecoderOptions, FinalizeResult, CODEC_TYPE_OPUS,
};
use symphonia_core::errors::{unsupported_error, Result};
use symphonia_core::formats::Packet;
use symphonia_core::support_codec;

use crate::config::DecoderConfig;
use crate::error::Error;
use crate::header::{ChannelMapping, OpusHead};
use crate::packet::MAX_PACKET_SAMPLES;
use crate::resampler::{SincResampler, OUTPUT_RATE};
use crate::stream::MultiStreamDecoder;

/// Opus decoder.
///
/// Decodes Opus packets, including multistream packets described by an `OpusHead`
/// identification header in the codec extra data, into planar 48 kHz audio. Without extra data
/// the stream is assumed to be a single mono or stereo elementary stream.
pub struct OpusDecoder {
    params: CodecParameters,
    streams: MultiStreamDecoder<SincResampler>,
    planes: Vec<Vec<f32>>,
    buf: AudioBuffer<f32>,
}

impl OpusDecoder {
    fn try_new_inner(params: &CodecParameters, options: &DecoderOptions) -> crate::error::Result<Self> {
        let config = DecoderConfig::from_options(options);

        let (mapping, gain, channels, pre_skip) = match params.extra_data.as_deref() {
            Some(extra_data) => {
                let head = OpusHead::from_bytes(extra_data)?;

                let channels = head
                    .channels()
                    .ok_or(Error::Unsupported("opus: no channel layout for the channel mapping"))?;

                let gain = if config.apply_output_gain && head.output_gain != 0 {
                    Some(head.gain_factor())
                }
                else {
                    None
                };

                (head.mapping, gain, channels, Some(u32::from(head.pre_skip)))
            }
            None => {
                // Stereo output covers both mono and stereo packets.
                let channels = params.channels.unwrap_or(Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
                let mapping = ChannelMapping::implicit(channels.count())?;

                debug!("opus: no identification header, assuming {} channel(s)", channels.count());

                (mapping, None, channels, None)
            }
        };

        let mut params = params.clone();
        params
            .with_sample_rate(OUTPUT_RATE)
            .with_channels(channels)
            .with_max_frames_per_packet(MAX_PACKET_SAMPLES as u64);

        if params.delay.is_none() {
            if let Some(pre_skip) = pre_skip {
                params.with_delay(pre_skip);
            }
        }

        let planes = vec![Vec::new(); mapping.channel_count()];
        let streams = MultiStreamDecoder::new(mapping, gain, config, SincResampler::new);

        let spec = SignalSpec::new(OUTPUT_RATE, channels);
        let buf = AudioBuffer::new(2 * MAX_PACKET_SAMPLES as u64, spec);

        return Ok(OpusDecoder { params, streams, planes, buf });
    }

    fn decode_inner(&mut self, packet: Option<&[u8]>) -> crate::error::Result<()> {
        let n = self.streams.decode(packet, &mut self.planes)?;

        self.buf.clear();

        if self.buf.capacity() < n {
            self.buf = AudioBuffer::new(n as u64, *self.buf.spec());
        }

        self.buf.render_reserved(Some(n));

        for (ch, plane) in self.planes.iter().enumerate() {
            self.buf.chan_mut(ch).copy_from_slice(&plane[..n]);
        }

        return Ok(());
    }

    fn finish(&mut self, packet: Option<&[u8]>) -> Result<AudioBufferRef<'_>> {
        if let Err(err) = self.decode_inner(packet) {
            error!("opus: packet not decoded: {}", err);
            self.buf.clear();
            return Err(err.into());
        }

        return Ok(self.buf.as_audio_buffer_ref());
    }

    /// Returns the samples still owed after the last packet, as if decoding an empty packet.
    pub fn drain(&mut self) -> Result<AudioBufferRef<'_>> {
        return self.finish(None);
    }
}

impl Decoder for OpusDecoder {
    fn try_new(params: &CodecParameters, options: &DecoderOptions) -> Result<Self> {
        if params.codec != CODEC_TYPE_OPUS {
            return unsupported_error("opus: invalid codec type");
        }

        return Ok(Self::try_new_inner(params, options)?);
    }

    fn supported_codecs() -> &'static [CodecDescriptor] {
        return &[support_codec!(CODEC_TYPE_OPUS, "opus", "Opus")];
    }

    fn reset(&mut self) {
        self.streams.reset();
        self.buf.clear();
    }

    fn codec_params(&self) -> &CodecParameters {
        return &self.params;
    }

    /// Decodes one packet. An empty packet drains the samples still owed.
    fn decode(&mut self, packet: &Packet) -> Result<AudioBufferRef<'_>> {
        let data = packet.buf();
        return self.finish(if data.is_empty() { None } else { Some(data) });
    }

    fn finalize(&mut self) -> FinalizeResult {
        return Default::default();
    }

    fn last_decoded(&self) -> AudioBufferRef<'_> {
        return self.buf.as_audio_buffer_ref();
    }
}
