//! The Ogg demuxer hands the raw identification header to the decoder as codec extra data. The
//! decoder needs three things from it the demuxer does not interpret: the output gain, the channel
//! mapping family and the channel mapping table that spreads the streams of a multistream packet
//! over the output channels.
//!
//! Opus header parsing implementation.
//!
//! This module parses the Opus identification header as specified in RFC 7845.
//!
//! References:
//! - RFC 7845: Ogg Encapsulation for the Opus Audio Codec (https://tools.ietf.org/html/rfc7845)
//! - RFC 6716: Definition of the Opus Audio Codec (https://tools.ietf.org/html/rfc6716)
//!
//! Packet Organization of opus stream
//! ```text
//!
//!         Page 0         Pages 1 ... n        Pages (n+1) ...
//!      +------------+ +---+ +---+ ... +---+ +-----------+ +---------+ +--
//!      |            | |   | |   |     |   | |           | |         | |
//!      |+----------+| |+-----------------+| |+-------------------+ +-----
//!      |||ID Header|| ||  Comment Header || ||Audio Data Packet 1| | ...
//!      |+----------+| |+-----------------+| |+-------------------+ +-----
//!      |            | |   | |   |     |   | |           | |         | |
//!      +------------+ +---+ +---+ ... +---+ +-----------+ +---------+ +--
//!      ^      ^                           ^
//!      |      |                           |
//!      |      |                           Mandatory Page Break
//!      |      |
//!      |      ID header is contained on a single page
//!      |
//!      'Beginning Of Stream'
//!
//!     Figure 1: Example Packet Organization for a Logical Ogg Opus Stream
//!```
//!
//! https://datatracker.ietf.org/doc/html/rfc7845#section-3

use std::convert::TryFrom;

use log::debug;
use symphonia_core::audio::Channels;
use symphonia_core::io::{BufReader, ReadBytes};
use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during Opus header parsing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid magic signature")]
    InvalidMagicSignature,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(u8),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannelCount(u8),

    #[error("Unsupported channel mapping family: {0}")]
    UnsupportedMappingFamily(u8),

    #[error("Invalid stream count: {0}")]
    InvalidStreamCount(u8),

    #[error("Invalid coupled count: {0}")]
    InvalidCoupledCount(u8),

    #[error("Invalid channel mapping")]
    InvalidChannelMapping,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        return match self {
            Error::UnsupportedVersion(_)
            | Error::UnsupportedChannelCount(_)
            | Error::UnsupportedMappingFamily(_) => ErrorKind::Unsupported,
            _ => ErrorKind::InvalidData,
        };
    }

    pub(crate) fn describe(&self) -> &'static str {
        return match self {
            Error::InvalidMagicSignature => "opus: missing OpusHead signature",
            Error::UnsupportedVersion(_) => "opus: unsupported header version",
            Error::InvalidChannelCount(_) => "opus: invalid channel count",
            Error::UnsupportedChannelCount(_) => "opus: unsupported channel count",
            Error::UnsupportedMappingFamily(_) => "opus: unsupported channel mapping family",
            Error::InvalidStreamCount(_) => "opus: invalid stream count",
            Error::InvalidCoupledCount(_) => "opus: invalid coupled stream count",
            Error::InvalidChannelMapping => "opus: invalid channel mapping table",
            Error::Io(_) => "opus: truncated identification header",
        };
    }
}

/// Identification Header
///```text
///       0                   1                   2                   3
///       0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///      |      'O'      |      'p'      |      'u'      |      's'      |
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///      |      'H'      |      'e'      |      'a'      |      'd'      |
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///      |  Version = 1  | Channel Count |           Pre-skip            |
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///      |                     Input Sample Rate (Hz)                    |
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///      |   Output Gain (Q7.8 in dB)    | Mapping Family|               |
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               :
///      |                                                               |
///      :               Optional Channel Mapping Table...               :
///      |                                                               |
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///
///                         Figure 2: ID Header Packet
///```
///
/// https://datatracker.ietf.org/doc/html/rfc7845#section-5.1
#[derive(Debug, Clone, PartialEq)]
pub struct OpusHead {
    pub version: u8,
    pub channel_count: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub mapping_family: ChannelMappingFamily,
    pub mapping: ChannelMapping,
}

impl OpusHead {
    const MAGIC_SIGNATURE: &'static [u8] = b"OpusHead";

    /// Parse an identification header held in codec extra data.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        return Self::parse(BufReader::new(buf));
    }

    /// Parse Opus identification header from a byte stream.
    pub fn parse<R: ReadBytes>(mut reader: R) -> Result<Self, Error> {
        Self::parse_magic_signature(&mut reader)?;
        let version = Self::parse_version(&mut reader)?;
        let channel_count = Self::parse_channel_count(&mut reader)?;
        let pre_skip = reader.read_u16()?;
        let input_sample_rate = reader.read_u32()?;
        let output_gain = reader.read_i16()?;
        let mapping_family = ChannelMappingFamily::from(reader.read_u8()?);
        let mapping = ChannelMapping::parse(&mut reader, channel_count, mapping_family)?;

        debug!(
            "opus head: version={} channels={} pre_skip={} gain={} family={:?} streams={} coupled={}",
            version,
            channel_count,
            pre_skip,
            output_gain,
            mapping_family,
            mapping.stream_count,
            mapping.coupled_count
        );

        return Ok(Self {
            version,
            channel_count,
            pre_skip,
            input_sample_rate,
            output_gain,
            mapping_family,
            mapping,
        });
    }

    /// Linear output gain, `10^(gain / (20 * 256))`.
    pub fn gain_factor(&self) -> f32 {
        return 10f32.powf(f32::from(self.output_gain) / (20.0 * 256.0));
    }

    /// The Symphonia channel layout of the decoded output.
    pub fn channels(&self) -> Option<Channels> {
        return layout(self.mapping_family, self.channel_count);
    }

    fn parse_magic_signature<R: ReadBytes>(reader: &mut R) -> Result<(), Error> {
        let mut magic = [0u8; Self::MAGIC_SIGNATURE.len()];
        reader.read_buf_exact(&mut magic)?;
        if magic != Self::MAGIC_SIGNATURE {
            return Err(Error::InvalidMagicSignature);
        }

        return Ok(());
    }

    /// The upper four bits carry the major version. Only major version 0 is defined.
    fn parse_version<R: ReadBytes>(reader: &mut R) -> Result<u8, Error> {
        let version = reader.read_u8()?;
        if version > 15 {
            return Err(Error::UnsupportedVersion(version));
        }

        return Ok(version);
    }

    fn parse_channel_count<R: ReadBytes>(reader: &mut R) -> Result<u8, Error> {
        let channel_count = reader.read_u8()?;
        if channel_count == 0 {
            return Err(Error::InvalidChannelCount(channel_count));
        }

        return Ok(channel_count);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMappingFamily {
    /// Family 0: Mono or stereo (1 or 2 channels).
    Rtp,
    /// Family 1: Vorbis mapping (1-8 channels with Vorbis channel order).
    Vorbis,
    /// Reserved values for future use (2-254).
    Reserved(u8),
    /// Family 255: Reserved for undefined mappings (unidentified channels).
    Undefined,
}

impl From<u8> for ChannelMappingFamily {
    fn from(value: u8) -> Self {
        return match value {
            0 => Self::Rtp,
            1 => Self::Vorbis,
            255 => Self::Undefined,
            _ => Self::Reserved(value),
        };
    }
}

/// Output channel `i` of a Vorbis ordered stream takes coded channel `VORBIS_ORDER[n - 1][i]`.
const VORBIS_ORDER: [[u8; 8]; 8] = [
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 2, 1, 0, 0, 0, 0, 0],
    [0, 1, 2, 3, 0, 0, 0, 0],
    [0, 2, 1, 3, 4, 0, 0, 0],
    [0, 2, 1, 5, 3, 4, 0, 0],
    [0, 2, 1, 6, 5, 3, 4, 0],
    [0, 2, 1, 7, 5, 6, 3, 4],
];

fn layout(family: ChannelMappingFamily, channel_count: u8) -> Option<Channels> {
    const FL: Channels = Channels::FRONT_LEFT;
    const FR: Channels = Channels::FRONT_RIGHT;
    const FC: Channels = Channels::FRONT_CENTRE;
    const LFE: Channels = Channels::LFE1;
    const RL: Channels = Channels::REAR_LEFT;
    const RR: Channels = Channels::REAR_RIGHT;

    return match (family, channel_count) {
        (_, 1) => Some(FL),
        (ChannelMappingFamily::Rtp | ChannelMappingFamily::Vorbis, 2) => Some(FL | FR),
        (ChannelMappingFamily::Vorbis, 3) => Some(FL | FR | FC),
        (ChannelMappingFamily::Vorbis, 4) => Some(FL | FR | RL | RR),
        (ChannelMappingFamily::Vorbis, 5) => Some(FL | FR | FC | RL | RR),
        (ChannelMappingFamily::Vorbis, 6) => Some(FL | FR | FC | LFE | RL | RR),
        (ChannelMappingFamily::Vorbis, 7) => Some(
            FL | FR | FC | LFE | Channels::REAR_CENTRE | Channels::SIDE_LEFT | Channels::SIDE_RIGHT,
        ),
        (ChannelMappingFamily::Vorbis, 8) => {
            Some(FL | FR | FC | LFE | RL | RR | Channels::SIDE_LEFT | Channels::SIDE_RIGHT)
        }
        (ChannelMappingFamily::Undefined, n) if n <= 26 => {
            Some(Channels::from_bits_truncate((1u32 << n) - 1))
        }
        _ => None,
    };
}

/// Where an output channel's samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSource {
    /// The channel is silent.
    Silence,
    /// Decoded channel `channel` (0 or 1) of stream `stream`.
    Stream { stream: usize, channel: usize },
    /// A duplicate of an earlier output channel carrying the same coded channel.
    Copy { of: usize },
}

/// Channel Mapping
///```text
///    An Ogg Opus stream allows mapping one number of Opus streams (N) to a
///    possibly larger number of decoded channels (M + N) to yet another
///    number of output channels (C), which might be larger or smaller than
///    the number of decoded channels.  The order and meaning of these
///    channels are defined by a channel mapping, which consists of the
///    'channel mapping family' octet and, for channel mapping families
///    other than family 0, a 'channel mapping table', as illustrated
///    in Figure 3.
///
///       0                   1                   2                   3
///       0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///                                                      +-+-+-+-+-+-+-+-+
///                                                      | Stream Count  |
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///      | Coupled Count |              Channel Mapping...               :
///      +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///
///                       Figure 3: Channel Mapping Table
///```
///
///https://datatracker.ietf.org/doc/html/rfc7845#section-5.1.1
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMapping {
    pub stream_count: usize,
    pub coupled_count: usize,
    /// One entry per output channel, in output order.
    pub sources: Vec<ChannelSource>,
}

impl ChannelMapping {
    /// The implicit family 0 mapping: one stream, coupled when stereo.
    pub fn rtp(channel_count: u8) -> Result<Self, Error> {
        let sources = match channel_count {
            1 => vec![ChannelSource::Stream { stream: 0, channel: 0 }],
            2 => vec![
                ChannelSource::Stream { stream: 0, channel: 0 },
                ChannelSource::Stream { stream: 0, channel: 1 },
            ],
            n => return Err(Error::InvalidChannelCount(n)),
        };

        return Ok(Self { stream_count: 1, coupled_count: usize::from(channel_count - 1), sources });
    }

    /// The mapping assumed when a stream carries no identification header.
    pub fn implicit(channel_count: usize) -> Result<Self, Error> {
        return match u8::try_from(channel_count) {
            Ok(n @ 1..=2) => Self::rtp(n),
            Ok(0) => Err(Error::InvalidChannelCount(0)),
            Ok(n) => Err(Error::UnsupportedChannelCount(n)),
            Err(_) => Err(Error::UnsupportedChannelCount(u8::MAX)),
        };
    }

    pub fn parse<R: ReadBytes>(
        reader: &mut R,
        channel_count: u8,
        family: ChannelMappingFamily,
    ) -> Result<Self, Error> {
        return match family {
            ChannelMappingFamily::Rtp => Self::rtp(channel_count),
            ChannelMappingFamily::Vorbis if channel_count > 8 => {
                Err(Error::UnsupportedChannelCount(channel_count))
            }
            ChannelMappingFamily::Vorbis | ChannelMappingFamily::Undefined => {
                Self::parse_table(reader, channel_count, family == ChannelMappingFamily::Vorbis)
            }
            ChannelMappingFamily::Reserved(value) => Err(Error::UnsupportedMappingFamily(value)),
        };
    }

    fn parse_table<R: ReadBytes>(
        reader: &mut R,
        channel_count: u8,
        vorbis_order: bool,
    ) -> Result<Self, Error> {
        let stream_count = reader.read_u8()?;
        if stream_count == 0 {
            return Err(Error::InvalidStreamCount(stream_count));
        }

        let coupled_count = reader.read_u8()?;
        if coupled_count > stream_count || usize::from(stream_count) + usize::from(coupled_count) > 255
        {
            return Err(Error::InvalidCoupledCount(coupled_count));
        }

        let mut table = vec![0u8; usize::from(channel_count)];
        reader.read_buf_exact(&mut table)?;

        let coded_channels = usize::from(stream_count) + usize::from(coupled_count);

        if table.iter().any(|&index| index != 255 && usize::from(index) >= coded_channels) {
            return Err(Error::InvalidChannelMapping);
        }

        let channels = usize::from(channel_count);

        let coded_index = |output: usize| -> u8 {
            let position = if vorbis_order {
                usize::from(VORBIS_ORDER[channels - 1][output])
            }
            else {
                output
            };
            table[position]
        };

        let mut sources = Vec::with_capacity(channels);

        for output in 0..channels {
            let index = coded_index(output);

            let source = if index == 255 {
                ChannelSource::Silence
            }
            else if let Some(first) = (0..output).find(|&prev| coded_index(prev) == index) {
                ChannelSource::Copy { of: first }
            }
            else {
                Self::source_of(index, coupled_count)
            };

            sources.push(source);
        }

        return Ok(Self {
            stream_count: usize::from(stream_count),
            coupled_count: usize::from(coupled_count),
            sources,
        });
    }

    /// Coupled streams come first and carry two coded channels each.
    fn source_of(index: u8, coupled_count: u8) -> ChannelSource {
        let (index, coupled_count) = (usize::from(index), usize::from(coupled_count));

        if index < 2 * coupled_count {
            return ChannelSource::Stream { stream: index / 2, channel: index & 1 };
        }

        return ChannelSource::Stream { stream: index - coupled_count, channel: 0 };
    }

    /// Number of decoded channels carried by stream `stream`.
    pub fn stream_channels(&self, stream: usize) -> usize {
        return if stream < self.coupled_count { 2 } else { 1 };
    }

    pub fn channel_count(&self) -> usize {
        return self.sources.len();
    }
}
