//! Opus packet parsing implementation.
//!
//! This module splits an Opus packet into its compressed frames as specified in RFC 6716 section 3,
//! including the self-delimiting variant from appendix B that is used for all but the last stream
//! of a multistream packet.
//!
//! References:
//! - RFC 6716: Definition of the Opus Audio Codec (https://tools.ietf.org/html/rfc6716)
use crate::toc::{FrameCount, Toc};
use log::debug;
use std::ops::Range;
use symphonia_core::io::{BitReaderLtr, ReadBitsLtr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Packet is too short")]
    PacketTooShort,

    #[error("Invalid packet length")]
    InvalidCode1PacketLength,

    #[error("First frame length exceeds available data")]
    FirstFrameLengthExceedsData,

    #[error("Number of frames can't be zero")]
    ZeroFrameCount,

    #[error("Insufficient data after accounting for padding")]
    InsufficientDataAfterPadding,

    #[error("Frame length exceeds data size")]
    FrameLengthExceedsDataSize,

    #[error("Invalid frame length for CBR")]
    InvalidCbrFrameLength,

    #[error("Insufficient data for frame length")]
    InsufficientDataForFrameLength,

    #[error("Insufficient data for extended frame length")]
    InsufficientDataForExtendedFrameLength,

    #[error("Total audio duration exceeds 120 ms")]
    ExcessiveTotalDuration,

    #[error("Frame length exceeds maximum allowed size")]
    FrameLengthExceedsMaximum,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOC error: {0}")]
    Toc(#[from] crate::toc::Error),
}

impl Error {
    pub(crate) fn describe(&self) -> &'static str {
        return match self {
            Error::PacketTooShort => "opus: packet is too short",
            Error::InvalidCode1PacketLength => "opus: odd length for a code 1 packet",
            Error::FirstFrameLengthExceedsData => "opus: first frame length exceeds packet",
            Error::ZeroFrameCount => "opus: zero frame count",
            Error::InsufficientDataAfterPadding => "opus: padding exceeds packet",
            Error::FrameLengthExceedsDataSize => "opus: frame length exceeds packet",
            Error::InvalidCbrFrameLength => "opus: cbr packet not divisible by frame count",
            Error::InsufficientDataForFrameLength => "opus: truncated frame length",
            Error::InsufficientDataForExtendedFrameLength => "opus: truncated extended frame length",
            Error::ExcessiveTotalDuration => "opus: packet duration exceeds 120 ms",
            Error::FrameLengthExceedsMaximum => "opus: frame exceeds 1275 bytes",
            Error::Io(_) => "opus: truncated packet",
            Error::Toc(_) => "opus: invalid toc byte",
        };
    }
}

/// Largest compressed frame allowed in a packet, in bytes.
pub const MAX_FRAME_LENGTH: usize = 1275;

/// Largest packet duration in samples at 48 kHz (120 ms).
pub const MAX_PACKET_SAMPLES: usize = 5760;

const MAX_FRAME_COUNT: usize = 48;

/// Packet Organization
/// ```text
///      0                   1                   2                   3
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     | config  |s|1|1|1|p|     M     | Padding length (Optional)     :
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     : N1 (1-2 bytes): N2 (1-2 bytes):     ...       :     N[M-1]    |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     :               Compressed frame 1 (N1 bytes)...                :
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |                                                               |
///     :               Compressed frame M...                           :
///     |                                                               |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     :                  Opus Padding (Optional)...                   |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///
///           Figure 7: A VBR Code 3 Packet
///```
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.5
#[derive(Debug, Clone)]
pub struct FramePacket<'a> {
    /// Table of Contents (TOC) byte
    /// ```text
    ///  0 1 2 3 4 5 6 7
    /// +-+-+-+-+-+-+-+-+
    /// | config  |s| c |
    /// +-+-+-+-+-+-+-+-+
    ///
    ///                Figure 2: The TOC byte
    ///```
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-3.1
    pub(crate) toc: Toc,
    buf: &'a [u8],
    frames: Vec<Range<usize>>,
    padding: usize,
    packet_size: usize,
}

impl<'a> FramePacket<'a> {
    /// Parse an undelimited packet occupying all of `buf`.
    pub fn new(buf: &'a [u8]) -> Result<Self, Error> {
        return Self::parse(buf, false);
    }

    /// Parse a packet. A self-delimited packet carries one extra frame length and may be followed
    /// by further data in `buf`; `packet_size()` reports where it ends.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#appendix-B
    pub fn parse(buf: &'a [u8], self_delimited: bool) -> Result<Self, Error> {
        let (&toc_byte, _) = buf.split_first().ok_or(Error::PacketTooShort)?;
        let toc = Toc::new(toc_byte)?;

        let mut reader = Cursor { buf, pos: 1, end: buf.len() };

        let (frames, padding) = match toc.frame_count() {
            FrameCount::One => (Self::one(&mut reader, self_delimited)?, 0),
            FrameCount::TwoEqual => (Self::two_equal_frames(&mut reader, self_delimited)?, 0),
            FrameCount::TwoDifferent => {
                (Self::two_different_frames(&mut reader, self_delimited)?, 0)
            }
            FrameCount::Arbitrary => {
                Self::signaled_number_of_frames(&mut reader, &toc, self_delimited)?
            }
        };

        for frame in &frames {
            Self::check_frame_size(frame.len())?;
        }

        let data_end = frames.last().map_or(reader.pos, |frame| frame.end);
        let packet_size = data_end + padding;

        if packet_size > buf.len() {
            return Err(Error::InsufficientDataAfterPadding);
        }

        debug!(
            "opus packet: config={} code={:?} frames={} padding={} size={}",
            toc.config(),
            toc.frame_count(),
            frames.len(),
            padding,
            packet_size
        );

        return Ok(Self { toc, buf, frames, padding, packet_size });
    }

    /// Parse a Code 0 packet (single frame).
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.2
    fn one(reader: &mut Cursor<'_>, self_delimited: bool) -> Result<Vec<Range<usize>>, Error> {
        let size = if self_delimited { reader.frame_length()? } else { reader.remaining() };

        return Ok(vec![reader.take(size)?]);
    }

    /// Parse a Code 1 packet (two frames with equal compressed size).
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.3
    fn two_equal_frames(
        reader: &mut Cursor<'_>,
        self_delimited: bool,
    ) -> Result<Vec<Range<usize>>, Error> {
        let size = if self_delimited {
            reader.frame_length()?
        }
        else {
            let remaining = reader.remaining();

            if remaining % 2 != 0 {
                return Err(Error::InvalidCode1PacketLength);
            }

            remaining / 2
        };

        return Ok(vec![reader.take(size)?, reader.take(size)?]);
    }

    /// Parse a Code 2 packet (two frames with different compressed sizes).
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.4
    fn two_different_frames(
        reader: &mut Cursor<'_>,
        self_delimited: bool,
    ) -> Result<Vec<Range<usize>>, Error> {
        let n1 = reader.frame_length()?;

        let n2 = if self_delimited {
            reader.frame_length()?
        }
        else {
            reader.remaining().checked_sub(n1).ok_or(Error::FirstFrameLengthExceedsData)?
        };

        let frame_1 = reader.take(n1).map_err(|_| Error::FirstFrameLengthExceedsData)?;
        let frame_2 = reader.take(n2)?;

        return Ok(vec![frame_1, frame_2]);
    }

    /// Parse a Code 3 packet (an arbitrary number of frames).
    ///
    /// This method handles both CBR and VBR modes, as well as padding. Padding bytes trail the last
    /// frame.
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.5
    fn signaled_number_of_frames(
        reader: &mut Cursor<'_>,
        toc: &Toc,
        self_delimited: bool,
    ) -> Result<(Vec<Range<usize>>, usize), Error> {
        let frame_count_byte = reader.byte().ok_or(Error::PacketTooShort)?;

        let buf = [frame_count_byte];
        let mut bits = BitReaderLtr::new(&buf);

        let vbr = bits.read_bool()?;
        let padding_flag = bits.read_bool()?;
        let frame_count = bits.read_bits_leq32(6)? as usize;

        if frame_count == 0 {
            return Err(Error::ZeroFrameCount);
        }

        if frame_count > MAX_FRAME_COUNT || frame_count * toc.frame_samples() > MAX_PACKET_SAMPLES {
            return Err(Error::ExcessiveTotalDuration);
        }

        let padding = if padding_flag { reader.padding_length()? } else { 0 };

        // Padding occupies the tail of an undelimited packet.
        if !self_delimited {
            let end = reader.end.checked_sub(padding).ok_or(Error::InsufficientDataAfterPadding)?;

            if end < reader.pos {
                return Err(Error::InsufficientDataAfterPadding);
            }

            reader.end = end;
        }

        let mut frames = Vec::with_capacity(frame_count);

        if vbr {
            let mut sizes = Vec::with_capacity(frame_count);

            for _ in 0..frame_count - 1 {
                sizes.push(reader.frame_length()?);
            }

            let last = if self_delimited {
                reader.frame_length()?
            }
            else {
                let coded: usize = sizes.iter().sum();
                reader.remaining().checked_sub(coded).ok_or(Error::FrameLengthExceedsDataSize)?
            };

            sizes.push(last);

            for size in sizes {
                frames.push(reader.take(size)?);
            }
        }
        else {
            let size = if self_delimited {
                reader.frame_length()?
            }
            else {
                let remaining = reader.remaining();

                if remaining % frame_count != 0 {
                    return Err(Error::InvalidCbrFrameLength);
                }

                remaining / frame_count
            };

            for _ in 0..frame_count {
                frames.push(reader.take(size)?);
            }
        }

        return Ok((frames, padding));
    }

    fn check_frame_size(size: usize) -> Result<(), Error> {
        if size > MAX_FRAME_LENGTH {
            return Err(Error::FrameLengthExceedsMaximum);
        }
        return Ok(());
    }

    pub fn toc(&self) -> Toc {
        return self.toc;
    }

    pub fn frame_count(&self) -> usize {
        return self.frames.len();
    }

    /// The compressed frames, in decoding order.
    pub fn frames(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        let buf = self.buf;
        return self.frames.iter().map(move |range| &buf[range.clone()]);
    }

    /// Byte range of each frame within the packet buffer.
    pub fn frame_ranges(&self) -> &[Range<usize>] {
        return &self.frames;
    }

    /// Number of padding bytes following the last frame.
    pub fn padding(&self) -> usize {
        return self.padding;
    }

    /// Number of bytes of the input buffer occupied by this packet.
    pub fn packet_size(&self) -> usize {
        return self.packet_size;
    }

    /// Total duration of the packet in samples at 48 kHz.
    pub fn duration(&self) -> usize {
        return self.frames.len() * self.toc.frame_samples();
    }
}

/// Total duration of an undelimited packet in samples at 48 kHz, read from the TOC byte and the
/// frame count byte only.
pub fn packet_duration(buf: &[u8]) -> Result<usize, Error> {
    let (&toc_byte, rest) = buf.split_first().ok_or(Error::PacketTooShort)?;
    let toc = Toc::new(toc_byte)?;

    let frame_count = match toc.frame_count() {
        FrameCount::One => 1,
        FrameCount::TwoEqual | FrameCount::TwoDifferent => 2,
        FrameCount::Arbitrary => {
            let &byte = rest.first().ok_or(Error::PacketTooShort)?;
            (byte & 0x3F) as usize
        }
    };

    let duration = frame_count * toc.frame_samples();

    if duration > MAX_PACKET_SAMPLES {
        return Err(Error::ExcessiveTotalDuration);
    }

    return Ok(duration);
}

/// A forward reader over the packet bytes with a movable data end.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
}

impl Cursor<'_> {
    fn byte(&mut self) -> Option<u8> {
        if self.pos >= self.end {
            return None;
        }

        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        return Some(byte);
    }

    fn remaining(&self) -> usize {
        return self.end.saturating_sub(self.pos);
    }

    /// Claim the next `size` bytes as a frame.
    fn take(&mut self, size: usize) -> Result<Range<usize>, Error> {
        if size > self.remaining() {
            return Err(Error::FrameLengthExceedsDataSize);
        }

        let range = self.pos..self.pos + size;
        self.pos += size;
        return Ok(range);
    }

    /// Frame length coding
    /// ```text
    /// 0: No frame (DTX or lost packet)
    /// 1...251: Length of the frame in bytes
    /// 252...255: A second byte is needed. The total length is (second_byte*4)+first_byte
    ///```
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.1
    fn frame_length(&mut self) -> Result<usize, Error> {
        let first = self.byte().ok_or(Error::InsufficientDataForFrameLength)? as usize;

        if first < 252 {
            return Ok(first);
        }

        let second = self.byte().ok_or(Error::InsufficientDataForExtendedFrameLength)? as usize;

        return Ok(first + 4 * second);
    }

    /// Padding
    /// ```text
    /// Values from 0...254 indicate that 0...254 bytes of padding are included,
    /// in addition to the bytes used to indicate the size of the padding.
    /// If the value is 255, then the size of the additional padding is 254 bytes,
    /// plus the padding value encoded in the next byte.
    ///```
    ///
    /// https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.5
    fn padding_length(&mut self) -> Result<usize, Error> {
        let mut padding = 0;

        loop {
            let byte = self.byte().ok_or(Error::InsufficientDataAfterPadding)?;

            if byte == 255 {
                padding += 254;
            }
            else {
                padding += byte as usize;
                return Ok(padding);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Packet {
        toc_byte: u8,
        vbr: bool,
        self_delimited: bool,
        frame_count: Option<u8>,
        padding_length: Option<usize>,
        frames: Vec<Vec<u8>>,
    }

    fn lacing(len: usize) -> Vec<u8> {
        if len < 252 {
            return vec![len as u8];
        }
        let first = 252 + ((len - 252) & 3);
        return vec![first as u8, ((len - first) / 4) as u8];
    }

    impl Packet {
        fn new(toc_byte: u8) -> Self {
            return Self {
                toc_byte,
                vbr: false,
                self_delimited: false,
                frame_count: None,
                padding_length: None,
                frames: Vec::new(),
            };
        }

        fn vbr(mut self, vbr: bool) -> Self {
            self.vbr = vbr;
            return self;
        }

        fn self_delimited(mut self) -> Self {
            self.self_delimited = true;
            return self;
        }

        fn frame_count(mut self, frame_count: u8) -> Self {
            self.frame_count = Some(frame_count);
            return self;
        }

        fn padding(mut self, padding_length: usize) -> Self {
            self.padding_length = Some(padding_length);
            return self;
        }

        fn add_frame(mut self, frame: &[u8]) -> Self {
            self.frames.push(frame.to_vec());
            return self;
        }

        fn build(self) -> Vec<u8> {
            let code = self.toc_byte & 0x3;
            let mut data = vec![self.toc_byte];

            if let Some(frame_count) = self.frame_count {
                let mut frame_count_byte = frame_count & 0b0011_1111;
                if self.vbr {
                    frame_count_byte |= 0b1000_0000;
                }
                if self.padding_length.is_some() {
                    frame_count_byte |= 0b0100_0000;
                }
                data.push(frame_count_byte);
            }

            if let Some(mut remaining) = self.padding_length {
                while remaining > 254 {
                    data.push(255);
                    remaining -= 254;
                }
                data.push(remaining as u8);
            }

            let last = self.frames.len().saturating_sub(1);

            // Explicit lengths: code 2 and VBR code 3 code every frame but the last.
            if code == 2 || (code == 3 && self.vbr) {
                for frame in &self.frames[..last] {
                    data.extend(lacing(frame.len()));
                }
            }

            if self.self_delimited {
                data.extend(lacing(self.frames[last].len()));
            }

            for frame in &self.frames {
                data.extend(frame);
            }

            data.extend(vec![0u8; self.padding_length.unwrap_or(0)]);

            return data;
        }
    }

    fn frames_of<'a>(packet: &FramePacket<'a>) -> Vec<&'a [u8]> {
        return packet.frames().collect();
    }

    #[test]
    fn single_frame_packet() {
        let frame_data = [0xAA, 0xBB, 0xCC];

        let packet_data = Packet::new(0b0000_0000).add_frame(&frame_data).build();

        let packet = FramePacket::new(&packet_data).expect("Failed to parse single-frame packet");

        assert_eq!(frames_of(&packet), vec![&frame_data[..]]);
        assert_eq!(packet.padding(), 0);
        assert_eq!(packet.duration(), 480);
    }

    #[test]
    fn empty_frame_is_dtx() {
        let packet = FramePacket::new(&[0b0000_1000]).unwrap();
        assert_eq!(packet.frame_count(), 1);
        assert!(frames_of(&packet)[0].is_empty());
    }

    #[test]
    fn two_equal_frames_packet() {
        let packet_data = Packet::new(0b0000_0001).add_frame(&[0xAA, 0xBB]).add_frame(&[0xCC, 0xDD]).build();

        let packet = FramePacket::new(&packet_data).expect("Failed to parse two equal frames packet");

        assert_eq!(frames_of(&packet), vec![&[0xAA, 0xBB][..], &[0xCC, 0xDD][..]]);
    }

    #[test]
    fn two_different_frames_packet() {
        let frame_1 = [0xAA, 0xBB];
        let frame_2 = [0xCC, 0xDD, 0xEE];

        let data = Packet::new(0b0000_0010).add_frame(&frame_1).add_frame(&frame_2).build();

        let packet = FramePacket::new(&data).expect("Failed to parse two different frames packet");

        assert_eq!(frames_of(&packet), vec![&frame_1[..], &frame_2[..]]);
    }

    #[test]
    fn two_byte_frame_length() {
        let frame_1 = vec![0x11; 700];
        let frame_2 = vec![0x22; 3];

        let data = Packet::new(0b0000_0010).add_frame(&frame_1).add_frame(&frame_2).build();
        assert_eq!(&data[1..3], &lacing(700)[..]);

        let packet = FramePacket::new(&data).unwrap();
        assert_eq!(packet.frame_ranges(), &[3..703, 703..706]);
    }

    #[test]
    fn arbitrary_frames_cbr_packet() {
        let data = Packet::new(0b0000_0011)
            .frame_count(3)
            .add_frame(&[0xAA, 0xBB])
            .add_frame(&[0xCC, 0xDD])
            .add_frame(&[0xEE, 0xFF])
            .build();

        let packet = FramePacket::new(&data).expect("Failed to parse arbitrary frames CBR packet");

        assert_eq!(packet.frame_count(), 3);
        assert_eq!(frames_of(&packet)[2], &[0xEE, 0xFF][..]);
        assert_eq!(packet.duration(), 3 * 480);
    }

    #[test]
    fn arbitrary_frames_vbr_packet() {
        let data = Packet::new(0b0000_0011)
            .vbr(true)
            .frame_count(2)
            .add_frame(&[0xAA, 0xBB])
            .add_frame(&[0xCC, 0xDD, 0xEE])
            .build();

        let packet = FramePacket::new(&data).expect("Failed to parse arbitrary frames VBR packet");

        assert_eq!(frames_of(&packet), vec![&[0xAA, 0xBB][..], &[0xCC, 0xDD, 0xEE][..]]);
        assert_eq!(packet.padding(), 0);
    }

    #[test]
    fn padding_trails_frames() {
        let frame = [0xAA, 0xBB, 0xCC];

        let data = Packet::new(0b0000_0011).frame_count(1).padding(300).add_frame(&frame).build();

        let packet = FramePacket::new(&data).expect("Failed to parse packet with padding");

        assert_eq!(frames_of(&packet), vec![&frame[..]]);
        assert_eq!(packet.padding(), 300);
        assert_eq!(packet.packet_size(), data.len());
    }

    #[test]
    fn self_delimited_packet_stops_at_its_end() {
        let mut data = Packet::new(0b0000_0001).self_delimited().add_frame(&[1, 2]).add_frame(&[3, 4]).build();
        data.extend([0xFF; 5]);

        let packet = FramePacket::parse(&data, true).unwrap();

        assert_eq!(frames_of(&packet), vec![&[1, 2][..], &[3, 4][..]]);
        assert_eq!(packet.packet_size(), 6);
    }

    #[test]
    fn odd_code_1_length_is_invalid() {
        let result = FramePacket::new(&[0b0000_0001, 0xAA, 0xBB, 0xCC]);
        assert!(matches!(result, Err(Error::InvalidCode1PacketLength)));
    }

    #[test]
    fn rejects_malformed_packets() {
        assert!(matches!(FramePacket::new(&[]), Err(Error::PacketTooShort)));
        assert!(matches!(FramePacket::new(&[0x03, 0x00]), Err(Error::ZeroFrameCount)));
        // 4 frames of 60 ms.
        assert!(matches!(FramePacket::new(&[0x1B, 0x04]), Err(Error::ExcessiveTotalDuration)));
        // CBR remainder not divisible by the frame count.
        assert!(matches!(FramePacket::new(&[0x03, 0x02, 1, 2, 3]), Err(Error::InvalidCbrFrameLength)));
        // First frame longer than the packet.
        assert!(matches!(FramePacket::new(&[0x02, 10, 1]), Err(Error::FirstFrameLengthExceedsData)));
        // Padding longer than the packet.
        assert!(matches!(FramePacket::new(&[0x03, 0x41, 10]), Err(Error::InsufficientDataAfterPadding)));
        // Single frame over 1275 bytes.
        let mut big = vec![0u8; 1277];
        big[0] = 0x00;
        assert!(matches!(FramePacket::new(&big), Err(Error::FrameLengthExceedsMaximum)));
    }

    #[test]
    fn duration_from_header_bytes() {
        assert_eq!(packet_duration(&[0b1111_1000]).unwrap(), 960);
        assert_eq!(packet_duration(&[0b1111_1001]).unwrap(), 1920);
        assert_eq!(packet_duration(&[0b1111_1011, 0x06]).unwrap(), 5760);
        assert!(packet_duration(&[0b1111_1011, 0x07]).is_err());
    }

    proptest! {
        #[test]
        fn vbr_framing_round_trip(
            sizes in prop::collection::vec(0usize..=MAX_FRAME_LENGTH, 1..=6),
            padding in 0usize..600,
            self_delimited in any::<bool>(),
        ) {
            let frames: Vec<Vec<u8>> = sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| vec![i as u8 + 1; size])
                .collect();

            let mut builder = Packet::new(0b1111_1011).vbr(true).frame_count(frames.len() as u8).padding(padding);
            if self_delimited {
                builder = builder.self_delimited();
            }
            for frame in &frames {
                builder = builder.add_frame(frame);
            }
            let data = builder.build();

            let packet = FramePacket::parse(&data, self_delimited).unwrap();

            let decoded: Vec<Vec<u8>> = packet.frames().map(<[u8]>::to_vec).collect();
            prop_assert_eq!(&decoded, &frames);

            let data_end = packet.frame_ranges().last().map(|r| r.end).unwrap();
            prop_assert_eq!(data_end + packet.padding(), packet.packet_size());
            prop_assert_eq!(packet.packet_size(), data.len());
        }

        #[test]
        fn cbr_framing_round_trip(size in 0usize..=200, count in 1u8..=48) {
            let frames: Vec<Vec<u8>> = (0..count).map(|i| vec![i; size]).collect();

            let mut builder = Packet::new(0b1000_0011).frame_count(count);
            for frame in &frames {
                builder = builder.add_frame(frame);
            }
            let data = builder.build();

            let packet = FramePacket::new(&data).unwrap();

            prop_assert_eq!(packet.frame_count(), count as usize);
            for (range, frame) in packet.frame_ranges().iter().zip(&frames) {
                prop_assert_eq!(&data[range.clone()], &frame[..]);
            }
        }
    }
}
