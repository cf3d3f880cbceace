//! A pure Rust Opus decoder.
//!
//! Implements the decoder of [RFC 6716](https://datatracker.ietf.org/doc/html/rfc6716): packet
//! framing, the range decoder, the SILK and CELT layers, Hybrid and redundant frames, and the
//! multistream packing and channel mapping of [RFC 7845](https://datatracker.ietf.org/doc/html/rfc7845).
//! Output is always 48 kHz.
//!
//! [`OpusDecoder`] plugs into Symphonia as a `Decoder` for `CODEC_TYPE_OPUS`.

mod celt;
mod config;
mod decoder;
mod error;
mod fifo;
mod frame;
mod header;
mod packet;
mod range;
mod resampler;
mod silk;
mod stream;
mod toc;

pub use config::{DecoderConfig, ErrorPolicy};
pub use decoder::OpusDecoder;
pub use error::{Error, ErrorKind, Result};
pub use fifo::SampleFifo;
pub use header::{ChannelMapping, ChannelMappingFamily, ChannelSource, OpusHead};
pub use packet::{packet_duration, FramePacket, MAX_FRAME_LENGTH, MAX_PACKET_SAMPLES};
pub use resampler::{Resampler, SincResampler};
pub use stream::MultiStreamDecoder;
pub use toc::{AudioMode, Bandwidth, Toc};
