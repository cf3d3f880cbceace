//! # CELT Decoder
//!
//! The MDCT layer is based on the Constrained-Energy Lapped Transform (CELT). It codes the
//! energy of a fixed set of bands explicitly and the normalized shape of each band with Pyramid
//! Vector Quantization. It always runs at 48 kHz. In Hybrid frames only the bands from 8 kHz
//! upwards are coded.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.3

mod bands;
mod cwrs;
mod decoder;
mod energy;
mod mdct;
mod postfilter;
mod rate;
mod tables;

pub use decoder::{CeltDecoder, ENERGY_SILENCE};
pub use tables::WINDOW_120;

/// Number of coded bands.
pub const MAX_BANDS: usize = 21;

/// Fractional bit resolution of the allocator, in bits.
pub const BITRES: i32 = 3;

/// Most fine energy bits per band and channel.
pub const MAX_FINE_BITS: i32 = 8;

/// Largest `lm`, the log2 of the number of short blocks in a frame.
pub const MAX_LM: usize = 3;

/// Samples in a 2.5 ms short block.
pub const SHORT_BLOCKSIZE: usize = 120;

/// Samples in a 20 ms frame.
pub const MAX_FRAME_SIZE: usize = SHORT_BLOCKSIZE << MAX_LM;

/// Length of the overlap between consecutive MDCT blocks.
pub const OVERLAP: usize = 120;

/// History kept for the pitch post-filter.
const DECODE_BUFFER_SIZE: usize = 2048;

/// Shortest pitch period of the post-filter.
const COMBFILTER_MINPERIOD: usize = 15;

/// First band coded in a Hybrid frame.
pub const HYBRID_START_BAND: usize = 17;
