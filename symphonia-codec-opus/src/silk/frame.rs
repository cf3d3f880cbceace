use crate::silk::lpc::NlsfCodebook;
use crate::silk::tables::{
    PITCH_CONTOUR, PITCH_CONTOUR_10MS, PITCH_CONTOUR_10MS_NB, PITCH_CONTOUR_NB, UNIFORM4, UNIFORM6,
    UNIFORM8,
};

pub const MAX_NB_SUBFR: usize = 4;
pub const MAX_FRAME_LENGTH: usize = 320;
pub const SUBFR_LENGTH_MS: usize = 5;
pub const LTP_MEM_LENGTH_MS: usize = 20;
pub const LTP_ORDER: usize = 5;

/// Signal type of a SILK frame.
///
/// ```text
///   +-------------+-----------+-------------+--------------------------+
///   | VAD Flag    | Frame Type| Signal Type | Quantization Offset Type |
///   +-------------+-----------+-------------+--------------------------+
///   | Inactive    |         0 | Inactive    | Low                      |
///   | Inactive    |         1 | Inactive    | High                     |
///   | Active      |         2 | Unvoiced    | Low                      |
///   | Active      |         3 | Unvoiced    | High                     |
///   | Active      |         4 | Voiced      | Low                      |
///   | Active      |         5 | Voiced      | High                     |
///   +-------------+-----------+-------------+--------------------------+
/// ```
///
/// https://datatracker.ietf.org/doc/html/rfc6716#section-4.2.7.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    Inactive,
    Unvoiced,
    Voiced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantizationOffsetType {
    #[default]
    Low,
    High,
}

impl FrameType {
    /// Splits a frame type symbol (0..=5) into signal type and quantization offset type.
    pub fn from_symbol(symbol: usize) -> (FrameType, QuantizationOffsetType) {
        let frame_type = match symbol >> 1 {
            0 => FrameType::Inactive,
            1 => FrameType::Unvoiced,
            _ => FrameType::Voiced,
        };

        let offset = if symbol & 1 == 0 { QuantizationOffsetType::Low } else { QuantizationOffsetType::High };

        return (frame_type, offset);
    }

    pub fn index(self) -> usize {
        return match self {
            FrameType::Inactive => 0,
            FrameType::Unvoiced => 1,
            FrameType::Voiced => 2,
        };
    }
}

impl QuantizationOffsetType {
    pub fn index(self) -> usize {
        return match self {
            QuantizationOffsetType::Low => 0,
            QuantizationOffsetType::High => 1,
        };
    }
}

/// How the side information of a frame depends on the previous frame of the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    Independent,
    /// Independent gains, but the LTP scaling index is not coded.
    IndependentNoLtpScaling,
    Conditional,
}

/// Frame geometry derived from the internal sample rate and the number of subframes.
///
/// ```text
///   +-----------------+------------+--------------------+-------------+
///   | Audio Bandwidth | Rate (kHz) | Subframe (samples) | LPC Order   |
///   +-----------------+------------+--------------------+-------------+
///   | NB              |          8 |                 40 | 10          |
///   | MB              |         12 |                 60 | 10          |
///   | WB              |         16 |                 80 | 16          |
///   +-----------------+------------+--------------------+-------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub fs_khz: u32,
    pub nb_subfr: usize,
    pub subfr_length: usize,
    pub frame_length: usize,
    pub ltp_mem_length: usize,
    pub codebook: NlsfCodebook,
}

impl Layout {
    pub fn new(fs_khz: u32, nb_subfr: usize) -> Self {
        let subfr_length = SUBFR_LENGTH_MS * fs_khz as usize;

        return Self {
            fs_khz,
            nb_subfr,
            subfr_length,
            frame_length: nb_subfr * subfr_length,
            ltp_mem_length: LTP_MEM_LENGTH_MS * fs_khz as usize,
            codebook: NlsfCodebook::for_sample_rate(fs_khz),
        };
    }

    pub fn lpc_order(&self) -> usize {
        return self.codebook.order();
    }

    pub fn is_10ms(&self) -> bool {
        return self.nb_subfr < MAX_NB_SUBFR;
    }

    pub fn pitch_contour_cdf(&self) -> &'static [u16] {
        return match (self.fs_khz == 8, self.is_10ms()) {
            (true, false) => &PITCH_CONTOUR_NB,
            (true, true) => &PITCH_CONTOUR_10MS_NB,
            (false, false) => &PITCH_CONTOUR,
            (false, true) => &PITCH_CONTOUR_10MS,
        };
    }

    pub fn pitch_low_bits_cdf(&self) -> &'static [u16] {
        return match self.fs_khz {
            8 => &UNIFORM4,
            12 => &UNIFORM6,
            _ => &UNIFORM8,
        };
    }

    /// Number of 16 sample shell blocks. A 10 ms MB frame codes 8 blocks and drops the last 8
    /// samples.
    pub fn shell_blocks(&self) -> usize {
        return (self.frame_length + 15) >> 4;
    }
}
