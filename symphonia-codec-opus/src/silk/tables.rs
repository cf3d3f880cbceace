//! Constant tables for the SILK layer.
//!
//! Every probability model is stored as a cumulative distribution in the form
//! `[total, c_0, c_1, ..., total]` as consumed by
//! [`RangeDecoder::decode_symbol`](crate::range::RangeDecoder::decode_symbol).

/// Signal type and quantization offset for active frames.
pub const TYPE_OFFSET_VAD: [u16; 5] = [
    256, 24, 98, 246, 256,
];

/// Signal type and quantization offset for inactive frames.
pub const TYPE_OFFSET_NO_VAD: [u16; 3] = [
    256, 26, 256,
];

/// Most significant bits of the first subframe gain, per signal type.
pub const GAIN_HIGHBITS: [[u16; 9]; 3] = [
    [256, 32, 144, 212, 241, 253, 254, 255, 256],
    [256, 2, 19, 64, 124, 186, 233, 252, 256],
    [256, 1, 4, 30, 101, 195, 245, 254, 256],
];

pub const GAIN_DELTA: [u16; 42] = [
    256, 6, 11, 22, 53, 185, 206, 214, 218, 221, 223, 225, 227, 228, 229, 230,
    231, 232, 233, 234, 235, 236, 237, 238, 239, 240, 241, 242, 243, 244, 245, 246,
    247, 248, 249, 250, 251, 252, 253, 254, 255, 256,
];

pub const UNIFORM3: [u16; 4] = [
    256, 85, 171, 256,
];

pub const UNIFORM4: [u16; 5] = [
    256, 64, 128, 192, 256,
];

pub const UNIFORM5: [u16; 6] = [
    256, 51, 102, 154, 205, 256,
];

pub const UNIFORM6: [u16; 7] = [
    256, 43, 85, 128, 171, 213, 256,
];

pub const UNIFORM8: [u16; 9] = [
    256, 32, 64, 96, 128, 160, 192, 224, 256,
];

/// Stereo prediction weight quantization levels.
pub const STEREO_PRED_QUANT_Q13: [i16; 16] = [
    -13732, -10050, -8266, -7526, -6500, -5000, -2950, -820, 820, 2950, 5000, 6500, 7526, 8266, 10050, 13732,
];

pub const STEREO_PRED_JOINT: [u16; 26] = [
    256, 7, 9, 10, 11, 12, 22, 46, 54, 55, 56, 59, 82, 174, 197, 200,
    201, 202, 210, 234, 244, 245, 246, 247, 249, 256,
];

pub const STEREO_ONLY_CODE_MID: [u16; 3] = [
    256, 192, 256,
];

pub const LBRR_FLAGS_2: [u16; 4] = [
    256, 53, 106, 256,
];

pub const LBRR_FLAGS_3: [u16; 8] = [
    256, 41, 61, 90, 131, 146, 174, 256,
];

pub const LSB: [u16; 3] = [
    256, 136, 256,
];

pub const LTP_SCALE: [u16; 4] = [
    256, 128, 192, 256,
];

pub const NLSF_EXT: [u16; 8] = [
    256, 156, 216, 240, 249, 253, 255, 256,
];

pub const NLSF_INTERP_FACTOR: [u16; 6] = [
    256, 13, 35, 64, 75, 256,
];

pub const QUANTIZATION_OFFSETS_Q10: [[i16; 2]; 2] = [
    [100, 240],
    [32, 100],
];

pub const LTP_SCALES_Q14: [i16; 3] = [
    15565, 12288, 8192,
];

/// Most significant part of the absolute pitch lag.
pub const PITCH_LAG: [u16; 33] = [
    256, 3, 6, 12, 23, 44, 74, 106, 125, 136, 146, 158, 171, 184, 196, 207,
    216, 224, 231, 237, 241, 243, 245, 247, 248, 249, 250, 251, 252, 253, 254, 255,
    256,
];

pub const PITCH_DELTA: [u16; 22] = [
    256, 46, 48, 50, 53, 57, 63, 73, 88, 114, 152, 182, 204, 219, 229, 236,
    242, 246, 250, 252, 254, 256,
];

pub const PITCH_CONTOUR: [u16; 35] = [
    256, 33, 55, 73, 89, 104, 118, 132, 145, 158, 168, 177, 186, 194, 200, 206,
    212, 217, 221, 225, 229, 232, 235, 238, 240, 242, 244, 246, 248, 250, 252, 253,
    254, 255, 256,
];

pub const PITCH_CONTOUR_NB: [u16; 12] = [
    256, 68, 80, 101, 118, 137, 159, 189, 213, 230, 246, 256,
];

pub const PITCH_CONTOUR_10MS: [u16; 13] = [
    256, 91, 137, 176, 195, 209, 221, 229, 236, 242, 247, 252, 256,
];

pub const PITCH_CONTOUR_10MS_NB: [u16; 4] = [
    256, 143, 193, 256,
];

/// Pitch contour codebook for narrowband 20 ms frames.
pub const CB_LAGS_STAGE2: [[i8; 11]; 4] = [
    [0, 2, -1, -1, -1, 0, 0, 1, 1, 0, 1],
    [0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0],
    [0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0],
    [0, -1, 2, 1, 0, 1, 1, 0, 0, -1, -1],
];

/// Pitch contour codebook for 20 ms frames above narrowband.
pub const CB_LAGS_STAGE3: [[i8; 34]; 4] = [
    [0, 0, 1, -1, 0, 1, -1, 0, -1, 1, -2, 2, -2, -2, 2, -3, 2, 3, -3, -4, 3, -4, 4, 4, -5, 5, -6, -5, 6, -7, 6, 5, 8, -9],
    [0, 0, 1, 0, 0, 0, 0, 0, 0, 0, -1, 1, 0, 0, 1, -1, 0, 1, -1, -1, 1, -1, 2, 1, -1, 2, -2, -2, 2, -2, 2, 2, 3, -3],
    [0, 1, 0, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 1, -1, 1, 0, 0, 2, 1, -1, 2, -1, -1, 2, -1, 2, 2, -1, 3, -2, -2, -2, 3],
    [0, 1, 0, 0, 1, 0, 1, -1, 2, -1, 2, -1, 2, 3, -2, 3, -2, -2, 4, 4, -3, 5, -3, -4, 6, -4, 6, 5, -5, 8, -6, -5, -7, 9],
];

pub const CB_LAGS_STAGE2_10MS: [[i8; 3]; 2] = [
    [0, 1, 0],
    [0, 0, 1],
];

pub const CB_LAGS_STAGE3_10MS: [[i8; 12]; 2] = [
    [0, 0, 1, -1, 1, -1, 2, -2, 2, -2, 3, -3],
    [0, 1, 0, 1, -1, 2, -1, 2, -2, 3, -2, 3],
];

pub const LTP_PER_INDEX: [u16; 4] = [
    256, 77, 157, 256,
];

/// LTP filter codebook index, per periodicity index.
pub const LTP_GAIN: &[&[u16]] = &[
    &[256, 185, 200, 213, 226, 235, 244, 250, 256],
    &[256, 57, 91, 112, 132, 147, 160, 172, 185, 195, 205, 214, 224, 233, 241, 248, 256],
    &[256, 15, 31, 45, 57, 69, 81, 92, 103, 114, 124, 133, 142, 151, 160, 168, 176, 184, 192, 199, 206, 212, 218, 223, 227, 232, 236, 240, 244, 247, 251, 254, 256],
];

/// LTP filter taps in Q7, per periodicity index.
const LTP_VQ_0: [[i8; 5]; 8] = [
    [4, 6, 24, 7, 5],
    [0, 0, 2, 0, 0],
    [12, 28, 41, 13, -4],
    [-9, 15, 42, 25, 14],
    [1, -2, 62, 41, -9],
    [-10, 37, 65, -4, 3],
    [-6, 4, 66, 7, -8],
    [16, 14, 38, -3, 33],
];

const LTP_VQ_1: [[i8; 5]; 16] = [
    [13, 22, 39, 23, 12],
    [-1, 36, 64, 27, -6],
    [-7, 10, 55, 43, 17],
    [1, 1, 8, 1, 1],
    [6, -11, 74, 53, -9],
    [-12, 55, 76, -12, 8],
    [-3, 3, 93, 27, -4],
    [26, 39, 59, 3, -8],
    [2, 0, 77, 11, 9],
    [-8, 22, 44, -6, 7],
    [40, 9, 26, 3, 9],
    [-7, 20, 101, -7, 4],
    [3, -8, 42, 26, 0],
    [-15, 33, 68, 2, 23],
    [-2, 55, 46, -2, 15],
    [3, -1, 21, 16, 41],
];

const LTP_VQ_2: [[i8; 5]; 32] = [
    [-6, 27, 61, 39, 5],
    [-11, 42, 88, 4, 1],
    [-2, 60, 65, 6, -4],
    [-1, -5, 73, 56, 1],
    [-9, 19, 94, 29, -9],
    [0, 12, 99, 6, 4],
    [8, -19, 102, 46, -13],
    [3, 2, 13, 3, 2],
    [9, -21, 84, 72, -18],
    [-11, 46, 104, -22, 8],
    [18, 38, 48, 23, 0],
    [-16, 70, 83, -21, 11],
    [5, -11, 117, 22, -8],
    [-6, 23, 117, -12, 3],
    [3, -8, 95, 28, 4],
    [-10, 15, 77, 60, -15],
    [-1, 4, 124, 2, -4],
    [3, 38, 84, 24, -25],
    [2, 13, 42, 13, 31],
    [21, -4, 56, 46, -1],
    [-1, 35, 79, -13, 19],
    [-7, 65, 88, -9, -14],
    [20, 4, 81, 49, -29],
    [20, 0, 75, 3, -17],
    [5, -9, 44, 92, -8],
    [1, -3, 22, 69, 31],
    [-6, 95, 41, -12, 5],
    [39, 67, 16, -4, 1],
    [0, -6, 120, 55, -36],
    [-13, 44, 122, 4, -24],
    [81, 5, 11, 3, 7],
    [2, 0, 9, 10, 88],
];

pub const LTP_VQ_Q7: [&[[i8; 5]]; 3] = [&LTP_VQ_0, &LTP_VQ_1, &LTP_VQ_2];

/// Pulse count per shell block, per rate level. The last row is used after ten
/// LSB extensions.
pub const PULSES_PER_BLOCK: &[&[u16]] = &[
    &[256, 131, 205, 230, 238, 241, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 254, 255, 256],
    &[256, 58, 151, 211, 234, 241, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 254, 255, 256],
    &[256, 43, 94, 140, 173, 197, 213, 224, 232, 238, 241, 244, 247, 249, 250, 251, 253, 254, 256],
    &[256, 17, 69, 140, 197, 228, 240, 245, 246, 247, 248, 249, 250, 251, 252, 253, 254, 255, 256],
    &[256, 6, 27, 68, 121, 170, 205, 226, 237, 243, 246, 248, 250, 251, 252, 253, 254, 255, 256],
    &[256, 7, 21, 43, 71, 100, 128, 153, 173, 190, 203, 214, 223, 230, 235, 239, 243, 246, 256],
    &[256, 2, 7, 21, 50, 92, 138, 179, 210, 229, 240, 246, 249, 251, 252, 253, 254, 255, 256],
    &[256, 1, 3, 7, 17, 36, 65, 100, 137, 171, 199, 219, 233, 241, 246, 250, 252, 254, 256],
    &[256, 1, 3, 5, 10, 19, 33, 53, 77, 104, 132, 158, 181, 201, 216, 227, 235, 241, 256],
    &[256, 1, 2, 3, 9, 36, 94, 150, 189, 214, 228, 238, 244, 247, 250, 252, 253, 254, 256],
    &[256, 2, 3, 9, 36, 94, 150, 189, 214, 228, 238, 244, 247, 250, 252, 253, 254, 256],
];

pub const RATE_LEVELS: [[u16; 10]; 2] = [
    [256, 15, 66, 78, 124, 169, 182, 215, 242, 256],
    [256, 33, 63, 99, 116, 150, 199, 217, 238, 256],
];

/// Shell coder split of a pulse count, indexed by the count being split.
pub const SHELL_CODE_0: &[&[u16]] = &[
    &[256, 256],
    &[256, 128, 256],
    &[256, 42, 214, 256],
    &[256, 21, 128, 235, 256],
    &[256, 12, 72, 184, 245, 256],
    &[256, 8, 42, 128, 214, 249, 256],
    &[256, 8, 31, 86, 176, 231, 251, 256],
    &[256, 5, 20, 58, 130, 202, 238, 253, 256],
    &[256, 6, 18, 45, 97, 174, 221, 241, 251, 256],
    &[256, 6, 25, 53, 88, 128, 168, 203, 231, 250, 256],
    &[256, 4, 18, 40, 71, 108, 148, 185, 216, 238, 252, 256],
    &[256, 3, 13, 31, 57, 90, 128, 166, 199, 225, 243, 253, 256],
    &[256, 2, 10, 23, 44, 73, 109, 147, 183, 212, 233, 246, 254, 256],
    &[256, 1, 6, 16, 33, 58, 90, 128, 166, 198, 223, 240, 250, 255, 256],
    &[256, 1, 5, 12, 25, 46, 75, 110, 146, 181, 210, 231, 244, 251, 255, 256],
    &[256, 1, 3, 8, 18, 35, 60, 92, 128, 164, 196, 221, 238, 248, 253, 255, 256],
    &[256, 1, 3, 7, 14, 27, 48, 76, 110, 146, 180, 208, 229, 242, 249, 253, 255, 256],
];

pub const SHELL_CODE_1: &[&[u16]] = &[
    &[256, 256],
    &[256, 127, 256],
    &[256, 49, 206, 256],
    &[256, 20, 127, 236, 256],
    &[256, 11, 71, 184, 246, 256],
    &[256, 7, 43, 127, 214, 250, 256],
    &[256, 6, 30, 87, 169, 229, 252, 256],
    &[256, 5, 23, 62, 126, 194, 236, 252, 256],
    &[256, 6, 20, 49, 96, 157, 209, 239, 253, 256],
    &[256, 1, 16, 39, 74, 125, 175, 215, 245, 255, 256],
    &[256, 1, 2, 23, 55, 97, 149, 195, 236, 254, 255, 256],
    &[256, 1, 7, 23, 50, 86, 128, 170, 206, 233, 249, 255, 256],
    &[256, 1, 6, 18, 39, 70, 108, 148, 186, 217, 238, 250, 255, 256],
    &[256, 1, 4, 13, 30, 56, 90, 128, 166, 200, 226, 243, 252, 255, 256],
    &[256, 1, 4, 11, 25, 47, 76, 110, 146, 180, 209, 231, 245, 252, 255, 256],
    &[256, 1, 3, 8, 19, 37, 62, 93, 128, 163, 194, 219, 237, 248, 253, 255, 256],
    &[256, 1, 2, 6, 15, 30, 51, 79, 111, 145, 177, 205, 226, 241, 250, 254, 255, 256],
];

pub const SHELL_CODE_2: &[&[u16]] = &[
    &[256, 256],
    &[256, 127, 256],
    &[256, 53, 202, 256],
    &[256, 22, 127, 233, 256],
    &[256, 11, 72, 183, 246, 256],
    &[256, 6, 41, 127, 215, 251, 256],
    &[256, 4, 24, 83, 170, 232, 253, 256],
    &[256, 3, 16, 56, 127, 200, 241, 254, 256],
    &[256, 3, 12, 39, 92, 162, 218, 246, 255, 256],
    &[256, 3, 11, 30, 67, 124, 185, 229, 249, 255, 256],
    &[256, 3, 10, 25, 53, 97, 151, 200, 233, 250, 255, 256],
    &[256, 1, 8, 21, 43, 77, 123, 171, 209, 237, 251, 255, 256],
    &[256, 1, 2, 13, 35, 62, 97, 139, 186, 219, 244, 254, 255, 256],
    &[256, 1, 2, 8, 22, 48, 85, 128, 171, 208, 234, 248, 254, 255, 256],
    &[256, 1, 2, 6, 16, 36, 67, 107, 149, 189, 220, 240, 250, 254, 255, 256],
    &[256, 1, 2, 5, 13, 29, 55, 90, 128, 166, 201, 227, 243, 251, 254, 255, 256],
    &[256, 1, 2, 4, 10, 22, 43, 73, 109, 147, 183, 213, 234, 246, 252, 254, 255, 256],
];

pub const SHELL_CODE_3: &[&[u16]] = &[
    &[256, 256],
    &[256, 126, 256],
    &[256, 56, 198, 256],
    &[256, 25, 126, 230, 256],
    &[256, 12, 72, 180, 244, 256],
    &[256, 7, 42, 126, 213, 250, 256],
    &[256, 4, 24, 83, 169, 232, 253, 256],
    &[256, 3, 15, 53, 125, 200, 242, 254, 256],
    &[256, 2, 10, 35, 89, 162, 221, 248, 255, 256],
    &[256, 2, 7, 24, 63, 126, 191, 233, 251, 255, 256],
    &[256, 1, 5, 17, 45, 94, 157, 211, 241, 252, 255, 256],
    &[256, 1, 5, 13, 33, 70, 125, 182, 223, 245, 253, 255, 256],
    &[256, 1, 4, 11, 26, 54, 98, 151, 199, 232, 248, 254, 255, 256],
    &[256, 1, 3, 9, 21, 42, 77, 124, 172, 212, 237, 249, 254, 255, 256],
    &[256, 1, 2, 6, 16, 33, 60, 97, 144, 187, 220, 241, 250, 254, 255, 256],
    &[256, 1, 2, 3, 11, 25, 47, 80, 120, 163, 201, 229, 245, 253, 254, 255, 256],
    &[256, 1, 2, 3, 4, 17, 35, 62, 98, 139, 180, 214, 238, 252, 253, 254, 255, 256],
];

/// Probability of a negative sign (as an inverse CDF entry), indexed by signal
/// type, quantization offset and pulse count.
pub const SIGN: [u8; 42] = [
    254, 49, 67, 77, 82, 93, 99, 198, 11, 18, 24, 31, 36, 45, 255, 46,
    66, 78, 87, 94, 104, 208, 14, 21, 32, 42, 51, 66, 255, 94, 104, 109,
    112, 115, 118, 248, 53, 69, 80, 88, 95, 102,
];

/// Piecewise linear approximation of `2 * cos(pi * x)` in Q12.
pub const LSF_COS_Q12: [i16; 129] = [
    8192, 8190, 8182, 8170, 8152, 8130, 8104, 8072, 8034, 7994, 7946, 7896, 7840, 7778, 7714, 7644,
    7568, 7490, 7406, 7318, 7226, 7128, 7026, 6922, 6812, 6698, 6580, 6458, 6332, 6204, 6070, 5934,
    5792, 5648, 5502, 5352, 5198, 5040, 4880, 4718, 4552, 4382, 4212, 4038, 3862, 3684, 3502, 3320,
    3136, 2948, 2760, 2570, 2378, 2186, 1990, 1794, 1598, 1400, 1202, 1002, 802, 602, 402, 202,
    0, -202, -402, -602, -802, -1002, -1202, -1400, -1598, -1794, -1990, -2186, -2378, -2570, -2760, -2948,
    -3136, -3320, -3502, -3684, -3862, -4038, -4212, -4382, -4552, -4718, -4880, -5040, -5198, -5352, -5502, -5648,
    -5792, -5934, -6070, -6204, -6332, -6458, -6580, -6698, -6812, -6922, -7026, -7128, -7226, -7318, -7406, -7490,
    -7568, -7644, -7714, -7778, -7840, -7896, -7946, -7994, -8034, -8072, -8104, -8130, -8152, -8170, -8182, -8190,
    -8192,
];

pub const NLSF_CB1_NB_MB_Q8: [[u8; 10]; 32] = [
    [12, 35, 60, 83, 108, 132, 157, 180, 206, 228],
    [15, 32, 55, 77, 101, 125, 151, 175, 201, 225],
    [19, 42, 66, 89, 114, 137, 162, 184, 209, 230],
    [12, 25, 50, 72, 97, 120, 147, 172, 200, 223],
    [26, 44, 69, 90, 114, 135, 159, 180, 205, 225],
    [13, 22, 53, 80, 106, 130, 156, 180, 205, 228],
    [15, 25, 44, 64, 90, 115, 142, 168, 196, 222],
    [19, 24, 62, 82, 100, 120, 145, 168, 190, 214],
    [22, 31, 50, 79, 103, 120, 151, 170, 203, 227],
    [21, 29, 45, 65, 106, 124, 150, 171, 196, 224],
    [30, 49, 75, 97, 121, 142, 165, 186, 209, 229],
    [19, 25, 52, 70, 93, 116, 143, 166, 192, 219],
    [26, 34, 62, 75, 97, 118, 145, 167, 194, 217],
    [25, 33, 56, 70, 91, 113, 143, 165, 196, 223],
    [21, 34, 51, 72, 97, 117, 145, 171, 196, 222],
    [20, 29, 50, 67, 90, 117, 144, 168, 197, 221],
    [22, 31, 48, 66, 95, 117, 146, 168, 196, 222],
    [24, 33, 51, 77, 116, 134, 158, 180, 200, 224],
    [21, 28, 70, 87, 106, 124, 149, 170, 194, 217],
    [26, 33, 53, 64, 83, 117, 152, 173, 204, 225],
    [27, 34, 65, 95, 108, 129, 155, 174, 210, 225],
    [20, 26, 72, 99, 113, 131, 154, 176, 200, 219],
    [34, 43, 61, 78, 93, 114, 155, 177, 205, 229],
    [23, 29, 54, 97, 124, 138, 163, 179, 209, 229],
    [30, 38, 56, 89, 118, 129, 158, 178, 200, 231],
    [21, 29, 49, 63, 85, 111, 142, 163, 193, 222],
    [27, 48, 77, 103, 133, 158, 179, 196, 215, 232],
    [29, 47, 74, 99, 124, 151, 176, 198, 220, 237],
    [33, 42, 61, 76, 93, 121, 155, 174, 207, 225],
    [29, 53, 87, 112, 136, 154, 170, 188, 208, 227],
    [24, 30, 52, 84, 131, 150, 166, 186, 203, 229],
    [37, 48, 64, 84, 104, 118, 156, 177, 201, 230],
];

pub const NLSF_CB1_NB_MB_WGHT_Q9: [[i16; 10]; 32] = [
    [2897, 2314, 2314, 2314, 2287, 2287, 2314, 2300, 2327, 2287],
    [2888, 2580, 2394, 2367, 2314, 2274, 2274, 2274, 2274, 2194],
    [2487, 2340, 2340, 2314, 2314, 2314, 2340, 2340, 2367, 2354],
    [3216, 2766, 2340, 2340, 2314, 2274, 2221, 2207, 2261, 2194],
    [2460, 2474, 2367, 2394, 2394, 2394, 2394, 2367, 2407, 2314],
    [3479, 3056, 2127, 2207, 2274, 2274, 2274, 2287, 2314, 2261],
    [3282, 3141, 2580, 2394, 2247, 2221, 2207, 2194, 2194, 2114],
    [4096, 3845, 2221, 2620, 2620, 2407, 2314, 2394, 2367, 2074],
    [3178, 3244, 2367, 2221, 2553, 2434, 2340, 2314, 2167, 2221],
    [3338, 3488, 2726, 2194, 2261, 2460, 2354, 2367, 2207, 2101],
    [2354, 2420, 2327, 2367, 2394, 2420, 2420, 2420, 2460, 2367],
    [3779, 3629, 2434, 2527, 2367, 2274, 2274, 2300, 2207, 2048],
    [3254, 3225, 2713, 2846, 2447, 2327, 2300, 2300, 2274, 2127],
    [3263, 3300, 2753, 2806, 2447, 2261, 2261, 2247, 2127, 2101],
    [2873, 2981, 2633, 2367, 2407, 2354, 2194, 2247, 2247, 2114],
    [3225, 3197, 2633, 2580, 2274, 2181, 2247, 2221, 2221, 2141],
    [3178, 3310, 2740, 2407, 2274, 2274, 2274, 2287, 2194, 2114],
    [3141, 3272, 2460, 2061, 2287, 2500, 2367, 2487, 2434, 2181],
    [3507, 3282, 2314, 2700, 2647, 2474, 2367, 2394, 2340, 2127],
    [3423, 3535, 3038, 3056, 2300, 1950, 2221, 2274, 2274, 2274],
    [3404, 3366, 2087, 2687, 2873, 2354, 2420, 2274, 2474, 2540],
    [3760, 3488, 1950, 2660, 2897, 2527, 2394, 2367, 2460, 2261],
    [3028, 3272, 2740, 2888, 2740, 2154, 2127, 2287, 2234, 2247],
    [3695, 3657, 2025, 1969, 2660, 2700, 2580, 2500, 2327, 2367],
    [3207, 3413, 2354, 2074, 2888, 2888, 2340, 2487, 2247, 2167],
    [3338, 3366, 2846, 2780, 2327, 2154, 2274, 2287, 2114, 2061],
    [2327, 2300, 2181, 2167, 2181, 2367, 2633, 2700, 2700, 2553],
    [2407, 2434, 2221, 2261, 2221, 2221, 2340, 2420, 2607, 2700],
    [3038, 3244, 2806, 2888, 2474, 2074, 2300, 2314, 2354, 2380],
    [2221, 2154, 2127, 2287, 2500, 2793, 2793, 2620, 2580, 2367],
    [3676, 3713, 2234, 1838, 2181, 2753, 2726, 2673, 2513, 2207],
    [2793, 3160, 2726, 2553, 2846, 2513, 2181, 2394, 2221, 2181],
];

pub const NLSF_CB1_NB_MB: [[u16; 33]; 2] = [
    [256, 44, 78, 108, 127, 148, 160, 171, 174, 177, 179, 195, 197, 199, 200, 205, 207, 208, 211, 214, 215, 216, 218, 220, 222, 225, 226, 235, 244, 246, 253, 255, 256],
    [256, 1, 11, 12, 20, 23, 31, 39, 53, 66, 80, 81, 95, 107, 120, 131, 142, 154, 165, 175, 185, 196, 204, 213, 221, 228, 236, 237, 238, 244, 245, 251, 256],
];

pub const NLSF_CB2_SELECT_NB_MB: [[u8; 5]; 32] = [
    [16, 0, 0, 0, 0],
    [99, 66, 36, 36, 34],
    [36, 34, 34, 34, 34],
    [83, 69, 36, 52, 34],
    [116, 102, 70, 68, 68],
    [176, 102, 68, 68, 34],
    [65, 85, 68, 84, 36],
    [116, 141, 152, 139, 170],
    [132, 187, 184, 216, 137],
    [132, 249, 168, 185, 139],
    [104, 102, 100, 68, 68],
    [178, 218, 185, 185, 170],
    [244, 216, 187, 187, 170],
    [244, 187, 187, 219, 138],
    [103, 155, 184, 185, 137],
    [116, 183, 155, 152, 136],
    [132, 217, 184, 184, 170],
    [164, 217, 171, 155, 139],
    [244, 169, 184, 185, 170],
    [164, 216, 223, 218, 138],
    [214, 143, 188, 218, 168],
    [244, 141, 136, 155, 170],
    [168, 138, 220, 219, 139],
    [164, 219, 202, 216, 137],
    [168, 186, 246, 185, 139],
    [116, 185, 219, 185, 138],
    [100, 100, 134, 100, 102],
    [34, 68, 68, 100, 68],
    [168, 203, 221, 218, 168],
    [167, 154, 136, 104, 70],
    [164, 246, 171, 137, 139],
    [137, 155, 218, 219, 139],
];

pub const NLSF_CB2_NB_MB: [[u16; 10]; 8] = [
    [256, 1, 2, 3, 18, 242, 253, 254, 255, 256],
    [256, 1, 2, 4, 38, 221, 253, 254, 255, 256],
    [256, 1, 2, 6, 48, 197, 252, 254, 255, 256],
    [256, 1, 2, 10, 62, 185, 246, 254, 255, 256],
    [256, 1, 4, 20, 73, 174, 248, 254, 255, 256],
    [256, 1, 4, 21, 76, 166, 239, 254, 255, 256],
    [256, 1, 8, 32, 85, 159, 226, 252, 255, 256],
    [256, 1, 2, 20, 83, 161, 219, 249, 255, 256],
];

pub const NLSF_PRED_NB_MB_Q8: [u8; 18] = [
    179, 138, 140, 148, 151, 149, 153, 151, 163, 116, 67, 82, 59, 92, 72, 100,
    89, 92,
];

pub const NLSF_DELTA_MIN_NB_MB_Q15: [i16; 11] = [
    250, 3, 6, 3, 3, 3, 4, 3, 3, 3, 461,
];

pub const NLSF_CB1_WB_Q8: [[u8; 16]; 32] = [
    [7, 23, 38, 54, 69, 85, 100, 116, 131, 147, 162, 178, 193, 208, 223, 239],
    [13, 25, 41, 55, 69, 83, 98, 112, 127, 142, 157, 171, 187, 203, 220, 236],
    [15, 21, 34, 51, 61, 78, 92, 106, 126, 136, 152, 167, 185, 205, 225, 240],
    [10, 21, 36, 50, 63, 79, 95, 110, 126, 141, 157, 173, 189, 205, 221, 237],
    [17, 20, 37, 51, 59, 78, 89, 107, 123, 134, 150, 164, 184, 205, 224, 240],
    [10, 15, 32, 51, 67, 81, 96, 112, 129, 142, 158, 173, 189, 204, 220, 236],
    [8, 21, 37, 51, 65, 79, 98, 113, 126, 138, 155, 168, 179, 192, 209, 218],
    [12, 15, 34, 55, 63, 78, 87, 108, 118, 131, 148, 167, 185, 203, 219, 236],
    [16, 19, 32, 36, 56, 79, 91, 108, 118, 136, 154, 171, 186, 204, 220, 237],
    [11, 28, 43, 58, 74, 89, 105, 120, 135, 150, 165, 180, 196, 211, 226, 241],
    [6, 16, 33, 46, 60, 75, 92, 107, 123, 137, 156, 169, 185, 199, 214, 225],
    [11, 19, 30, 44, 57, 74, 89, 105, 121, 135, 152, 169, 186, 202, 218, 234],
    [12, 19, 29, 46, 57, 71, 88, 100, 120, 132, 148, 165, 182, 199, 216, 233],
    [17, 23, 35, 46, 56, 77, 92, 106, 123, 134, 152, 167, 185, 204, 222, 237],
    [14, 17, 45, 53, 63, 75, 89, 107, 115, 132, 151, 171, 188, 206, 221, 240],
    [9, 16, 29, 40, 56, 71, 88, 103, 119, 137, 154, 171, 189, 205, 222, 237],
    [16, 19, 36, 48, 57, 76, 87, 105, 118, 132, 150, 167, 185, 202, 218, 236],
    [12, 17, 29, 54, 71, 81, 94, 104, 126, 136, 149, 164, 182, 201, 221, 237],
    [15, 28, 47, 62, 79, 97, 115, 129, 142, 155, 168, 180, 194, 208, 223, 238],
    [8, 14, 30, 45, 62, 78, 94, 111, 127, 143, 159, 175, 192, 207, 223, 239],
    [17, 30, 49, 62, 79, 92, 107, 119, 132, 145, 160, 174, 190, 204, 220, 235],
    [14, 19, 36, 45, 61, 76, 91, 108, 121, 138, 154, 172, 189, 205, 222, 238],
    [12, 18, 31, 45, 60, 76, 91, 107, 123, 138, 154, 171, 187, 204, 221, 236],
    [13, 17, 31, 43, 53, 70, 83, 103, 114, 131, 149, 167, 185, 203, 220, 237],
    [17, 22, 35, 42, 58, 78, 93, 110, 125, 139, 155, 170, 188, 206, 224, 240],
    [8, 15, 34, 50, 67, 83, 99, 115, 131, 146, 162, 178, 193, 209, 224, 239],
    [13, 16, 41, 66, 73, 86, 95, 111, 128, 137, 150, 163, 183, 206, 225, 241],
    [17, 25, 37, 52, 63, 75, 92, 102, 119, 132, 144, 160, 175, 191, 212, 231],
    [19, 31, 49, 65, 83, 100, 117, 133, 147, 161, 174, 187, 200, 213, 227, 242],
    [18, 31, 52, 68, 88, 103, 117, 126, 138, 149, 163, 177, 192, 207, 223, 239],
    [16, 29, 47, 61, 76, 90, 106, 119, 133, 147, 161, 176, 193, 209, 224, 240],
    [15, 21, 35, 50, 61, 73, 86, 97, 110, 119, 129, 141, 175, 198, 218, 237],
];

pub const NLSF_CB1_WB_WGHT_Q9: [[i16; 16]; 32] = [
    [3657, 2925, 2925, 2925, 2925, 2925, 2925, 2925, 2925, 2925, 2925, 2925, 2963, 2963, 2925, 2846],
    [3216, 3085, 2972, 3056, 3056, 3010, 3010, 3010, 2963, 2963, 3010, 2972, 2888, 2846, 2846, 2726],
    [3920, 4014, 2981, 3207, 3207, 2934, 3056, 2846, 3122, 3244, 2925, 2846, 2620, 2553, 2780, 2925],
    [3516, 3197, 3010, 3103, 3019, 2888, 2925, 2925, 2925, 2925, 2888, 2888, 2888, 2888, 2888, 2753],
    [5054, 5054, 2934, 3573, 3385, 3056, 3085, 2793, 3160, 3160, 2972, 2846, 2513, 2540, 2753, 2888],
    [4428, 4149, 2700, 2753, 2972, 3010, 2925, 2846, 2981, 3019, 2925, 2925, 2925, 2925, 2888, 2726],
    [3620, 3019, 2972, 3056, 3056, 2873, 2806, 3056, 3216, 3047, 2981, 3291, 3291, 2981, 3310, 2991],
    [5227, 5014, 2540, 3338, 3526, 3385, 3197, 3094, 3376, 2981, 2700, 2647, 2687, 2793, 2846, 2673],
    [5081, 5174, 4615, 4428, 2460, 2897, 3047, 3207, 3169, 2687, 2740, 2888, 2846, 2793, 2846, 2700],
    [3122, 2888, 2963, 2925, 2925, 2925, 2925, 2963, 2963, 2963, 2963, 2925, 2925, 2963, 2963, 2963],
    [4202, 3207, 2981, 3103, 3010, 2888, 2888, 2925, 2972, 2873, 2916, 3019, 2972, 3010, 3197, 2873],
    [3760, 3760, 3244, 3103, 2981, 2888, 2925, 2888, 2972, 2934, 2793, 2793, 2846, 2888, 2888, 2660],
    [3854, 4014, 3207, 3122, 3244, 2934, 3047, 2963, 2963, 3085, 2846, 2793, 2793, 2793, 2793, 2580],
    [3845, 4080, 3357, 3516, 3094, 2740, 3010, 2934, 3122, 3085, 2846, 2846, 2647, 2647, 2846, 2806],
    [5147, 4894, 3225, 3845, 3441, 3169, 2897, 3413, 3451, 2700, 2580, 2673, 2740, 2846, 2806, 2753],
    [4109, 3789, 3291, 3160, 2925, 2888, 2888, 2925, 2793, 2740, 2793, 2740, 2793, 2846, 2888, 2806],
    [5081, 5054, 3047, 3545, 3244, 3056, 3085, 2944, 3103, 2897, 2740, 2740, 2740, 2846, 2793, 2620],
    [4309, 4309, 2860, 2527, 3207, 3376, 3376, 3075, 3075, 3376, 3056, 2846, 2647, 2580, 2726, 2753],
    [3056, 2916, 2806, 2888, 2740, 2687, 2897, 3103, 3150, 3150, 3216, 3169, 3056, 3010, 2963, 2846],
    [4375, 3882, 2925, 2888, 2846, 2888, 2846, 2846, 2888, 2888, 2888, 2846, 2888, 2925, 2888, 2846],
    [2981, 2916, 2916, 2981, 2981, 3056, 3122, 3216, 3150, 3056, 3010, 2972, 2972, 2972, 2925, 2740],
    [4229, 4149, 3310, 3347, 2925, 2963, 2888, 2981, 2981, 2846, 2793, 2740, 2846, 2846, 2846, 2793],
    [4080, 4014, 3103, 3010, 2925, 2925, 2925, 2888, 2925, 2925, 2846, 2846, 2846, 2793, 2888, 2780],
    [4615, 4575, 3169, 3441, 3207, 2981, 2897, 3038, 3122, 2740, 2687, 2687, 2687, 2740, 2793, 2700],
    [4149, 4269, 3789, 3657, 2726, 2780, 2888, 2888, 3010, 2972, 2925, 2846, 2687, 2687, 2793, 2888],
    [4215, 3554, 2753, 2846, 2846, 2888, 2888, 2888, 2925, 2925, 2888, 2925, 2925, 2925, 2963, 2888],
    [5174, 4921, 2261, 3432, 3789, 3479, 3347, 2846, 3310, 3479, 3150, 2897, 2460, 2487, 2753, 2925],
    [3451, 3685, 3122, 3197, 3357, 3047, 3207, 3207, 2981, 3216, 3085, 2925, 2925, 2687, 2540, 2434],
    [2981, 3010, 2793, 2793, 2740, 2793, 2846, 2972, 3056, 3103, 3150, 3150, 3150, 3103, 3010, 3010],
    [2944, 2873, 2687, 2726, 2780, 3010, 3432, 3545, 3357, 3244, 3056, 3010, 2963, 2925, 2888, 2846],
    [3019, 2944, 2897, 3010, 3010, 2972, 3019, 3103, 3056, 3056, 3010, 2888, 2846, 2925, 2925, 2888],
    [3920, 3967, 3010, 3197, 3357, 3216, 3291, 3291, 3479, 3704, 3441, 2726, 2181, 2460, 2580, 2607],
];

pub const NLSF_CB1_WB: [[u16; 33]; 2] = [
    [256, 31, 52, 55, 72, 73, 81, 98, 102, 103, 121, 137, 141, 143, 146, 147, 157, 158, 161, 177, 188, 204, 206, 208, 211, 213, 224, 225, 229, 238, 246, 253, 256],
    [256, 1, 5, 21, 26, 44, 55, 60, 74, 89, 90, 93, 105, 118, 132, 146, 152, 166, 178, 180, 186, 187, 199, 211, 222, 232, 235, 245, 250, 251, 252, 253, 256],
];

pub const NLSF_CB2_SELECT_WB: [[u8; 8]; 32] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [100, 102, 102, 68, 68, 36, 34, 96],
    [164, 107, 158, 185, 180, 185, 139, 102],
    [64, 66, 36, 34, 34, 0, 1, 32],
    [208, 139, 141, 191, 152, 185, 155, 104],
    [96, 171, 104, 166, 102, 102, 102, 132],
    [1, 0, 0, 0, 0, 16, 16, 0],
    [80, 109, 78, 107, 185, 139, 103, 101],
    [208, 212, 141, 139, 173, 153, 123, 103],
    [36, 0, 0, 0, 0, 0, 0, 1],
    [48, 0, 0, 0, 0, 0, 0, 32],
    [68, 135, 123, 119, 119, 103, 69, 98],
    [68, 103, 120, 118, 118, 102, 71, 98],
    [134, 136, 157, 184, 182, 153, 139, 134],
    [208, 168, 248, 75, 189, 143, 121, 107],
    [32, 49, 34, 34, 34, 0, 17, 2],
    [210, 235, 139, 123, 185, 137, 105, 134],
    [98, 135, 104, 182, 100, 183, 171, 134],
    [100, 70, 68, 70, 66, 66, 34, 131],
    [64, 166, 102, 68, 36, 2, 1, 0],
    [134, 166, 102, 68, 34, 34, 66, 132],
    [212, 246, 158, 139, 107, 107, 87, 102],
    [100, 219, 125, 122, 137, 118, 103, 132],
    [114, 135, 137, 105, 171, 106, 50, 34],
    [164, 214, 141, 143, 185, 151, 121, 103],
    [192, 34, 0, 0, 0, 0, 0, 1],
    [208, 109, 74, 187, 134, 249, 159, 137],
    [102, 110, 154, 118, 87, 101, 119, 101],
    [0, 2, 0, 36, 36, 66, 68, 35],
    [96, 164, 102, 100, 36, 0, 2, 33],
    [167, 138, 174, 102, 100, 84, 2, 2],
    [100, 107, 120, 119, 36, 197, 24, 0],
];

pub const NLSF_CB2_WB: [[u16; 10]; 8] = [
    [256, 1, 2, 3, 12, 244, 253, 254, 255, 256],
    [256, 1, 2, 4, 32, 218, 253, 254, 255, 256],
    [256, 1, 2, 5, 47, 199, 252, 254, 255, 256],
    [256, 1, 2, 12, 61, 187, 252, 254, 255, 256],
    [256, 1, 5, 24, 72, 172, 249, 254, 255, 256],
    [256, 1, 2, 16, 70, 170, 242, 254, 255, 256],
    [256, 1, 2, 17, 78, 165, 226, 251, 255, 256],
    [256, 1, 8, 29, 79, 156, 237, 254, 255, 256],
];

pub const NLSF_PRED_WB_Q8: [u8; 30] = [
    175, 148, 160, 176, 178, 173, 174, 164, 177, 174, 196, 182, 198, 192, 182, 68,
    62, 66, 60, 72, 117, 85, 90, 118, 136, 151, 142, 160, 142, 155,
];

pub const NLSF_DELTA_MIN_WB_Q15: [i16; 17] = [
    100, 3, 40, 3, 3, 3, 5, 14, 14, 10, 11, 3, 8, 9, 7, 3,
    347,
];
