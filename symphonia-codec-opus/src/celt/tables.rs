//! Constant tables for the CELT layer.

/// Band edges in units of 2.5 ms MDCT bins.
pub const EBAND_5MS: [u8; 22] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28,
    34, 40, 48, 60, 78, 100,
];

/// Per-band allocation rows searched by the bit allocator, in 1/32 bit per
/// MDCT bin.
pub const STATIC_ALLOC: [[u8; 21]; 11] = [
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [90, 80, 75, 69, 63, 56, 49, 40, 34, 29, 20, 18, 10, 0, 0, 0, 0, 0, 0, 0, 0],
    [110, 100, 90, 84, 78, 71, 65, 58, 51, 45, 39, 32, 26, 20, 12, 0, 0, 0, 0, 0, 0],
    [118, 110, 103, 93, 86, 80, 75, 70, 65, 59, 53, 47, 40, 31, 23, 15, 4, 0, 0, 0, 0],
    [126, 119, 112, 104, 95, 89, 83, 78, 72, 66, 60, 54, 47, 39, 32, 25, 17, 12, 1, 0, 0],
    [134, 127, 120, 114, 103, 97, 91, 85, 78, 72, 66, 60, 54, 47, 41, 35, 29, 23, 16, 10, 1],
    [144, 137, 130, 124, 113, 107, 101, 95, 88, 82, 76, 70, 64, 57, 51, 45, 39, 33, 26, 15, 1],
    [152, 145, 138, 132, 123, 117, 111, 105, 98, 92, 86, 80, 74, 67, 61, 55, 49, 43, 36, 20, 1],
    [162, 155, 148, 142, 133, 127, 121, 115, 108, 102, 96, 90, 84, 77, 71, 65, 59, 53, 46, 30, 1],
    [172, 165, 158, 152, 143, 137, 131, 125, 118, 112, 106, 100, 94, 87, 81, 75, 69, 63, 56, 45, 20],
    [200, 200, 200, 200, 200, 200, 200, 200, 198, 193, 188, 183, 178, 173, 168, 163, 158, 153, 148, 129, 104],
];

/// Maximum per-band allocation, indexed by `[lm][channels - 1][band]`.
pub const STATIC_CAPS: [[[u8; 21]; 2]; 4] = [
    [
        [224, 224, 224, 224, 224, 224, 224, 224, 160, 160, 160, 160, 185, 185, 185, 178, 178, 168, 134, 61, 37],
        [224, 224, 224, 224, 224, 224, 224, 224, 240, 240, 240, 240, 207, 207, 207, 198, 198, 183, 144, 66, 40],
    ],
    [
        [160, 160, 160, 160, 160, 160, 160, 160, 185, 185, 185, 185, 193, 193, 193, 183, 183, 172, 138, 64, 38],
        [240, 240, 240, 240, 240, 240, 240, 240, 207, 207, 207, 207, 204, 204, 204, 193, 193, 180, 143, 66, 40],
    ],
    [
        [185, 185, 185, 185, 185, 185, 185, 185, 193, 193, 193, 193, 193, 193, 193, 183, 183, 172, 138, 65, 39],
        [207, 207, 207, 207, 207, 207, 207, 207, 204, 204, 204, 204, 201, 201, 201, 188, 188, 176, 141, 66, 40],
    ],
    [
        [193, 193, 193, 193, 193, 193, 193, 193, 193, 193, 193, 193, 194, 194, 194, 184, 184, 173, 139, 65, 39],
        [204, 204, 204, 204, 204, 204, 204, 204, 201, 201, 201, 201, 198, 198, 198, 187, 187, 175, 140, 66, 40],
    ],
];

/// Offsets into [`CACHE_BITS`], indexed by `(lm + 1) * 21 + band`.
pub const CACHE_INDEX: [i16; 105] = [
    -1, -1, -1, -1, -1, -1, -1, -1, 0, 0, 0, 0, 41, 41, 41, 82,
    82, 123, 164, 200, 222, 0, 0, 0, 0, 0, 0, 0, 0, 41, 41, 41,
    41, 123, 123, 123, 164, 164, 240, 266, 283, 295, 41, 41, 41, 41, 41, 41,
    41, 41, 123, 123, 123, 123, 240, 240, 240, 266, 266, 305, 318, 328, 336, 123,
    123, 123, 123, 123, 123, 123, 123, 240, 240, 240, 240, 305, 305, 305, 318, 318,
    343, 351, 358, 364, 240, 240, 240, 240, 240, 240, 240, 240, 305, 305, 305, 305,
    343, 343, 343, 351, 351, 370, 376, 382, 387,
];

/// Bit cost of each pulse count, one row per distinct band size.
pub const CACHE_BITS: [u8; 392] = [
    40, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 40, 15, 23, 28, 31, 34, 36,
    38, 39, 41, 42, 43, 44, 45, 46, 47, 47, 49, 50, 51, 52, 53, 54,
    55, 55, 57, 58, 59, 60, 61, 62, 63, 63, 65, 66, 67, 68, 69, 70,
    71, 71, 40, 20, 33, 41, 48, 53, 57, 61, 64, 66, 69, 71, 73, 75,
    76, 78, 80, 82, 85, 87, 89, 91, 92, 94, 96, 98, 101, 103, 105, 107,
    108, 110, 112, 114, 117, 119, 121, 123, 124, 126, 128, 40, 23, 39, 51, 60,
    67, 73, 79, 83, 87, 91, 94, 97, 100, 102, 105, 107, 111, 115, 118, 121,
    124, 126, 129, 131, 135, 139, 142, 145, 148, 150, 153, 155, 159, 163, 166, 169,
    172, 174, 177, 179, 35, 28, 49, 65, 78, 89, 99, 107, 114, 120, 126, 132,
    136, 141, 145, 149, 153, 159, 165, 171, 176, 180, 185, 189, 192, 199, 205, 211,
    216, 220, 225, 229, 232, 239, 245, 251, 21, 33, 58, 79, 97, 112, 125, 137,
    148, 157, 166, 174, 182, 189, 195, 201, 207, 217, 227, 235, 243, 251, 17, 35,
    63, 86, 106, 123, 139, 152, 165, 177, 187, 197, 206, 214, 222, 230, 237, 250,
    25, 31, 55, 75, 91, 105, 117, 128, 138, 146, 154, 161, 168, 174, 180, 185,
    190, 200, 208, 215, 222, 229, 235, 240, 245, 255, 16, 36, 65, 89, 110, 128,
    144, 159, 173, 185, 196, 207, 217, 226, 234, 242, 250, 11, 41, 74, 103, 128,
    151, 172, 191, 209, 225, 241, 255, 9, 43, 79, 110, 138, 163, 186, 207, 227,
    246, 12, 39, 71, 99, 123, 144, 164, 182, 198, 214, 228, 241, 253, 9, 44,
    81, 113, 142, 168, 192, 214, 235, 255, 7, 49, 90, 127, 160, 191, 220, 247,
    6, 51, 95, 134, 170, 203, 234, 7, 47, 87, 123, 155, 184, 212, 237, 6,
    52, 97, 137, 174, 208, 240, 5, 57, 106, 151, 192, 231, 5, 59, 111, 158,
    202, 243, 5, 55, 103, 147, 187, 224, 5, 60, 113, 161, 206, 248, 4, 65,
    122, 175, 224, 4, 67, 127, 182, 234,
];

/// log2 of the band width in 1/8 bit units.
pub const LOG_N: [i16; 21] = [
    0, 0, 0, 0, 0, 0, 0, 0, 8, 8, 8, 8, 16, 16, 16, 21,
    21, 24, 29, 34, 36,
];

/// Overlap window for the 120 sample MDCT overlap region.
pub const WINDOW_120: [f32; 120] = [
    6.7286966e-05, 0.00060551348, 0.0016815970, 0.0032947962, 0.0054439943, 0.0081276923, 0.011344001, 0.015090633, 0.019364886, 0.024163635, 0.029483315, 0.035319905, 0.041668911, 0.048525347, 0.055883718, 0.063737999,
    0.072081616, 0.080907428, 0.090207705, 0.099974111, 0.11019769, 0.12086883, 0.13197729, 0.14351214, 0.15546177, 0.16781389, 0.18055550, 0.19367290, 0.20715171, 0.22097682, 0.23513243, 0.24960208,
    0.26436860, 0.27941419, 0.29472040, 0.31026818, 0.32603788, 0.34200931, 0.35816177, 0.37447407, 0.39092462, 0.40749142, 0.42415215, 0.44088423, 0.45766484, 0.47447104, 0.49127978, 0.50806798,
    0.52481261, 0.54149077, 0.55807973, 0.57455701, 0.59090049, 0.60708841, 0.62309951, 0.63891306, 0.65450896, 0.66986776, 0.68497077, 0.69980010, 0.71433873, 0.72857055, 0.74248043, 0.75605424,
    0.76927895, 0.78214257, 0.79463430, 0.80674445, 0.81846456, 0.82978733, 0.84070669, 0.85121779, 0.86131698, 0.87100183, 0.88027111, 0.88912479, 0.89756398, 0.90559094, 0.91320904, 0.92042270,
    0.92723738, 0.93365955, 0.93969656, 0.94535671, 0.95064907, 0.95558353, 0.96017067, 0.96442171, 0.96834849, 0.97196334, 0.97527906, 0.97830883, 0.98106616, 0.98356480, 0.98581869, 0.98784191,
    0.98964856, 0.99125274, 0.99266849, 0.99390969, 0.99499004, 0.99592297, 0.99672162, 0.99739874, 0.99796667, 0.99843728, 0.99882195, 0.99913147, 0.99937606, 0.99956527, 0.99970802, 0.99981248,
    0.99988613, 0.99993565, 0.99996697, 0.99998518, 0.99999457, 0.99999859, 0.99999982, 1.0000000,
];

/// Laplace parameters for coarse energy, indexed by `[lm][intra][2 * band]`.
pub const COARSE_ENERGY_MODEL: [[[u8; 42]; 2]; 4] = [
    [
        [72, 127, 65, 129, 66, 128, 65, 128, 64, 128, 62, 128, 64, 128, 64, 128, 92, 78, 92, 79, 92, 78, 90, 79, 116, 41, 115, 40, 114, 40, 132, 26, 132, 26, 145, 17, 161, 12, 176, 10, 177, 11],
        [24, 179, 48, 138, 54, 135, 54, 132, 53, 134, 56, 133, 55, 132, 55, 132, 61, 114, 70, 96, 74, 88, 75, 88, 87, 74, 89, 66, 91, 67, 100, 59, 108, 50, 120, 40, 122, 37, 97, 43, 78, 50],
    ],
    [
        [83, 78, 84, 81, 88, 75, 86, 74, 87, 71, 90, 73, 93, 74, 93, 74, 109, 40, 114, 36, 117, 34, 117, 34, 143, 17, 145, 18, 146, 19, 162, 12, 165, 10, 178, 7, 189, 6, 190, 8, 177, 9],
        [23, 178, 54, 115, 63, 102, 66, 98, 69, 99, 74, 89, 71, 91, 73, 91, 78, 89, 86, 80, 92, 66, 93, 64, 102, 59, 103, 60, 104, 60, 117, 52, 123, 44, 138, 35, 133, 31, 97, 38, 77, 45],
    ],
    [
        [61, 90, 93, 60, 105, 42, 107, 41, 110, 45, 116, 38, 113, 38, 112, 38, 124, 26, 132, 27, 136, 19, 140, 20, 155, 14, 159, 16, 158, 18, 170, 13, 177, 10, 187, 8, 192, 6, 175, 9, 159, 10],
        [21, 178, 59, 110, 71, 86, 75, 85, 84, 83, 91, 66, 88, 73, 87, 72, 92, 75, 98, 72, 105, 58, 107, 54, 115, 52, 114, 55, 112, 56, 129, 51, 132, 40, 150, 33, 140, 29, 98, 35, 77, 42],
    ],
    [
        [42, 121, 96, 66, 108, 43, 111, 40, 117, 44, 123, 32, 120, 36, 119, 33, 127, 33, 134, 34, 139, 21, 147, 23, 152, 20, 158, 25, 154, 26, 166, 21, 173, 16, 184, 13, 184, 10, 150, 13, 139, 15],
        [22, 178, 63, 114, 74, 82, 84, 83, 92, 82, 103, 62, 96, 72, 96, 67, 101, 73, 107, 72, 113, 55, 118, 52, 125, 52, 118, 52, 117, 55, 135, 49, 137, 39, 157, 32, 145, 29, 97, 33, 77, 40],
    ],
];

/// Mean band energy in log2 units.
pub const MEAN_ENERGY: [f32; 25] = [
    6.437500, 6.250000, 5.750000, 5.312500, 5.062500, 4.812500, 4.500000, 4.375000, 4.875000, 4.687500, 4.562500, 4.437500, 4.875000, 4.625000, 4.312500, 4.500000,
    4.375000, 4.625000, 4.750000, 4.437500, 3.750000, 3.750000, 3.750000, 3.750000, 3.750000,
];

pub const SMALL_ENERGY: [u16; 4] = [
    4, 2, 3, 4,
];

/// Time-frequency resolution change, indexed by `[lm][4 * transient + 2 * tf_select + tf_change]`.
pub const TF_SELECT: [[i8; 8]; 4] = [
    [0, -1, 0, -1, 0, -1, 0, -1],
    [0, -1, 0, -2, 1, 0, 1, -1],
    [0, -2, 0, -3, 2, 0, 1, -1],
    [0, -2, 0, -3, 3, 0, 1, -1],
];

pub const TRIM: [u16; 12] = [
    128, 2, 4, 9, 19, 41, 87, 109, 119, 124, 126, 128,
];

pub const SPREAD: [u16; 5] = [
    32, 7, 9, 30, 32,
];

pub const TAPSET: [u16; 4] = [
    4, 2, 3, 4,
];

pub const LOG2_FRAC: [u8; 24] = [
    0, 8, 13, 16, 19, 21, 23, 24, 26, 27, 28, 29, 30, 31, 32, 32,
    33, 34, 34, 35, 36, 36, 37, 37,
];

pub const BIT_INTERLEAVE: [u8; 16] = [
    0, 1, 1, 1, 2, 3, 3, 3, 2, 3, 3, 3, 2, 3, 3, 3,
];

pub const BIT_DEINTERLEAVE: [u8; 16] = [
    0, 3, 12, 15, 48, 51, 60, 63, 192, 195, 204, 207, 240, 243, 252, 255,
];

pub const EXP2_FRAC_Q14: [i16; 8] = [
    16384, 17866, 19483, 21247, 23170, 25267, 27554, 30048,
];

/// Hadamard reordering for `N = 2, 4, 8, 16`.
pub const ORDERY: [u8; 30] = [
    1, 0, 3, 0, 2, 1, 7, 0, 4, 3, 6, 1, 5, 2, 15, 0,
    8, 7, 12, 3, 11, 4, 14, 1, 9, 6, 13, 2, 10, 5,
];

/// Inter-frame prediction coefficient for coarse energy, indexed by `lm`.
pub const ENERGY_ALPHA: [f32; 4] = [29440.0 / 32768.0, 26112.0 / 32768.0, 21248.0 / 32768.0, 16384.0 / 32768.0];

/// Inter-band prediction coefficient for coarse energy, indexed by `lm`.
pub const ENERGY_BETA: [f32; 4] = [30147.0 / 32768.0, 22282.0 / 32768.0, 12124.0 / 32768.0, 6554.0 / 32768.0];

/// Inter-band prediction coefficient for intra coded frames.
pub const ENERGY_BETA_INTRA: f32 = 4915.0 / 32768.0;

/// Comb filter taps, indexed by tapset.
pub const POSTFILTER_TAPS: [[f32; 3]; 3] = [
    [0.306_640_625, 0.217_041_015_6, 0.129_638_671_9],
    [0.463_867_187_5, 0.268_066_406_2, 0.0],
    [0.799_804_687_5, 0.100_097_656_2, 0.0],
];

/// Rotation strength per spreading decision, zero disables spreading.
pub const SPREAD_FACTOR: [i32; 3] = [15, 10, 5];
