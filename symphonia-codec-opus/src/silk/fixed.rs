//! Fixed-point arithmetic shared by the SILK decoder.
//!
//! SILK is defined in integer arithmetic (RFC 6716 Appendix A). The helpers below reproduce its
//! rounding and truncation exactly so that decoded samples are bit-exact.
//!
//! Naming follows the operand widths: `w` is a 32-bit word, `b` is the bottom 16 bits of a word.

/// `(a * b[15:0]) >> 16`
#[inline]
pub fn smulwb(a: i32, b: i32) -> i32 {
    return ((i64::from(a) * i64::from(b as i16)) >> 16) as i32;
}

/// `a + ((b * c[15:0]) >> 16)`
#[inline]
pub fn smlawb(a: i32, b: i32, c: i32) -> i32 {
    return a.wrapping_add(smulwb(b, c));
}

/// `(a * b) >> 16`
#[inline]
pub fn smulww(a: i32, b: i32) -> i32 {
    return ((i64::from(a) * i64::from(b)) >> 16) as i32;
}

#[inline]
pub fn smlaww(a: i32, b: i32, c: i32) -> i32 {
    return a.wrapping_add(smulww(b, c));
}

/// `a[15:0] * b[15:0]`
#[inline]
pub fn smulbb(a: i32, b: i32) -> i32 {
    return i32::from(a as i16) * i32::from(b as i16);
}

#[inline]
pub fn smlabb(a: i32, b: i32, c: i32) -> i32 {
    return a.wrapping_add(smulbb(b, c));
}

/// Most significant word of the 64-bit product.
#[inline]
pub fn smmul(a: i32, b: i32) -> i32 {
    return ((i64::from(a) * i64::from(b)) >> 32) as i32;
}

#[inline]
pub fn rshift_round(a: i32, shift: u32) -> i32 {
    if shift == 1 {
        return (a >> 1) + (a & 1);
    }
    return ((a >> (shift - 1)) + 1) >> 1;
}

#[inline]
pub fn rshift_round64(a: i64, shift: u32) -> i64 {
    if shift == 1 {
        return (a >> 1) + (a & 1);
    }
    return ((a >> (shift - 1)) + 1) >> 1;
}

#[inline]
pub fn sat16(a: i32) -> i16 {
    return a.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
}

/// Left shift that saturates instead of overflowing.
#[inline]
pub fn lshift_sat32(a: i32, shift: u32) -> i32 {
    return a.clamp(i32::MIN >> shift, i32::MAX >> shift) << shift;
}

#[inline]
pub fn clz32(a: i32) -> i32 {
    return a.leading_zeros() as i32;
}

/// Approximates `(a << q_res) / b` with 32 bits of precision.
pub fn div32_varq(a: i32, b: i32, q_res: i32) -> i32 {
    debug_assert!(b != 0);
    debug_assert!(q_res >= 0);

    let a_headrm = clz32(a.wrapping_abs()) - 1;
    let mut a_nrm = a << a_headrm;
    let b_headrm = clz32(b.wrapping_abs()) - 1;
    let b_nrm = b << b_headrm;

    // Inverse of b with 14 bits of precision.
    let b_inv = (i32::MAX >> 2) / (b_nrm >> 16);

    let mut result = smulwb(a_nrm, b_inv);

    // The residual is small, intermediate wrap-around is harmless.
    a_nrm = a_nrm.wrapping_sub(smmul(b_nrm, result).wrapping_shl(3));

    result = smlawb(result, a_nrm, b_inv);

    let lshift = 29 + a_headrm - b_headrm - q_res;
    if lshift < 0 {
        return lshift_sat32(result, (-lshift) as u32);
    }
    if lshift < 32 {
        return result >> lshift;
    }
    return 0;
}

/// Approximates `(1 << q_res) / b`.
pub fn inverse32_varq(b: i32, q_res: i32) -> i32 {
    debug_assert!(b != 0);
    debug_assert!(q_res > 0);

    let b_headrm = clz32(b.wrapping_abs()) - 1;
    let b_nrm = b << b_headrm;

    let b_inv = (i32::MAX >> 2) / (b_nrm >> 16);

    let mut result = b_inv << 16;

    let err_q32 = ((1i32 << 29) - smulwb(b_nrm, b_inv)) << 3;

    result = smlaww(result, err_q32, b_inv);

    let lshift = 61 - b_headrm - q_res;
    if lshift <= 0 {
        return lshift_sat32(result, (-lshift) as u32);
    }
    if lshift < 32 {
        return result >> lshift;
    }
    return 0;
}

/// Approximates `2^(x / 128)`.
pub fn log2lin(in_log_q7: i32) -> i32 {
    if in_log_q7 < 0 {
        return 0;
    }
    else if in_log_q7 >= 3967 {
        return i32::MAX;
    }

    let out = 1i32 << (in_log_q7 >> 7);
    let frac_q7 = in_log_q7 & 0x7f;
    let parabola = smlawb(frac_q7, smulbb(frac_q7, 128 - frac_q7), -174);

    if in_log_q7 < 2048 {
        return out + ((out * parabola) >> 7);
    }
    return out + (out >> 7) * parabola;
}

/// Linear congruential generator used for the excitation sign dither.
#[inline]
pub fn rand(seed: i32) -> i32 {
    return 907_633_515i32.wrapping_add(seed.wrapping_mul(196_314_165));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_shifts() {
        assert_eq!(rshift_round(5, 1), 3);
        assert_eq!(rshift_round(-5, 1), -2);
        assert_eq!(rshift_round(1000, 4), 63);
        assert_eq!(rshift_round64(-1 << 40, 8), -1 << 32);
    }

    #[test]
    fn bottom_word_products() {
        assert_eq!(smulwb(1 << 16, 0x1_0003), 3);
        assert_eq!(smulbb(0x1_0002, -3), -6);
        assert_eq!(smlawb(10, 1 << 17, -1), 8);
        assert_eq!(smmul(1 << 30, 1 << 30), 1 << 28);
    }

    #[test]
    fn saturation() {
        assert_eq!(sat16(40_000), i16::MAX);
        assert_eq!(sat16(-40_000), i16::MIN);
        assert_eq!(lshift_sat32(1 << 30, 4), i32::MAX >> 4 << 4);
        assert_eq!(lshift_sat32(-3, 2), -12);
    }

    #[test]
    fn variable_q_division() {
        assert!((div32_varq(1 << 16, 1 << 16, 16) - (1 << 16)).abs() <= 1);
        let half = div32_varq(1, 2, 16);
        assert!((half - 32768).abs() <= 1);

        let inv = inverse32_varq(1 << 16, 47);
        assert!(inv >= i32::MAX - 2);
        assert!((inverse32_varq(3, 16) - 21845).abs() <= 1);
    }

    #[test]
    fn log2lin_endpoints() {
        assert_eq!(log2lin(-1), 0);
        assert_eq!(log2lin(0), 1);
        assert_eq!(log2lin(7 << 7), 128);
        assert_eq!(log2lin(3967), i32::MAX);
        assert!(log2lin(20 << 7) >= 1 << 20);
        assert!(log2lin((20 << 7) + 64) > log2lin(20 << 7));
    }

    #[test]
    fn lcg_sequence() {
        assert_eq!(rand(0), 907_633_515);
        assert_eq!(rand(1), 907_633_515 + 196_314_165);
    }
}
