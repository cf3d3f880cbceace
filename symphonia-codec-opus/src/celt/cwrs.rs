//! Pulse vector codebook indexing.
//!
//! A band of `n` coefficients with `k` unit pulses is coded as a single index in
//! `[0, V(n, k))`, where `V(n, k)` is the number of signed pulse vectors with `k` pulses. The
//! index is enumerated with the auxiliary function `U(n, k)`, which satisfies the same
//! recurrence `U(n, k) = U(n - 1, k) + U(n, k - 1) + U(n - 1, k - 1)`. Only one row of `U` is
//! kept in memory and it is stepped backwards one dimension at a time while decoding.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.4.2

use crate::range::RangeDecoder;

/// Replaces row `n` of `U` in `u` with row `n - 1`, with `u0` as its first entry.
fn uprev(u: &mut [u32], len: usize, mut u0: u32) {
    for j in 1..len {
        let u1 = u[j].wrapping_sub(u[j - 1]).wrapping_sub(u0);
        u[j - 1] = u0;
        u0 = u1;
    }
    u[len - 1] = u0;
}

/// Replaces row `n` of `U` in `u` with row `n + 1`, with `u0` as its first entry.
#[cfg(test)]
fn unext(u: &mut [u32], len: usize, mut u0: u32) {
    for j in 1..len {
        let u1 = u[j].wrapping_add(u[j - 1]).wrapping_add(u0);
        u[j - 1] = u0;
        u0 = u1;
    }
    u[len - 1] = u0;
}

/// Fills `u[0..k + 2]` with row `n` of `U` and returns `V(n, k)`.
///
/// Requires `n >= 2` and `k >= 1`.
fn ncwrs_urow(n: usize, k: usize, u: &mut [u32]) -> u32 {
    let len = k + 2;

    u[0] = 0;
    u[1] = 1;
    for (j, v) in u.iter_mut().enumerate().take(len).skip(2) {
        *v = ((j as u32) << 1) - 1;
    }

    for _ in 2..n {
        // Row steps on the tail only, the leading zero is fixed.
        let tail = &mut u[1..];
        let mut u0 = 1u32;
        for j in 1..k + 1 {
            let u1 = tail[j].wrapping_add(tail[j - 1]).wrapping_add(u0);
            tail[j - 1] = u0;
            u0 = u1;
        }
        tail[k] = u0;
    }

    return u[k].wrapping_add(u[k + 1]);
}

/// Expands codebook index `i` into the pulse vector `y` and returns its squared norm.
///
/// `u` must hold row `n` of `U` and is destroyed.
fn cwrsi(n: usize, mut k: usize, mut i: u32, y: &mut [i32], u: &mut [u32]) -> f32 {
    let mut yy = 0.0;

    for out in y.iter_mut().take(n) {
        let p = u[k + 1];
        let negative = i >= p;
        if negative {
            i -= p;
        }

        let yj = k;
        let mut p = u[k];
        while p > i {
            k -= 1;
            p = u[k];
        }
        i -= p;

        let val = (yj - k) as i32;
        *out = if negative { -val } else { val };
        yy += (val * val) as f32;

        uprev(u, k + 2, 0);
    }

    return yy;
}

/// Decodes a vector of `n >= 2` coefficients holding `k >= 1` pulses into `y` and returns its
/// squared norm.
pub fn decode_pulses(rc: &mut RangeDecoder<'_>, y: &mut [i32], n: usize, k: usize) -> f32 {
    let mut u = vec![0u32; k + 2];
    let v = ncwrs_urow(n, k, &mut u);
    let i = rc.decode_uniform(v);
    return cwrsi(n, k, i, y, &mut u);
}

/// Computes the codebook index of `y` and `V(n, k)`.
#[cfg(test)]
pub(crate) fn icwrs(y: &[i32], k: usize) -> (u32, u32) {
    let n = y.len();
    let mut u = vec![0u32; k + 2];

    for (j, v) in u.iter_mut().enumerate().skip(1) {
        *v = ((j as u32) << 1) - 1;
    }

    let mut kk = y[n - 1].unsigned_abs() as usize;
    let mut i = u32::from(y[n - 1] < 0);

    let mut j = n - 2;
    i = i.wrapping_add(u[kk]);
    kk += y[j].unsigned_abs() as usize;
    if y[j] < 0 {
        i = i.wrapping_add(u[kk + 1]);
    }

    while j > 0 {
        j -= 1;
        unext(&mut u, k + 2, 0);
        i = i.wrapping_add(u[kk]);
        kk += y[j].unsigned_abs() as usize;
        if y[j] < 0 {
            i = i.wrapping_add(u[kk + 1]);
        }
    }

    return (i, u[kk].wrapping_add(u[kk + 1]));
}
