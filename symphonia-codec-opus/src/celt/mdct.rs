//! The inverse MDCT used by CELT.
//!
//! CELT transforms blocks of `N` spectral coefficients into `N` time samples plus the windowed
//! overlap. The time domain aliasing of the overlap region is cancelled against the tail of the
//! previous block, which the caller leaves in place in front of the output.
//!
//! https://datatracker.ietf.org/doc/html/rfc6716#section-4.3.7

use std::sync::Arc;

use rustfft::num_complex::Complex;

use crate::celt::OVERLAP;

/// A half-length inverse MDCT with a low-overlap window.
pub struct Imdct {
    fft: Arc<dyn rustfft::Fft<f32>>,
    fft_scratch: Box<[Complex<f32>]>,
    scratch: Box<[Complex<f32>]>,
    buf: Box<[f32]>,
    trig: Box<[f32]>,
}

impl Imdct {
    /// Instantiate an IMDCT taking `n` spectral coefficients.
    pub fn new(n: usize) -> Self {
        assert!(n % 4 == 0, "n must be a multiple of 4");

        // The full transform length.
        let len = 2 * n;
        let n4 = n / 2;

        let trig = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * (i as f64 + 0.125) / len as f64).cos() as f32)
            .collect::<Vec<f32>>();

        let mut planner = rustfft::FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n4);

        let fft_scratch = vec![Default::default(); fft.get_inplace_scratch_len()].into_boxed_slice();
        let scratch = vec![Default::default(); n4].into_boxed_slice();
        let buf = vec![0.0; n].into_boxed_slice();

        Imdct { fft, fft_scratch, scratch, buf, trig: trig.into_boxed_slice() }
    }

    /// Transforms the coefficients `spec[0], spec[stride], ...` and overlap-adds the result.
    ///
    /// `out` must hold at least `n + OVERLAP / 2` samples. Its first `OVERLAP` samples must hold
    /// the unwindowed tail of the previous block on entry. On return `out[..n]` is final and the
    /// samples after it are the tail for the next block.
    pub fn backward(&mut self, spec: &[f32], stride: usize, out: &mut [f32], window: &[f32; OVERLAP]) {
        let n2 = self.buf.len();
        let n4 = n2 >> 1;

        let (t0, t1) = self.trig.split_at(n4);

        // Pre-rotation. The real and imaginary parts are swapped to get an inverse transform
        // out of a forward FFT.
        for (i, z) in self.scratch.iter_mut().enumerate() {
            let xp1 = spec[2 * i * stride];
            let xp2 = spec[stride * (n2 - 1 - 2 * i)];

            let yr = xp2 * t0[i] + xp1 * t1[i];
            let yi = xp1 * t0[i] - xp2 * t1[i];
            *z = Complex::new(yi, yr);
        }

        self.fft.process_with_scratch(&mut self.scratch, &mut self.fft_scratch);

        // Post-rotation, de-shuffling from both ends of the buffer.
        for (i, z) in self.scratch.iter().enumerate() {
            let re = z.im;
            let im = z.re;

            self.buf[2 * i] = re * t0[i] + im * t1[i];
            self.buf[n2 - 1 - 2 * i] = re * t1[i] - im * t0[i];
        }

        out[OVERLAP / 2..OVERLAP / 2 + n2].copy_from_slice(&self.buf);

        // Mirror on both sides of the overlap for time domain aliasing cancellation.
        for i in 0..OVERLAP / 2 {
            let x1 = out[OVERLAP - 1 - i];
            let x2 = out[i];
            let w1 = window[i];
            let w2 = window[OVERLAP - 1 - i];

            out[i] = w2 * x2 - w1 * x1;
            out[OVERLAP - 1 - i] = w1 * x2 + w2 * x1;
        }
    }
}
