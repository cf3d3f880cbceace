//! Conversion of SILK output to 48 kHz.
//!
//! SILK runs at 8, 12 or 16 kHz while the decoder always outputs 48 kHz audio. The resampler is
//! stateful: input that does not fill a whole processing chunk is carried over to the next call,
//! and the output it would have produced is owed to the caller until the next call or a flush.

use log::debug;
use rubato::{FftFixedInOut, Resampler as RubatoResampler};

use crate::error::{Error, Result};

/// The decoder output rate.
pub const OUTPUT_RATE: u32 = 48_000;

/// A multi-channel resampler with an explicit latency contract.
pub trait Resampler {
    /// Prepares the resampler for input at `in_rate` Hz, discarding all buffered samples.
    fn configure(&mut self, in_rate: u32, channels: usize) -> Result<()>;

    /// The input rate of the current configuration, or `None` when unconfigured.
    fn input_rate(&self) -> Option<u32>;

    /// Resamples `input` (one plane per channel) into `output`.
    ///
    /// At most `output[c].len()` samples are written per channel. Returns the number written,
    /// which may be less than the duration of the input.
    fn convert(&mut self, input: &[&[f32]], output: &mut [&mut [f32]]) -> Result<usize>;

    /// Writes exactly `pending` owed samples into `output`, padding the input with silence.
    fn flush(&mut self, output: &mut [&mut [f32]], pending: usize) -> Result<()>;

    /// Returns to the unconfigured state.
    fn reset(&mut self);
}

/// A band-limited resampler processing 10 ms chunks through an FFT.
///
/// The FFT filter adds [`SincResampler::output_delay`] samples of latency at 48 kHz, roughly
/// 5 ms, on top of the SILK decoder delay. This is longer than the latency of the fixed
/// polyphase resampler in libopus, so SILK and Hybrid output lags libopus by about 240 samples
/// and does not match it sample for sample.
pub struct SincResampler {
    inner: Option<FftFixedInOut<f32>>,
    in_rate: Option<u32>,
    /// Input samples not yet processed, per channel.
    carry: Vec<Vec<f32>>,
    /// Processed samples not yet emitted, per channel.
    ready: Vec<Vec<f32>>,
}

impl Default for SincResampler {
    fn default() -> Self {
        return SincResampler { inner: None, in_rate: None, carry: Vec::new(), ready: Vec::new() };
    }
}

impl SincResampler {
    pub fn new() -> Self {
        return Self::default();
    }

    /// Samples of latency the filter adds at the output rate, or 0 when unconfigured.
    pub fn output_delay(&self) -> usize {
        return self.inner.as_ref().map_or(0, |inner| inner.output_delay());
    }

    /// Runs every complete chunk of carried input through the resampler.
    fn process_chunks(&mut self) -> Result<()> {
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Err(Error::InternalInvariant("resampler: not configured")),
        };

        loop {
            let chunk = inner.input_frames_next();
            if self.carry.first().map_or(true, |plane| plane.len() < chunk) {
                break;
            }

            let planes = self.carry.iter().map(|plane| &plane[..chunk]).collect::<Vec<_>>();
            let resampled = inner
                .process(&planes, None)
                .map_err(|_| Error::InternalInvariant("resampler: processing failed"))?;

            for ((carry, ready), out) in self.carry.iter_mut().zip(self.ready.iter_mut()).zip(resampled) {
                carry.drain(..chunk);
                ready.extend_from_slice(&out);
            }
        }

        return Ok(());
    }

    fn emit(&mut self, output: &mut [&mut [f32]], count: usize) {
        for (ready, out) in self.ready.iter_mut().zip(output.iter_mut()) {
            out[..count].copy_from_slice(&ready[..count]);
            ready.drain(..count);
        }
    }
}

impl Resampler for SincResampler {
    fn configure(&mut self, in_rate: u32, channels: usize) -> Result<()> {
        // 10 ms of input per chunk.
        let chunk = in_rate as usize / 100;

        let inner = FftFixedInOut::<f32>::new(in_rate as usize, OUTPUT_RATE as usize, chunk, channels)
            .map_err(|_| Error::Unsupported("resampler: unsupported sample rate"))?;

        debug!("resampler: {} Hz to {} Hz, {} channel(s)", in_rate, OUTPUT_RATE, channels);

        self.inner = Some(inner);
        self.in_rate = Some(in_rate);
        self.carry = vec![Vec::new(); channels];
        self.ready = vec![Vec::new(); channels];

        return Ok(());
    }

    fn input_rate(&self) -> Option<u32> {
        return self.in_rate;
    }

    fn convert(&mut self, input: &[&[f32]], output: &mut [&mut [f32]]) -> Result<usize> {
        if input.len() < self.carry.len() || output.len() < self.ready.len() {
            return Err(Error::InternalInvariant("resampler: channel count mismatch"));
        }

        for (carry, plane) in self.carry.iter_mut().zip(input) {
            carry.extend_from_slice(plane);
        }

        self.process_chunks()?;

        let capacity = output.iter().take(self.ready.len()).map(|plane| plane.len()).min().unwrap_or(0);
        let count = self.ready.first().map_or(0, |plane| plane.len()).min(capacity);

        self.emit(output, count);

        return Ok(count);
    }

    fn flush(&mut self, output: &mut [&mut [f32]], pending: usize) -> Result<()> {
        if output.iter().take(self.ready.len()).any(|plane| plane.len() < pending) {
            return Err(Error::InternalInvariant("resampler: flush buffer too short"));
        }

        while self.ready.first().map_or(0, |plane| plane.len()) < pending {
            let chunk = match self.inner.as_ref() {
                Some(inner) => inner.input_frames_next(),
                None => return Err(Error::InternalInvariant("resampler: not configured")),
            };

            for carry in &mut self.carry {
                let len = carry.len();
                carry.resize(len + chunk - len % chunk, 0.0);
            }

            self.process_chunks()?;
        }

        self.emit(output, pending);

        return Ok(());
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(rs: &mut SincResampler, input: &[f32], capacity: usize) -> (usize, Vec<f32>) {
        let mut out = vec![0.0f32; capacity];
        let n = rs.convert(&[input], &mut [out.as_mut_slice()]).unwrap();
        out.truncate(n);
        return (n, out);
    }

    #[test]
    fn whole_chunks_produce_whole_chunks() {
        for rate in [8000u32, 12000, 16000] {
            let mut rs = SincResampler::new();
            rs.configure(rate, 1).unwrap();

            let input = vec![0.0f32; rate as usize / 50];
            let (n, _) = convert(&mut rs, &input, 960);
            assert_eq!(n, 960, "{} Hz", rate);
        }
    }

    #[test]
    fn partial_chunks_are_carried() {
        let mut rs = SincResampler::new();
        rs.configure(16000, 1).unwrap();

        let (n, _) = convert(&mut rs, &[0.0; 11], 960);
        assert_eq!(n, 0);

        let (n, _) = convert(&mut rs, &[0.0; 320], 960);
        assert_eq!(n, 960);

        let (n, _) = convert(&mut rs, &[0.0; 149], 960);
        assert_eq!(n, 480);
    }

    #[test]
    fn limited_capacity_keeps_the_rest_owed() {
        let mut rs = SincResampler::new();
        rs.configure(8000, 2).unwrap();

        let input = [0.5f32; 160];
        let mut left = vec![0.0f32; 900];
        let mut right = vec![0.0f32; 900];
        let n = rs.convert(&[&input, &input], &mut [left.as_mut_slice(), right.as_mut_slice()]).unwrap();
        assert_eq!(n, 900);

        let mut left = vec![0.0f32; 60];
        let mut right = vec![0.0f32; 60];
        rs.flush(&mut [left.as_mut_slice(), right.as_mut_slice()], 60).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn flush_zero_stuffs_the_carry() {
        let mut rs = SincResampler::new();
        rs.configure(12000, 1).unwrap();

        let (n, _) = convert(&mut rs, &[0.0; 50], 960);
        assert_eq!(n, 0);

        let mut out = vec![1.0f32; 150];
        rs.flush(&mut [out.as_mut_slice()], 150).unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn dc_survives_resampling() {
        let mut rs = SincResampler::new();
        rs.configure(16000, 1).unwrap();

        let mut last = Vec::new();
        for _ in 0..4 {
            let (_, out) = convert(&mut rs, &[0.25; 320], 960);
            last = out;
        }

        assert!(last.iter().all(|v| (v - 0.25).abs() < 1e-2));
    }

    #[test]
    fn impulse_arrives_after_the_output_delay() {
        for rate in [8000u32, 12000, 16000] {
            let mut rs = SincResampler::new();
            rs.configure(rate, 1).unwrap();

            let delay = rs.output_delay();
            assert!(delay > 0 && delay < 480, "{} Hz delay {}", rate, delay);

            let mut input = vec![0.0f32; rate as usize / 100];
            input[0] = 1.0;

            let mut out = Vec::new();
            out.extend(convert(&mut rs, &input, 480).1);
            for _ in 0..3 {
                out.extend(convert(&mut rs, &vec![0.0; rate as usize / 100], 480).1);
            }

            let peak = out
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                .map(|(i, _)| i)
                .unwrap();

            assert!(peak.abs_diff(delay) <= 1, "{} Hz: peak at {}, delay {}", rate, peak, delay);
        }
    }

    #[test]
    fn unconfigured_resampler_fails() {
        let mut rs = SincResampler::new();
        rs.configure(16000, 1).unwrap();
        rs.reset();

        assert_eq!(rs.input_rate(), None);
        let mut out = vec![0.0f32; 10];
        assert!(rs.flush(&mut [out.as_mut_slice()], 10).is_err());
    }
}
