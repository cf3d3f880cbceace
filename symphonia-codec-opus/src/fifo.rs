//! A planar sample FIFO.

use std::collections::VecDeque;

/// A first-in first-out queue of planar `f32` samples with a fixed channel count.
///
/// All channels always hold the same number of samples.
#[derive(Debug, Clone)]
pub struct SampleFifo {
    planes: Vec<VecDeque<f32>>,
}

impl SampleFifo {
    pub fn new(channels: usize) -> Self {
        return SampleFifo { planes: vec![VecDeque::new(); channels] };
    }

    pub fn channels(&self) -> usize {
        return self.planes.len();
    }

    /// The number of samples queued per channel.
    pub fn len(&self) -> usize {
        return self.planes.first().map_or(0, |plane| plane.len());
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Appends `count` samples from the front of each input plane.
    pub fn push(&mut self, input: &[&[f32]], count: usize) {
        for (plane, src) in self.planes.iter_mut().zip(input) {
            plane.extend(&src[..count]);
        }
    }

    /// Appends `count` samples from the front of each input plane, starting at `offset`.
    pub fn push_from(&mut self, input: &[Vec<f32>], offset: usize, count: usize) {
        for (plane, src) in self.planes.iter_mut().zip(input) {
            plane.extend(&src[offset..offset + count]);
        }
    }

    /// Moves up to `count` samples into the front of each output plane. Returns the number moved.
    pub fn pop_into(&mut self, out: &mut [&mut [f32]], count: usize) -> usize {
        let count = count.min(self.len());

        for (plane, dst) in self.planes.iter_mut().zip(out.iter_mut()) {
            for (d, s) in dst[..count].iter_mut().zip(plane.drain(..count)) {
                *d = s;
            }
        }

        return count;
    }

    /// Like [`SampleFifo::pop_into`], but adds the samples to the output.
    pub fn pop_add(&mut self, out: &mut [&mut [f32]], count: usize) -> usize {
        let count = count.min(self.len());

        for (plane, dst) in self.planes.iter_mut().zip(out.iter_mut()) {
            for (d, s) in dst[..count].iter_mut().zip(plane.drain(..count)) {
                *d += s;
            }
        }

        return count;
    }

    /// Reads the sample at `index` of `channel` without removing it.
    pub fn peek(&self, channel: usize, index: usize) -> Option<f32> {
        return self.planes.get(channel).and_then(|plane| plane.get(index).copied());
    }

    /// Removes every queued sample and returns how many were queued per channel.
    pub fn drain(&mut self) -> usize {
        let len = self.len();
        self.clear();
        return len;
    }

    pub fn clear(&mut self) {
        for plane in &mut self.planes {
            plane.clear();
        }
    }
}
