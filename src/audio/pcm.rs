//! Float-to-PCM conversion and fixed-size frame assembly.
//!
//! Samples are scaled by 32767, rounded to nearest, and saturated to the i16
//! range. Out-of-range input never wraps.

use super::backend::AudioFrame;

/// Wire sample rate
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per transmitted frame (8192 bytes on the wire)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

const PCM_SCALE: f32 = 32767.0;

/// Encode one float sample as signed 16-bit PCM.
///
/// NaN encodes as silence.
pub fn encode_sample(sample: f32) -> i16 {
    let scaled = (sample * PCM_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode a block of float samples
pub fn encode_block(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

/// Pack samples as contiguous little-endian bytes
pub fn frame_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Accumulates arbitrary-length sample blocks into exact `block_size` frames.
///
/// Leftover samples stay pending until the next push; a partial frame is
/// never emitted.
#[derive(Debug)]
pub struct FrameAssembler {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size),
            next_sequence: 0,
        }
    }

    /// Push samples, calling `emit` once per completed frame in capture order
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        while !samples.is_empty() {
            let space = self.block_size - self.pending.len();
            let take = space.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                let frame = self.build_frame();
                self.pending.clear();
                emit(frame);
            }
        }
    }

    /// Samples waiting for the next frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.next_sequence
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn build_frame(&mut self) -> AudioFrame {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let timestamp_ms = if self.sample_rate == 0 {
            0
        } else {
            sequence * self.block_size as u64 * 1000 / self.sample_rate as u64
        };

        AudioFrame {
            samples: encode_block(&self.pending),
            sample_rate: self.sample_rate,
            sequence,
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_follow_block_duration() {
        let mut assembler = FrameAssembler::new(1600, 16000);
        let mut stamps = Vec::new();
        assembler.push(&vec![0.0; 1600 * 3], |f| stamps.push(f.timestamp_ms));
        assert_eq!(stamps, vec![0, 100, 200]);
    }

    #[test]
    fn test_zero_block_size_is_clamped() {
        let assembler = FrameAssembler::new(0, 16000);
        assert_eq!(assembler.block_size(), 1);
    }
}
