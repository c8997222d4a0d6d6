//! Channel downmix and streaming sample-rate conversion.
//!
//! Input devices rarely run at 16kHz mono; backends normalise through these
//! before handing samples to the capture pipeline.

use rubato::{FftFixedIn, Resampler};

use crate::error::CaptureError;

/// Input samples handed to the FFT resampler per call
const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Average interleaved channels down to mono
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Mono resampler fed with blocks of any length.
///
/// Input is buffered into fixed chunks for rubato; output appears once a
/// chunk fills, so splitting the same input differently yields identical
/// output.
pub struct StreamResampler {
    resampler: Option<FftFixedIn<f32>>,
    chunk_in: usize,
    in_buf: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_hz: u32, to_hz: u32) -> Result<Self, CaptureError> {
        let chunk_in = RESAMPLER_CHUNK_SIZE;

        let resampler = if from_hz == to_hz {
            None
        } else {
            let resampler =
                FftFixedIn::<f32>::new(from_hz as usize, to_hz as usize, chunk_in, 1, 1).map_err(
                    |e| {
                        CaptureError::UnsupportedFormat(format!(
                            "cannot resample {}Hz to {}Hz: {}",
                            from_hz, to_hz, e
                        ))
                    },
                )?;
            Some(resampler)
        };

        Ok(Self {
            resampler,
            chunk_in,
            in_buf: Vec::with_capacity(chunk_in),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Output samples by which the resampled signal lags its input
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Resample `src`, appending whatever output is ready to `out`
    pub fn push(&mut self, mut src: &[f32], out: &mut Vec<f32>) {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(src);
            return;
        };

        while !src.is_empty() {
            let space = self.chunk_in - self.in_buf.len();
            let take = space.min(src.len());
            self.in_buf.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.in_buf.len() == self.chunk_in {
                if let Ok(resampled) = resampler.process(&[&self.in_buf[..]], None) {
                    out.extend_from_slice(&resampled[0]);
                }
                self.in_buf.clear();
            }
        }
    }

    /// Pad the pending input with silence to a full chunk and process it
    pub fn flush(&mut self, out: &mut Vec<f32>) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };

        self.in_buf.resize(self.chunk_in, 0.0);
        if let Ok(resampled) = resampler.process(&[&self.in_buf[..]], None) {
            out.extend_from_slice(&resampled[0]);
        }
        self.in_buf.clear();
    }
}

/// Resample a complete mono clip, compensating for resampler delay.
///
/// The result holds `len * to_hz / from_hz` samples aligned with the input.
pub fn resample_clip(mono: &[f32], from_hz: u32, to_hz: u32) -> Result<Vec<f32>, CaptureError> {
    let mut resampler = StreamResampler::new(from_hz, to_hz)?;
    if resampler.is_passthrough() {
        return Ok(mono.to_vec());
    }

    let expected = (mono.len() as u64 * to_hz as u64 / from_hz.max(1) as u64) as usize;
    let delay = resampler.output_delay();

    let mut out = Vec::with_capacity(expected + delay);
    resampler.push(mono, &mut out);
    // A flush may only top up rubato's internal buffer without producing output
    let mut idle = 0;
    while out.len() < expected + delay && idle < 4 {
        let before = out.len();
        resampler.flush(&mut out);
        idle = if out.len() == before { idle + 1 } else { 0 };
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}

/// Downmix and resample in one step, for backends that own both stages
pub struct InputNormalizer {
    channels: u16,
    resampler: StreamResampler,
    out: Vec<f32>,
}

impl InputNormalizer {
    pub fn new(channels: u16, from_hz: u32, to_hz: u32) -> Result<Self, CaptureError> {
        Ok(Self {
            channels,
            resampler: StreamResampler::new(from_hz, to_hz)?,
            out: Vec::new(),
        })
    }

    /// Normalise one device block; the returned slice is valid until the next call
    pub fn process(&mut self, interleaved: &[f32]) -> &[f32] {
        let mono = downmix_to_mono(interleaved, self.channels);
        self.out.clear();
        self.resampler.push(&mono, &mut self.out);
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.01).sin() * 0.5).collect()
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = [0.5, -0.5, 1.0, 0.0];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.0, 0.5]);
    }

    #[test]
    fn test_downmix_mono_is_identity() {
        let mono = [0.1, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&mono, 1), mono.to_vec());
    }

    #[test]
    fn test_passthrough_when_rates_match() {
        let mut resampler = StreamResampler::new(16000, 16000).unwrap();
        assert!(resampler.is_passthrough());
        assert_eq!(resampler.output_delay(), 0);

        let mut out = Vec::new();
        resampler.push(&[0.1, 0.2], &mut out);
        assert_eq!(out, vec![0.1, 0.2]);
    }

    #[test]
    fn test_output_waits_for_a_full_chunk() {
        let mut resampler = StreamResampler::new(32000, 16000).unwrap();
        let mut out = Vec::new();
        resampler.push(&sine(RESAMPLER_CHUNK_SIZE - 1), &mut out);
        assert!(out.is_empty());

        resampler.flush(&mut out);
        assert_eq!(out.len(), RESAMPLER_CHUNK_SIZE / 2);
    }

    #[test]
    fn test_downsample_tracks_rate_ratio() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        let mut out = Vec::new();
        resampler.push(&sine(RESAMPLER_CHUNK_SIZE * 30), &mut out);

        let expected = (RESAMPLER_CHUNK_SIZE * 30 / 3) as i64;
        assert!(
            (out.len() as i64 - expected).abs() <= 400,
            "Expected ~{} samples, got {}",
            expected,
            out.len()
        );
    }

    #[test]
    fn test_resampling_is_seamless_across_blocks() {
        let input = sine(4800);

        let mut whole = StreamResampler::new(48000, 16000).unwrap();
        let mut expected = Vec::new();
        whole.push(&input, &mut expected);

        let mut split = StreamResampler::new(48000, 16000).unwrap();
        let mut actual = Vec::new();
        for block in input.chunks(333) {
            split.push(block, &mut actual);
        }

        assert_eq!(expected, actual);
    }

    #[test]
    fn test_resample_clip_has_exact_length() {
        let clip = resample_clip(&sine(8000), 8000, 16000).unwrap();
        assert_eq!(clip.len(), 16000);

        let clip = resample_clip(&sine(44100), 44100, 16000).unwrap();
        assert_eq!(clip.len(), 16000);
    }

    #[test]
    fn test_resample_clip_preserves_level() {
        let constant = vec![0.5f32; 32000];
        let clip = resample_clip(&constant, 32000, 16000).unwrap();

        // Edges ring against the implicit silence around the clip
        let middle = &clip[2000..14000];
        assert!(middle.iter().all(|s| (s - 0.5).abs() < 0.01));
    }

    #[test]
    fn test_normalizer_downmixes_before_resampling() {
        let mut normalizer = InputNormalizer::new(2, 16000, 16000).unwrap();
        assert_eq!(normalizer.process(&[1.0, 0.0, 0.0, 1.0]), &[0.5, 0.5]);
    }
}
