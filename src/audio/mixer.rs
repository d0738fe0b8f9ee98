// src/audio/mixer.rs
// Vocal-cancel / center-extract mixing engine with a SIMD hard limiter

use wide::f32x4;

use super::params::MixParameters;
use crate::error::MixError;

/// Interleaved stereo block produced by the capture stage
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBlock {
    samples: Vec<f32>,
}

impl AudioBlock {
    pub const CHANNELS: usize = 2;

    pub fn silence(frames: usize) -> Self {
        Self {
            samples: vec![0.0; frames * Self::CHANNELS],
        }
    }

    /// Wrap interleaved L/R samples. A trailing half frame is dropped.
    pub fn from_interleaved(mut samples: Vec<f32>) -> Self {
        samples.truncate(samples.len() - samples.len() % Self::CHANNELS);
        Self { samples }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / Self::CHANNELS
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// (left, right) for frame `index`
    pub fn frame(&self, index: usize) -> (f32, f32) {
        let base = index * Self::CHANNELS;
        (self.samples[base], self.samples[base + 1])
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

/// Check that `samples` holds whole frames of `channels` channels
pub fn validate_shape(samples: &[f32], channels: usize) -> Result<usize, MixError> {
    if channels == 0 {
        return Err(MixError::NoChannels);
    }
    if samples.len() % channels != 0 {
        return Err(MixError::RaggedBlock {
            samples: samples.len(),
            channels,
        });
    }
    Ok(samples.len() / channels)
}

/// Mix one interleaved input block into a stereo block of the same frame count.
///
/// Mono input is duplicated to both channels untouched. With two or more
/// channels, channel 0 and 1 are combined as
/// `((L - R) * vocal + (L + R) / 2 * center) * master`, hard-limited to
/// [-1.0, 1.0] and written to both output channels. A frame whose mix is not
/// finite (NaN or infinite input) comes out as silence.
pub fn mix_block(
    input: &[f32],
    channels: usize,
    params: &MixParameters,
) -> Result<AudioBlock, MixError> {
    let frames = validate_shape(input, channels)?;
    let mut output = Vec::with_capacity(frames * AudioBlock::CHANNELS);

    if channels < 2 {
        for &sample in input {
            output.push(sample);
            output.push(sample);
        }
        return Ok(AudioBlock { samples: output });
    }

    let vocal = params.vocal_removal_mix();
    let center = params.center_attenuation();
    let master = params.master_volume();

    for frame in input.chunks_exact(channels) {
        let (left, right) = (frame[0], frame[1]);
        let vocal_removed = (left - right) * vocal;
        let center_signal = ((left + right) / 2.0) * center;
        let mixed = (vocal_removed + center_signal) * master;
        let mixed = if mixed.is_finite() { mixed } else { 0.0 };
        output.push(mixed);
        output.push(mixed);
    }

    hard_limit(&mut output);
    Ok(AudioBlock { samples: output })
}

/// Clamp every sample to [-1.0, 1.0], four lanes at a time
#[inline]
fn hard_limit(buffer: &mut [f32]) {
    let one = f32x4::splat(1.0);
    let neg_one = f32x4::splat(-1.0);

    let mut chunks = buffer.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let lanes = f32x4::new([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let limited = lanes.max(neg_one).min(one);
        chunk.copy_from_slice(&limited.to_array());
    }

    for sample in chunks.into_remainder() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stereo(frames: usize, left: f32, right: f32) -> Vec<f32> {
        (0..frames).flat_map(|_| [left, right]).collect()
    }

    fn assert_all_frames(block: &AudioBlock, expected: f32) {
        for i in 0..block.frames() {
            let (l, r) = block.frame(i);
            assert!((l - expected).abs() < 1e-6, "frame {}: {} != {}", i, l, expected);
            assert_eq!(l, r);
        }
    }

    #[test]
    fn test_mono_passthrough() {
        let input = vec![0.1, -0.7, 0.9, 1.4, 0.0];
        let params = MixParameters::new(0.0, 0.0, 0.0);
        let block = mix_block(&input, 1, &params).unwrap();

        assert_eq!(block.frames(), input.len());
        for (i, &sample) in input.iter().enumerate() {
            assert_eq!(block.frame(i), (sample, sample));
        }
    }

    #[test]
    fn test_vocal_removal_only() {
        let params = MixParameters::new(0.0, 1.0, 1.0);
        let block = mix_block(&stereo(64, 0.8, 0.3), 2, &params).unwrap();
        assert_eq!(block.frames(), 64);
        assert_all_frames(&block, 0.5);
    }

    #[test]
    fn test_center_extraction_only() {
        let params = MixParameters::new(1.0, 0.0, 1.0);
        let block = mix_block(&stereo(64, 0.4, 0.6), 2, &params).unwrap();
        assert_all_frames(&block, 0.5);
    }

    #[test]
    fn test_hard_clip_boundary() {
        let params = MixParameters::new(0.0, 1.0, 1.0);
        let block = mix_block(&stereo(7, 1.0, -1.0), 2, &params).unwrap();
        for i in 0..block.frames() {
            assert_eq!(block.frame(i), (1.0, 1.0));
        }

        let block = mix_block(&stereo(7, -1.0, 1.0), 2, &params).unwrap();
        for i in 0..block.frames() {
            assert_eq!(block.frame(i), (-1.0, -1.0));
        }
    }

    #[test]
    fn test_non_finite_input_is_silenced() {
        let params = MixParameters::default();
        let nan = f32::NAN;
        let inf = f32::INFINITY;
        // Frames 0-1 land in a SIMD lane, frame 2 in the scalar tail
        for input in [
            vec![nan, 0.0, 0.1, 0.1, nan, 0.0],
            vec![inf, inf, 0.1, 0.1, inf, inf],
            vec![-inf, 0.5, 0.1, 0.1, 0.2, inf],
        ] {
            let block = mix_block(&input, 2, &params).unwrap();
            assert_eq!(block.frame(0), (0.0, 0.0));
            assert!((block.frame(1).0 - 0.06).abs() < 1e-6);
            assert_eq!(block.frame(2), (0.0, 0.0));
        }
    }

    #[test]
    fn test_extra_channels_ignored() {
        let params = MixParameters::new(0.0, 1.0, 1.0);
        let input = vec![0.8, 0.3, 0.9, -0.9, 0.8, 0.3, 0.9, -0.9];
        let block = mix_block(&input, 4, &params).unwrap();
        assert_eq!(block.frames(), 2);
        assert_all_frames(&block, 0.5);
    }

    #[test]
    fn test_malformed_shapes() {
        let params = MixParameters::default();
        assert_eq!(mix_block(&[0.1; 4], 0, &params), Err(MixError::NoChannels));
        assert_eq!(
            mix_block(&[0.1; 5], 2, &params),
            Err(MixError::RaggedBlock {
                samples: 5,
                channels: 2
            })
        );
    }

    #[test]
    fn test_empty_block() {
        let block = mix_block(&[], 2, &MixParameters::default()).unwrap();
        assert!(block.is_empty());
        assert_eq!(block.frames(), 0);
    }

    #[test]
    fn test_silence_block() {
        let block = AudioBlock::silence(16);
        assert_eq!(block.frames(), 16);
        assert!(block.is_silent());
        assert_eq!(AudioBlock::from_interleaved(vec![0.5; 5]).frames(), 2);
    }

    proptest! {
        #[test]
        fn prop_output_is_limited(
            center in 0.0f32..=1.0,
            vocal in 0.0f32..=1.0,
            master in 0.0f32..=1.5,
            samples in prop::collection::vec(
                prop_oneof![-4.0f32..4.0, prop::num::f32::ANY],
                0..256,
            ),
        ) {
            let mut input = samples;
            if input.len() % 2 == 1 {
                input.pop();
            }
            let params = MixParameters::new(center, vocal, master);
            let block = mix_block(&input, 2, &params).unwrap();
            prop_assert_eq!(block.frames(), input.len() / 2);
            for &sample in block.samples() {
                prop_assert!((-1.0..=1.0).contains(&sample));
            }
        }
    }
}
