//! Sample-format helpers shared by the capture backends.

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Speech energy sits below 8kHz, so no anti-alias filter is applied when
/// going from 44.1/48kHz down to 16kHz.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

/// Linear resampler for a continuous stream delivered in pieces.
///
/// Carries the fractional source position and the last input sample across
/// calls, so chunk boundaries neither drop samples nor restart the phase.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    src_rate: u32,
    dst_rate: u32,
    /// Source samples advanced per output sample
    step: f64,
    /// Position of the next output, relative to `carry` (or the first new sample)
    pos: f64,
    carry: Option<f32>,
}

impl StreamResampler {
    pub fn new(src_rate: u32, dst_rate: u32) -> Self {
        Self {
            src_rate,
            dst_rate,
            step: src_rate.max(1) as f64 / dst_rate.max(1) as f64,
            pos: 0.0,
            carry: None,
        }
    }

    pub fn src_rate(&self) -> u32 {
        self.src_rate
    }

    pub fn dst_rate(&self) -> u32 {
        self.dst_rate
    }

    fn is_passthrough(&self) -> bool {
        self.src_rate == self.dst_rate || self.src_rate == 0 || self.dst_rate == 0
    }

    /// Resample the next piece of the stream.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let mut source = Vec::with_capacity(input.len() + 1);
        source.extend(self.carry);
        source.extend_from_slice(input);

        let last = source.len() - 1;
        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);

        // Interpolation needs the following sample, so stop short of the last one
        while (self.pos as usize) < last {
            let idx = self.pos as usize;
            let frac = self.pos - idx as f64;
            let sample = source[idx] as f64 * (1.0 - frac) + source[idx + 1] as f64 * frac;
            output.push(sample as f32);
            self.pos += self.step;
        }

        // The last sample becomes index 0 of the next call
        self.pos -= last as f64;
        self.carry = Some(source[last]);

        output
    }

    /// Forget the stream position, e.g. after playback was cut.
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.carry = None;
    }
}

/// Collects arbitrary-sized device buffers into fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Append samples and drain every complete frame.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mono_averages_channels() {
        let mono = to_mono(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_resample_48k_to_16k_length() {
        let input = vec![0.25f32; 4800];
        let output = resample_linear(&input, 48000, 16000);
        assert_eq!(output.len(), 1600);
        assert!(output.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 16000, 16000), input);
    }

    #[test]
    fn test_stream_resampler_keeps_rate_across_device_buffers() {
        let mut resampler = StreamResampler::new(44100, 16000);

        let produced: usize = (0..86)
            .map(|_| resampler.process(&[0.1; 512]).len())
            .sum();

        let expected = (86 * 512) as f64 * 16000.0 / 44100.0;
        assert!(
            (produced as f64 - expected).abs() <= 1.0,
            "produced {produced}, expected {expected:.1}"
        );
    }

    #[test]
    fn test_stream_resampler_upsampling_chunks_stay_in_step() {
        let mut resampler = StreamResampler::new(24000, 44100);

        let produced: usize = (0..100)
            .map(|_| resampler.process(&[0.0; 1001]).len())
            .sum();

        // At most the one held-back input sample is still pending
        let expected = 100_100.0 * 44100.0 / 24000.0;
        assert!((produced as f64 - expected).abs() <= 44100.0 / 24000.0 + 1.0);
    }

    #[test]
    fn test_stream_resampler_interpolates_across_boundary() {
        let mut resampler = StreamResampler::new(2, 4);

        // A ramp split in two must come out as one continuous ramp
        let mut out = resampler.process(&[0.0, 1.0]);
        out.extend(resampler.process(&[2.0, 3.0]));

        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn test_stream_resampler_same_rate_is_identity() {
        let mut resampler = StreamResampler::new(16000, 16000);
        assert_eq!(resampler.process(&[0.1, 0.2]), vec![0.1, 0.2]);
    }

    #[test]
    fn test_stream_resampler_reset_restarts_phase() {
        let mut resampler = StreamResampler::new(2, 4);
        resampler.process(&[0.0, 1.0]);
        resampler.reset();

        assert_eq!(resampler.process(&[4.0, 6.0]), vec![4.0, 5.0]);
    }

    #[test]
    fn test_assembler_emits_fixed_frames() {
        let mut assembler = FrameAssembler::new(4);

        assert!(assembler.push(&[0.0; 3]).is_empty());
        let frames = assembler.push(&[1.0; 6]);

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(frames[0], vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(assembler.pending(), 1);
    }
}
