//! Pitched sample playback voice.

use std::sync::Arc;

use crate::codec::SampleData;

/// Plays a decoded sample at a pitch ratio with loop support and linear
/// interpolation.
pub struct Sampler {
    sample: Arc<SampleData>,
    pitch: f64,
    bend: f64,
    position: f64,
    exhausted: bool,
}

impl Sampler {
    /// Create a voice over `sample` at the given note and bend ratios.
    pub fn new(sample: Arc<SampleData>, pitch: f64, bend: f64) -> Self {
        Sampler {
            sample,
            pitch,
            bend,
            position: 0.0,
            exhausted: false,
        }
    }

    /// Replace the note pitch ratio (tie updates).
    pub fn set_pitch(&mut self, pitch: f64) {
        self.pitch = pitch;
    }

    /// Replace the bend ratio.
    pub fn set_bend(&mut self, bend: f64) {
        self.bend = bend;
    }

    /// Whether a non-looping sample has run past its last frame.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn channel_value(&self, channel: usize, frame: usize) -> f64 {
        let data = &self.sample.channels[channel.min(self.sample.channels.len() - 1)];
        data.get(frame).copied().unwrap_or(0) as f64 / 32768.0
    }

    /// Produce the next output frame as (left, right), advancing the read
    /// position by the combined pitch ratio.
    pub fn next_frame(&mut self, output_rate: f64) -> (f64, f64) {
        if self.exhausted || self.sample.frames() == 0 || output_rate <= 0.0 {
            return (0.0, 0.0);
        }

        let frames = self.sample.frames();
        let frame = self.position.floor() as usize;
        if frame >= frames {
            self.exhausted = true;
            return (0.0, 0.0);
        }
        let fraction = self.position - frame as f64;
        let next = (frame + 1).min(frames - 1);

        let interp = |channel: usize| {
            let a = self.channel_value(channel, frame);
            let b = self.channel_value(channel, next);
            a + (b - a) * fraction
        };
        let left = interp(0);
        let right = if self.sample.channels.len() > 1 {
            interp(1)
        } else {
            left
        };

        let step = self.pitch * self.bend * self.sample.sample_rate as f64 / output_rate;
        self.position += step;

        // Wrap inside the loop region once the read position passes its
        // end.
        if let (Some(start), Some(end)) = (self.sample.loop_start, self.sample.loop_end) {
            let (start, end) = (start as f64, end as f64);
            if end > start && self.position >= end {
                self.position = start + (self.position - end) % (end - start);
            }
        }

        (left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(frames: Vec<i16>, looped: Option<(u32, u32)>) -> Arc<SampleData> {
        let mut data = SampleData::new(1, 32000);
        data.channels.push(frames);
        if let Some((start, end)) = looped {
            data.loop_start = Some(start);
            data.loop_end = Some(end);
        }
        Arc::new(data)
    }

    #[test]
    fn test_unity_pitch_reads_through() {
        let mut voice = Sampler::new(sample(vec![32767, 0, -32768, 0], None), 1.0, 1.0);
        let (l, _) = voice.next_frame(32000.0);
        assert!((l - 32767.0 / 32768.0).abs() < 1e-6);
        let _ = voice.next_frame(32000.0);
        let (l, r) = voice.next_frame(32000.0);
        assert!((l + 1.0).abs() < 1e-6);
        assert_eq!(l, r);
    }

    #[test]
    fn test_non_looping_sample_exhausts() {
        let mut voice = Sampler::new(sample(vec![100, 100], None), 1.0, 1.0);
        let _ = voice.next_frame(32000.0);
        let _ = voice.next_frame(32000.0);
        let _ = voice.next_frame(32000.0);
        assert!(voice.is_exhausted());
    }

    #[test]
    fn test_loop_wraps_position() {
        let mut voice = Sampler::new(sample(vec![1000; 8], Some((2, 6))), 1.0, 1.0);
        for _ in 0..100 {
            let (l, _) = voice.next_frame(32000.0);
            assert!(l > 0.0);
        }
        assert!(!voice.is_exhausted());
    }

    #[test]
    fn test_double_pitch_skips_frames() {
        let mut voice = Sampler::new(sample(vec![0, 100, 200, 300], None), 2.0, 1.0);
        let _ = voice.next_frame(32000.0); // position 0 -> 2
        let (l, _) = voice.next_frame(32000.0); // reads frame 2
        assert!((l - 200.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_lower_rate_interpolates() {
        let mut voice = Sampler::new(sample(vec![0, 32767], None), 0.5, 1.0);
        let _ = voice.next_frame(32000.0); // position 0 -> 0.5
        let (l, _) = voice.next_frame(32000.0); // halfway between frames
        assert!((l - 0.5 * 32767.0 / 32768.0).abs() < 1e-3);
    }
}
