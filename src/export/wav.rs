//! WAV file export for rendered sequences.

use std::path::Path;

use crate::error::Result;
use crate::synth::SequenceRenderer;

/// Render everything scheduled on `renderer` and write it to a 16-bit WAV.
pub fn export_to_wav<P: AsRef<Path>>(renderer: &mut SequenceRenderer, output_path: P) -> Result<()> {
    let config = renderer.config();
    let samples = renderer.render_all();
    write_wav_file(
        output_path.as_ref(),
        &samples,
        config.sample_rate,
        config.channels,
    )
}

/// Write interleaved float samples to a 16-bit WAV file.
pub fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| format!("Failed to create WAV file: {}", e))?;

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| format!("Failed to write sample: {}", e))?;
    }

    writer
        .finalize()
        .map_err(|e| format!("Failed to finalize WAV file: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_wav_round_trips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let samples = vec![0.0f32, 0.5, -0.5, 1.0];
        write_wav_file(&path, &samples, 32000, 2).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 32000);
        assert_eq!(spec.channels, 2);
        assert_eq!(reader.len(), 4);
    }
}
