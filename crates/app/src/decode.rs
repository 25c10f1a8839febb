use std::path::Path;

use aurora_core::{AuroraError, MemorySource, Result};
use hound::{SampleFormat, WavReader};

/// Decodes a WAV file into a mono in-memory track.
pub fn read_wav(path: &Path) -> Result<MemorySource> {
    let mut reader = WavReader::open(path).map_err(|err| wav_error(path, err))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|err| wav_error(path, err))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|err| wav_error(path, err))?
        }
    };

    tracing::info!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        frames = interleaved.len() / spec.channels.max(1) as usize,
        "decoded audio"
    );
    Ok(MemorySource::from_interleaved(
        &interleaved,
        spec.channels as usize,
        spec.sample_rate,
    ))
}

fn wav_error(path: &Path, err: hound::Error) -> AuroraError {
    AuroraError::msg(format!("failed to read {}: {err}", path.display()))
}
