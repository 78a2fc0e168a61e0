use anyhow::{Result, anyhow};
use hound::{SampleFormat, WavReader};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::Path;

/// A file decoded to the engine's channel layout and sample rate,
/// interleaved frame by frame.
#[derive(Debug)]
pub struct DecodedFile {
    pub samples: Vec<f32>,
    pub frames: usize,
    pub source_rate: u32,
}

/// Open a WAV file, sniffing integer vs float encoding and bit depth, and
/// convert it to `channels` interleaved float channels at `target_rate`.
///
/// Files with a matching channel count keep their image; anything else is
/// downmixed to mono and fanned out. Runs on the feeder thread, never the
/// audio callback.
pub fn decode_file<P: AsRef<Path>>(
    path: P,
    target_rate: u32,
    channels: usize,
) -> Result<DecodedFile> {
    if target_rate == 0 || channels == 0 {
        return Err(anyhow!("engine not prepared"));
    }

    let mut reader = WavReader::open(&path)?;
    let spec = reader.spec();

    let raw_samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            // Scale integer samples into [-1.0, 1.0]; powi keeps 32-bit
            // content in range where an integer shift would overflow
            let max_value = 2.0f32.powi(spec.bits_per_sample as i32 - 1);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    if raw_samples.is_empty() {
        return Err(anyhow!("empty audio file"));
    }

    let planar = to_engine_channels(&raw_samples, spec.channels as usize, channels);

    let resampled = if spec.sample_rate == target_rate {
        planar
    } else {
        resample_planar(planar, spec.sample_rate, target_rate)?
    };

    let frames = resampled.iter().map(|ch| ch.len()).min().unwrap_or(0);
    let mut samples = Vec::with_capacity(frames * channels);
    for frame in 0..frames {
        for channel in &resampled {
            samples.push(channel[frame]);
        }
    }

    Ok(DecodedFile {
        samples,
        frames,
        source_rate: spec.sample_rate,
    })
}

fn to_engine_channels(
    interleaved: &[f32],
    file_channels: usize,
    engine_channels: usize,
) -> Vec<Vec<f32>> {
    let file_channels = file_channels.max(1);

    if file_channels == engine_channels {
        let frames = interleaved.len() / file_channels;
        let mut planar = vec![Vec::with_capacity(frames); engine_channels];
        for frame in interleaved.chunks_exact(file_channels) {
            for (channel, &sample) in planar.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        return planar;
    }

    // Downmix to mono by averaging, then fan out
    let mono: Vec<f32> = interleaved
        .chunks(file_channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    vec![mono; engine_channels]
}

fn resample_planar(
    planar: Vec<Vec<f32>>,
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<Vec<f32>>> {
    let channels = planar.len();
    let frames = planar.iter().map(|ch| ch.len()).min().unwrap_or(0);

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        2.0,
        params,
        frames,
        channels,
    )?;

    let output = resampler.process(&planar, None)?;
    Ok(output)
}
