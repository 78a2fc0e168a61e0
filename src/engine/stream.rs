use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use rtrb::RingBuffer;

use super::ModeCoordinator;

/// Frames of input headroom between the input and output callbacks.
const INPUT_RING_FRAMES: usize = 16384;

/// Scratch frames per channel for one processed block. Larger than any
/// device block cpal will hand us.
const MAX_BLOCK: usize = 8192;

/// Duplex device wiring. The input callback pushes stereo frames into a
/// lock-free ring; the output callback pops them, runs the engine over a
/// stack-built planar block at the input rate, then linear-interpolates to
/// the output device rate.
pub struct AudioStream {
    input_device: Device,
    output_device: Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    sample_format: SampleFormat,
    resample_ratio: f64,
    input_device_name: String,
    output_device_name: String,
}

impl AudioStream {
    pub fn new(debug_mode: bool) -> Result<Self> {
        let host = cpal::default_host();

        let input_device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        let output_device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;

        let input_default = input_device.default_input_config()?;
        let output_default = output_device.default_output_config()?;

        let input_device_name = input_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        let output_device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());

        // Use native configs for each device
        let input_config = StreamConfig {
            channels: input_default.channels(),
            sample_rate: input_default.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let output_config = StreamConfig {
            channels: output_default.channels(),
            sample_rate: output_default.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let resample_ratio =
            output_default.sample_rate().0 as f64 / input_default.sample_rate().0 as f64;

        if debug_mode {
            let _ = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open("debug.log")
                .map(|mut file| {
                    use std::io::Write;
                    let _ = writeln!(file, "Input device: {}", input_device_name);
                    let _ = writeln!(
                        file,
                        "  {}Hz, {}ch, {:?}",
                        input_config.sample_rate.0,
                        input_config.channels,
                        input_default.sample_format()
                    );
                    let _ = writeln!(file, "Output device: {}", output_device_name);
                    let _ = writeln!(
                        file,
                        "  {}Hz, {}ch, {:?}",
                        output_config.sample_rate.0,
                        output_config.channels,
                        output_default.sample_format()
                    );
                    let _ = writeln!(file, "Resample ratio: {:.4}", resample_ratio);
                });
        }

        Ok(Self {
            input_device,
            output_device,
            input_config,
            output_config,
            sample_format: output_default.sample_format(),
            resample_ratio,
            input_device_name,
            output_device_name,
        })
    }

    /// Build and start both streams. The coordinator moves into the output
    /// callback and is owned by it from here on; the control thread talks to
    /// it only through its EngineHandle.
    pub fn start(&self, mut coordinator: ModeCoordinator) -> Result<(Stream, Stream)> {
        let (mut input_producer, mut input_consumer) =
            RingBuffer::<f32>::new(2 * INPUT_RING_FRAMES);

        // Input: map device channels onto stereo frames and push them into
        // the ring. Mono inputs are duplicated, extra channels dropped.
        let input_channels = self.input_config.channels as usize;
        let input_stream = self.input_device.build_input_stream(
            &self.input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(input_channels.max(1)) {
                    let left = frame[0];
                    let right = frame[frame.len().min(2) - 1];
                    if input_producer.push(left).is_err() {
                        break;
                    }
                    if input_producer.push(right).is_err() {
                        break;
                    }
                }
            },
            move |_err| {
                // Error callbacks may run on the audio thread; nothing
                // allocation-free to do here but drop the notification.
            },
            None,
        )?;

        // Output: pop input frames, process at the input rate, interpolate
        // to the output rate. All buffers preallocated, the planar block is
        // built on the stack.
        let output_channels = self.output_config.channels as usize;
        let resample_ratio = self.resample_ratio;
        let mut scratch = vec![0.0f32; 2 * MAX_BLOCK];
        let mut phase = 0.0f64;

        let output_stream = self.output_device.build_output_stream(
            &self.output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let out_frames = data.len() / output_channels.max(1);
                let needed = ((out_frames as f64 / resample_ratio).ceil() as usize)
                    .clamp(1, MAX_BLOCK);

                {
                    let (left, right) = scratch.split_at_mut(MAX_BLOCK);
                    let left = &mut left[..needed];
                    let right = &mut right[..needed];

                    // Fill the block with input; underruns become silence
                    for i in 0..needed {
                        left[i] = input_consumer.pop().unwrap_or(0.0);
                        right[i] = input_consumer.pop().unwrap_or(0.0);
                    }

                    let mut block: [&mut [f32]; 2] = [left, right];
                    coordinator.process_audio(&mut block);
                }

                // Linear interpolation up or down to the device rate
                let last = needed - 1;
                for i in 0..out_frames {
                    let idx = phase.floor() as usize;
                    let frac = (phase - phase.floor()) as f32;
                    let idx_curr = idx.min(last);
                    let idx_next = (idx + 1).min(last);

                    let left = scratch[idx_curr]
                        + (scratch[idx_next] - scratch[idx_curr]) * frac;
                    let right = scratch[MAX_BLOCK + idx_curr]
                        + (scratch[MAX_BLOCK + idx_next] - scratch[MAX_BLOCK + idx_curr]) * frac;

                    for channel in 0..output_channels {
                        if let Some(sample) = data.get_mut(i * output_channels + channel) {
                            *sample = if channel % 2 == 0 { left } else { right };
                        }
                    }

                    phase += 1.0 / resample_ratio;
                }
                phase = (phase % needed as f64).max(0.0);
            },
            move |_err| {},
            None,
        )?;

        input_stream.play()?;
        output_stream.play()?;

        Ok((input_stream, output_stream))
    }

    /// The engine runs at the input device rate; the output side resamples.
    pub fn sample_rate(&self) -> u32 {
        self.input_config.sample_rate.0
    }

    pub fn block_size(&self) -> usize {
        match self.output_config.buffer_size {
            cpal::BufferSize::Fixed(size) => size as usize,
            cpal::BufferSize::Default => 512,
        }
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    pub fn input_device_name(&self) -> &str {
        &self.input_device_name
    }

    pub fn output_device_name(&self) -> &str {
        &self.output_device_name
    }
}
