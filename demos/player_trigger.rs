// Player Trigger Example
// Load a WAV file, arm the trigger, and let the first loud input start it:
//
//     cargo run --example player_trigger -- path/to/file.wav

use anyhow::{Result, anyhow};
use loopdeck::engine::{AudioStream, EngineConfig, Mode, ModeCoordinator};
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: player_trigger <file.wav>"))?;

    println!("=== Player Trigger Example ===\n");

    let audio_stream = AudioStream::new(false)?;
    let engine_config = EngineConfig {
        sample_rate: audio_stream.sample_rate(),
        block_size: 512,
        channels: 2,
    };

    let (mut coordinator, handle, _hub) = ModeCoordinator::new(&engine_config);
    coordinator.prepare(engine_config.sample_rate, engine_config.block_size);
    coordinator.set_mode(Mode::Player);

    if !handle.load_file(&path) {
        return Err(anyhow!("could not load {path}"));
    }
    println!(
        "Loaded {path} ({:.2}s at {}Hz)",
        handle.player_total_time(),
        engine_config.sample_rate
    );

    let _audio_thread = thread::spawn(move || {
        if let Ok((_input, _output)) = audio_stream.start(coordinator) {
            loop {
                thread::sleep(Duration::from_millis(250));
            }
        }
    });

    handle.arm_trigger_and_wait();
    println!("\nTrigger armed. Playback starts on the first loud input sample.");
    println!("Clap, tap the mic, or play a note...\n");

    loop {
        thread::sleep(Duration::from_millis(100));
        if handle.player_is_playing() {
            break;
        }
    }

    println!("Signal detected, playing!");
    thread::sleep(Duration::from_secs(5));
    handle.stop_transport();
    println!("Done.");
    Ok(())
}
