// Loop Session Example
// The basic looper workflow against the live engine:
// 1. Record a few seconds of input
// 2. Commit the loop
// 3. Play it back
//
// Run with: cargo run --example loop_session

use anyhow::Result;
use loopdeck::engine::{AudioStream, EngineConfig, EngineEvent, ModeCoordinator};
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    println!("=== Loop Session Example ===\n");
    println!("This example will:");
    println!("1. Record audio from your input device for 3 seconds");
    println!("2. Commit it as a loop");
    println!("3. Play the loop back for 6 seconds\n");

    let audio_stream = AudioStream::new(false)?;
    let engine_config = EngineConfig {
        sample_rate: audio_stream.sample_rate(),
        block_size: 512,
        channels: 2,
    };

    println!(
        "Audio initialized: {}Hz ({} -> {})\n",
        engine_config.sample_rate,
        audio_stream.input_device_name(),
        audio_stream.output_device_name()
    );

    let (mut coordinator, handle, mut hub) = ModeCoordinator::new(&engine_config);
    coordinator.prepare(engine_config.sample_rate, engine_config.block_size);
    coordinator.set_trigger_enabled(false);

    let (_listener_id, events) = hub.add_listener();

    let audio_thread = thread::spawn(move || {
        let streams = audio_stream.start(coordinator);
        if let Ok((_input, _output)) = streams {
            loop {
                thread::sleep(Duration::from_millis(250));
            }
        }
    });

    print!("Press Enter when ready to record...");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    println!("\nRecording for 3 seconds. Make some noise!");
    handle.control_button();
    thread::sleep(Duration::from_secs(3));

    handle.control_button();
    thread::sleep(Duration::from_millis(200));
    hub.pump();
    for event in events.try_iter() {
        if let EngineEvent::LoopCommitted(frames) = event {
            println!(
                "Loop committed: {frames} frames ({:.2}s)",
                handle.loop_seconds()
            );
        }
    }

    println!("\nPlaying your loop for 6 seconds...");
    handle.control_button();
    thread::sleep(Duration::from_secs(6));

    handle.control_button();
    println!("\n=== Example Complete! ===");

    drop(audio_thread);
    Ok(())
}
