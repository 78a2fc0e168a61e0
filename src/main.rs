use anyhow::Result;
use loopdeck::config::Config;
use loopdeck::engine::{AudioStream, EngineConfig, Mode, ModeCoordinator};
use loopdeck::ui::ConsoleUi;
use std::thread;

fn print_help() {
    println!("Loopdeck - trigger-armed audio looper and file player");
    println!();
    println!("USAGE:");
    println!("    loopdeck [OPTIONS] [FILE]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help      Print this help message");
    println!("    --debug         Enable debug logging to debug.log");
    println!();
    println!("ARGS:");
    println!("    FILE            WAV file to preload into the player");
    println!();
    println!("DESCRIPTION:");
    println!("    Records a loop of live audio and replays it seamlessly, or");
    println!("    plays a file from disk. Both engines support trigger-armed");
    println!("    starts: arm once, and recording or playback begins on the");
    println!("    first input sample over the threshold.");
    println!();
    println!("CONTROLS:");
    println!("    SPACE  Transport button (record/stop/play, or player start/stop)");
    println!("    T      Toggle trigger arming");
    println!("    M      Switch between looper and player mode");
    println!("    A      Arm the player trigger");
    println!("    P      Start player from the top");
    println!("    S      Stop the player transport");
    println!("    O      Load a WAV file into the player");
    println!("    R      Reset the active engine");
    println!("    [ ]    Adjust output level");
    println!("    Q      Quit");
    println!();
    println!("CONFIG:");
    println!("    Reads loopdeck.toml from the working directory when present.");
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_help();
        return Ok(());
    }

    let debug_mode = args.contains(&"--debug".to_string());
    let preload = args
        .iter()
        .skip(1)
        .find(|arg| !arg.starts_with('-'))
        .cloned();

    if debug_mode {
        println!("Starting Loopdeck in DEBUG mode...");
    } else {
        println!("Starting Loopdeck...");
    }

    let config = Config::load_or_default("loopdeck.toml");

    // Probe the devices first so the engine runs at the real input rate
    let audio_stream = AudioStream::new(debug_mode)?;
    let engine_config = EngineConfig {
        sample_rate: audio_stream.sample_rate(),
        block_size: config.block_size,
        channels: 2,
    };

    if debug_mode {
        println!(
            "Audio config: {}Hz, buffer size: {} ({} -> {})",
            engine_config.sample_rate,
            engine_config.block_size,
            audio_stream.input_device_name(),
            audio_stream.output_device_name()
        );
    }

    let (mut coordinator, handle, hub) = ModeCoordinator::new(&engine_config);
    coordinator.prepare(engine_config.sample_rate, engine_config.block_size);

    // Startup settings: the player keeps its own trigger/level copies
    coordinator.player_mut().set_level(config.level);
    coordinator
        .player_mut()
        .set_trigger_threshold(config.trigger_threshold);
    coordinator.set_level(config.level);
    coordinator.set_trigger_threshold(config.trigger_threshold);
    coordinator.set_trigger_enabled(config.trigger_enabled);
    coordinator.set_mode(config.engine_mode());

    if let Some(path) = preload {
        if handle.load_file(&path) {
            coordinator.set_mode(Mode::Player);
            println!("Preloaded {path}");
        } else {
            eprintln!("Could not load {path}");
        }
    }

    let _audio_thread = thread::spawn(move || {
        if let Err(e) = run_audio_thread(audio_stream, coordinator) {
            eprintln!("Audio thread error: {e}");
        }
    });

    let mut ui = ConsoleUi::new(handle, hub);
    ui.run()
        .map_err(|e| anyhow::anyhow!("UI run failed: {e}"))?;

    println!("Loopdeck stopped.");
    Ok(())
}

fn run_audio_thread(audio_stream: AudioStream, coordinator: ModeCoordinator) -> Result<()> {
    let (_input_stream, _output_stream) = audio_stream.start(coordinator)?;

    // Keep both streams alive
    loop {
        thread::sleep(std::time::Duration::from_secs(1));
    }
}
