use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::io::{self, Write};
use std::time::Duration;

use crate::engine::meter::PeakMeter;
use crate::engine::{EngineEvent, EngineHandle, ListenerHub, Mode};

/// UI poll cadence. The engine publishes continuously; we read the atomic
/// snapshot and pump the listener hub at this rate.
const TICK: Duration = Duration::from_millis(33);

/// Minimal console front end: one status line, single-key transport
/// control. Consumes the engine exclusively through the handle's
/// getter/setter facade.
pub struct ConsoleUi {
    handle: EngineHandle,
    hub: ListenerHub,
    event_feed: crossbeam::channel::Receiver<EngineEvent>,
    last_event: String,
    running: bool,
}

impl ConsoleUi {
    pub fn new(handle: EngineHandle, mut hub: ListenerHub) -> Self {
        let (_id, event_feed) = hub.add_listener();
        Self {
            handle,
            hub,
            event_feed,
            last_event: String::new(),
            running: true,
        }
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        println!("Keys: SPACE transport · t trigger · m mode · a arm · p play · s stop");
        println!("      o open file · r reset · [ ] level · q quit");
        enable_raw_mode()?;

        while self.running {
            if event::poll(TICK)?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key)?;
            }

            self.hub.pump();
            while let Ok(engine_event) = self.event_feed.try_recv() {
                self.last_event = describe_event(&engine_event);
            }
            if self.handle.player_take_underrun() {
                self.last_event = "transport underrun".to_string();
            }

            self.draw_status()?;
        }

        disable_raw_mode()?;
        println!();
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<(), Box<dyn std::error::Error>> {
        match key.code {
            KeyCode::Char(' ') => self.handle.control_button(),
            KeyCode::Char('t') => {
                let enabled = self.handle.trigger_enabled();
                self.handle.set_trigger_enabled(!enabled);
            }
            KeyCode::Char('m') => {
                let next = match self.handle.mode() {
                    Mode::Looper => Mode::Player,
                    Mode::Player => Mode::Looper,
                };
                self.handle.set_mode(next);
            }
            KeyCode::Char('a') => self.handle.arm_trigger_and_wait(),
            KeyCode::Char('p') => self.handle.start_from_top(),
            KeyCode::Char('s') => self.handle.stop_transport(),
            KeyCode::Char('r') => self.handle.reset(),
            KeyCode::Char('[') => {
                self.handle.set_level((self.handle.level() - 0.05).max(0.0));
            }
            KeyCode::Char(']') => {
                self.handle.set_level((self.handle.level() + 0.05).min(1.0));
            }
            KeyCode::Char('o') => self.prompt_load()?,
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            _ => {}
        }
        Ok(())
    }

    /// Line-input prompt for a file path. Raw mode comes off for the
    /// duration so ordinary line editing works.
    fn prompt_load(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        disable_raw_mode()?;
        print!("\nFile to load: ");
        io::stdout().flush()?;
        let mut path = String::new();
        io::stdin().read_line(&mut path)?;
        let path = path.trim();
        if !path.is_empty() {
            if self.handle.load_file(path) {
                self.last_event = format!("loaded {path}");
            } else {
                self.last_event = format!("failed to load {path}");
            }
        }
        enable_raw_mode()?;
        Ok(())
    }

    fn draw_status(&self) -> Result<(), Box<dyn std::error::Error>> {
        let mode = self.handle.mode();
        let transport = match mode {
            Mode::Looper => {
                let state = self.handle.state().label();
                let armed = if self.handle.is_trigger_armed() {
                    " armed"
                } else {
                    ""
                };
                format!(
                    "{}{} {:6.1}s/{:5.1}s",
                    state,
                    armed,
                    self.handle.play_position_seconds(),
                    self.handle.loop_seconds()
                )
            }
            Mode::Player => {
                let state = if self.handle.player_is_playing() {
                    "PLAY"
                } else if self.handle.player_is_waiting() {
                    "WAIT"
                } else if self.handle.player_is_ready() {
                    "READY"
                } else {
                    "NO FILE"
                };
                format!(
                    "{} {:6.1}s/{:5.1}s",
                    state,
                    self.handle.player_current_time(),
                    self.handle.player_total_time()
                )
            }
        };

        let line = format!(
            "{} | {} | lvl {:4.2} thr {:4.2} | in {:5.1}dB out {:5.1}dB | {}",
            mode.label(),
            transport,
            self.handle.level(),
            self.handle.trigger_threshold(),
            PeakMeter::to_db(self.handle.input_meter().peak()),
            PeakMeter::to_db(self.handle.output_meter().peak()),
            self.last_event,
        );
        print!("\r{line:<100}");
        io::stdout().flush()?;
        Ok(())
    }
}

fn describe_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::StateChanged(state) => format!("state -> {}", state.label()),
        EngineEvent::ModeChanged(mode) => mode.label().to_string(),
        EngineEvent::RecordingTriggered => "trigger fired".to_string(),
        EngineEvent::LoopCommitted(frames) => format!("loop committed ({frames} frames)"),
        EngineEvent::BufferFull => "loop length cap reached".to_string(),
        EngineEvent::PlaybackStarted => "playback started".to_string(),
        EngineEvent::PlaybackStopped => "playback stopped".to_string(),
        EngineEvent::FileLoaded(frames) => format!("file loaded ({frames} frames)"),
        EngineEvent::Error(message) => message.clone(),
    }
}
