use crossbeam::channel::{Receiver, Sender, bounded};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use super::looper::{LoopState, LoopStateMachine};
use super::meter::PeakMeter;
use super::player::{FeederCommand, FilePlaybackEngine, PlayerShared};
use super::{EngineCommand, EngineConfig, EngineEvent, MAX_RECORD_SECONDS, Mode};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;
const LOAD_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Scalar snapshot of the engine, written once per audio block, read by the
/// UI at its own cadence. Word-sized atomics throughout; floats travel as
/// bit patterns.
pub struct EngineShared {
    state: AtomicU8,
    mode: AtomicU8,
    prepared: AtomicBool,
    sample_rate: AtomicU32,
    rec_frames: AtomicU64,
    loop_frames: AtomicU64,
    play_frames: AtomicU64,
    level_bits: AtomicU32,
    threshold_bits: AtomicU32,
    trigger_enabled: AtomicBool,
    trigger_armed: AtomicBool,
    recording_live: AtomicBool,
    has_data: AtomicBool,
}

impl EngineShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(LoopState::Clean as u8),
            mode: AtomicU8::new(Mode::Looper as u8),
            prepared: AtomicBool::new(false),
            sample_rate: AtomicU32::new(0),
            rec_frames: AtomicU64::new(0),
            loop_frames: AtomicU64::new(0),
            play_frames: AtomicU64::new(0),
            level_bits: AtomicU32::new(1.0f32.to_bits()),
            threshold_bits: AtomicU32::new(0),
            trigger_enabled: AtomicBool::new(false),
            trigger_armed: AtomicBool::new(false),
            recording_live: AtomicBool::new(false),
            has_data: AtomicBool::new(false),
        }
    }
}

/// Composes the looper and the file player behind one engine facade.
///
/// The coordinator is owned outright by the audio callback: it drains the
/// bounded command channel at block start, dispatches the block to whichever
/// engine the `Mode` tag selects, then publishes the atomic snapshot and any
/// edge-triggered events. Both engines stay resident across mode switches,
/// so switching back restores wherever that engine was left.
pub struct ModeCoordinator {
    mode: Mode,
    looper: LoopStateMachine,
    player: FilePlaybackEngine,
    commands: Receiver<EngineCommand>,
    events: Sender<EngineEvent>,
    shared: Arc<EngineShared>,
    input_meter: Arc<PeakMeter>,
    output_meter: Arc<PeakMeter>,
    last_state: LoopState,
    last_mode: Mode,
    last_recording_live: bool,
    last_player_playing: bool,
}

impl ModeCoordinator {
    pub fn new(config: &EngineConfig) -> (Self, EngineHandle, ListenerHub) {
        let (command_tx, command_rx) = bounded(COMMAND_CAPACITY);
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);

        let looper = LoopStateMachine::new(config.channels);
        let player = FilePlaybackEngine::new(config.channels, event_tx.clone());
        let shared = Arc::new(EngineShared::new());
        let input_meter = Arc::new(PeakMeter::new());
        let output_meter = Arc::new(PeakMeter::new());

        let handle = EngineHandle {
            commands: command_tx,
            feeder: player.feeder_sender(),
            shared: Arc::clone(&shared),
            player_shared: player.shared(),
            input_meter: Arc::clone(&input_meter),
            output_meter: Arc::clone(&output_meter),
        };
        let hub = ListenerHub::new(event_rx);

        let coordinator = Self {
            mode: Mode::Looper,
            looper,
            player,
            commands: command_rx,
            events: event_tx,
            shared,
            input_meter,
            output_meter,
            last_state: LoopState::Clean,
            last_mode: Mode::Looper,
            last_recording_live: false,
            last_player_playing: false,
        };

        (coordinator, handle, hub)
    }

    /// Size both engines for the session. Call before the streams start.
    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        self.looper.prepare(sample_rate, block_size);
        self.player.prepare(sample_rate, block_size);
        self.shared
            .sample_rate
            .store(sample_rate, Ordering::Relaxed);
        self.shared
            .prepared
            .store(self.looper.is_prepared(), Ordering::Relaxed);
        self.publish();
    }

    /// The audio callback entry point: drain commands, dispatch the block,
    /// publish. Bounded work, no allocation, no locks.
    pub fn process_audio(&mut self, block: &mut [&mut [f32]]) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        self.input_meter.update_block(&*block);

        match self.mode {
            Mode::Looper => self.looper.process(block),
            Mode::Player => {
                // The trigger path reads the live input; the transport path
                // then overwrites the block from its own ring read.
                self.player.process_input_buffer(block);
                self.player.render(block);
            }
        }

        self.output_meter.update_block(&*block);
        self.publish();
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::ControlButton => self.control_button_pressed(),
            EngineCommand::Reset => self.reset(),
            EngineCommand::SetLevel(level) => self.set_level(level),
            EngineCommand::SetTriggerThreshold(threshold) => self.set_trigger_threshold(threshold),
            EngineCommand::SetTriggerEnabled(enabled) => self.set_trigger_enabled(enabled),
            EngineCommand::SetMode(mode) => self.set_mode(mode),
            EngineCommand::ArmTriggerAndWait => self.player.arm_trigger_and_wait(),
            EngineCommand::StartFromTop => self.player.start_from_top(),
            EngineCommand::StopTransport => self.player.stop(),
        }
    }

    pub fn control_button_pressed(&mut self) {
        match self.mode {
            Mode::Looper => self.looper.control_button_pressed(),
            Mode::Player => {
                if self.player.is_playing() {
                    self.player.stop();
                } else {
                    self.player.start_from_top();
                }
            }
        }
    }

    pub fn reset(&mut self) {
        match self.mode {
            Mode::Looper => self.looper.reset(),
            Mode::Player => self.player.reset(),
        }
    }

    pub fn set_level(&mut self, level: f32) {
        match self.mode {
            Mode::Looper => self.looper.set_level(level),
            Mode::Player => self.player.set_level(level),
        }
    }

    pub fn set_trigger_threshold(&mut self, threshold: f32) {
        match self.mode {
            Mode::Looper => self.looper.set_trigger_threshold(threshold),
            Mode::Player => self.player.set_trigger_threshold(threshold),
        }
    }

    pub fn set_trigger_enabled(&mut self, enabled: bool) {
        match self.mode {
            Mode::Looper => self.looper.set_trigger_enabled(enabled),
            Mode::Player => {
                if enabled {
                    self.player.arm_trigger_and_wait();
                } else {
                    self.player.cancel_trigger_wait();
                }
            }
        }
    }

    /// Tag switch only; neither engine's state is touched.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> LoopState {
        self.looper.state()
    }

    pub fn is_prepared(&self) -> bool {
        self.looper.is_prepared() && self.player.is_prepared()
    }

    pub fn is_trigger_armed(&self) -> bool {
        match self.mode {
            Mode::Looper => self.looper.is_trigger_armed(),
            Mode::Player => self.player.is_waiting_for_trigger(),
        }
    }

    pub fn is_recording_live(&self) -> bool {
        self.looper.is_recording_live()
    }

    pub fn recorded_seconds(&self) -> f64 {
        self.looper.recorded_seconds()
    }

    pub fn loop_seconds(&self) -> f64 {
        self.looper.loop_seconds()
    }

    pub fn play_position_seconds(&self) -> f64 {
        self.looper.play_position_seconds()
    }

    pub fn max_record_seconds() -> f64 {
        MAX_RECORD_SECONDS
    }

    pub fn looper(&self) -> &LoopStateMachine {
        &self.looper
    }

    pub fn player(&self) -> &FilePlaybackEngine {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut FilePlaybackEngine {
        &mut self.player
    }

    /// Store the scalar snapshot and emit edge-triggered events. Runs once
    /// per block; every send is a bounded `try_send`.
    fn publish(&mut self) {
        let state = self.looper.state();
        let shared = &self.shared;

        shared.state.store(state as u8, Ordering::Relaxed);
        shared.mode.store(self.mode as u8, Ordering::Relaxed);
        shared
            .rec_frames
            .store(self.looper.rec_frames() as u64, Ordering::Relaxed);
        shared
            .loop_frames
            .store(self.looper.loop_frames() as u64, Ordering::Relaxed);
        shared
            .play_frames
            .store(self.looper.play_frames() as u64, Ordering::Relaxed);
        shared
            .has_data
            .store(self.looper.has_data(), Ordering::Relaxed);

        let (level, threshold) = match self.mode {
            Mode::Looper => (self.looper.level(), self.looper.trigger_threshold()),
            Mode::Player => (self.player.level(), self.player.trigger_threshold()),
        };
        shared.level_bits.store(level.to_bits(), Ordering::Relaxed);
        shared
            .threshold_bits
            .store(threshold.to_bits(), Ordering::Relaxed);
        shared
            .trigger_enabled
            .store(self.looper.trigger_enabled(), Ordering::Relaxed);
        shared
            .trigger_armed
            .store(self.is_trigger_armed(), Ordering::Relaxed);
        shared
            .recording_live
            .store(self.looper.is_recording_live(), Ordering::Relaxed);

        if self.mode != self.last_mode {
            let _ = self.events.try_send(EngineEvent::ModeChanged(self.mode));
            self.last_mode = self.mode;
        }

        if state != self.last_state {
            if self.last_state == LoopState::Recording && state == LoopState::Stopped {
                let _ = self
                    .events
                    .try_send(EngineEvent::LoopCommitted(self.looper.loop_frames()));
            }
            let _ = self.events.try_send(EngineEvent::StateChanged(state));
            self.last_state = state;
        }

        if self.looper.take_buffer_full() {
            let _ = self.events.try_send(EngineEvent::BufferFull);
        }

        let recording_live = self.looper.is_rec_triggered() && state == LoopState::Recording;
        if recording_live && !self.last_recording_live {
            let _ = self.events.try_send(EngineEvent::RecordingTriggered);
        }
        self.last_recording_live = recording_live;

        let player_playing = self.player.is_playing();
        if player_playing != self.last_player_playing {
            let event = if player_playing {
                EngineEvent::PlaybackStarted
            } else {
                EngineEvent::PlaybackStopped
            };
            let _ = self.events.try_send(event);
            self.last_player_playing = player_playing;
        }
    }
}

/// The UI side of the engine: command submission plus lock-free queries.
/// Cheap to clone-construct once and hand to the control thread.
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    feeder: Sender<FeederCommand>,
    shared: Arc<EngineShared>,
    player_shared: Arc<PlayerShared>,
    input_meter: Arc<PeakMeter>,
    output_meter: Arc<PeakMeter>,
}

impl EngineHandle {
    pub fn control_button(&self) {
        let _ = self.commands.try_send(EngineCommand::ControlButton);
    }

    pub fn reset(&self) {
        let _ = self.commands.try_send(EngineCommand::Reset);
    }

    pub fn set_level(&self, level: f32) {
        let _ = self.commands.try_send(EngineCommand::SetLevel(level));
    }

    pub fn set_trigger_threshold(&self, threshold: f32) {
        let _ = self
            .commands
            .try_send(EngineCommand::SetTriggerThreshold(threshold));
    }

    pub fn set_trigger_enabled(&self, enabled: bool) {
        let _ = self
            .commands
            .try_send(EngineCommand::SetTriggerEnabled(enabled));
    }

    pub fn set_mode(&self, mode: Mode) {
        let _ = self.commands.try_send(EngineCommand::SetMode(mode));
    }

    pub fn arm_trigger_and_wait(&self) {
        let _ = self.commands.try_send(EngineCommand::ArmTriggerAndWait);
    }

    pub fn start_from_top(&self) {
        let _ = self.commands.try_send(EngineCommand::StartFromTop);
    }

    pub fn stop_transport(&self) {
        let _ = self.commands.try_send(EngineCommand::StopTransport);
    }

    /// Blocking file load: stops the transport, hands the path to the
    /// feeder thread, waits for its verdict. UI-thread only.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> bool {
        let _ = self.commands.try_send(EngineCommand::StopTransport);
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .feeder
            .send(FeederCommand::Load {
                path: path.as_ref().to_path_buf(),
                reply: reply_tx,
            })
            .is_err()
        {
            return false;
        }
        matches!(reply_rx.recv_timeout(LOAD_REPLY_TIMEOUT), Ok(true))
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.shared.state.load(Ordering::Relaxed))
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.shared.mode.load(Ordering::Relaxed))
    }

    pub fn is_prepared(&self) -> bool {
        self.shared.prepared.load(Ordering::Relaxed)
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.shared.level_bits.load(Ordering::Relaxed))
    }

    pub fn trigger_threshold(&self) -> f32 {
        f32::from_bits(self.shared.threshold_bits.load(Ordering::Relaxed))
    }

    pub fn trigger_enabled(&self) -> bool {
        self.shared.trigger_enabled.load(Ordering::Relaxed)
    }

    pub fn is_trigger_armed(&self) -> bool {
        self.shared.trigger_armed.load(Ordering::Relaxed)
    }

    pub fn is_recording_live(&self) -> bool {
        self.shared.recording_live.load(Ordering::Relaxed)
    }

    pub fn has_loop(&self) -> bool {
        self.shared.has_data.load(Ordering::Relaxed)
    }

    pub fn recorded_seconds(&self) -> f64 {
        self.frames_to_seconds(self.shared.rec_frames.load(Ordering::Relaxed))
    }

    pub fn loop_seconds(&self) -> f64 {
        self.frames_to_seconds(self.shared.loop_frames.load(Ordering::Relaxed))
    }

    pub fn play_position_seconds(&self) -> f64 {
        self.frames_to_seconds(self.shared.play_frames.load(Ordering::Relaxed))
    }

    pub fn max_record_seconds(&self) -> f64 {
        MAX_RECORD_SECONDS
    }

    pub fn player_is_ready(&self) -> bool {
        self.player_shared.is_ready()
    }

    pub fn player_is_playing(&self) -> bool {
        self.player_shared.is_playing()
    }

    pub fn player_is_waiting(&self) -> bool {
        self.player_shared.is_waiting_for_trigger()
    }

    pub fn player_current_time(&self) -> f64 {
        self.player_shared.current_time()
    }

    pub fn player_total_time(&self) -> f64 {
        self.player_shared.total_time()
    }

    /// One-shot: true when the transport ran dry since the last call.
    pub fn player_take_underrun(&self) -> bool {
        self.player_shared.take_underrun()
    }

    pub fn input_meter(&self) -> &PeakMeter {
        &self.input_meter
    }

    pub fn output_meter(&self) -> &PeakMeter {
        &self.output_meter
    }

    fn frames_to_seconds(&self, frames: u64) -> f64 {
        let rate = self.shared.sample_rate.load(Ordering::Relaxed);
        if rate == 0 {
            return 0.0;
        }
        frames as f64 / rate as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

/// UI-side fan-out for engine events. The audio thread only ever does a
/// bounded `try_send` into the hub's channel; subscribers get their copies
/// when the consuming thread calls `pump()`, typically on its 30 Hz tick.
pub struct ListenerHub {
    events: Receiver<EngineEvent>,
    listeners: Vec<(usize, Sender<EngineEvent>)>,
    next_id: usize,
}

impl ListenerHub {
    fn new(events: Receiver<EngineEvent>) -> Self {
        Self {
            events,
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    pub fn add_listener(&mut self) -> (ListenerId, Receiver<EngineEvent>) {
        let (tx, rx) = bounded(EVENT_CAPACITY);
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, tx));
        (ListenerId(id), rx)
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(listener, _)| *listener != id.0);
    }

    /// Drain pending events and forward each to every subscriber. Returns
    /// the number of events delivered. A subscriber that stops draining its
    /// queue loses events rather than stalling anyone else.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.events.try_recv() {
            for (_, listener) in &self.listeners {
                let _ = listener.try_send(event.clone());
            }
            delivered += 1;
        }
        delivered
    }
}
