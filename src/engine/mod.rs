pub mod coordinator;
pub mod dsp;
pub mod io;
pub mod loop_buffer;
pub mod looper;
pub mod meter;
pub mod player;
pub mod stream;
pub mod trigger;

pub use coordinator::{EngineHandle, ListenerHub, ModeCoordinator};
pub use looper::{LoopState, LoopStateMachine, MAX_RECORD_SECONDS};
pub use meter::PeakMeter;
pub use player::FilePlaybackEngine;
pub use stream::AudioStream;
pub use trigger::TriggerDetector;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub channels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 512,
            channels: 2,
        }
    }
}

/// Which sub-engine owns the audio callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Looper = 0,
    Player = 1,
}

impl Mode {
    pub(crate) fn from_u8(raw: u8) -> Self {
        if raw == 1 { Mode::Player } else { Mode::Looper }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Looper => "LOOPER MODE",
            Mode::Player => "PLAYER MODE",
        }
    }
}

/// Control-thread requests, drained by the audio callback at block start.
/// Every variant is allocation-free so the drain is real-time safe; file
/// loads go to the player's feeder thread instead.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    ControlButton,
    Reset,
    SetLevel(f32),
    SetTriggerThreshold(f32),
    SetTriggerEnabled(bool),
    SetMode(Mode),
    ArmTriggerAndWait,
    StartFromTop,
    StopTransport,
}

/// State-change notifications published by the engine. Delivery is deferred:
/// the audio thread does a bounded `try_send` and the UI thread fans events
/// out to listeners on its own tick.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(LoopState),
    ModeChanged(Mode),
    RecordingTriggered,
    LoopCommitted(usize),
    BufferFull,
    PlaybackStarted,
    PlaybackStopped,
    FileLoaded(usize),
    Error(String),
}

/// Usable frame count of a planar block: the shortest channel wins.
pub(crate) fn block_frames<S: AsRef<[f32]>>(block: &[S]) -> usize {
    block.iter().map(|ch| ch.as_ref().len()).min().unwrap_or(0)
}
