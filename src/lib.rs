pub mod config;
pub mod engine;
pub mod ui;

pub use config::Config;
pub use engine::{
    AudioStream, EngineConfig, EngineEvent, EngineHandle, FilePlaybackEngine, ListenerHub,
    LoopState, LoopStateMachine, Mode, ModeCoordinator,
};
