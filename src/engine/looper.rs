use super::loop_buffer::LoopBuffer;
use super::trigger::TriggerDetector;
use super::{block_frames, dsp};

/// Hard cap on one loop's length. The buffer for it is allocated up front at
/// prepare time so recording never allocates.
pub const MAX_RECORD_SECONDS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Clean = 0,
    Recording = 1,
    Stopped = 2,
    Playing = 3,
}

impl LoopState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LoopState::Recording,
            2 => LoopState::Stopped,
            3 => LoopState::Playing,
            _ => LoopState::Clean,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoopState::Clean => "CLEAN",
            LoopState::Recording => "REC",
            LoopState::Stopped => "STOP",
            LoopState::Playing => "PLAY",
        }
    }
}

/// The looper core: a Clean/Recording/Stopped/Playing state machine over one
/// fixed-capacity loop buffer.
///
/// Everything here runs on the audio thread (or single-threaded in tests).
/// Transitions are allocation-free, so `control_button_pressed` is legal to
/// call from inside `process` when the length cap is hit. Mutators are
/// silent no-ops until `prepare` has been called.
pub struct LoopStateMachine {
    state: LoopState,
    buffer: LoopBuffer,
    rec_pos: usize,
    play_pos: usize,
    loop_start: usize,
    loop_end: usize,
    has_data: bool,
    level: f32,
    trigger: TriggerDetector,
    trigger_enabled: bool,
    rec_triggered: bool,
    buffer_full_latch: bool,
    sample_rate: u32,
    channels: usize,
    prepared: bool,
}

impl LoopStateMachine {
    pub fn new(channels: usize) -> Self {
        Self {
            state: LoopState::Clean,
            buffer: LoopBuffer::new(channels, 0),
            rec_pos: 0,
            play_pos: 0,
            loop_start: 0,
            loop_end: 0,
            has_data: false,
            level: 1.0,
            trigger: TriggerDetector::new(),
            trigger_enabled: false,
            rec_triggered: false,
            buffer_full_latch: false,
            sample_rate: 0,
            channels,
            prepared: false,
        }
    }

    /// Size the loop buffer for the session's sample rate. Must be called
    /// before any transport operation is meaningful.
    pub fn prepare(&mut self, sample_rate: u32, _block_size: usize) {
        if sample_rate == 0 {
            return;
        }
        let max_frames = (MAX_RECORD_SECONDS * sample_rate as f64) as usize;
        self.buffer = LoopBuffer::new(self.channels, max_frames);
        self.sample_rate = sample_rate;
        self.prepared = true;
        self.reset();
    }

    /// Back to Clean: zero the buffer and cursors, level to unity. The
    /// trigger arming survives a reset.
    ///
    /// Only frames a recording pass touched need zeroing; the rest of the
    /// buffer never left zero. Keeps the command legal on the audio thread.
    pub fn reset(&mut self) {
        if !self.prepared {
            return;
        }
        self.buffer.clear_frames(self.rec_pos.max(self.loop_end));
        self.rec_pos = 0;
        self.play_pos = 0;
        self.loop_start = 0;
        self.loop_end = 0;
        self.has_data = false;
        self.rec_triggered = false;
        self.buffer_full_latch = false;
        self.level = 1.0;
        self.state = LoopState::Clean;
    }

    /// The one transport button. Clean -> Recording -> Stopped -> Playing
    /// -> Stopped; a recording pass that never captured audio falls back to
    /// Clean. Allocation-free, safe to call from the audio callback.
    pub fn control_button_pressed(&mut self) {
        if !self.prepared {
            return;
        }
        match self.state {
            LoopState::Clean => {
                self.rec_pos = 0;
                // With the trigger disabled, recording is live immediately;
                // otherwise it waits for the first crossing in process().
                self.rec_triggered = !self.trigger_enabled;
                self.state = LoopState::Recording;
            }
            LoopState::Recording => {
                if self.rec_pos > 0 {
                    self.loop_start = 0;
                    self.loop_end = self.rec_pos;
                    self.has_data = true;
                    self.play_pos = self.loop_start;
                    debug_assert!(self.loop_end > self.loop_start);
                    self.state = LoopState::Stopped;
                } else {
                    // Trigger never fired, nothing captured
                    self.rec_triggered = false;
                    self.state = LoopState::Clean;
                }
            }
            LoopState::Stopped => {
                if self.has_data {
                    self.play_pos = self.loop_start;
                    self.state = LoopState::Playing;
                }
            }
            LoopState::Playing => {
                self.play_pos = self.loop_start;
                self.state = LoopState::Stopped;
            }
        }
    }

    /// Transform one planar block in place according to the current state.
    pub fn process(&mut self, block: &mut [&mut [f32]]) {
        if !self.prepared || block.is_empty() {
            return;
        }
        debug_assert!(block.len() == self.channels);
        match self.state {
            LoopState::Recording => self.process_recording(block),
            LoopState::Playing => self.process_playing(block),
            // Bypass: the block already holds the input
            LoopState::Clean | LoopState::Stopped => {}
        }
    }

    fn process_recording(&mut self, block: &mut [&mut [f32]]) {
        let frames = block_frames(block);
        for frame in 0..frames {
            if !self.rec_triggered {
                // First channel to cross within this sample tick fires
                let crossed = block.iter().any(|ch| self.trigger.crosses(ch[frame]));
                if !crossed {
                    continue;
                }
                self.rec_triggered = true;
            }
            for (c, channel) in block.iter().enumerate() {
                self.buffer.write(c, self.rec_pos, channel[frame]);
            }
            self.rec_pos += 1;
            if self.rec_pos >= self.buffer.max_frames() {
                // Length cap reached: stop from inside the callback. This is
                // a same-thread re-entrant call into the transition function,
                // which is allocation-free by contract. The rest of the
                // block falls through as passthrough.
                self.buffer_full_latch = true;
                self.control_button_pressed();
                return;
            }
        }
        // Input stays in the block untouched: recording monitors itself.
    }

    fn process_playing(&mut self, block: &mut [&mut [f32]]) {
        debug_assert!(self.has_data && self.loop_end > self.loop_start);
        let frames = block_frames(block);
        let mut done = 0;
        while done < frames {
            debug_assert!(self.play_pos >= self.loop_start && self.play_pos < self.loop_end);
            let run = (self.loop_end - self.play_pos).min(frames - done);
            for (c, channel) in block.iter_mut().enumerate() {
                channel[done..done + run]
                    .copy_from_slice(&self.buffer.channel(c)[self.play_pos..self.play_pos + run]);
            }
            self.play_pos += run;
            if self.play_pos >= self.loop_end {
                self.play_pos = self.loop_start;
            }
            done += run;
        }
        for channel in block.iter_mut() {
            dsp::apply_gain(channel, self.level);
        }
    }

    pub fn set_level(&mut self, level: f32) {
        if !self.prepared {
            return;
        }
        self.level = level.clamp(0.0, 1.0);
    }

    pub fn set_trigger_threshold(&mut self, threshold: f32) {
        if !self.prepared {
            return;
        }
        self.trigger.set_threshold(threshold);
    }

    pub fn set_trigger_enabled(&mut self, enabled: bool) {
        if !self.prepared {
            return;
        }
        self.trigger_enabled = enabled;
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn trigger_threshold(&self) -> f32 {
        self.trigger.threshold()
    }

    pub fn trigger_enabled(&self) -> bool {
        self.trigger_enabled
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Armed and still waiting for the first crossing.
    pub fn is_trigger_armed(&self) -> bool {
        self.state == LoopState::Recording && self.trigger_enabled && !self.rec_triggered
    }

    /// Actually capturing samples (armed recordings are not live yet).
    pub fn is_recording_live(&self) -> bool {
        self.state == LoopState::Recording && self.rec_triggered
    }

    pub fn recorded_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.rec_pos as f64 / self.sample_rate as f64
    }

    pub fn loop_seconds(&self) -> f64 {
        if self.sample_rate == 0 || !self.has_data {
            return 0.0;
        }
        (self.loop_end - self.loop_start) as f64 / self.sample_rate as f64
    }

    pub fn play_position_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.play_pos - self.loop_start) as f64 / self.sample_rate as f64
    }

    pub fn max_record_seconds() -> f64 {
        MAX_RECORD_SECONDS
    }

    pub(crate) fn rec_frames(&self) -> usize {
        self.rec_pos
    }

    pub(crate) fn loop_frames(&self) -> usize {
        if self.has_data {
            self.loop_end - self.loop_start
        } else {
            0
        }
    }

    pub(crate) fn play_frames(&self) -> usize {
        self.play_pos - self.loop_start
    }

    pub(crate) fn is_rec_triggered(&self) -> bool {
        self.rec_triggered
    }

    /// One-shot flag set when a recording was stopped by the length cap.
    pub(crate) fn take_buffer_full(&mut self) -> bool {
        std::mem::take(&mut self.buffer_full_latch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    fn machine() -> LoopStateMachine {
        let mut m = LoopStateMachine::new(2);
        m.prepare(SR, 256);
        m
    }

    fn process_frames(m: &mut LoopStateMachine, left: &mut [f32], right: &mut [f32]) {
        let mut block: Vec<&mut [f32]> = vec![left, right];
        m.process(&mut block);
    }

    fn feed_constant(m: &mut LoopStateMachine, value: f32, frames: usize) {
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(256);
            let mut left = vec![value; n];
            let mut right = vec![value; n];
            process_frames(m, &mut left, &mut right);
            remaining -= n;
        }
    }

    #[test]
    fn test_prepare_then_reset_is_clean() {
        let mut m = machine();
        m.reset();
        assert_eq!(m.state(), LoopState::Clean);
        assert_eq!(m.recorded_seconds(), 0.0);
        assert_eq!(m.loop_seconds(), 0.0);
    }

    #[test]
    fn test_unprepared_mutators_are_noops() {
        let mut m = LoopStateMachine::new(2);
        m.control_button_pressed();
        assert_eq!(m.state(), LoopState::Clean);
        m.set_level(0.5);
        assert_eq!(m.level(), 1.0);
        m.set_trigger_enabled(true);
        assert!(!m.trigger_enabled());
        assert_eq!(m.recorded_seconds(), 0.0);
        assert_eq!(m.play_position_seconds(), 0.0);
    }

    #[test]
    fn test_immediate_recording_counts_samples() {
        let mut m = machine();
        m.set_trigger_enabled(false);
        m.control_button_pressed();
        assert_eq!(m.state(), LoopState::Recording);
        assert!(m.is_recording_live());

        feed_constant(&mut m, 0.5, SR as usize);
        assert!((m.recorded_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_armed_trigger_waits_through_silence() {
        let mut m = machine();
        m.set_trigger_enabled(true);
        m.set_trigger_threshold(0.2);
        m.control_button_pressed();
        assert!(m.is_trigger_armed());
        assert!(!m.is_recording_live());

        feed_constant(&mut m, 0.0, 4096);
        assert_eq!(m.recorded_seconds(), 0.0);
        assert!(m.is_trigger_armed());

        // A crossing sample fires and is itself captured
        let mut left = vec![0.0, 0.0, 0.3, 0.3];
        let mut right = vec![0.0; 4];
        process_frames(&mut m, &mut left, &mut right);
        assert!(!m.is_trigger_armed());
        assert!(m.is_recording_live());
        assert_eq!(m.rec_frames(), 2);
    }

    #[test]
    fn test_armed_recording_with_no_capture_discards_to_clean() {
        let mut m = machine();
        m.set_trigger_enabled(true);
        m.control_button_pressed();
        feed_constant(&mut m, 0.0, 1024);
        m.control_button_pressed();
        assert_eq!(m.state(), LoopState::Clean);
        assert!(!m.has_data());
    }

    #[test]
    fn test_stopped_without_data_never_plays() {
        let mut m = machine();
        m.set_trigger_enabled(false);
        m.control_button_pressed();
        feed_constant(&mut m, 0.5, 100);
        m.control_button_pressed();
        assert_eq!(m.state(), LoopState::Stopped);

        // Reset drops the data; the machine may only leave Stopped for
        // Playing when a committed loop exists.
        m.reset();
        assert_eq!(m.state(), LoopState::Clean);
        m.control_button_pressed();
        m.control_button_pressed(); // rec_pos == 0 -> back to Clean
        assert_eq!(m.state(), LoopState::Clean);
        assert!(!m.has_data());
    }

    #[test]
    fn test_loop_round_trip_reproduces_samples() {
        let mut m = machine();
        m.set_trigger_enabled(false);
        m.control_button_pressed();

        let mut left: Vec<f32> = (0..64).map(|i| (i as f32 + 1.0) / 100.0).collect();
        let mut right: Vec<f32> = (0..64).map(|i| -(i as f32 + 1.0) / 100.0).collect();
        let expected_left = left.clone();
        let expected_right = right.clone();
        process_frames(&mut m, &mut left, &mut right);

        m.control_button_pressed();
        assert_eq!(m.state(), LoopState::Stopped);
        assert_eq!(m.loop_frames(), 64);

        m.control_button_pressed();
        assert_eq!(m.state(), LoopState::Playing);

        let mut out_left = vec![0.0f32; 64];
        let mut out_right = vec![0.0f32; 64];
        process_frames(&mut m, &mut out_left, &mut out_right);
        assert_eq!(out_left, expected_left);
        assert_eq!(out_right, expected_right);
    }

    #[test]
    fn test_playback_wraps_to_loop_start() {
        let mut m = machine();
        m.set_trigger_enabled(false);
        m.control_button_pressed();
        feed_constant(&mut m, 0.25, 100);
        m.control_button_pressed();
        m.control_button_pressed();

        // Exactly one loop length later the cursor is back at the start
        feed_constant(&mut m, 0.0, 100);
        assert_eq!(m.play_frames(), 0);

        feed_constant(&mut m, 0.0, 37);
        assert_eq!(m.play_frames(), 37);
    }

    #[test]
    fn test_one_second_loop_timing() {
        let mut m = LoopStateMachine::new(2);
        m.prepare(44100, 512);
        m.set_trigger_enabled(false);
        m.control_button_pressed();
        feed_constant(&mut m, 1.0, 44100);
        m.control_button_pressed();
        assert!((m.loop_seconds() - 1.0).abs() < 1e-9);

        m.control_button_pressed();
        feed_constant(&mut m, 0.0, 22050);
        assert!((m.play_position_seconds() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_clamps() {
        let mut m = machine();
        m.set_trigger_threshold(2.0);
        assert_eq!(m.trigger_threshold(), 1.0);
        m.set_level(1.5);
        assert_eq!(m.level(), 1.0);
        m.set_level(-1.0);
        assert_eq!(m.level(), 0.0);
    }

    #[test]
    fn test_playback_applies_level() {
        let mut m = machine();
        m.set_trigger_enabled(false);
        m.control_button_pressed();
        feed_constant(&mut m, 0.8, 32);
        m.control_button_pressed();
        m.control_button_pressed();
        m.set_level(0.5);

        let mut left = vec![0.0f32; 32];
        let mut right = vec![0.0f32; 32];
        process_frames(&mut m, &mut left, &mut right);
        assert!(left.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_reset_preserves_trigger_arming() {
        let mut m = machine();
        m.set_trigger_enabled(true);
        m.set_level(0.3);
        m.control_button_pressed();
        m.reset();
        assert_eq!(m.state(), LoopState::Clean);
        assert_eq!(m.level(), 1.0);
        assert!(m.trigger_enabled());
    }

    #[test]
    fn test_buffer_full_auto_stops() {
        // 300s at 10 Hz keeps the cap tiny: 3000 frames
        let mut m = LoopStateMachine::new(2);
        m.prepare(10, 64);
        m.set_trigger_enabled(false);
        m.control_button_pressed();

        feed_constant(&mut m, 0.5, 4000);
        assert_eq!(m.state(), LoopState::Stopped);
        assert!(m.take_buffer_full());
        assert!(!m.take_buffer_full());
        assert_eq!(m.loop_frames(), 3000);
    }

    #[test]
    fn test_bypass_leaves_block_untouched() {
        let mut m = machine();
        let mut left = vec![0.7f32; 16];
        let mut right = vec![-0.7f32; 16];
        process_frames(&mut m, &mut left, &mut right);
        assert!(left.iter().all(|&s| s == 0.7));
        assert!(right.iter().all(|&s| s == -0.7));
    }

    #[test]
    fn test_recording_monitors_input() {
        let mut m = machine();
        m.set_trigger_enabled(false);
        m.control_button_pressed();
        let mut left = vec![0.6f32; 16];
        let mut right = vec![0.6f32; 16];
        process_frames(&mut m, &mut left, &mut right);
        // Non-destructive monitoring: the input passes through unchanged
        assert!(left.iter().all(|&s| s == 0.6));
    }
}
