use crossbeam::channel::{Receiver, Sender, bounded};
use rtrb::{Consumer, Producer, RingBuffer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::trigger::TriggerDetector;
use super::{EngineEvent, block_frames, dsp, io};

/// Frames of headroom between the feeder and the audio thread (~0.37s of
/// stereo at 44.1kHz). Must comfortably exceed one device block.
const RING_FRAMES: usize = 16384;

/// Upper bound on the feeder's wait for the audio thread to drain the ring
/// during a rewind. If the consumer stalls (mode switched away mid-start),
/// proceed anyway; the epoch check discards any stale remainder later.
const DRAIN_WAIT_MAX: Duration = Duration::from_millis(500);

const FILL_IDLE: Duration = Duration::from_millis(2);
const LOAD_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Lock-free transport snapshot shared with the UI thread, written by the
/// audio thread and the feeder. Plain visibility is all that is needed, so
/// everything is `Relaxed` except the epoch handshake.
pub struct PlayerShared {
    ring_epoch: AtomicU32,
    total_frames: AtomicU64,
    ready: AtomicBool,
    sample_rate: AtomicU32,
    position: AtomicU64,
    playing: AtomicBool,
    waiting: AtomicBool,
    underrun: AtomicBool,
}

impl PlayerShared {
    fn new() -> Self {
        Self {
            ring_epoch: AtomicU32::new(0),
            total_frames: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            sample_rate: AtomicU32::new(0),
            position: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            waiting: AtomicBool::new(false),
            underrun: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn is_waiting_for_trigger(&self) -> bool {
        self.waiting.load(Ordering::Relaxed)
    }

    pub fn current_time(&self) -> f64 {
        let rate = self.sample_rate.load(Ordering::Relaxed);
        if rate == 0 {
            return 0.0;
        }
        self.position.load(Ordering::Relaxed) as f64 / rate as f64
    }

    pub fn total_time(&self) -> f64 {
        let rate = self.sample_rate.load(Ordering::Relaxed);
        if rate == 0 {
            return 0.0;
        }
        self.total_frames.load(Ordering::Relaxed) as f64 / rate as f64
    }

    /// One-shot underrun flag, cleared on read.
    pub fn take_underrun(&self) -> bool {
        self.underrun.swap(false, Ordering::Relaxed)
    }
}

pub(crate) enum FeederCommand {
    Load { path: PathBuf, reply: Sender<bool> },
    Rewind(u32),
    Pause,
    Unload,
    Shutdown,
}

/// Looping file playback streamed through a lock-free ring.
///
/// The engine half lives on the audio thread and only ever pops from the
/// ring; a background feeder thread owns the decoded source and the producer
/// half, and does all the waiting. Starts go through an epoch handshake so
/// the transport never replays stale pre-rewind samples.
pub struct FilePlaybackEngine {
    consumer: Consumer<f32>,
    feeder_tx: Sender<FeederCommand>,
    feeder: Option<JoinHandle<()>>,
    shared: Arc<PlayerShared>,
    trigger: TriggerDetector,
    level: f32,
    trigger_armed: bool,
    waiting_for_trigger: bool,
    playing: bool,
    priming: bool,
    start_epoch: u32,
    position: u64,
    channels: usize,
    sample_rate: u32,
    prepared: bool,
}

impl FilePlaybackEngine {
    pub fn new(channels: usize, events: Sender<EngineEvent>) -> Self {
        let (producer, consumer) = RingBuffer::new(channels.max(1) * RING_FRAMES);
        let (feeder_tx, feeder_rx) = bounded(16);
        let shared = Arc::new(PlayerShared::new());

        let feeder_shared = Arc::clone(&shared);
        let feeder = thread::Builder::new()
            .name("loopdeck-feeder".to_string())
            .spawn(move || run_feeder(producer, feeder_rx, feeder_shared, channels, events))
            .expect("spawn feeder thread");

        Self {
            consumer,
            feeder_tx,
            feeder: Some(feeder),
            shared,
            trigger: TriggerDetector::new(),
            level: 1.0,
            trigger_armed: false,
            waiting_for_trigger: false,
            playing: false,
            priming: false,
            start_epoch: 0,
            position: 0,
            channels: channels.max(1),
            sample_rate: 0,
            prepared: false,
        }
    }

    pub fn prepare(&mut self, sample_rate: u32, _block_size: usize) {
        if sample_rate == 0 {
            return;
        }
        self.sample_rate = sample_rate;
        self.shared.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.prepared = true;
    }

    /// Hand the path to the feeder and block on its reply. Stops any current
    /// transport first. On failure the previously loaded source stays
    /// untouched. Call from a control thread, never the audio callback.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> bool {
        if !self.prepared {
            return false;
        }
        self.stop();
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .feeder_tx
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

    /// Arm the deferred start: valid only when a file is loaded and the
    /// transport is stopped.
    pub fn arm_trigger_and_wait(&mut self) {
        if !self.prepared || !self.is_ready() || self.playing {
            return;
        }
        self.trigger_armed = true;
        self.waiting_for_trigger = true;
        self.shared.waiting.store(true, Ordering::Relaxed);
    }

    pub fn cancel_trigger_wait(&mut self) {
        self.trigger_armed = false;
        self.waiting_for_trigger = false;
        self.shared.waiting.store(false, Ordering::Relaxed);
    }

    /// Immediate start from the top of the file, bypassing the trigger.
    pub fn start_from_top(&mut self) {
        if !self.prepared || !self.is_ready() {
            return;
        }
        self.begin_start();
    }

    pub fn stop(&mut self) {
        self.waiting_for_trigger = false;
        self.shared.waiting.store(false, Ordering::Relaxed);
        if self.playing || self.priming {
            self.playing = false;
            self.priming = false;
            let _ = self.feeder_tx.try_send(FeederCommand::Pause);
        }
        self.shared.playing.store(false, Ordering::Relaxed);
    }

    /// Back to not-ready: transport halted, source dropped.
    pub fn reset(&mut self) {
        self.stop();
        self.cancel_trigger_wait();
        self.position = 0;
        self.shared.position.store(0, Ordering::Relaxed);
        let _ = self.feeder_tx.try_send(FeederCommand::Unload);
    }

    /// Trigger path: scan the live input for a crossing while armed and
    /// waiting. Real-time safe; does not touch the transport output.
    pub fn process_input_buffer(&mut self, block: &[&mut [f32]]) {
        if !self.prepared || !self.trigger_armed || !self.waiting_for_trigger || self.playing {
            return;
        }
        if self.trigger.first_crossing(block).is_some() {
            self.signal_detected();
        }
    }

    fn signal_detected(&mut self) {
        self.waiting_for_trigger = false;
        self.shared.waiting.store(false, Ordering::Relaxed);
        self.begin_start();
    }

    fn begin_start(&mut self) {
        self.start_epoch = self.start_epoch.wrapping_add(1);
        if self
            .feeder_tx
            .try_send(FeederCommand::Rewind(self.start_epoch))
            .is_err()
        {
            return;
        }
        self.priming = true;
        self.playing = true;
        self.position = 0;
        self.shared.position.store(0, Ordering::Relaxed);
        self.shared.playing.store(true, Ordering::Relaxed);
    }

    /// Transport path: overwrite the block with the next frames from the
    /// ring, scaled by level. While stopped or priming the block passes
    /// through untouched and any ring residue is discarded so the feeder's
    /// rewind drain can complete.
    pub fn render(&mut self, block: &mut [&mut [f32]]) {
        if !self.prepared || block.is_empty() {
            return;
        }

        if !self.playing {
            // Discard residue so the feeder's rewind drain can complete.
            // Bounded by the snapshot: a concurrently filling feeder must
            // not turn this into a spin.
            let residue = self.consumer.slots();
            for _ in 0..residue {
                let _ = self.consumer.pop();
            }
            return;
        }

        if self.priming {
            // Snapshot the readable count BEFORE re-checking the epoch. The
            // feeder publishes the epoch before it pushes any fresh sample,
            // so if the snapshot contained fresh data the epoch load below
            // is guaranteed to see the new value and nothing is discarded.
            let stale = self.consumer.slots();
            if self.shared.ring_epoch.load(Ordering::Acquire) != self.start_epoch {
                for _ in 0..stale {
                    let _ = self.consumer.pop();
                }
                return;
            }
            self.priming = false;
        }

        let frames = block_frames(block);
        let total = self.shared.total_frames.load(Ordering::Relaxed);
        for frame in 0..frames {
            for c in 0..self.channels.min(block.len()) {
                block[c][frame] = match self.consumer.pop() {
                    Ok(sample) => sample,
                    Err(_) => {
                        self.shared.underrun.store(true, Ordering::Relaxed);
                        0.0
                    }
                };
            }
            self.position += 1;
            // The transport loops at end-of-source
            if total > 0 && self.position >= total {
                self.position -= total;
            }
        }
        for channel in block.iter_mut() {
            dsp::apply_gain(channel, self.level);
        }
        self.shared.position.store(self.position, Ordering::Relaxed);
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

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn trigger_threshold(&self) -> f32 {
        self.trigger.threshold()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_waiting_for_trigger(&self) -> bool {
        self.waiting_for_trigger
    }

    pub fn is_trigger_armed(&self) -> bool {
        self.trigger_armed
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.position as f64 / self.sample_rate as f64
    }

    pub fn total_time(&self) -> f64 {
        self.shared.total_time()
    }

    pub fn shared(&self) -> Arc<PlayerShared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn feeder_sender(&self) -> Sender<FeederCommand> {
        self.feeder_tx.clone()
    }

    /// Wait until the feeder has acknowledged the current start epoch.
    /// Test/control helper; the audio path never blocks on this.
    #[cfg(test)]
    fn wait_until_primed(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let stale = self.consumer.slots();
            if self.shared.ring_epoch.load(Ordering::Acquire) == self.start_epoch {
                break;
            }
            if Instant::now() >= deadline {
                return false;
            }
            for _ in 0..stale {
                let _ = self.consumer.pop();
            }
            thread::sleep(Duration::from_millis(1));
        }
        // Give the feeder a moment to top the ring up
        thread::sleep(Duration::from_millis(10));
        true
    }
}

impl Drop for FilePlaybackEngine {
    fn drop(&mut self) {
        let _ = self.feeder_tx.send(FeederCommand::Shutdown);
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
    }
}

/// The background I/O loop: decodes files, keeps the ring topped up with the
/// looping source, and performs all waiting in the rewind handshake.
fn run_feeder(
    mut producer: Producer<f32>,
    commands: Receiver<FeederCommand>,
    shared: Arc<PlayerShared>,
    channels: usize,
    events: Sender<EngineEvent>,
) {
    let capacity = channels.max(1) * RING_FRAMES;
    let mut source: Vec<f32> = Vec::new();
    let mut cursor = 0usize;
    let mut filling = false;

    loop {
        while let Ok(command) = commands.try_recv() {
            match command {
                FeederCommand::Load { path, reply } => {
                    let rate = shared.sample_rate.load(Ordering::Relaxed);
                    match io::decode_file(&path, rate, channels) {
                        Ok(decoded) => {
                            wait_for_drain(&producer, capacity);
                            source = decoded.samples;
                            cursor = 0;
                            filling = false;
                            shared
                                .total_frames
                                .store(decoded.frames as u64, Ordering::Relaxed);
                            shared.ready.store(true, Ordering::Release);
                            let _ = events.try_send(EngineEvent::FileLoaded(decoded.frames));
                            let _ = reply.try_send(true);
                        }
                        Err(err) => {
                            let _ = events.try_send(EngineEvent::Error(format!(
                                "file load failed: {err}"
                            )));
                            let _ = reply.try_send(false);
                        }
                    }
                }
                FeederCommand::Rewind(epoch) => {
                    wait_for_drain(&producer, capacity);
                    cursor = 0;
                    filling = true;
                    shared.ring_epoch.store(epoch, Ordering::Release);
                }
                FeederCommand::Pause => {
                    filling = false;
                }
                FeederCommand::Unload => {
                    source = Vec::new();
                    cursor = 0;
                    filling = false;
                    shared.ready.store(false, Ordering::Relaxed);
                    shared.total_frames.store(0, Ordering::Relaxed);
                }
                FeederCommand::Shutdown => return,
            }
        }

        if filling && !source.is_empty() {
            while producer.slots() > 0 {
                let _ = producer.push(source[cursor]);
                cursor += 1;
                if cursor >= source.len() {
                    cursor = 0;
                }
            }
        }

        thread::sleep(FILL_IDLE);
    }
}

fn wait_for_drain(producer: &Producer<f32>, capacity: usize) {
    let deadline = Instant::now() + DRAIN_WAIT_MAX;
    while producer.slots() < capacity && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::path::PathBuf;

    const SR: u32 = 8000;

    fn events() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
        bounded(64)
    }

    fn player() -> (FilePlaybackEngine, Receiver<EngineEvent>) {
        let (tx, rx) = events();
        let mut p = FilePlaybackEngine::new(2, tx);
        p.prepare(SR, 256);
        (p, rx)
    }

    fn write_wav(name: &str, samples: &[f32], channels: u16) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let spec = WavSpec {
            channels,
            sample_rate: SR,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn render_frames(p: &mut FilePlaybackEngine, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];
        {
            let mut block: Vec<&mut [f32]> = vec![&mut left, &mut right];
            p.render(&mut block);
        }
        (left, right)
    }

    #[test]
    fn test_missing_file_leaves_engine_not_ready() {
        let (mut p, _rx) = player();
        let missing = std::env::temp_dir().join("loopdeck_player_missing.wav");
        let _ = std::fs::remove_file(&missing);
        assert!(!p.load_file(&missing));
        assert!(!p.is_ready());
    }

    #[test]
    fn test_unprepared_load_is_rejected() {
        let (tx, _rx) = events();
        let mut p = FilePlaybackEngine::new(2, tx);
        let path = write_wav("loopdeck_player_unprepared.wav", &[0.1; 64], 2);
        assert!(!p.load_file(&path));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_reports_length_and_ready() {
        let (mut p, rx) = player();
        let samples = vec![0.5f32; SR as usize * 2]; // 1s of stereo frames
        let path = write_wav("loopdeck_player_load.wav", &samples, 2);

        assert!(p.load_file(&path));
        let _ = std::fs::remove_file(&path);

        assert!(p.is_ready());
        assert!((p.total_time() - 1.0).abs() < 1e-9);
        assert!(!p.is_playing());
        assert!(
            rx.try_iter()
                .any(|e| matches!(e, EngineEvent::FileLoaded(n) if n == SR as usize))
        );
    }

    #[test]
    fn test_start_from_top_renders_file_samples() {
        let (mut p, _rx) = player();
        let frames = 1024usize;
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            samples.push((i as f32 + 1.0) / 10000.0);
            samples.push(-(i as f32 + 1.0) / 10000.0);
        }
        let path = write_wav("loopdeck_player_start.wav", &samples, 2);
        assert!(p.load_file(&path));
        let _ = std::fs::remove_file(&path);

        p.start_from_top();
        assert!(p.is_playing());
        assert!(p.wait_until_primed(Duration::from_secs(2)));

        let (left, right) = render_frames(&mut p, 64);
        for i in 0..64 {
            assert!((left[i] - (i as f32 + 1.0) / 10000.0).abs() < 1e-6);
            assert!((right[i] + (i as f32 + 1.0) / 10000.0).abs() < 1e-6);
        }
        assert!((p.current_time() - 64.0 / SR as f64).abs() < 1e-9);
    }

    #[test]
    fn test_restart_replays_from_frame_zero() {
        let (mut p, _rx) = player();
        let frames = 512usize;
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let v = (i as f32 + 1.0) / 1000.0;
            samples.push(v);
            samples.push(v);
        }
        let path = write_wav("loopdeck_player_restart.wav", &samples, 2);
        assert!(p.load_file(&path));
        let _ = std::fs::remove_file(&path);

        p.start_from_top();
        assert!(p.wait_until_primed(Duration::from_secs(2)));
        let (first, _) = render_frames(&mut p, 32);

        p.stop();
        assert!(!p.is_playing());
        // Stopped render keeps draining so the next rewind can complete
        let _ = render_frames(&mut p, 256);

        p.start_from_top();
        assert!(p.wait_until_primed(Duration::from_secs(2)));
        let (second, _) = render_frames(&mut p, 32);
        assert_eq!(first, second);
        assert!((second[0] - 1.0 / 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_trigger_arm_waits_for_signal() {
        let (mut p, _rx) = player();
        let path = write_wav("loopdeck_player_trigger.wav", &[0.25f32; 2048], 2);
        assert!(p.load_file(&path));
        let _ = std::fs::remove_file(&path);

        p.set_trigger_threshold(0.5);
        p.arm_trigger_and_wait();
        assert!(p.is_waiting_for_trigger());

        {
            let mut left = vec![0.0f32; 128];
            let mut right = vec![0.0f32; 128];
            let block: Vec<&mut [f32]> = vec![&mut left, &mut right];
            p.process_input_buffer(&block);
        }
        assert!(p.is_waiting_for_trigger());
        assert!(!p.is_playing());

        let mut loud_left = vec![0.0f32; 128];
        loud_left[40] = 0.9;
        let mut loud_right = vec![0.0f32; 128];
        {
            let block: Vec<&mut [f32]> = vec![&mut loud_left, &mut loud_right];
            p.process_input_buffer(&block);
        }
        assert!(!p.is_waiting_for_trigger());
        assert!(p.is_playing());
    }

    #[test]
    fn test_arm_requires_loaded_file() {
        let (mut p, _rx) = player();
        p.arm_trigger_and_wait();
        assert!(!p.is_waiting_for_trigger());
    }

    #[test]
    fn test_stop_clears_waiting_unconditionally() {
        let (mut p, _rx) = player();
        let path = write_wav("loopdeck_player_stopwait.wav", &[0.25f32; 512], 2);
        assert!(p.load_file(&path));
        let _ = std::fs::remove_file(&path);

        p.arm_trigger_and_wait();
        assert!(p.is_waiting_for_trigger());
        p.stop();
        assert!(!p.is_waiting_for_trigger());
    }

    #[test]
    fn test_level_applies_to_rendered_output() {
        let (mut p, _rx) = player();
        let path = write_wav("loopdeck_player_level.wav", &[0.8f32; 2048], 2);
        assert!(p.load_file(&path));
        let _ = std::fs::remove_file(&path);

        p.set_level(0.5);
        p.start_from_top();
        assert!(p.wait_until_primed(Duration::from_secs(2)));
        let (left, _) = render_frames(&mut p, 64);
        assert!(left.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_reset_returns_to_not_ready() {
        let (mut p, _rx) = player();
        let path = write_wav("loopdeck_player_reset.wav", &[0.5f32; 256], 2);
        assert!(p.load_file(&path));
        let _ = std::fs::remove_file(&path);
        assert!(p.is_ready());

        p.reset();
        // The feeder processes Unload on its next pass
        let deadline = Instant::now() + Duration::from_secs(2);
        while p.is_ready() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!p.is_ready());
        assert_eq!(p.current_time(), 0.0);
    }
}
