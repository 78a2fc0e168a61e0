// src/engine/meter.rs
// Atomic level metering with attack/release ballistics

use std::sync::atomic::{AtomicU32, Ordering};

/// Peak/RMS meter written from the audio thread, read from the UI thread.
/// Levels travel as f32 bit patterns in word-sized atomics so neither side
/// ever locks.
#[derive(Debug)]
pub struct PeakMeter {
    peak_level: AtomicU32,
    peak_hold: AtomicU32,
    rms_level: AtomicU32,
    hold_ticks: AtomicU32,
}

impl PeakMeter {
    const PEAK_HOLD_TICKS: u32 = 30; // ~1s at the 30 Hz UI poll
    const PEAK_RELEASE: f32 = 0.95;
    const RMS_SMOOTHING: f32 = 0.8;

    pub fn new() -> Self {
        Self {
            peak_level: AtomicU32::new(0),
            peak_hold: AtomicU32::new(0),
            rms_level: AtomicU32::new(0),
            hold_ticks: AtomicU32::new(0),
        }
    }

    /// Fold one planar block into the meter (call from the audio thread).
    pub fn update_block<S: AsRef<[f32]>>(&self, block: &[S]) {
        let mut peak = 0.0f32;
        let mut square_sum = 0.0f32;
        let mut count = 0usize;

        for channel in block {
            let samples = channel.as_ref();
            peak = samples.iter().fold(peak, |acc, &s| acc.max(s.abs()));
            square_sum += samples.iter().map(|&s| s * s).sum::<f32>();
            count += samples.len();
        }

        if count == 0 {
            return;
        }

        // Instant attack, slow release
        let released = if peak > self.peak() {
            peak
        } else {
            self.peak() * Self::PEAK_RELEASE + peak * (1.0 - Self::PEAK_RELEASE)
        };
        self.peak_level.store(released.to_bits(), Ordering::Relaxed);

        self.advance_hold(peak, released);

        let rms = (square_sum / count as f32).sqrt();
        let smoothed = self.rms() * Self::RMS_SMOOTHING + rms * (1.0 - Self::RMS_SMOOTHING);
        self.rms_level.store(smoothed.to_bits(), Ordering::Relaxed);
    }

    /// New peaks latch the hold value and rewind its countdown; once the
    /// countdown runs out the hold falls back to the released peak.
    fn advance_hold(&self, peak: f32, released: f32) {
        if peak > self.peak_hold() {
            self.peak_hold.store(peak.to_bits(), Ordering::Relaxed);
            self.hold_ticks
                .store(Self::PEAK_HOLD_TICKS, Ordering::Relaxed);
            return;
        }
        match self.hold_ticks.load(Ordering::Relaxed) {
            0 => self.peak_hold.store(released.to_bits(), Ordering::Relaxed),
            ticks => self.hold_ticks.store(ticks - 1, Ordering::Relaxed),
        }
    }

    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak_level.load(Ordering::Relaxed))
    }

    pub fn peak_hold(&self) -> f32 {
        f32::from_bits(self.peak_hold.load(Ordering::Relaxed))
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms_level.load(Ordering::Relaxed))
    }

    pub fn to_db(level: f32) -> f32 {
        if level <= 0.0 {
            -96.0
        } else {
            20.0 * level.log10()
        }
    }

    pub fn reset(&self) {
        self.peak_level.store(0, Ordering::Relaxed);
        self.peak_hold.store(0, Ordering::Relaxed);
        self.rms_level.store(0, Ordering::Relaxed);
        self.hold_ticks.store(0, Ordering::Relaxed);
    }
}

impl Default for PeakMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_detection() {
        let meter = PeakMeter::new();

        let silent = vec![vec![0.0f32; 100], vec![0.0f32; 100]];
        meter.update_block(&silent);
        assert_eq!(meter.peak(), 0.0);

        let full = vec![vec![1.0f32; 100], vec![0.0f32; 100]];
        meter.update_block(&full);
        assert!(meter.peak() > 0.9);
    }

    #[test]
    fn test_peak_hold_survives_quiet_blocks() {
        let meter = PeakMeter::new();

        meter.update_block(&[vec![0.8f32; 10]]);
        assert!(meter.peak_hold() >= 0.8);

        meter.update_block(&[vec![0.2f32; 10]]);
        assert!(meter.peak_hold() >= 0.7);
    }

    #[test]
    fn test_rms_tracks_signal_power() {
        let meter = PeakMeter::new();
        for _ in 0..64 {
            meter.update_block(&[vec![0.5f32; 256]]);
        }
        assert!((meter.rms() - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_db_conversion() {
        assert_eq!(PeakMeter::to_db(1.0), 0.0);
        assert!((PeakMeter::to_db(0.5) - (-6.02)).abs() < 0.1);
        assert_eq!(PeakMeter::to_db(0.0), -96.0);
    }

    #[test]
    fn test_reset() {
        let meter = PeakMeter::new();
        meter.update_block(&[vec![1.0f32; 64]]);
        meter.reset();
        assert_eq!(meter.peak(), 0.0);
        assert_eq!(meter.rms(), 0.0);
    }
}
