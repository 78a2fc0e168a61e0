/// Amplitude-threshold trigger shared by the looper (auto-start recording)
/// and the file player (auto-start deferred playback).
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    threshold: f32,
}

impl TriggerDetector {
    pub const DEFAULT_THRESHOLD: f32 = 0.05;

    pub fn new() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// True when a single sample reaches the threshold.
    #[inline]
    pub fn crosses(&self, sample: f32) -> bool {
        sample.abs() >= self.threshold
    }

    /// Scan a planar block frame-major, channel-minor and return the first
    /// frame with a crossing on any channel. Multichannel signals fire on
    /// whichever channel crosses first within a sample tick.
    pub fn first_crossing<S: AsRef<[f32]>>(&self, block: &[S]) -> Option<usize> {
        let frames = block.iter().map(|ch| ch.as_ref().len()).min().unwrap_or(0);
        for frame in 0..frames {
            for channel in block {
                if self.crosses(channel.as_ref()[frame]) {
                    return Some(frame);
                }
            }
        }
        None
    }
}

impl Default for TriggerDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_clamp() {
        let mut trigger = TriggerDetector::new();
        trigger.set_threshold(2.0);
        assert_eq!(trigger.threshold(), 1.0);
        trigger.set_threshold(-0.5);
        assert_eq!(trigger.threshold(), 0.0);
        trigger.set_threshold(0.3);
        assert_eq!(trigger.threshold(), 0.3);
    }

    #[test]
    fn test_crossing_uses_absolute_value() {
        let mut trigger = TriggerDetector::new();
        trigger.set_threshold(0.5);
        assert!(trigger.crosses(0.5));
        assert!(trigger.crosses(-0.7));
        assert!(!trigger.crosses(0.49));
    }

    #[test]
    fn test_first_crossing_frame_index() {
        let mut trigger = TriggerDetector::new();
        trigger.set_threshold(0.5);

        let left = vec![0.0, 0.1, 0.2, 0.9, 1.0];
        let right = vec![0.0, 0.1, 0.6, 0.0, 0.0];
        assert_eq!(trigger.first_crossing(&[left, right]), Some(2));
    }

    #[test]
    fn test_silence_never_fires() {
        let mut trigger = TriggerDetector::new();
        trigger.set_threshold(0.1);
        let silent = vec![vec![0.0f32; 256], vec![0.0f32; 256]];
        assert_eq!(trigger.first_crossing(&silent), None);
    }

    #[test]
    fn test_zero_threshold_fires_on_silence() {
        let mut trigger = TriggerDetector::new();
        trigger.set_threshold(0.0);
        let silent = vec![vec![0.0f32; 4]];
        assert_eq!(trigger.first_crossing(&silent), Some(0));
    }
}
