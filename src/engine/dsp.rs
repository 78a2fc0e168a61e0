// src/engine/dsp.rs
// SIMD-accelerated sample helpers for the real-time paths

use wide::f32x4;

/// Scale a channel in place by a gain factor.
/// REAL-TIME SAFE: no allocations, 4-lane SIMD with scalar remainder.
pub fn apply_gain(buffer: &mut [f32], gain: f32) {
    if gain == 1.0 {
        return;
    }

    let gain_vec = f32x4::splat(gain);
    let chunks = buffer.len() / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let samples = f32x4::new([
            buffer[idx],
            buffer[idx + 1],
            buffer[idx + 2],
            buffer[idx + 3],
        ]);
        let result = (samples * gain_vec).to_array();
        buffer[idx..idx + 4].copy_from_slice(&result);
    }

    for sample in buffer.iter_mut().skip(chunks * 4) {
        *sample *= gain;
    }
}

/// Zero a channel in place.
pub fn clear(buffer: &mut [f32]) {
    let zero = f32x4::splat(0.0);
    let chunks = buffer.len() / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let result = zero.to_array();
        buffer[idx..idx + 4].copy_from_slice(&result);
    }

    for sample in buffer.iter_mut().skip(chunks * 4) {
        *sample = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_gain() {
        let mut buffer = vec![1.0, -0.5, 0.25, 0.0, 2.0, -1.0];
        apply_gain(&mut buffer, 0.5);
        assert_eq!(buffer, vec![0.5, -0.25, 0.125, 0.0, 1.0, -0.5]);
    }

    #[test]
    fn test_unity_gain_is_identity() {
        let mut buffer = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        apply_gain(&mut buffer, 1.0);
        assert_eq!(buffer, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = vec![1.0; 11];
        clear(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }
}
