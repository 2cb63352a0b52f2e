// Audio level metering for visual feedback

/// Display gain applied to the mean absolute amplitude before clamping.
/// Tuned empirically: raw speech averages sit well below 0.2.
pub const LEVEL_GAIN: f32 = 5.0;

/// Reduce one audio frame to a loudness scalar in [0, 1].
///
/// Mean absolute sample amplitude scaled by [`LEVEL_GAIN`]. Runs on every
/// delivered buffer, so it is a single pass with no allocation.
pub fn compute_level(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum: f32 = frame.iter().map(|s| s.abs()).sum();
    (sum / frame.len() as f32 * LEVEL_GAIN).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_is_silent() {
        assert_eq!(compute_level(&[]), 0.0);
    }

    #[test]
    fn zero_frame_is_silent() {
        assert_eq!(compute_level(&[0.0; 1024]), 0.0);
    }

    #[test]
    fn level_is_monotone_in_amplitude() {
        let quiet = compute_level(&[0.01; 1024]);
        let medium = compute_level(&[0.05; 1024]);
        let loud = compute_level(&[0.15; 1024]);
        assert!(quiet < medium);
        assert!(medium < loud);
    }

    #[test]
    fn level_clamps_at_one() {
        // 0.5 mean amplitude * 5 gain = 2.5, clamped
        assert_eq!(compute_level(&[0.5; 1024]), 1.0);
        assert_eq!(compute_level(&[-1.0; 1024]), 1.0);
    }

    #[test]
    fn negative_samples_count_as_loudness() {
        let positive = compute_level(&[0.1; 256]);
        let negative = compute_level(&[-0.1; 256]);
        assert_eq!(positive, negative);
    }
}
