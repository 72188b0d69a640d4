//! Linear gain with hard clipping.

/// Round and saturate a sample to the i16 range.
#[inline]
pub fn clip_to_i16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Scale samples in place. Gains above 1.0 overdrive and clip.
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = clip_to_i16(*sample as f32 * gain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gain_is_identity() {
        let mut samples = vec![0, 1, -1, i16::MAX, i16::MIN];
        apply_gain(&mut samples, 1.0);
        assert_eq!(samples, vec![0, 1, -1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn overdrive_scales_and_clips() {
        let mut samples = vec![100, -100, 13_000, -13_200, 20_000, -20_000];
        apply_gain(&mut samples, 2.5);
        assert_eq!(samples, vec![250, -250, 32_500, -32_768, 32_767, -32_768]);
    }

    #[test]
    fn attenuation_rounds() {
        let mut samples = vec![3, -3, 1000];
        apply_gain(&mut samples, 0.5);
        assert_eq!(samples, vec![2, -2, 500]);
    }

    #[test]
    fn clip_saturates() {
        assert_eq!(clip_to_i16(1e9), i16::MAX);
        assert_eq!(clip_to_i16(-1e9), i16::MIN);
        assert_eq!(clip_to_i16(f32::NAN), 0);
    }
}
