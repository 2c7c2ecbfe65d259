//! Channel normalization to the fixed interleaved-stereo sink format.

/// Expand decoded samples to interleaved stereo in `out`.
///
/// Mono input duplicates each sample into the left and right slots; stereo
/// input passes through. The destination is always a separate buffer, so
/// there is no in-place aliasing hazard. Channel counts other than 1 or 2
/// are clamped to a stereo passthrough of the first two channels' worth of
/// data and should not occur with the supported codecs.
pub fn expand_to_stereo(samples: &[i16], channels: u16, out: &mut Vec<i16>) {
    out.clear();
    match channels {
        1 => {
            out.reserve(samples.len() * 2);
            for &s in samples {
                out.push(s);
                out.push(s);
            }
        }
        _ => out.extend_from_slice(samples),
    }
}

/// Reinterpret little-endian byte pairs as i16 samples. Odd trailing bytes
/// are dropped.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_duplicates_each_sample() {
        let mut out = Vec::new();
        expand_to_stereo(&[10, -20, 30], 1, &mut out);
        assert_eq!(out, vec![10, 10, -20, -20, 30, 30]);
    }

    #[test]
    fn test_stereo_passes_through() {
        let mut out = Vec::new();
        expand_to_stereo(&[1, 2, 3, 4], 2, &mut out);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_output_buffer_is_reused() {
        let mut out = vec![99; 512];
        expand_to_stereo(&[5], 1, &mut out);
        assert_eq!(out, vec![5, 5]);
    }

    #[test]
    fn test_bytes_to_samples_little_endian() {
        assert_eq!(bytes_to_samples(&[0x34, 0x12]), vec![0x1234]);
        assert_eq!(bytes_to_samples(&[0xFF, 0xFF]), vec![-1]);
        // Odd trailing byte dropped.
        assert_eq!(bytes_to_samples(&[0x01, 0x00, 0x02]), vec![1]);
    }

    #[test]
    fn test_empty_input() {
        let mut out = Vec::new();
        expand_to_stereo(&[], 1, &mut out);
        assert!(out.is_empty());
    }
}
