use strainview_sources::CacheKey;

use crate::caching::FetchError;
use crate::types::Segment;

const SAMPLE_SIZE: usize = std::mem::size_of::<f64>();

/// Decodes the raw contents of an archive file.
///
/// Archive files are a flat sequence of little-endian `f64` samples, with NaN marking samples
/// the detector did not record. Files shorter than the nominal length are truncated at the
/// end.
pub fn decode_segment(key: CacheKey, bytes: &[u8]) -> Result<Segment, FetchError> {
    if bytes.len() % SAMPLE_SIZE != 0 {
        return Err(FetchError::Malformed(format!(
            "{} bytes is not a whole number of samples",
            bytes.len()
        )));
    }

    let samples: Vec<f64> = bytes
        .chunks_exact(SAMPLE_SIZE)
        .map(|chunk| {
            let mut raw = [0; SAMPLE_SIZE];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect();

    Segment::new(key, samples)
}

#[cfg(test)]
mod tests {
    use strainview_sources::{ArchiveFileIndex, SampleRate, Site};

    use super::*;
    use crate::types::Availability;

    fn key() -> CacheKey {
        CacheKey::new(Site::H1, SampleRate::Decimated, ArchiveFileIndex(1))
    }

    fn encode(samples: &[f64]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode() {
        let bytes = encode(&[1.5, f64::NAN, -2.0e-21]);
        let segment = decode_segment(key(), &bytes).unwrap();

        assert_eq!(segment.samples().len(), 3);
        assert_eq!(segment.samples()[0], 1.5);
        assert!(segment.samples()[1].is_nan());
        assert_eq!(segment.samples()[2], -2.0e-21);
        assert_eq!(segment.availability(), Availability::Partial);
    }

    #[test]
    fn test_empty_is_absent() {
        let segment = decode_segment(key(), &[]).unwrap();
        assert_eq!(segment.availability(), Availability::Absent);
    }

    #[test]
    fn test_odd_length() {
        let mut bytes = encode(&[1.0, 2.0]);
        bytes.pop();
        assert!(matches!(
            decode_segment(key(), &bytes),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn test_too_long() {
        let per_file = SampleRate::Decimated.samples_per_file() as usize;
        let bytes = vec![0; (per_file + 1) * SAMPLE_SIZE];
        assert!(matches!(
            decode_segment(key(), &bytes),
            Err(FetchError::Malformed(_))
        ));
    }
}
