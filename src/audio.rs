//! WAV header inspection.
//!
//! The engine never decodes audio itself; it only needs the recording
//! duration for the generated filename and the byte length of the opening
//! seconds to feed the speech recognizer.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WavError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid wav file: {source}")]
    Parse {
        path: String,
        #[source]
        source: hound::Error,
    },
}

/// Duration and prefix sizing derived from a wav header.
#[derive(Debug, Clone, Copy)]
pub struct WavShape {
    /// Samples per channel.
    pub samples: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavShape {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples as f64 / self.sample_rate as f64
    }

    /// Bytes per second of audio payload.
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// How many bytes from the start of the file cover the header plus the
    /// first `secs` seconds of audio.
    pub fn prefix_len(&self, secs: f64) -> u64 {
        // 1 KiB generously covers the RIFF header and any stray chunks.
        1024 + (self.byte_rate() as f64 * secs.max(0.0)) as u64
    }
}

/// Read the wav header of the given file.
pub fn inspect(path: &Path) -> Result<WavShape, WavError> {
    let reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(source) => WavError::Io {
            path: path.display().to_string(),
            source,
        },
        source => WavError::Parse {
            path: path.display().to_string(),
            source,
        },
    })?;

    let spec = reader.spec();
    Ok(WavShape {
        samples: reader.duration(),
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn write_test_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn duration_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_test_wav(&path, 8000, &vec![0i16; 16000]);

        let shape = inspect(&path).unwrap();
        assert_eq!(shape.sample_rate, 8000);
        assert_eq!(shape.channels, 1);
        assert!((shape.duration_secs() - 2.0).abs() < 1e-9);
        assert_eq!(shape.byte_rate(), 16000);
    }

    #[test]
    fn prefix_covers_header_and_audio() {
        let shape = WavShape {
            samples: 44100 * 600,
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
        };
        // 90s of CD audio is 90 * 176400 bytes plus header slack.
        assert_eq!(shape.prefix_len(90.0), 1024 + 90 * 176_400);
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wav");
        std::fs::write(&path, b"not a wav at all").unwrap();
        assert!(matches!(inspect(&path), Err(WavError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.wav");
        assert!(matches!(inspect(&path), Err(WavError::Io { .. })));
    }
}
