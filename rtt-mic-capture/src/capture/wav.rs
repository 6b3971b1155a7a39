//! PCM to WAV reconstruction
//!
//! The leading `discard` bytes of a capture hold transport warm-up noise and
//! are dropped. What remains is written frame by frame, so the data chunk of
//! the resulting file is byte-for-byte the capture slice. A trailing partial
//! frame is truncated.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, info};

use crate::config::AudioConfig;
use crate::error::{CaptureError, Result};

/// Layout of the little-endian PCM stream coming off the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    /// Bytes per sample, 1 or 2
    pub sample_width: u16,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            sample_width: 2,
            channels: 1,
        }
    }
}

impl From<&AudioConfig> for PcmFormat {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            sample_width: config.sample_width,
            channels: config.channels,
        }
    }
}

impl PcmFormat {
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.sample_width as usize
    }

    /// `None` when the rate does not fit the header's 32-bit field
    pub fn byte_rate(&self) -> Option<u32> {
        self.sample_rate.checked_mul(self.block_align() as u32)
    }

    /// Reject layouts that would not get the plain 44-byte PCM header.
    /// Wider samples or more than two channels make the writer switch to
    /// WAVE_FORMAT_EXTENSIBLE.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CaptureError::InvalidConfig("audio.sample_rate must be > 0".to_string()));
        }
        if !(1..=2).contains(&self.sample_width) {
            return Err(CaptureError::InvalidConfig(format!(
                "audio.sample_width must be 1 or 2 bytes, got {}", self.sample_width)));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(CaptureError::InvalidConfig(format!(
                "audio.channels must be 1 or 2, got {}", self.channels)));
        }
        if self.byte_rate().is_none() {
            return Err(CaptureError::InvalidConfig(format!(
                "audio.sample_rate {} overflows the WAV byte rate", self.sample_rate)));
        }
        Ok(())
    }

    /// Whole frames contained in `bytes`
    pub fn frame_count(&self, bytes: usize) -> usize {
        bytes / self.block_align()
    }

    fn spec(&self) -> WavSpec {
        WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.sample_width * 8,
            sample_format: SampleFormat::Int,
        }
    }
}

/// File name of the encoded audio for a capture stamp
pub fn wav_file_name(stamp: &str) -> String {
    format!("converted_pcm_{}.wav", stamp)
}

/// Encode `buffer[discard..]` into a WAV file at `path`.
///
/// Returns the number of frames written. A discard larger than the buffer
/// gives a valid file with no frames.
pub fn encode(buffer: &[u8], discard: usize, format: &PcmFormat, path: &Path) -> Result<usize> {
    format.validate()?;
    let payload = buffer.get(discard..).unwrap_or_default();
    let frames = format.frame_count(payload.len());
    let used = frames * format.block_align();
    debug!("Encoding {} of {} bytes after discarding {} ({} trailing bytes truncated)",
           used, buffer.len(), discard.min(buffer.len()), payload.len() - used);

    let mut writer = WavWriter::create(path, format.spec())?;
    let width = format.sample_width as usize;
    for sample in payload[..used].chunks_exact(width) {
        match sample {
            [byte] => writer.write_sample(unsigned_8bit_as_signed(*byte))?,
            [lo, hi] => writer.write_sample(i16::from_le_bytes([*lo, *hi]))?,
            _ => return Err(CaptureError::InvalidConfig(format!(
                "unsupported sample width {}", width))),
        }
    }
    writer.finalize()?;

    info!("Wrote {} frames ({:.2} s) to {}",
          frames, frames as f64 / format.sample_rate as f64, path.display());
    Ok(frames)
}

/// 8-bit WAV samples are stored unsigned; the writer offsets signed input by
/// 128, so undo that to keep the stored byte identical to the captured one.
fn unsigned_8bit_as_signed(byte: u8) -> i8 {
    (byte as i16 - 128) as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_canonical_header_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let buffer: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
        let format = PcmFormat::default();

        let frames = encode(&buffer, 100, &format, &path).unwrap();
        assert_eq!(frames, 450);

        let file = std::fs::read(&path).unwrap();
        assert_eq!(&file[0..4], b"RIFF");
        assert_eq!(u32_at(&file, 4) as usize, file.len() - 8);
        assert_eq!(&file[8..12], b"WAVE");
        assert_eq!(&file[12..16], b"fmt ");
        assert_eq!(u32_at(&file, 16), 16);
        assert_eq!(u16_at(&file, 20), 1); // PCM
        assert_eq!(u16_at(&file, 22), 1);
        assert_eq!(u32_at(&file, 24), 16_000);
        assert_eq!(u32_at(&file, 28), 32_000);
        assert_eq!(u16_at(&file, 32), 2);
        assert_eq!(u16_at(&file, 34), 16);
        assert_eq!(&file[36..40], b"data");
        assert_eq!(u32_at(&file, 40), 900);
        assert_eq!(&file[44..], &buffer[100..1000]);
    }

    #[test]
    fn test_trailing_partial_frame_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.wav");
        let buffer = vec![0x11u8; 21];

        let frames = encode(&buffer, 0, &PcmFormat::default(), &path).unwrap();
        assert_eq!(frames, 10);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 10);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44 + 20);
    }

    #[test]
    fn test_discard_past_end_gives_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");

        let frames = encode(&[1u8; 1002], 16_000, &PcmFormat::default(), &path).unwrap();
        assert_eq!(frames, 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 0);
        assert_eq!(reader.spec().sample_rate, 16_000);
    }

    #[test]
    fn test_8bit_bytes_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u8.wav");
        let buffer: Vec<u8> = vec![0, 1, 127, 128, 129, 255];
        let format = PcmFormat { sample_rate: 8_000, sample_width: 1, channels: 1 };

        assert_eq!(encode(&buffer, 0, &format, &path).unwrap(), 6);
        let file = std::fs::read(&path).unwrap();
        assert_eq!(&file[file.len() - 6..], &buffer[..]);
    }

    #[test]
    fn test_stereo_frame_math() {
        let format = PcmFormat { sample_rate: 48_000, sample_width: 2, channels: 2 };
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.byte_rate(), Some(192_000));
        assert_eq!(format.frame_count(4099), 1024);
    }

    #[test]
    fn test_stereo_8bit_header_stays_plain_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let buffer: Vec<u8> = (0..=255u8).collect();
        let format = PcmFormat { sample_rate: 22_050, sample_width: 1, channels: 2 };

        assert_eq!(encode(&buffer, 6, &format, &path).unwrap(), 125);

        let file = std::fs::read(&path).unwrap();
        assert_eq!(file.len(), 44 + 250);
        assert_eq!(u32_at(&file, 16), 16);
        assert_eq!(u16_at(&file, 20), 1); // PCM, not 0xFFFE
        assert_eq!(u16_at(&file, 22), 2);
        assert_eq!(u32_at(&file, 24), 22_050);
        assert_eq!(u32_at(&file, 28), 44_100);
        assert_eq!(u16_at(&file, 32), 2);
        assert_eq!(u16_at(&file, 34), 8);
        assert_eq!(&file[36..40], b"data");
        assert_eq!(u32_at(&file, 40), 250);
        assert_eq!(&file[44..], &buffer[6..256]);
    }

    #[test]
    fn test_extensible_layouts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.wav");

        for format in [
            PcmFormat { sample_rate: 16_000, sample_width: 3, channels: 1 },
            PcmFormat { sample_rate: 16_000, sample_width: 4, channels: 1 },
            PcmFormat { sample_rate: 16_000, sample_width: 2, channels: 3 },
        ] {
            let err = encode(&[0u8; 64], 0, &format, &path).unwrap_err();
            assert!(matches!(err, CaptureError::InvalidConfig(_)), "{:?}", format);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_byte_rate_overflow_rejected() {
        let format = PcmFormat { sample_rate: u32::MAX, sample_width: 2, channels: 2 };
        assert_eq!(format.byte_rate(), None);
        assert!(matches!(format.validate(), Err(CaptureError::InvalidConfig(_))));

        let largest = PcmFormat { sample_rate: u32::MAX / 4, sample_width: 2, channels: 2 };
        assert!(largest.validate().is_ok());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(wav_file_name("07_03_2024-09-05"), "converted_pcm_07_03_2024-09-05.wav");
    }
}
