use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::SyncError;

/// One extracted segment and, once ASR has run, its transcript.
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub index: usize,
    pub start_time: f64,
    pub duration: f64,
    pub wav_path: PathBuf,
    pub transcript: Option<String>,
}

impl AudioSample {
    pub fn minute(&self) -> u32 {
        (self.start_time / 60.0).floor() as u32
    }
}

/// Preprocessing applied to every segment before ASR, in order: high-pass,
/// loudness normalization to -16 LUFS, spectral denoise, gentle compander,
/// peak limiter.
pub const AUDIO_FILTER_CHAIN: &str = "highpass=f=80,loudnorm=I=-16:TP=-1.5:LRA=11,afftdn=nr=12,acompressor=threshold=-24dB:ratio=2:attack=20:release=250,alimiter=limit=0.95";

/// Boundary to the demuxer: duration probing and segment extraction.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Media duration in seconds, if it can be determined.
    async fn duration(&self, media: &Path) -> Option<f64>;

    /// Extract `duration` seconds starting at `start` into a 16 kHz mono
    /// PCM WAV at `out`.
    async fn extract(
        &self,
        media: &Path,
        start: f64,
        duration: f64,
        out: &Path,
    ) -> Result<(), SyncError>;
}

/// ffmpeg/ffprobe-backed media source.
pub struct FfmpegMedia;

#[async_trait]
impl MediaSource for FfmpegMedia {
    async fn duration(&self, media: &Path) -> Option<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(media)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            warn!("ffprobe could not determine duration of {}", media.display());
            return None;
        }
        let duration = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
        debug!("media duration: {:.1}s", duration);
        Some(duration)
    }

    async fn extract(
        &self,
        media: &Path,
        start: f64,
        duration: f64,
        out: &Path,
    ) -> Result<(), SyncError> {
        debug!("extracting {:.0}s segment at {:.0}s", duration, start);
        let status = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-ss"])
            .arg(format!("{start:.3}"))
            .arg("-t")
            .arg(format!("{duration:.3}"))
            .arg("-i")
            .arg(media)
            .args([
                "-vn",
                "-acodec",
                "pcm_s16le",
                "-ar",
                "16000",
                "-ac",
                "1",
                "-af",
                AUDIO_FILTER_CHAIN,
            ])
            .arg(out)
            .status()
            .await
            .map_err(|e| SyncError::Extraction(format!("failed to run ffmpeg: {e}")))?;
        if !status.success() {
            return Err(SyncError::Extraction(format!(
                "ffmpeg exited with {status} for segment at {start:.0}s"
            )));
        }
        verify_segment(out)?;
        Ok(())
    }
}

/// Reject unreadable or empty extractions; returns the segment length.
pub fn verify_segment(path: &Path) -> Result<f64, SyncError> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        SyncError::Extraction(format!("unreadable segment {}: {e}", path.display()))
    })?;
    let spec = reader.spec();
    let frames = reader.len() as f64 / spec.channels as f64;
    let seconds = frames / spec.sample_rate as f64;
    if seconds <= 0.0 {
        return Err(SyncError::Extraction(format!(
            "empty segment {}",
            path.display()
        )));
    }
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    fn write_wav(path: &Path, samples: usize) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..samples {
            writer.write_sample((i % 128) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn verify_accepts_real_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.wav");
        write_wav(&path, 16000);
        let seconds = verify_segment(&path).unwrap();
        assert!((seconds - 1.0).abs() < 1e-6);
    }

    #[test]
    fn verify_rejects_empty_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_wav(&path, 0);
        assert!(matches!(
            verify_segment(&path),
            Err(SyncError::Extraction(_))
        ));
    }

    #[test]
    fn verify_rejects_missing_file() {
        assert!(matches!(
            verify_segment(Path::new("/nonexistent/sample.wav")),
            Err(SyncError::Extraction(_))
        ));
    }

    #[test]
    fn sample_minute_floors_start_time() {
        let sample = AudioSample {
            index: 0,
            start_time: 359.9,
            duration: 60.0,
            wav_path: PathBuf::from("x.wav"),
            transcript: None,
        };
        assert_eq!(sample.minute(), 5);
    }
}
