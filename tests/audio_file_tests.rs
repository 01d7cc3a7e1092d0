// Integration tests for WAV file capture
//
// Fixtures are written to a temp dir with hound so nothing binary is checked in.

use anyhow::Result;
use parlez::audio::{AudioBackend, AudioBackendConfig, AudioFile, FileBackend};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, frames: usize) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..frames {
        let s = ((i as f32 * 0.05).sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(s).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "hello.wav", 16000, 1, 8000);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);
    assert!(audio.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    assert!(audio.path.contains("hello.wav"));

    Ok(())
}

#[test]
fn test_stereo_file_is_downmixed() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "stereo.wav", 48000, 2, 4800);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.channels, 2);
    assert_eq!(audio.samples.len(), 4800);
    // 0.1s at 48kHz → 1600 samples at 16kHz
    let resampled = audio.resampled(16000);
    assert!((resampled.len() as i64 - 1600).abs() <= 1);

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let result = AudioFile::open("/nonexistent/path/to/audio.wav");
    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[tokio::test]
async fn test_file_backend_emits_padded_frames() -> Result<()> {
    let dir = TempDir::new()?;
    // 2.5 frames worth of audio
    let path = write_wav(dir.path(), "speech.wav", 16000, 1, 4096 * 2 + 2048);

    let mut backend = FileBackend::new(
        path.display().to_string(),
        AudioBackendConfig::default(),
    )
    .unpaced();

    let mut rx = backend.start().await?;
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }

    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.samples.len() == 4096));
    assert!(frames.iter().all(|f| f.sample_rate == 16000 && f.channels == 1));
    assert_eq!(frames[1].timestamp_ms, 256);
    // Tail is zero-padded
    assert!(frames[2].samples[2048..].iter().all(|&s| s == 0.0));

    backend.stop().await?;
    assert!(!backend.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_file_backend_paces_sub_millisecond_frames() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "short.wav", 16000, 1, 64);

    // 8 samples at 16kHz is half a millisecond per frame
    let config = AudioBackendConfig {
        frame_size: 8,
        ..AudioBackendConfig::default()
    };
    let mut backend = FileBackend::new(path.display().to_string(), config);

    let mut rx = backend.start().await?;
    let frames = tokio::time::timeout(std::time::Duration::from_secs(1), async {
        let mut n = 0;
        while rx.recv().await.is_some() {
            n += 1;
        }
        n
    })
    .await?;

    assert_eq!(frames, 8);
    backend.stop().await?;

    Ok(())
}

#[tokio::test]
async fn test_file_backend_missing_file_is_permission_error() {
    let mut backend = FileBackend::new("/nonexistent.wav".into(), AudioBackendConfig::default());
    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, parlez::TutorError::Permission(_)));
}

#[tokio::test]
async fn test_file_backend_stop_cancels_paced_stream() -> Result<()> {
    let dir = TempDir::new()?;
    // Ten seconds of audio, paced in real time
    let path = write_wav(dir.path(), "long.wav", 16000, 1, 160_000);

    let mut backend = FileBackend::new(path.display().to_string(), AudioBackendConfig::default());
    let mut rx = backend.start().await?;

    assert!(rx.recv().await.is_some());
    assert!(backend.is_capturing());

    backend.stop().await?;
    assert!(!backend.is_capturing());

    // Drains whatever was in flight, then ends
    let drained = tokio::time::timeout(std::time::Duration::from_secs(1), async {
        let mut n = 0;
        while rx.recv().await.is_some() {
            n += 1;
        }
        n
    })
    .await?;
    assert!(drained < 5);

    Ok(())
}
