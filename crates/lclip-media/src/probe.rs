//! Media inspection with a per-file cache.
//!
//! Probe results are cached by canonical path and evicted as soon as the
//! file's modification time or size changes. A file that cannot be probed,
//! or reports no duration, is `MediaUnreadable`: callers never get a default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use lclip_models::timestamp::secs_to_ms;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::MediaEngine;
use crate::error::{MediaError, MediaResult};
use crate::metrics;

/// Facts about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container duration in seconds
    pub duration_secs: f64,
    /// Width of the first video stream (0 when audio only)
    pub width: u32,
    /// Height of the first video stream (0 when audio only)
    pub height: u32,
    /// Codec of the first video stream, else of the first audio stream
    pub codec: String,
    pub video_streams: u32,
    pub audio_streams: u32,
}

impl MediaInfo {
    pub fn duration_ms(&self) -> u64 {
        secs_to_ms(self.duration_secs)
    }

    pub fn has_video(&self) -> bool {
        self.video_streams > 0
    }

    pub fn has_audio(&self) -> bool {
        self.audio_streams > 0
    }

    pub fn stream_count(&self) -> u32 {
        self.video_streams + self.audio_streams
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_ffprobe_json(path: &Path, stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::unreadable(path, format!("invalid ffprobe output: {}", e)))?;

    let of_type = |kind: &'static str| {
        probe
            .streams
            .iter()
            .filter(move |s| s.codec_type.as_deref() == Some(kind))
    };
    let video = of_type("video").next();
    let audio = of_type("audio").next();

    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video.and_then(|s| s.duration.as_deref()))
        .or_else(|| audio.and_then(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| MediaError::unreadable(path, "no duration reported"))?;

    if video.is_none() && audio.is_none() {
        return Err(MediaError::unreadable(path, "no audio or video streams"));
    }

    Ok(MediaInfo {
        duration_secs,
        width: video.and_then(|s| s.width).unwrap_or(0),
        height: video.and_then(|s| s.height).unwrap_or(0),
        codec: video
            .or(audio)
            .and_then(|s| s.codec_name.clone())
            .unwrap_or_default(),
        video_streams: of_type("video").count() as u32,
        audio_streams: of_type("audio").count() as u32,
    })
}

#[derive(Debug, Clone)]
struct CachedProbe {
    modified: SystemTime,
    len: u64,
    info: MediaInfo,
}

/// Cached front for the engine's inspection mode.
#[derive(Clone)]
pub struct MediaProbe {
    engine: Arc<dyn MediaEngine>,
    cache: Arc<RwLock<HashMap<PathBuf, CachedProbe>>>,
    timeout: Duration,
}

impl MediaProbe {
    pub fn new(engine: Arc<dyn MediaEngine>, timeout: Duration) -> Self {
        Self {
            engine,
            cache: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    /// Probe `path`, spawning the engine only on a cache miss.
    pub async fn probe(&self, path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
        let path = path.as_ref();
        let key = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| MediaError::unreadable(path, e.to_string()))?;
        let meta = tokio::fs::metadata(&key)
            .await
            .map_err(|e| MediaError::unreadable(path, e.to_string()))?;
        if !meta.is_file() {
            return Err(MediaError::unreadable(path, "not a regular file"));
        }
        let modified = meta.modified()?;
        let len = meta.len();

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(&key) {
                if hit.modified == modified && hit.len == len {
                    metrics::record_probe_cache(true);
                    return Ok(hit.info.clone());
                }
            }
        }

        metrics::record_probe_cache(false);
        debug!(path = %key.display(), "Probing media");
        let info = self.engine.inspect(&key, self.timeout).await?;

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                CachedProbe {
                    modified,
                    len,
                    info: info.clone(),
                },
            );
        Ok(info)
    }

    /// Drop any cached result for `path`.
    pub async fn invalidate(&self, path: impl AsRef<Path>) {
        if let Ok(key) = tokio::fs::canonicalize(path.as_ref()).await {
            self.cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use tempfile::TempDir;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720},
            {"codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"duration": "1432.512000"}
    }"#;

    #[test]
    fn test_parse_ffprobe_json() {
        let info = parse_ffprobe_json(Path::new("ep.mkv"), PROBE_JSON.as_bytes()).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.codec, "h264");
        assert_eq!(info.stream_count(), 2);
        assert_eq!(info.duration_ms(), 1_432_512);
    }

    #[test]
    fn test_missing_duration_is_unreadable() {
        let json = r#"{"streams": [{"codec_type": "video"}], "format": {}}"#;
        let err = parse_ffprobe_json(Path::new("x.mp4"), json.as_bytes()).unwrap_err();
        assert!(matches!(err, MediaError::MediaUnreadable { .. }));

        let err = parse_ffprobe_json(Path::new("x.mp4"), b"not json").unwrap_err();
        assert!(matches!(err, MediaError::MediaUnreadable { .. }));
    }

    #[test]
    fn test_audio_only_file() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "pcm_s16le", "duration": "2.5"}]}"#;
        let info = parse_ffprobe_json(Path::new("a.wav"), json.as_bytes()).unwrap();
        assert_eq!((info.width, info.height), (0, 0));
        assert!(!info.has_video());
        assert_eq!(info.duration_ms(), 2_500);
    }

    #[tokio::test]
    async fn test_cache_hits_until_file_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ep.mp4");
        let engine = Arc::new(FakeEngine::new());
        engine.add_video_file(&path, 60.0, 1280, 720).await;

        let probe = MediaProbe::new(engine.clone(), Duration::from_secs(5));
        probe.probe(&path).await.unwrap();
        probe.probe(&path).await.unwrap();
        assert_eq!(engine.inspect_count(), 1);

        // Rewriting changes size, so the entry is evicted.
        tokio::fs::write(&path, b"a longer placeholder body").await.unwrap();
        probe.probe(&path).await.unwrap();
        assert_eq!(engine.inspect_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let probe = MediaProbe::new(Arc::new(FakeEngine::new()), Duration::from_secs(5));
        let err = probe.probe("/nonexistent/episode.mkv").await.unwrap_err();
        assert!(matches!(err, MediaError::MediaUnreadable { .. }));
    }
}
