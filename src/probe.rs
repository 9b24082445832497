//! Media Probe (C4, spec §4.4).
//!
//! Three bounded worker pools (file-stat, duration, resolution) enrich a
//! media file's metadata before normalization. Every pool tolerates a
//! missing `ffprobe` binary: callers get `None` fields and a debug log line
//! rather than a hard error, since probing is enrichment, not a precondition
//! for ingestion (spec §4.4).
//!
//! Grounded on `ytdlp.rs`'s bounded-subprocess-with-timeout pattern and
//! `tool_manager.rs`'s `which`-based discovery idiom (`Tool::Ffprobe` there
//! is the same binary this module shells out to).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::{Mutex, Semaphore};

pub const STAT_POOL_SIZE: usize = 16;
pub const DURATION_POOL_SIZE: usize = 8;
pub const RESOLUTION_POOL_SIZE: usize = 6;
pub const DURATION_TIMEOUT: Duration = Duration::from_secs(3);
pub const RESOLUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// 30-day expiry for persisted duration cache entries (spec §4.4/§6).
const CACHE_ENTRY_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// File-stat result from the stat pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat {
    pub file_size: Option<u64>,
    pub modified_time: Option<i64>,
}

/// Combined probe output consumed by the normalization engine.
#[derive(Debug, Clone, Default)]
pub struct ProbedMedia {
    pub file_size: Option<u64>,
    pub modified_time: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub resolution_width: Option<i64>,
    pub resolution_height: Option<i64>,
    pub fps: Option<f64>,
}

/// One persisted entry in a source's duration cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DurationCacheEntry {
    duration_seconds: f64,
    file_size: u64,
    modified_time: i64,
    cached_at: i64,
}

/// Persistent, per-source duration cache: `data/duration_cache_<source>.json`
/// (spec §6). Keyed by absolute file path; a hit requires the stored
/// `file_size`/`modified_time` to match the file's current stat, so a
/// re-encoded file in place invalidates its own cache entry.
pub struct DurationCache {
    path: PathBuf,
    entries: HashMap<String, DurationCacheEntry>,
    dirty: bool,
}

impl DurationCache {
    /// Loads a cache file, dropping entries older than the 30-day TTL.
    /// A missing or unreadable file yields an empty cache rather than an
    /// error — the cache is a performance aid, never a correctness gate.
    pub async fn load(path: PathBuf, now_unix_s: i64) -> Self {
        let entries = match fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<HashMap<String, DurationCacheEntry>>(&text) {
                Ok(map) => map
                    .into_iter()
                    .filter(|(_, e)| now_unix_s - e.cached_at < CACHE_ENTRY_TTL_SECS)
                    .collect(),
                Err(e) => {
                    debug!("duration cache at {}: invalid json, starting fresh: {e}", path.display());
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self { path, entries, dirty: false }
    }

    /// Returns a cached duration if present and the stat still matches.
    fn get(&self, file_path: &str, file_size: u64, modified_time: i64) -> Option<f64> {
        let entry = self.entries.get(file_path)?;
        if entry.file_size == file_size && entry.modified_time == modified_time {
            Some(entry.duration_seconds)
        } else {
            None
        }
    }

    fn put(&mut self, file_path: String, duration_seconds: f64, file_size: u64, modified_time: i64, now_unix_s: i64) {
        self.entries.insert(
            file_path,
            DurationCacheEntry { duration_seconds, file_size, modified_time, cached_at: now_unix_s },
        );
        self.dirty = true;
    }

    /// Flushes to disk if anything changed since the last flush. Intended
    /// to be called once per batch so a probe failure mid-batch doesn't
    /// lose already-discovered durations (spec §5: "flushed per batch,
    /// tolerating stale reads").
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent).await;
        }
        let json = serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string());
        fs::write(&self.path, json).await?;
        self.dirty = false;
        Ok(())
    }
}

/// Media Probe: bounded worker pools for file-stat, duration, and
/// resolution enrichment (spec §4.4).
pub struct MediaProbe {
    ffprobe_path: Option<PathBuf>,
    stat_pool: Arc<Semaphore>,
    duration_pool: Arc<Semaphore>,
    resolution_pool: Arc<Semaphore>,
}

impl MediaProbe {
    pub fn new(ffprobe_path: Option<PathBuf>) -> Self {
        if ffprobe_path.is_none() {
            debug!("media probe: ffprobe not configured, duration/resolution enrichment disabled");
        }
        Self {
            ffprobe_path,
            stat_pool: Arc::new(Semaphore::new(STAT_POOL_SIZE)),
            duration_pool: Arc::new(Semaphore::new(DURATION_POOL_SIZE)),
            resolution_pool: Arc::new(Semaphore::new(RESOLUTION_POOL_SIZE)),
        }
    }

    /// Discovers `ffprobe` on `PATH`, mirroring `ToolManager::find_tool`'s
    /// fallback-to-`which` step.
    pub fn discover() -> Option<PathBuf> {
        which::which("ffprobe").ok()
    }

    pub fn is_available(&self) -> bool {
        self.ffprobe_path.is_some()
    }

    /// File size + mtime via the stat pool.
    pub async fn stat_file(&self, path: &Path) -> FileStat {
        let _permit = self.stat_pool.acquire().await;
        match fs::metadata(path).await {
            Ok(meta) => {
                let modified_time = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64);
                FileStat { file_size: Some(meta.len()), modified_time }
            }
            Err(e) => {
                debug!("media probe: stat failed for {}: {e}", path.display());
                FileStat::default()
            }
        }
    }

    /// Duration via the duration pool, consulting/populating `cache` first.
    pub async fn probe_duration(
        &self,
        path: &Path,
        stat: FileStat,
        cache: &Mutex<DurationCache>,
        now_unix_s: i64,
    ) -> Option<f64> {
        let (Some(file_size), Some(modified_time)) = (stat.file_size, stat.modified_time) else {
            return self.run_ffprobe_duration(path).await;
        };
        let path_str = path.to_string_lossy().to_string();

        if let Some(cached) = cache.lock().await.get(&path_str, file_size, modified_time) {
            return Some(cached);
        }

        let _permit = self.duration_pool.acquire().await;
        let duration = self.run_ffprobe_duration(path).await;
        if let Some(d) = duration {
            cache.lock().await.put(path_str, d, file_size, modified_time, now_unix_s);
        }
        duration
    }

    async fn run_ffprobe_duration(&self, path: &Path) -> Option<f64> {
        let Some(ffprobe) = &self.ffprobe_path else {
            return None;
        };
        let output = run_ffprobe(
            ffprobe,
            &["-v", "quiet", "-print_format", "json", "-show_format"],
            path,
            DURATION_TIMEOUT,
        )
        .await?;
        output
            .get("format")
            .and_then(|f| f.get("duration"))
            .and_then(|d| d.as_str())
            .and_then(|s| s.parse::<f64>().ok())
    }

    /// Resolution (+fps) via the resolution pool.
    pub async fn probe_resolution(&self, path: &Path) -> (Option<i64>, Option<i64>, Option<f64>) {
        let Some(ffprobe) = self.ffprobe_path.clone() else {
            return (None, None, None);
        };
        let _permit = self.resolution_pool.acquire().await;
        let Some(output) = run_ffprobe(
            &ffprobe,
            &["-v", "quiet", "-print_format", "json", "-show_streams"],
            path,
            RESOLUTION_TIMEOUT,
        )
        .await
        else {
            return (None, None, None);
        };

        let video_stream = output.get("streams").and_then(|s| s.as_array()).and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some("video"))
        });

        let Some(stream) = video_stream else {
            return (None, None, None);
        };
        let width = stream.get("width").and_then(|w| w.as_i64());
        let height = stream.get("height").and_then(|h| h.as_i64());
        let fps = stream
            .get("r_frame_rate")
            .and_then(|r| r.as_str())
            .and_then(parse_frame_rate);
        (width, height, fps)
    }

    /// Runs all three pools for one file and assembles a `ProbedMedia`.
    /// Tolerant end-to-end: a missing file or missing `ffprobe` yields a
    /// mostly-`None` result rather than an error (spec §4.4).
    pub async fn probe(&self, path: &Path, cache: &Mutex<DurationCache>, now_unix_s: i64) -> ProbedMedia {
        let stat = self.stat_file(path).await;
        let duration_seconds = self.probe_duration(path, stat, cache, now_unix_s).await;
        let (resolution_width, resolution_height, fps) = self.probe_resolution(path).await;
        ProbedMedia {
            file_size: stat.file_size,
            modified_time: stat.modified_time,
            duration_seconds,
            resolution_width,
            resolution_height,
            fps,
        }
    }
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let mut parts = s.splitn(2, '/');
    let num: f64 = parts.next()?.parse().ok()?;
    let den: f64 = parts.next().unwrap_or("1").parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

async fn run_ffprobe(ffprobe_path: &Path, args: &[&str], media_path: &Path, timeout: Duration) -> Option<Value> {
    let mut cmd = tokio::process::Command::new(ffprobe_path);
    cmd.args(args)
        .arg(media_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            debug!("media probe: failed to spawn ffprobe: {e}");
            return None;
        }
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("media probe: ffprobe failed for {}: {e}", media_path.display());
            return None;
        }
        Err(_) => {
            debug!("media probe: ffprobe timed out for {}", media_path.display());
            return None;
        }
    };

    if !output.status.success() {
        debug!("media probe: ffprobe exited non-zero for {}", media_path.display());
        return None;
    }

    serde_json::from_slice(&output.stdout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_fractional_frame_rate() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(30000.0 / 1001.0));
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
    }

    #[tokio::test]
    async fn probe_without_ffprobe_yields_none_fields() {
        let probe = MediaProbe::new(None);
        assert!(!probe.is_available());
        let dir = tempfile::tempdir().unwrap();
        let cache = Mutex::new(DurationCache::load(dir.path().join("cache.json"), 0).await);
        let file_path = dir.path().join("clip.mp4");
        std::fs::File::create(&file_path).unwrap().write_all(b"fake").unwrap();

        let result = probe.probe(&file_path, &cache, 0).await;
        assert!(result.duration_seconds.is_none());
        assert!(result.resolution_width.is_none());
        assert_eq!(result.file_size, Some(4));
    }

    #[tokio::test]
    async fn duration_cache_hit_short_circuits_without_ffprobe_configured() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        let file_path = dir.path().join("clip.mp4");
        std::fs::File::create(&file_path).unwrap().write_all(b"fake").unwrap();
        let meta = std::fs::metadata(&file_path).unwrap();
        let mtime = meta
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;

        let cache = Mutex::new(DurationCache::load(cache_path.clone(), 0).await);
        cache.lock().await.put(file_path.to_string_lossy().to_string(), 42.5, 4, mtime, 0);
        cache.lock().await.flush().await.unwrap();

        let reloaded = DurationCache::load(cache_path, 0).await;
        let hit = reloaded.get(&file_path.to_string_lossy(), 4, mtime);
        assert_eq!(hit, Some(42.5));
    }

    #[tokio::test]
    async fn stale_cache_entries_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        {
            let cache = Mutex::new(DurationCache::load(cache_path.clone(), 0).await);
            cache.lock().await.put("a.mp4".to_string(), 10.0, 1, 1, 0);
            cache.lock().await.flush().await.unwrap();
        }
        let reloaded = DurationCache::load(cache_path, CACHE_ENTRY_TTL_SECS + 1).await;
        assert!(reloaded.get("a.mp4", 1, 1).is_none());
    }
}
