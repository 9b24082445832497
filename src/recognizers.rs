//! Capability traits for music recognition, face/character detection and
//! thumbnail production — the `analyze_videos`/`regenerate_thumbnails`
//! operation bodies depend on these interfaces, not on a concrete
//! recognizer. No backend is implemented here; that integration work is
//! explicitly out of scope (spec §1 Non-goals).
//!
//! Grounded on `acrcloud_recognizer.py`'s `recognize_audio_file`/
//! `recognize_audio_data` split and the `Media` columns it fills
//! (`detected_music*`, `music_source`, `detected_characters`) — the traits
//! below are the Rust seam where that integration would plug in.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::MusicSource;

/// Result of a music-identification attempt against one media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicMatch {
    pub title: String,
    pub artist: Option<String>,
    pub confidence: f64,
    pub source: MusicSource,
}

/// Implemented by a music-recognition backend (e.g. an ACRCloud client).
#[async_trait]
pub trait MusicRecognizer: Send + Sync {
    async fn recognize(&self, media_path: &Path) -> CoreResult<Option<MusicMatch>>;
}

/// Implemented by a face/character-recognition backend. Matches against a
/// known-faces corpus rooted at `AppConfig::known_faces_path`.
#[async_trait]
pub trait CharacterRecognizer: Send + Sync {
    async fn detect(&self, media_path: &Path) -> CoreResult<Vec<String>>;
}

/// Implemented by a thumbnail backend (frame extraction for video, resize
/// for images). Returns the absolute path of the thumbnail it wrote under
/// `AppConfig::thumbnails_path`.
#[async_trait]
pub trait ThumbnailProducer: Send + Sync {
    async fn produce(&self, media_path: &Path, destination: &Path) -> CoreResult<()>;
}

/// A `MusicRecognizer`/`CharacterRecognizer`/`ThumbnailProducer` that
/// performs no recognition — used where no backend is configured so
/// operation bodies still have something to call.
pub struct NoopRecognizer;

#[async_trait]
impl MusicRecognizer for NoopRecognizer {
    async fn recognize(&self, _media_path: &Path) -> CoreResult<Option<MusicMatch>> {
        Ok(None)
    }
}

#[async_trait]
impl CharacterRecognizer for NoopRecognizer {
    async fn detect(&self, _media_path: &Path) -> CoreResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ThumbnailProducer for NoopRecognizer {
    async fn produce(&self, _media_path: &Path, _destination: &Path) -> CoreResult<()> {
        Err(crate::error::CoreError::Configuration(
            "no thumbnail backend configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_recognizer_finds_nothing() {
        let r = NoopRecognizer;
        assert_eq!(r.recognize(Path::new("/tmp/x.mp3")).await.unwrap(), None);
        assert!(r.detect(Path::new("/tmp/x.mp4")).await.unwrap().is_empty());
    }
}
