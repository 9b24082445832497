//! Source Extractors (C3): one per external origin, sharing a `RawItem`
//! output type and an `extract`/`is_available` interface (spec §4.3).
//!
//! Grounded on `src/external_sources/{youtube,tiktok,instagram,organized}.py`
//! in the original implementation for per-source field mapping rules, and
//! on this crate's `ytdlp.rs` for the "external tool may simply not be
//! there" tolerance idiom (`is_available` mirrors `ToolManager`'s
//! discovery-before-use pattern).

pub mod organized;
pub mod stogram;
pub mod tokkit;
pub mod video_downloader;

use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::models::{CategoryType, ExternalDbSource, SubscriptionType};

/// Creator hint carried by a raw item, resolved by the normalization
/// engine (spec §4.5 step 3).
#[derive(Debug, Clone, Default)]
pub struct CreatorHint {
    pub name: String,
    pub profile_url: Option<String>,
    pub platform_creator_id: Option<String>,
}

/// Subscription hint carried by a raw item, resolved by the normalization
/// engine (spec §4.5 step 4).
#[derive(Debug, Clone)]
pub struct SubscriptionHint {
    pub name: String,
    pub subscription_type: SubscriptionType,
    pub subscription_url: Option<String>,
    pub external_uuid: Option<String>,
    pub is_account: bool,
}

/// One media file belonging to a raw item (a single post may bundle more
/// than one when it's a carousel).
#[derive(Debug, Clone)]
pub struct RawMedia {
    pub file_path: String,
    pub file_name: String,
    pub carousel_order: i64,
    pub duration_seconds: Option<f64>,
    pub resolution_width: Option<i64>,
    pub resolution_height: Option<i64>,
    pub download_item_id: String,
    pub is_carousel_item: bool,
    pub carousel_base_id: Option<String>,
}

/// Canonical extractor output before normalization (spec §4.3, GLOSSARY).
#[derive(Debug, Clone)]
pub struct RawItem {
    pub platform: String,
    pub platform_post_id: Option<String>,
    pub post_url: Option<String>,
    pub title: Option<String>,
    pub title_is_filename_derived: bool,
    pub creator: Option<CreatorHint>,
    pub subscription: Option<SubscriptionHint>,
    pub media: Vec<RawMedia>,
    pub category_hints: Vec<CategoryType>,
    pub publication_date: Option<DateTime<Utc>>,
    pub publication_date_source: Option<String>,
    pub download_date: Option<DateTime<Utc>>,
    /// `None` for the Organized-Folders extractor: there is no external
    /// downloader database to trace back to, so no `DownloaderMapping`
    /// row is written for these items.
    pub external_db_source: Option<ExternalDbSource>,
}

/// Shared interface every concrete extractor implements (spec §4.3).
pub trait Extractor {
    /// Cheap availability check (file exists / is a readable SQLite db /
    /// organized root exists). Extractors that fail this yield an empty
    /// iterator rather than erroring the whole operation (spec §7,
    /// `SourceUnavailable`).
    fn is_available(&self) -> bool;

    /// Extract up to `limit` raw items starting at `offset`, preserving
    /// carousel integrity (siblings of a base id selected under the limit
    /// are never split across pages, per spec §4.3.2/§4.3.3).
    fn extract(&self, offset: u64, limit: u64) -> CoreResult<Vec<RawItem>>;
}

/// Recognized media file extensions (spec §6).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

pub fn is_recognized_media_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    VIDEO_EXTENSIONS.contains(&ext.as_str()) || IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// Normalizes a 4K Video Downloader+ `service_name` into a canonical
/// platform key (spec §4.3.1).
pub fn normalize_video_downloader_platform(service_name: &str) -> Option<String> {
    let s = service_name.to_ascii_lowercase();
    Some(match s.as_str() {
        "youtube" => "youtube".to_string(),
        "facebook" => "facebook".to_string(),
        "twitter" | "x" => "twitter".to_string(),
        "vimeo" => "vimeo".to_string(),
        "dailymotion" => "dailymotion".to_string(),
        "twitch" => "twitch".to_string(),
        "soundcloud" => "soundcloud".to_string(),
        _ if s == "bilibili" || s.starts_with("bilibili/video") || s.starts_with("bilibili/tv") => {
            "bilibili".to_string()
        }
        _ => return None,
    })
}

/// Decodes the 4K Video Downloader+ `video_info.resolution` enum (spec §4.3.1).
pub fn decode_video_downloader_resolution(code: i64) -> Option<(i64, i64)> {
    Some(match code {
        5 => (640, 360),
        6 => (854, 480),
        7 => (1280, 720),
        8 => (1080, 1920),
        9 => (1440, 1080),
        10 => (1920, 1080),
        11 => (2560, 1440),
        _ => return None,
    })
}

/// YouTube shorts-vs-videos rule shared by extractors that derive it
/// directly from source metadata (spec §4.3.1, §4.5 step 8).
pub fn is_youtube_shorts(width: i64, height: i64, duration_seconds: Option<f64>) -> bool {
    let vertical = height > width;
    vertical && duration_seconds.map(|d| d <= 60.0).unwrap_or(false)
}

/// Extracts a platform creator id from a profile URL: YouTube/TikTok
/// `@handle` (text after the last `@`, stopping at `/` or `?`), Instagram
/// the first path segment (spec §4.3.1).
pub fn extract_platform_creator_id(profile_url: &str, platform: &str) -> Option<String> {
    if platform == "instagram" {
        let trimmed = profile_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.")
            .trim_start_matches("instagram.com/");
        let segment = trimmed.split(['/', '?']).next()?;
        if segment.is_empty() {
            return None;
        }
        return Some(segment.to_string());
    }
    let at_pos = profile_url.rfind('@')?;
    let rest = &profile_url[at_pos + 1..];
    let handle = rest.split(['/', '?']).next()?;
    if handle.is_empty() {
        None
    } else {
        Some(handle.to_string())
    }
}

/// Canonicalizes the well-known playlist-name variants (spec §4.3.1).
pub fn canonicalize_playlist_name(name: &str) -> String {
    match name {
        "Liked videos" | "Videos que me gustan" => "Liked videos".to_string(),
        n if n.eq_ignore_ascii_case("watch later") => "Watch Later".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_twitter_alias() {
        assert_eq!(normalize_video_downloader_platform("x"), Some("twitter".to_string()));
    }

    #[test]
    fn normalizes_bilibili_subpaths() {
        assert_eq!(
            normalize_video_downloader_platform("bilibili/video"),
            Some("bilibili".to_string())
        );
    }

    #[test]
    fn decodes_vertical_resolution() {
        assert_eq!(decode_video_downloader_resolution(8), Some((1080, 1920)));
    }

    #[test]
    fn shorts_rule_requires_vertical_and_short_duration() {
        assert!(is_youtube_shorts(1080, 1920, Some(45.0)));
        assert!(!is_youtube_shorts(1080, 1920, Some(180.0)));
        assert!(!is_youtube_shorts(1920, 1080, Some(45.0)));
    }

    #[test]
    fn extracts_handle_after_last_at() {
        assert_eq!(
            extract_platform_creator_id("http://www.youtube.com/@Alice", "youtube"),
            Some("Alice".to_string())
        );
    }

    #[test]
    fn extracts_instagram_first_segment() {
        assert_eq!(
            extract_platform_creator_id("https://www.instagram.com/alice/reels/", "instagram"),
            Some("alice".to_string())
        );
    }

    #[test]
    fn canonicalizes_liked_videos_variants() {
        assert_eq!(canonicalize_playlist_name("Videos que me gustan"), "Liked videos");
        assert_eq!(canonicalize_playlist_name("watch later"), "Watch Later");
    }
}
