use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a creator's display name was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatorNameSource {
    Db,
    Folder,
    Api,
    Scraping,
    Manual,
}

impl CreatorNameSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CreatorNameSource::Db => "db",
            CreatorNameSource::Folder => "folder",
            CreatorNameSource::Api => "api",
            CreatorNameSource::Scraping => "scraping",
            CreatorNameSource::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "db" => CreatorNameSource::Db,
            "folder" => CreatorNameSource::Folder,
            "api" => CreatorNameSource::Api,
            "scraping" => CreatorNameSource::Scraping,
            "manual" => CreatorNameSource::Manual,
            _ => return None,
        })
    }
}

/// `main` for the first-seen account, `alias`/`variation` for secondaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasType {
    Main,
    Alias,
    Variation,
}

impl AliasType {
    pub fn as_str(self) -> &'static str {
        match self {
            AliasType::Main => "main",
            AliasType::Alias => "alias",
            AliasType::Variation => "variation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "main" => AliasType::Main,
            "alias" => AliasType::Alias,
            "variation" => AliasType::Variation,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Account,
    Playlist,
    Hashtag,
    Location,
    Music,
    Search,
    Liked,
    Saved,
    Folder,
    Single,
}

impl SubscriptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionType::Account => "account",
            SubscriptionType::Playlist => "playlist",
            SubscriptionType::Hashtag => "hashtag",
            SubscriptionType::Location => "location",
            SubscriptionType::Music => "music",
            SubscriptionType::Search => "search",
            SubscriptionType::Liked => "liked",
            SubscriptionType::Saved => "saved",
            SubscriptionType::Folder => "folder",
            SubscriptionType::Single => "single",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "account" => SubscriptionType::Account,
            "playlist" => SubscriptionType::Playlist,
            "hashtag" => SubscriptionType::Hashtag,
            "location" => SubscriptionType::Location,
            "music" => SubscriptionType::Music,
            "search" => SubscriptionType::Search,
            "liked" => SubscriptionType::Liked,
            "saved" => SubscriptionType::Saved,
            "folder" => SubscriptionType::Folder,
            "single" => SubscriptionType::Single,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Image,
    Audio,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Image => "image",
            MediaType::Audio => "audio",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "video" => MediaType::Video,
            "image" => MediaType::Image,
            "audio" => MediaType::Audio,
            _ => return None,
        })
    }

    /// Classify by extension; returns `None` for unrecognized extensions.
    pub fn from_extension(ext: &str) -> Option<Self> {
        const VIDEO: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v"];
        const IMAGE: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        if VIDEO.contains(&ext.as_str()) {
            Some(MediaType::Video)
        } else if IMAGE.contains(&ext.as_str()) {
            Some(MediaType::Image)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicSource {
    Youtube,
    Spotify,
    Acrcloud,
    Manual,
}

impl MusicSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MusicSource::Youtube => "youtube",
            MusicSource::Spotify => "spotify",
            MusicSource::Acrcloud => "acrcloud",
            MusicSource::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "youtube" => MusicSource::Youtube,
            "spotify" => MusicSource::Spotify,
            "acrcloud" => MusicSource::Acrcloud,
            "manual" => MusicSource::Manual,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Low,
    Medium,
    High,
}

impl DifficultyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DifficultyLevel::Low => "low",
            DifficultyLevel::Medium => "medium",
            DifficultyLevel::High => "high",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "low" => DifficultyLevel::Low,
            "medium" => DifficultyLevel::Medium,
            "high" => DifficultyLevel::High,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    Pendiente,
    EnProceso,
    Completado,
    Descartado,
}

impl EditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EditStatus::Pendiente => "pendiente",
            EditStatus::EnProceso => "en_proceso",
            EditStatus::Completado => "completado",
            EditStatus::Descartado => "descartado",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pendiente" => EditStatus::Pendiente,
            "en_proceso" => EditStatus::EnProceso,
            "completado" => EditStatus::Completado,
            "descartado" => EditStatus::Descartado,
            _ => return None,
        })
    }
}

impl Default for EditStatus {
    fn default() -> Self {
        EditStatus::Pendiente
    }
}

/// Canonical processing-status values. Legacy rows may carry the Spanish
/// spelling (`pendiente`/`procesando`/`completado`/`error`); `from_str_lenient`
/// maps those onto this set on read rather than preserving two vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Skipped => "skipped",
        }
    }

    /// Accepts both the canonical English spellings and the legacy Spanish
    /// ones found in rows migrated from the original store.
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        Some(match s {
            "pending" | "pendiente" => ProcessingStatus::Pending,
            "processing" | "procesando" => ProcessingStatus::Processing,
            "completed" | "completado" => ProcessingStatus::Completed,
            "failed" | "error" => ProcessingStatus::Failed,
            "skipped" => ProcessingStatus::Skipped,
            _ => return None,
        })
    }
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        ProcessingStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Videos,
    Shorts,
    Feed,
    Reels,
    Stories,
    Highlights,
    Tagged,
    Playlist,
    Hashtag,
    Music,
    Liked,
    Favorites,
    Saved,
    Single,
    Folder,
    Location,
}

impl CategoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            CategoryType::Videos => "videos",
            CategoryType::Shorts => "shorts",
            CategoryType::Feed => "feed",
            CategoryType::Reels => "reels",
            CategoryType::Stories => "stories",
            CategoryType::Highlights => "highlights",
            CategoryType::Tagged => "tagged",
            CategoryType::Playlist => "playlist",
            CategoryType::Hashtag => "hashtag",
            CategoryType::Music => "music",
            CategoryType::Liked => "liked",
            CategoryType::Favorites => "favorites",
            CategoryType::Saved => "saved",
            CategoryType::Single => "single",
            CategoryType::Folder => "folder",
            CategoryType::Location => "location",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "videos" => CategoryType::Videos,
            "shorts" => CategoryType::Shorts,
            "feed" => CategoryType::Feed,
            "reels" => CategoryType::Reels,
            "stories" => CategoryType::Stories,
            "highlights" => CategoryType::Highlights,
            "tagged" => CategoryType::Tagged,
            "playlist" => CategoryType::Playlist,
            "hashtag" => CategoryType::Hashtag,
            "music" => CategoryType::Music,
            "liked" => CategoryType::Liked,
            "favorites" => CategoryType::Favorites,
            "saved" => CategoryType::Saved,
            "single" => CategoryType::Single,
            "folder" => CategoryType::Folder,
            "location" => CategoryType::Location,
            _ => return None,
        })
    }
}

/// The external application that produced a `DownloaderMapping` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalDbSource {
    FourKYoutube,
    FourKTokkit,
    FourKStogram,
}

impl ExternalDbSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ExternalDbSource::FourKYoutube => "4k_youtube",
            ExternalDbSource::FourKTokkit => "4k_tokkit",
            ExternalDbSource::FourKStogram => "4k_stogram",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "4k_youtube" => ExternalDbSource::FourKYoutube,
            "4k_tokkit" => ExternalDbSource::FourKTokkit,
            "4k_stogram" => ExternalDbSource::FourKStogram,
            _ => return None,
        })
    }
}

/// Fixed bootstrap platform names seeded on first boot (spec §6).
pub const BOOTSTRAP_PLATFORMS: &[&str] = &[
    "youtube", "tiktok", "instagram", "bilibili", "facebook", "twitter", "vimeo", "dailymotion",
    "pinterest", "flickr", "soundcloud", "newgrounds", "bitchute", "peertube", "spotify",
    "twitch", "iwara", "patreon", "onlyfans", "substack", "discord", "mastodon", "telegram",
    "reddit", "tumblr", "odnoklassniki", "vk", "whatsapp", "snapchat", "quora", "rule34",
    "kemono", "coomer",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creator {
    pub id: i64,
    pub name: String,
    pub platform_id: i64,
    pub parent_creator_id: Option<i64>,
    pub is_primary: bool,
    pub alias_type: AliasType,
    pub platform_creator_id: Option<String>,
    pub profile_url: Option<String>,
    pub creator_name_source: CreatorNameSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub name: String,
    pub platform_id: i64,
    pub subscription_type: SubscriptionType,
    pub is_account: bool,
    pub creator_id: Option<i64>,
    pub subscription_url: Option<String>,
    pub external_uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub platform_id: i64,
    pub platform_post_id: Option<String>,
    pub post_url: Option<String>,
    pub title_post: Option<String>,
    pub use_filename: bool,
    pub creator_id: Option<i64>,
    pub subscription_id: Option<i64>,
    pub publication_date: Option<DateTime<Utc>>,
    pub publication_date_source: Option<String>,
    pub publication_date_confidence: Option<u8>,
    pub download_date: Option<DateTime<Utc>>,
    pub is_carousel: bool,
    pub carousel_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub deletion_reason: Option<String>,
}

impl Post {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    pub post_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub thumbnail_path: Option<String>,
    pub file_size: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub media_type: MediaType,
    pub resolution_width: Option<i64>,
    pub resolution_height: Option<i64>,
    pub fps: Option<f64>,
    pub carousel_order: i64,
    pub is_primary: bool,
    pub detected_music: Option<String>,
    pub detected_music_artist: Option<String>,
    pub detected_music_confidence: Option<f64>,
    pub detected_characters: Vec<String>,
    pub music_source: Option<MusicSource>,
    pub final_music: Option<String>,
    pub final_music_artist: Option<String>,
    pub final_characters: Vec<String>,
    pub difficulty_level: Option<DifficultyLevel>,
    pub edit_status: EditStatus,
    pub edited_video_path: Option<String>,
    pub notes: Option<String>,
    pub processing_status: ProcessingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCategory {
    pub post_id: i64,
    pub category_type: CategoryType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderMapping {
    pub id: i64,
    pub media_id: i64,
    pub download_item_id: String,
    pub external_db_source: ExternalDbSource,
    pub is_carousel_item: bool,
    pub carousel_order: Option<i64>,
    pub carousel_base_id: Option<String>,
}

/// Identifies one caller for the operation manager / audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
