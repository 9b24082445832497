//! Configuration surface (spec §6).
//!
//! Read from environment variables with the same keys and defaults
//! spec.md documents. Follows the teacher's `settings.rs` idiom of
//! free-function defaults rather than pulling in a config-file crate the
//! teacher doesn't use.

use std::path::PathBuf;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub organized_base_path: Option<PathBuf>,
    pub external_youtube_db: Option<PathBuf>,
    pub external_tiktok_db: Option<PathBuf>,
    pub external_instagram_db: Option<PathBuf>,
    pub max_concurrent_processing: usize,
    pub thumbnails_path: Option<PathBuf>,
    pub known_faces_path: Option<PathBuf>,
    pub websocket_host: String,
    pub websocket_port: u16,
    pub slow_query_ms: u64,
    pub cache_max_size: usize,
    pub cache_default_ttl_s: u64,
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn default_max_concurrent_processing() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl AppConfig {
    /// Load configuration from the process environment. `DATABASE_PATH`
    /// is the only required key; everything else has a spec-mandated
    /// default.
    pub fn from_env() -> CoreResult<Self> {
        let database_path = env_path("DATABASE_PATH")
            .ok_or_else(|| CoreError::Configuration("DATABASE_PATH is required".to_string()))?;

        Ok(Self {
            database_path,
            organized_base_path: env_path("ORGANIZED_BASE_PATH"),
            external_youtube_db: env_path("EXTERNAL_YOUTUBE_DB"),
            external_tiktok_db: env_path("EXTERNAL_TIKTOK_DB"),
            external_instagram_db: env_path("EXTERNAL_INSTAGRAM_DB"),
            max_concurrent_processing: env_parsed(
                "MAX_CONCURRENT_PROCESSING",
                default_max_concurrent_processing(),
            ),
            thumbnails_path: env_path("THUMBNAILS_PATH"),
            known_faces_path: env_path("KNOWN_FACES_PATH"),
            websocket_host: std::env::var("WEBSOCKET_HOST").unwrap_or_else(|_| "localhost".to_string()),
            websocket_port: env_parsed("WEBSOCKET_PORT", 8766),
            slow_query_ms: env_parsed("SLOW_QUERY_MS", 100),
            cache_max_size: env_parsed("CACHE_MAX_SIZE", 2000),
            cache_default_ttl_s: env_parsed("CACHE_DEFAULT_TTL_S", 600),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_concurrent_processing_is_at_least_one() {
        assert!(default_max_concurrent_processing() >= 1);
    }
}
