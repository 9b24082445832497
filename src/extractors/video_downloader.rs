//! 4K Video Downloader+ extractor (spec §4.3.1).
//!
//! Grounded on `src/external_sources/youtube.py` for the metadata-type
//! grouping and subscription-resolution rules; reads are plain `rusqlite`
//! queries against the external (read-only) database, following this
//! crate's own `db/read.rs` query style.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use rusqlite::Connection;

use crate::error::{CoreError, CoreResult};
use crate::models::{CategoryType, ExternalDbSource, SubscriptionType};

use super::{
    canonicalize_playlist_name, decode_video_downloader_resolution, extract_platform_creator_id,
    is_youtube_shorts, normalize_video_downloader_platform, CreatorHint, Extractor, RawItem,
    RawMedia, SubscriptionHint,
};

/// Metadata type codes from `media_item_metadata.type` (spec §4.3.1).
mod meta_type {
    pub const CREATOR_NAME: i64 = 0;
    pub const CREATOR_URL: i64 = 1;
    pub const PLAYLIST_NAME: i64 = 3;
    pub const PLAYLIST_URL: i64 = 4;
    pub const CHANNEL_NAME: i64 = 5;
    pub const CHANNEL_URL: i64 = 6;
    pub const SUBSCRIPTION_INFO: i64 = 7;
}

pub struct VideoDownloaderExtractor {
    db_path: PathBuf,
}

impl VideoDownloaderExtractor {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open(&self) -> CoreResult<Connection> {
        Connection::open(&self.db_path)
            .map_err(|e| CoreError::SourceUnavailable(format!("video downloader db: {e}")))
    }
}

impl Extractor for VideoDownloaderExtractor {
    fn is_available(&self) -> bool {
        self.db_path.exists()
    }

    fn extract(&self, offset: u64, limit: u64) -> CoreResult<Vec<RawItem>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;

        let mut stmt = conn.prepare(
            "SELECT download_item.id, download_item.filename, \
                    media_item_description.title, media_item_description.duration, \
                    url_description.service_name, media_info.id \
             FROM download_item \
             JOIN media_item_description ON media_item_description.download_item_id = download_item.id \
             LEFT JOIN url_description ON url_description.media_item_description_id = media_item_description.id \
             LEFT JOIN media_info ON media_info.download_item_id = download_item.id \
             ORDER BY download_item.id ASC LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt.query_map([limit as i64, offset as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (download_item_id, filename, title, duration_ms, service_name, media_info_id) = row?;

            if !Path::new(&filename).exists() {
                debug!("video-downloader: skipping missing file {filename}");
                continue;
            }

            let platform = service_name
                .as_deref()
                .and_then(normalize_video_downloader_platform)
                .unwrap_or_else(|| "youtube".to_string());

            let metadata = self.load_metadata(&conn, download_item_id)?;
            let resolution = media_info_id
                .and_then(|id| self.load_resolution(&conn, id).ok())
                .flatten();

            let duration_seconds = duration_ms.map(|ms| ms as f64 / 1000.0);

            let creator_name = metadata.get(&meta_type::CREATOR_NAME).cloned();
            let creator_url = metadata.get(&meta_type::CREATOR_URL).cloned();
            let playlist_name = metadata.get(&meta_type::PLAYLIST_NAME).cloned();
            let playlist_url = metadata.get(&meta_type::PLAYLIST_URL).cloned();
            let channel_name = metadata.get(&meta_type::CHANNEL_NAME).cloned();
            let subscription_info = metadata.get(&meta_type::SUBSCRIPTION_INFO).cloned();

            let creator = creator_name.map(|name| CreatorHint {
                platform_creator_id: creator_url
                    .as_deref()
                    .and_then(|u| extract_platform_creator_id(u, &platform)),
                profile_url: creator_url,
                name,
            });

            let subscription = if let Some(playlist_name) = playlist_name {
                Some(SubscriptionHint {
                    name: canonicalize_playlist_name(&playlist_name),
                    subscription_type: SubscriptionType::Playlist,
                    subscription_url: playlist_url,
                    external_uuid: None,
                    is_account: true,
                })
            } else if channel_name.is_some() && subscription_info.is_some() {
                Some(SubscriptionHint {
                    name: channel_name.unwrap(),
                    subscription_type: SubscriptionType::Account,
                    subscription_url: creator.as_ref().and_then(|c| c.profile_url.clone()),
                    external_uuid: None,
                    is_account: true,
                })
            } else {
                None
            };

            let file_name = Path::new(&filename)
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| filename.clone());

            let category = match resolution {
                Some((w, h)) if is_youtube_shorts(w, h, duration_seconds) && platform == "youtube" => {
                    CategoryType::Shorts
                }
                _ => CategoryType::Videos,
            };

            let media = RawMedia {
                file_path: filename.clone(),
                file_name,
                carousel_order: 0,
                duration_seconds,
                resolution_width: resolution.map(|(w, _)| w),
                resolution_height: resolution.map(|(_, h)| h),
                download_item_id: download_item_id.to_string(),
                is_carousel_item: false,
                carousel_base_id: None,
            };

            items.push(RawItem {
                platform,
                platform_post_id: Some(download_item_id.to_string()),
                post_url: creator.as_ref().and_then(|c| c.profile_url.clone()),
                title: title.clone(),
                title_is_filename_derived: title.is_none(),
                creator,
                subscription,
                media: vec![media],
                category_hints: vec![category],
                publication_date: None,
                publication_date_source: Some("4k_video_downloader".to_string()),
                download_date: Some(Utc::now()),
                external_db_source: Some(ExternalDbSource::FourKYoutube),
            });
        }

        Ok(items)
    }
}

impl VideoDownloaderExtractor {
    fn load_metadata(&self, conn: &Connection, download_item_id: i64) -> CoreResult<HashMap<i64, String>> {
        let mut stmt = conn.prepare(
            "SELECT type, value FROM media_item_metadata WHERE download_item_id = ?1",
        )?;
        let rows = stmt.query_map([download_item_id], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (t, v) = row?;
            out.insert(t, v);
        }
        Ok(out)
    }

    fn load_resolution(&self, conn: &Connection, media_info_id: i64) -> CoreResult<Option<(i64, i64)>> {
        let code: Option<i64> = conn
            .query_row(
                "SELECT resolution FROM video_info WHERE media_info_id = ?1",
                [media_info_id],
                |r| r.get(0),
            )
            .ok();
        Ok(code.and_then(decode_video_downloader_resolution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_source_yields_empty() {
        let ext = VideoDownloaderExtractor::new(PathBuf::from("/nonexistent/path.sqlite"));
        assert!(!ext.is_available());
        assert!(ext.extract(0, 10).unwrap().is_empty());
    }
}
